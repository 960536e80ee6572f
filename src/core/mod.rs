mod engine;
mod market;
mod policy;
mod series;
mod solver;
mod sweep;
mod types;

pub use engine::{Trial, TrialStatus, add_one_year, run_trial};
pub use market::{InflationSource, MarketData};
pub use policy::{PeriodWithdrawal, PolicyState};
pub use series::{AnnualRateSeries, DailyPriceSeries, Granularity, PeriodSeries};
pub use solver::{SolveConfig, SolveIteration, SolveResult, solve_max_rate};
pub use sweep::{Backtest, SweepResult};
pub use types::{
    AggregateStats, BacktestConfig, Holdings, Outcome, RateBranch, Termination, TraceYear,
    TrialReport, TrialTrace, WithdrawalPolicy,
};
