use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, info};

use super::engine::run_trial;
use super::market::MarketData;
use super::types::{AggregateStats, BacktestConfig, TrialReport, TrialTrace};
use crate::error::{BacktestError, Result};

#[derive(Debug, Clone)]
pub struct SweepResult {
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub stats: AggregateStats,
    pub traces: Vec<TrialTrace>,
}

#[derive(Debug)]
pub struct Backtest<'a> {
    config: BacktestConfig,
    data: &'a MarketData,
}

impl<'a> Backtest<'a> {
    pub fn new(config: BacktestConfig, data: &'a MarketData) -> Result<Self> {
        config.validate()?;
        if config.policy.is_adaptive() && data.dividend_yield.is_none() {
            return Err(BacktestError::config(
                "the adaptive dual-rate policy requires a dividend yield series",
            ));
        }
        Ok(Self { config, data })
    }

    pub fn window(&self) -> Option<(NaiveDate, NaiveDate)> {
        let (mut first, mut last) = self.data.coverage()?;
        last = last.min(self.config.as_of);
        if let Some((from, to)) = self.config.start_range {
            first = first.max(from);
            last = last.min(to);
        }
        (first <= last).then_some((first, last))
    }

    pub fn start_dates(&self) -> Vec<NaiveDate> {
        match self.window() {
            Some((first, last)) => first.iter_days().take_while(|d| *d <= last).collect(),
            None => Vec::new(),
        }
    }

    pub fn run_trial(&self, start: NaiveDate) -> TrialReport {
        run_trial(&self.config, self.data, start)
    }

    pub fn run(&self) -> Result<SweepResult> {
        let window = self.window();
        let dates = self.start_dates();
        info!(
            trials = dates.len(),
            ?window,
            policy = ?self.config.policy,
            horizon_years = self.config.horizon_years,
            "starting backtest sweep"
        );

        let mut result = match self.config.threads {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| {
                        BacktestError::config(format!("failed to build worker pool: {e}"))
                    })?;
                pool.install(|| self.run_dates(&dates))
            }
            None => self.run_dates(&dates),
        };
        result.window = window;

        info!(
            success = result.stats.success_count,
            fail = result.stats.fail_count,
            na = result.stats.na_count,
            success_rate = ?result.stats.success_rate(),
            "backtest sweep finished"
        );
        Ok(result)
    }

    /// Runs the given start dates in parallel. The totals do not depend on the
    /// order of `dates`; traces come back in the order given.
    pub fn run_dates(&self, dates: &[NaiveDate]) -> SweepResult {
        let window = dates.iter().min().copied().zip(dates.iter().max().copied());

        if self.config.record_trace {
            let reports: Vec<TrialReport> =
                dates.par_iter().map(|&start| self.run_trial(start)).collect();
            let stats = reports.iter().map(AggregateStats::from_report).sum();
            let traces = reports.into_iter().filter_map(|r| r.trace).collect();
            return SweepResult {
                window,
                stats,
                traces,
            };
        }

        let stats = dates
            .par_iter()
            .map(|&start| AggregateStats::from_report(&self.run_trial(start)))
            .reduce(AggregateStats::default, AggregateStats::merge);
        debug!(trials = stats.trials(), "reduced trial outcomes");

        SweepResult {
            window,
            stats,
            traces: Vec::new(),
        }
    }
}
