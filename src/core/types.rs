use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{BacktestError, Result};

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WithdrawalPolicy {
    #[serde(rename_all = "camelCase")]
    FixedRate { rate: f64 },
    #[serde(rename_all = "camelCase")]
    AdaptiveDualRate {
        min_rate: f64,
        max_rate: f64,
        dividend_tax_rate: f64,
    },
}

impl WithdrawalPolicy {
    pub fn is_adaptive(&self) -> bool {
        matches!(self, WithdrawalPolicy::AdaptiveDualRate { .. })
    }

    pub fn dividend_tax_rate(&self) -> f64 {
        match *self {
            WithdrawalPolicy::FixedRate { .. } => 0.0,
            WithdrawalPolicy::AdaptiveDualRate {
                dividend_tax_rate, ..
            } => dividend_tax_rate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub horizon_years: u32,
    pub policy: WithdrawalPolicy,
    pub as_of: NaiveDate,
    pub start_range: Option<(NaiveDate, NaiveDate)>,
    pub record_trace: bool,
    pub threads: Option<usize>,
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::config("initial_capital must be > 0"));
        }

        if self.horizon_years == 0 {
            return Err(BacktestError::config("horizon_years must be >= 1"));
        }

        match self.policy {
            WithdrawalPolicy::FixedRate { rate } => {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(BacktestError::config("rate must be between 0 and 1"));
                }
            }
            WithdrawalPolicy::AdaptiveDualRate {
                min_rate,
                max_rate,
                dividend_tax_rate,
            } => {
                if !(0.0..=1.0).contains(&min_rate) || !(0.0..=1.0).contains(&max_rate) {
                    return Err(BacktestError::config(
                        "min_rate and max_rate must be between 0 and 1",
                    ));
                }
                if min_rate > max_rate {
                    return Err(BacktestError::config("min_rate must be <= max_rate"));
                }
                if !(0.0..=1.0).contains(&dividend_tax_rate) {
                    return Err(BacktestError::config(
                        "dividend_tax_rate must be between 0 and 1",
                    ));
                }
            }
        }

        if let Some((from, to)) = self.start_range {
            if from > to {
                return Err(BacktestError::config(format!(
                    "start range is inverted: {from} > {to}"
                )));
            }
        }

        if self.threads == Some(0) {
            return Err(BacktestError::config("threads must be > 0"));
        }

        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    NoData,
    Success,
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::NoData => "no data",
            Outcome::Success => "success",
            Outcome::Fail => "fail",
        };
        f.write_str(label)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    MissingPrice,
    MissingInflation,
    MissingDividendYield,
    MissingConsumption,
    Exhausted,
    HorizonReached,
}

impl Termination {
    pub fn outcome(self) -> Outcome {
        match self {
            Termination::MissingPrice
            | Termination::MissingInflation
            | Termination::MissingDividendYield
            | Termination::MissingConsumption => Outcome::NoData,
            Termination::Exhausted => Outcome::Fail,
            Termination::HorizonReached => Outcome::Success,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Termination::MissingPrice => "no more price data",
            Termination::MissingInflation => "no more inflation data",
            Termination::MissingDividendYield => "no more dividend yield data",
            Termination::MissingConsumption => "no more consumption data",
            Termination::Exhausted => "run out of money",
            Termination::HorizonReached => "horizon reached",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RateBranch {
    Fixed,
    Min,
    Max,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Holdings {
    Shares(i64),
    Savings(f64),
}

impl Holdings {
    pub fn value(self, price: f64) -> f64 {
        match self {
            Holdings::Shares(shares) => shares as f64 * price,
            Holdings::Savings(savings) => savings,
        }
    }

    pub fn is_exhausted(self) -> bool {
        match self {
            Holdings::Shares(shares) => shares <= 0,
            Holdings::Savings(savings) => savings <= 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceYear {
    pub date: NaiveDate,
    pub price_date: NaiveDate,
    pub price: f64,
    pub inflation: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub consumption: Option<f64>,
    pub rate: f64,
    pub branch: RateBranch,
    pub withdrawal: f64,
    pub shares_sold: Option<i64>,
    pub holdings: Holdings,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialTrace {
    pub start: NaiveDate,
    pub initial_capital: f64,
    pub years: Vec<TraceYear>,
    pub termination: Option<Termination>,
}

#[derive(Debug, Clone)]
pub struct TrialReport {
    pub start: NaiveDate,
    pub termination: Termination,
    pub min_rate_periods: u64,
    pub max_rate_periods: u64,
    pub trace: Option<TrialTrace>,
}

impl TrialReport {
    pub fn outcome(&self) -> Outcome {
        self.termination.outcome()
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub success_count: u64,
    pub fail_count: u64,
    pub na_count: u64,
    pub min_rate_applied_count: u64,
    pub max_rate_applied_count: u64,
}

impl AggregateStats {
    pub fn from_report(report: &TrialReport) -> Self {
        let mut stats = Self {
            min_rate_applied_count: report.min_rate_periods,
            max_rate_applied_count: report.max_rate_periods,
            ..Self::default()
        };
        match report.outcome() {
            Outcome::Success => stats.success_count = 1,
            Outcome::Fail => stats.fail_count = 1,
            Outcome::NoData => stats.na_count = 1,
        }
        stats
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            success_count: self.success_count + other.success_count,
            fail_count: self.fail_count + other.fail_count,
            na_count: self.na_count + other.na_count,
            min_rate_applied_count: self.min_rate_applied_count + other.min_rate_applied_count,
            max_rate_applied_count: self.max_rate_applied_count + other.max_rate_applied_count,
        }
    }

    pub fn trials(&self) -> u64 {
        self.success_count + self.fail_count + self.na_count
    }

    /// Share of classified trials that survived; `NoData` trials are left out.
    pub fn success_rate(&self) -> Option<f64> {
        let classified = self.success_count + self.fail_count;
        if classified == 0 {
            return None;
        }
        Some(self.success_count as f64 / classified as f64)
    }
}

impl Add for AggregateStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl AddAssign for AggregateStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.merge(rhs);
    }
}

impl Sum for AggregateStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::merge)
    }
}
