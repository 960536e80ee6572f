use std::fmt;
use std::io::{self, Write};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::core::{
    AggregateStats, BacktestConfig, Holdings, RateBranch, SweepResult, TrialTrace,
    WithdrawalPolicy,
};

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub policy: WithdrawalPolicy,
    pub initial_capital: f64,
    pub horizon_years: u32,
    pub window: Option<Window>,
    pub stats: AggregateStats,
    pub success_rate: Option<f64>,
}

impl SweepSummary {
    pub fn new(config: &BacktestConfig, result: &SweepResult) -> Self {
        Self {
            policy: config.policy,
            initial_capital: config.initial_capital,
            horizon_years: config.horizon_years,
            window: result.window.map(|(first, last)| Window { first, last }),
            stats: result.stats,
            success_rate: result.stats.success_rate(),
        }
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.window {
            Some(window) => writeln!(f, "start dates: {} to {}", window.first, window.last)?,
            None => writeln!(f, "start dates: none (series do not overlap)")?,
        }
        writeln!(
            f,
            "success = {}, failed = {}, na = {}",
            self.stats.success_count, self.stats.fail_count, self.stats.na_count
        )?;
        match self.success_rate {
            Some(rate) => writeln!(f, "success rate = {rate:.3}")?,
            None => writeln!(f, "success rate = n/a")?,
        }
        if self.policy.is_adaptive() {
            writeln!(
                f,
                "min rate applied = {}, max rate applied = {}",
                self.stats.min_rate_applied_count, self.stats.max_rate_applied_count
            )?;
        }
        Ok(())
    }
}

pub struct TraceDisplay<'a>(pub &'a TrialTrace);

impl fmt::Display for TraceDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let trace = self.0;
        writeln!(f, "initial conditions ===========================")?;
        writeln!(f, "capital: {:.6}", trace.initial_capital)?;
        writeln!(f, "start date: {}", trace.start)?;

        for (idx, year) in trace.years.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
                writeln!(f, "year of {}", year.date)?;
            }
            writeln!(f, "price on {}: {:.6}", year.price_date, year.price)?;
            if let Some(inflation) = year.inflation {
                writeln!(f, "inflation: {:.3}%", inflation * 100.0)?;
            }
            if let Some(dividend_yield) = year.dividend_yield {
                writeln!(f, "dividend yield: {:.3}%", dividend_yield * 100.0)?;
            }
            if let Some(consumption) = year.consumption {
                writeln!(f, "consumption: {consumption:.3}")?;
            }
            let branch = match year.branch {
                RateBranch::Fixed => "fixed",
                RateBranch::Min => "min",
                RateBranch::Max => "max",
            };
            writeln!(f, "rate: {:.4}% ({branch})", year.rate * 100.0)?;
            writeln!(f, "withdraw: {:.6}", year.withdrawal)?;
            if let Some(sold) = year.shares_sold {
                writeln!(f, "sold shares: {sold}")?;
            }
            match year.holdings {
                Holdings::Shares(shares) => writeln!(f, "hold shares: {shares}")?,
                Holdings::Savings(savings) => writeln!(f, "savings: {savings:.6}")?,
            }
        }

        match trace.termination {
            Some(termination) => writeln!(
                f,
                "result: {} ({})",
                termination.outcome(),
                termination.describe()
            )?,
            None => writeln!(f, "result: unfinished")?,
        }
        writeln!(f)?;
        writeln!(f)
    }
}

pub fn write_traces<W: Write>(mut writer: W, traces: &[TrialTrace]) -> io::Result<()> {
    for trace in traces {
        write!(writer, "{}", TraceDisplay(trace))?;
    }
    writer.flush()
}

pub fn trace_file_name(now: DateTime<Utc>) -> String {
    format!("drawdown-{}.txt", now.format("%Y%m%dT%H%M%S%.3fZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Termination, TraceYear};
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn sample_trace() -> TrialTrace {
        TrialTrace {
            start: date(2020, 1, 1),
            initial_capital: 1_000_000.0,
            years: vec![
                TraceYear {
                    date: date(2020, 1, 1),
                    price_date: date(2020, 1, 2),
                    price: 100.0,
                    inflation: None,
                    dividend_yield: None,
                    consumption: None,
                    rate: 0.04,
                    branch: RateBranch::Fixed,
                    withdrawal: 40_000.0,
                    shares_sold: None,
                    holdings: Holdings::Shares(9_600),
                },
                TraceYear {
                    date: date(2021, 1, 1),
                    price_date: date(2021, 1, 4),
                    price: 110.0,
                    inflation: Some(0.05),
                    dividend_yield: Some(0.02),
                    consumption: None,
                    rate: 0.04,
                    branch: RateBranch::Fixed,
                    withdrawal: 42_000.0,
                    shares_sold: Some(382),
                    holdings: Holdings::Shares(9_218),
                },
            ],
            termination: Some(Termination::HorizonReached),
        }
    }

    #[test]
    fn trace_lists_each_year_and_the_verdict() {
        let text = TraceDisplay(&sample_trace()).to_string();
        assert!(text.starts_with("initial conditions"));
        assert!(text.contains("start date: 2020-01-01"));
        assert!(text.contains("price on 2020-01-02: 100.000000"));
        assert!(text.contains("year of 2021-01-01"));
        assert!(text.contains("inflation: 5.000%"));
        assert!(text.contains("sold shares: 382"));
        assert!(text.contains("hold shares: 9218"));
        assert!(text.contains("result: success (horizon reached)"));
    }

    #[test]
    fn write_traces_concatenates_blocks() {
        let traces = vec![sample_trace(), sample_trace()];
        let mut out = Vec::new();
        write_traces(&mut out, &traces).expect("write to vec");
        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text.matches("initial conditions").count(), 2);
    }

    #[test]
    fn summary_prints_counts_and_rate() {
        let summary = SweepSummary {
            policy: WithdrawalPolicy::AdaptiveDualRate {
                min_rate: 0.03,
                max_rate: 0.05,
                dividend_tax_rate: 0.15,
            },
            initial_capital: 1_000_000.0,
            horizon_years: 30,
            window: Some(Window {
                first: date(1950, 1, 3),
                last: date(2020, 12, 31),
            }),
            stats: AggregateStats {
                success_count: 3,
                fail_count: 1,
                na_count: 7,
                min_rate_applied_count: 20,
                max_rate_applied_count: 40,
            },
            success_rate: Some(0.75),
        };
        let text = summary.to_string();
        assert!(text.contains("success = 3, failed = 1, na = 7"));
        assert!(text.contains("success rate = 0.750"));
        assert!(text.contains("min rate applied = 20, max rate applied = 40"));

        let json = serde_json::to_value(&summary).expect("serializable");
        assert_eq!(json["stats"]["naCount"], 7);
        assert_eq!(json["policy"]["kind"], "adaptiveDualRate");
        assert_eq!(json["policy"]["minRate"], 0.03);
        assert_eq!(json["window"]["first"], "1950-01-03");
    }

    #[test]
    fn trace_file_name_is_timestamped() {
        let now = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 6)
            .single()
            .expect("valid timestamp");
        assert_eq!(trace_file_name(now), "drawdown-20240309T140506.000Z.txt");
    }
}
