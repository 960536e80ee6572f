use serde::Serialize;
use tracing::debug;

use super::market::MarketData;
use super::sweep::Backtest;
use super::types::{AggregateStats, BacktestConfig, WithdrawalPolicy};
use crate::error::{BacktestError, Result};

#[derive(Debug, Clone, Copy)]
pub struct SolveConfig {
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_rate: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResult {
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub solved_rate: Option<f64>,
    pub achieved_stats: Option<AggregateStats>,
    pub achieved_success_rate: Option<f64>,
    pub iterations: Vec<SolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

pub fn solve_max_rate(
    base: &BacktestConfig,
    data: &MarketData,
    config: SolveConfig,
) -> Result<SolveResult> {
    validate_config(base, config)?;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate_candidate(base, data, config.search_min)?;
    let high_eval = evaluate_candidate(base, data, config.search_max)?;

    let mut solved_rate = None;
    let mut converged = false;
    let feasible;
    let message;

    if low_eval.success_rate + 1e-12 < config.target_success_rate {
        feasible = false;
        message = "No feasible withdrawal rate found within the search bounds.".to_string();
    } else if high_eval.success_rate + 1e-12 >= config.target_success_rate {
        solved_rate = Some(config.search_max);
        converged = true;
        feasible = true;
        message = "Upper rate bound is still feasible; increase search max for a higher target."
            .to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let eval = evaluate_candidate(base, data, mid)?;
            debug!(
                iteration = it,
                candidate_rate = mid,
                success_rate = eval.success_rate,
                "evaluated withdrawal rate"
            );
            iterations.push(SolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_rate: mid,
                success_rate: eval.success_rate,
            });

            if eval.success_rate + 1e-12 >= config.target_success_rate {
                lo = mid;
            } else {
                hi = mid;
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_rate = Some(lo);
        feasible = true;
        message = if converged {
            "Solved maximum sustainable withdrawal rate.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate."
                .to_string()
        };
    }

    let mut achieved_stats = None;
    let mut achieved_success_rate = None;
    if let Some(rate) = solved_rate {
        let eval = evaluate_candidate(base, data, rate)?;
        achieved_stats = Some(eval.stats);
        achieved_success_rate = Some(eval.success_rate);
    }

    Ok(SolveResult {
        target_success_rate: config.target_success_rate,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        solved_rate,
        achieved_stats,
        achieved_success_rate,
        iterations,
        converged,
        feasible,
        message,
    })
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    stats: AggregateStats,
    success_rate: f64,
}

fn evaluate_candidate(
    base: &BacktestConfig,
    data: &MarketData,
    candidate_rate: f64,
) -> Result<CandidateEval> {
    let config = BacktestConfig {
        policy: WithdrawalPolicy::FixedRate {
            rate: candidate_rate,
        },
        record_trace: false,
        ..base.clone()
    };
    let stats = Backtest::new(config, data)?.run()?.stats;
    let success_rate = stats.success_rate().ok_or_else(|| {
        BacktestError::config("no start date in the window has enough data to classify")
    })?;
    Ok(CandidateEval {
        stats,
        success_rate,
    })
}

fn validate_config(base: &BacktestConfig, config: SolveConfig) -> Result<()> {
    if !matches!(base.policy, WithdrawalPolicy::FixedRate { .. }) {
        return Err(BacktestError::config(
            "the rate solver only supports the fixed-rate policy",
        ));
    }
    if !(0.0..=1.0).contains(&config.target_success_rate) {
        return Err(BacktestError::config(
            "target_success_rate must be between 0 and 1",
        ));
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(BacktestError::config("search bounds must be finite"));
    }
    if config.search_min < 0.0 || config.search_max > 1.0 {
        return Err(BacktestError::config("search bounds must lie within 0 and 1"));
    }
    if config.search_max <= config.search_min {
        return Err(BacktestError::config(
            "search_max must be greater than search_min",
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(BacktestError::config("tolerance must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(BacktestError::config("max_iterations must be > 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::InflationSource;
    use crate::core::series::{AnnualRateSeries, DailyPriceSeries};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn flat_data() -> MarketData {
        let prices = DailyPriceSeries::from_entries(
            "prices",
            (2000..=2015).map(|y| (date(y, 1, 1), 1.0)),
        )
        .expect("valid prices");
        let cpi = AnnualRateSeries::from_entries("cpi", (1999..=2015).map(|y| (y, 0.0)))
            .expect("valid cpi");
        MarketData::new(prices, InflationSource::Annual(cpi))
    }

    fn base_config() -> BacktestConfig {
        BacktestConfig {
            initial_capital: 1_000.0,
            horizon_years: 10,
            policy: WithdrawalPolicy::FixedRate { rate: 0.04 },
            as_of: date(2100, 1, 1),
            start_range: Some((date(2000, 1, 1), date(2000, 12, 31))),
            record_trace: false,
            threads: None,
        }
    }

    fn solve_config() -> SolveConfig {
        SolveConfig {
            target_success_rate: 1.0,
            search_min: 0.0,
            search_max: 0.5,
            tolerance: 0.0005,
            max_iterations: 40,
        }
    }

    #[test]
    fn max_rate_solver_finds_flat_market_limit() {
        // 1_000 capital at price 1: survival needs floor(1000 (1 - r)) > 9 ceil(1000 r),
        // which holds up to r = 0.099.
        let result = solve_max_rate(&base_config(), &flat_data(), solve_config())
            .expect("must solve");
        assert!(result.feasible);
        assert!(result.converged);
        let rate = result.solved_rate.expect("rate expected");
        assert!((0.098..=0.0991).contains(&rate), "solved rate {rate}");
        assert_eq!(result.achieved_success_rate, Some(1.0));
        assert!(!result.iterations.is_empty());
    }

    #[test]
    fn max_rate_solver_reports_infeasible_when_bounds_too_high() {
        let mut config = solve_config();
        config.search_min = 0.2;
        config.search_max = 0.5;
        let result =
            solve_max_rate(&base_config(), &flat_data(), config).expect("must return result");
        assert!(!result.feasible);
        assert!(result.solved_rate.is_none());
    }

    #[test]
    fn max_rate_solver_returns_upper_bound_when_still_feasible() {
        let mut config = solve_config();
        config.search_max = 0.05;
        let result =
            solve_max_rate(&base_config(), &flat_data(), config).expect("must return result");
        assert_eq!(result.solved_rate, Some(0.05));
        assert!(result.iterations.is_empty());
    }

    #[test]
    fn solver_rejects_adaptive_policy_and_bad_bounds() {
        let mut base = base_config();
        base.policy = WithdrawalPolicy::AdaptiveDualRate {
            min_rate: 0.03,
            max_rate: 0.05,
            dividend_tax_rate: 0.0,
        };
        let err = solve_max_rate(&base, &flat_data(), solve_config()).expect_err("adaptive");
        assert!(err.to_string().contains("fixed-rate"));

        let mut config = solve_config();
        config.search_max = config.search_min;
        let err = solve_max_rate(&base_config(), &flat_data(), config).expect_err("bounds");
        assert!(err.to_string().contains("search_max"));
    }
}
