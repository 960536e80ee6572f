use super::types::{RateBranch, WithdrawalPolicy};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PeriodWithdrawal {
    pub rate: f64,
    pub amount: f64,
    pub branch: RateBranch,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PolicyState {
    Fixed {
        rate: f64,
        withdraw: f64,
    },
    Adaptive {
        initial_capital: f64,
        min_rate: f64,
        max_rate: f64,
        target_savings: f64,
    },
}

impl PolicyState {
    pub fn opening(policy: &WithdrawalPolicy, initial_capital: f64) -> (Self, PeriodWithdrawal) {
        match *policy {
            WithdrawalPolicy::FixedRate { rate } => {
                let withdraw = initial_capital * rate;
                (
                    PolicyState::Fixed { rate, withdraw },
                    PeriodWithdrawal {
                        rate,
                        amount: withdraw,
                        branch: RateBranch::Fixed,
                    },
                )
            }
            WithdrawalPolicy::AdaptiveDualRate {
                min_rate, max_rate, ..
            } => {
                let state = PolicyState::Adaptive {
                    initial_capital,
                    min_rate,
                    max_rate,
                    target_savings: initial_capital,
                };
                let withdrawal = state.select(initial_capital);
                (state, withdrawal)
            }
        }
    }

    pub fn apply_period(&mut self, current_savings: f64, inflation: f64) -> PeriodWithdrawal {
        let growth = 1.0 + inflation;
        match self {
            PolicyState::Fixed { rate, withdraw } => {
                *withdraw *= growth;
                PeriodWithdrawal {
                    rate: *rate,
                    amount: *withdraw,
                    branch: RateBranch::Fixed,
                }
            }
            PolicyState::Adaptive {
                min_rate,
                max_rate,
                target_savings,
                ..
            } => {
                // Both rates track inflation whichever one was applied last period.
                *min_rate *= growth;
                *max_rate *= growth;
                *target_savings *= growth;
                self.select(current_savings)
            }
        }
    }

    pub fn target_savings(&self) -> Option<f64> {
        match *self {
            PolicyState::Fixed { .. } => None,
            PolicyState::Adaptive { target_savings, .. } => Some(target_savings),
        }
    }

    fn select(&self, current_savings: f64) -> PeriodWithdrawal {
        match *self {
            PolicyState::Fixed { rate, withdraw } => PeriodWithdrawal {
                rate,
                amount: withdraw,
                branch: RateBranch::Fixed,
            },
            PolicyState::Adaptive {
                initial_capital,
                min_rate,
                max_rate,
                target_savings,
            } => {
                let (rate, branch) = if current_savings < target_savings {
                    (min_rate, RateBranch::Min)
                } else {
                    (max_rate, RateBranch::Max)
                };
                PeriodWithdrawal {
                    rate,
                    amount: initial_capital * rate,
                    branch,
                }
            }
        }
    }
}
