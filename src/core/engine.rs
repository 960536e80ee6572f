use chrono::{Datelike, NaiveDate};

use super::market::MarketData;
use super::policy::{PeriodWithdrawal, PolicyState};
use super::types::{
    BacktestConfig, Holdings, RateBranch, Termination, TraceYear, TrialReport, TrialTrace,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrialStatus {
    Running,
    Finished(Termination),
}

#[derive(Debug)]
pub struct Trial<'a> {
    config: &'a BacktestConfig,
    data: &'a MarketData,
    start: NaiveDate,
    date: NaiveDate,
    price: f64,
    holdings: Holdings,
    policy: PolicyState,
    years_remaining: u32,
    min_rate_periods: u64,
    max_rate_periods: u64,
    trace: Option<TrialTrace>,
}

impl<'a> Trial<'a> {
    pub fn open(
        config: &'a BacktestConfig,
        data: &'a MarketData,
        start: NaiveDate,
    ) -> (Self, TrialStatus) {
        let capital = config.initial_capital;
        let (policy, opening) = PolicyState::opening(&config.policy, capital);
        let mut trial = Self {
            config,
            data,
            start,
            date: start,
            price: 0.0,
            holdings: Holdings::Savings(capital),
            policy,
            years_remaining: config.horizon_years.saturating_sub(1),
            min_rate_periods: 0,
            max_rate_periods: 0,
            trace: config.record_trace.then(|| TrialTrace {
                start,
                initial_capital: capital,
                years: Vec::new(),
                termination: None,
            }),
        };

        let Some((price_date, price)) = data.prices.price_on_or_after(start) else {
            return (trial, TrialStatus::Finished(Termination::MissingPrice));
        };
        trial.price = price;
        trial.holdings = if config.policy.is_adaptive() {
            Holdings::Savings(capital - opening.amount)
        } else {
            Holdings::Shares(affordable_shares(capital - opening.amount, price))
        };
        trial.count_branch(opening.branch);
        trial.record(TraceYear {
            date: start,
            price_date,
            price,
            inflation: None,
            dividend_yield: None,
            consumption: None,
            rate: opening.rate,
            branch: opening.branch,
            withdrawal: opening.amount,
            shares_sold: None,
            holdings: trial.holdings,
        });

        let status = trial.classify();
        (trial, status)
    }

    pub fn step(&mut self) -> TrialStatus {
        let Some(date) = add_one_year(self.date) else {
            return TrialStatus::Finished(Termination::MissingPrice);
        };
        self.date = date;

        let Some((price_date, price)) = self.data.prices.price_on_or_after(date) else {
            return TrialStatus::Finished(Termination::MissingPrice);
        };
        let Some(inflation) = self.data.inflation.rate_for_prior_period(date) else {
            return TrialStatus::Finished(Termination::MissingInflation);
        };
        let prior_year = date.year() - 1;
        let dividend_yield = match &self.data.dividend_yield {
            Some(series) => match series.rate_for_year(prior_year) {
                Some(rate) => rate,
                None => return TrialStatus::Finished(Termination::MissingDividendYield),
            },
            None => 0.0,
        };
        let consumption = match &self.data.consumption {
            Some(series) => match series.value_for_previous_period(date) {
                Some(value) => Some(value),
                None => return TrialStatus::Finished(Termination::MissingConsumption),
            },
            None => None,
        };

        let net_yield = dividend_yield * (1.0 - self.config.policy.dividend_tax_rate());
        if let Holdings::Savings(savings) = &mut self.holdings {
            *savings = *savings * (price / self.price) + *savings * net_yield;
        }
        self.price = price;

        let withdrawal = self
            .policy
            .apply_period(self.holdings.value(price), inflation);
        self.count_branch(withdrawal.branch);
        let shares_sold = self.withdraw(withdrawal, price);
        self.years_remaining = self.years_remaining.saturating_sub(1);

        self.record(TraceYear {
            date,
            price_date,
            price,
            inflation: Some(inflation),
            dividend_yield: Some(dividend_yield),
            consumption,
            rate: withdrawal.rate,
            branch: withdrawal.branch,
            withdrawal: withdrawal.amount,
            shares_sold,
            holdings: self.holdings,
        });

        self.classify()
    }

    pub fn holdings(&self) -> Holdings {
        self.holdings
    }

    pub fn policy(&self) -> &PolicyState {
        &self.policy
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn years_remaining(&self) -> u32 {
        self.years_remaining
    }

    pub fn finish(mut self, termination: Termination) -> TrialReport {
        if let Some(trace) = self.trace.as_mut() {
            trace.termination = Some(termination);
        }
        TrialReport {
            start: self.start,
            termination,
            min_rate_periods: self.min_rate_periods,
            max_rate_periods: self.max_rate_periods,
            trace: self.trace,
        }
    }

    fn withdraw(&mut self, withdrawal: PeriodWithdrawal, price: f64) -> Option<i64> {
        match &mut self.holdings {
            Holdings::Shares(shares) => {
                let sold = shares_to_sell(withdrawal.amount, price);
                *shares -= sold;
                Some(sold)
            }
            Holdings::Savings(savings) => {
                *savings -= withdrawal.amount;
                None
            }
        }
    }

    fn classify(&self) -> TrialStatus {
        if self.holdings.is_exhausted() {
            TrialStatus::Finished(Termination::Exhausted)
        } else if self.years_remaining == 0 {
            TrialStatus::Finished(Termination::HorizonReached)
        } else {
            TrialStatus::Running
        }
    }

    fn count_branch(&mut self, branch: RateBranch) {
        match branch {
            RateBranch::Min => self.min_rate_periods += 1,
            RateBranch::Max => self.max_rate_periods += 1,
            RateBranch::Fixed => {}
        }
    }

    fn record(&mut self, year: TraceYear) {
        if let Some(trace) = self.trace.as_mut() {
            trace.years.push(year);
        }
    }
}

pub fn run_trial(config: &BacktestConfig, data: &MarketData, start: NaiveDate) -> TrialReport {
    let (mut trial, mut status) = Trial::open(config, data, start);
    loop {
        match status {
            TrialStatus::Running => status = trial.step(),
            TrialStatus::Finished(termination) => return trial.finish(termination),
        }
    }
}

fn shares_to_sell(amount: f64, price: f64) -> i64 {
    (amount / price).ceil() as i64
}

fn affordable_shares(amount: f64, price: f64) -> i64 {
    (amount / price).floor() as i64
}

/// Same month and day one year later; Feb 29 rolls over to Mar 1.
pub fn add_one_year(date: NaiveDate) -> Option<NaiveDate> {
    let year = date.year() + 1;
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, 3, 1))
}
