use chrono::{Datelike, NaiveDate};

use super::series::{AnnualRateSeries, DailyPriceSeries, PeriodSeries};

#[derive(Debug, Clone)]
pub enum InflationSource {
    Annual(AnnualRateSeries),
    Periodic(PeriodSeries),
}

impl InflationSource {
    /// Inflation to apply when stepping onto `date`: the prior calendar year for
    /// annual data, the last published month or quarter for periodic data.
    pub fn rate_for_prior_period(&self, date: NaiveDate) -> Option<f64> {
        match self {
            InflationSource::Annual(series) => series.rate_for_year(date.year() - 1),
            InflationSource::Periodic(series) => series.value_for_previous_period(date),
        }
    }

    pub fn first_date(&self) -> NaiveDate {
        match self {
            InflationSource::Annual(series) => series.first_date(),
            InflationSource::Periodic(series) => series.first_date(),
        }
    }

    pub fn last_date(&self) -> NaiveDate {
        match self {
            InflationSource::Annual(series) => series.last_date(),
            InflationSource::Periodic(series) => series.last_date(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketData {
    pub prices: DailyPriceSeries,
    pub inflation: InflationSource,
    pub dividend_yield: Option<AnnualRateSeries>,
    pub consumption: Option<PeriodSeries>,
}

impl MarketData {
    pub fn new(prices: DailyPriceSeries, inflation: InflationSource) -> Self {
        Self {
            prices,
            inflation,
            dividend_yield: None,
            consumption: None,
        }
    }

    pub fn with_dividend_yield(mut self, series: AnnualRateSeries) -> Self {
        self.dividend_yield = Some(series);
        self
    }

    pub fn with_consumption(mut self, series: PeriodSeries) -> Self {
        self.consumption = Some(series);
        self
    }

    pub fn coverage(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut first = self.prices.first_date().max(self.inflation.first_date());
        let mut last = self.prices.last_date().min(self.inflation.last_date());

        if let Some(series) = &self.dividend_yield {
            first = first.max(series.first_date());
            last = last.min(series.last_date());
        }
        if let Some(series) = &self.consumption {
            first = first.max(series.first_date());
            last = last.min(series.last_date());
        }

        (first <= last).then_some((first, last))
    }
}
