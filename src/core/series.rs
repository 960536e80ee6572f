use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate};

use crate::error::{BacktestError, Result};

#[derive(Debug, Clone)]
pub struct DailyPriceSeries {
    prices: BTreeMap<NaiveDate, f64>,
    first_date: NaiveDate,
    last_date: NaiveDate,
}

impl DailyPriceSeries {
    pub fn from_entries<I>(source: &str, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        let mut prices = BTreeMap::new();
        for (date, price) in entries {
            if !price.is_finite() || price <= 0.0 {
                return Err(BacktestError::data_load(
                    source,
                    format!("price on {date} must be positive, got {price}"),
                ));
            }
            if prices.insert(date, price).is_some() {
                return Err(BacktestError::data_load(
                    source,
                    format!("duplicate price for {date}"),
                ));
            }
        }

        let (Some((&first_date, _)), Some((&last_date, _))) =
            (prices.first_key_value(), prices.last_key_value())
        else {
            return Err(BacktestError::data_load(source, "price series is empty"));
        };

        Ok(Self {
            prices,
            first_date,
            last_date,
        })
    }

    pub fn first_date(&self) -> NaiveDate {
        self.first_date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Resolves the price stored on `date` or, failing that, on the next later
    /// trading day. Returns `None` once `date` is past the last stored date.
    pub fn price_on_or_after(&self, date: NaiveDate) -> Option<(NaiveDate, f64)> {
        if date > self.last_date {
            return None;
        }
        self.prices
            .range(date..)
            .next()
            .map(|(&resolved, &price)| (resolved, price))
    }
}

#[derive(Debug, Clone)]
pub struct AnnualRateSeries {
    rates: BTreeMap<i32, f64>,
    first_date: NaiveDate,
    last_date: NaiveDate,
}

impl AnnualRateSeries {
    pub fn from_entries<I>(source: &str, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (i32, f64)>,
    {
        let mut rates = BTreeMap::new();
        for (year, rate) in entries {
            if !rate.is_finite() {
                return Err(BacktestError::data_load(
                    source,
                    format!("rate for {year} is not a finite number"),
                ));
            }
            if rates.insert(year, rate).is_some() {
                return Err(BacktestError::data_load(
                    source,
                    format!("duplicate rate for {year}"),
                ));
            }
        }

        let (Some((&first_year, _)), Some((&last_year, _))) =
            (rates.first_key_value(), rates.last_key_value())
        else {
            return Err(BacktestError::data_load(source, "rate series is empty"));
        };
        let first_date = NaiveDate::from_ymd_opt(first_year, 1, 1);
        let last_date = NaiveDate::from_ymd_opt(last_year, 12, 31);
        let (Some(first_date), Some(last_date)) = (first_date, last_date) else {
            return Err(BacktestError::data_load(
                source,
                format!("years {first_year}..={last_year} are outside the calendar range"),
            ));
        };

        Ok(Self {
            rates,
            first_date,
            last_date,
        })
    }

    pub fn rate_for_year(&self, year: i32) -> Option<f64> {
        self.rates.get(&year).copied()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.first_date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Granularity {
    Monthly,
    Quarterly,
}

impl Granularity {
    fn months(self) -> u32 {
        match self {
            Granularity::Monthly => 1,
            Granularity::Quarterly => 3,
        }
    }

    pub fn period_start(self, date: NaiveDate) -> Option<NaiveDate> {
        let month = match self {
            Granularity::Monthly => date.month(),
            Granularity::Quarterly => (date.month() - 1) / 3 * 3 + 1,
        };
        NaiveDate::from_ymd_opt(date.year(), month, 1)
    }

    pub fn previous_period_start(self, date: NaiveDate) -> Option<NaiveDate> {
        self.period_start(date)?
            .checked_sub_months(Months::new(self.months()))
    }

    fn period_end(self, start: NaiveDate) -> Option<NaiveDate> {
        start
            .checked_add_months(Months::new(self.months()))?
            .pred_opt()
    }
}

#[derive(Debug, Clone)]
pub struct PeriodSeries {
    granularity: Granularity,
    values: BTreeMap<NaiveDate, f64>,
    first_date: NaiveDate,
    last_date: NaiveDate,
}

impl PeriodSeries {
    pub fn from_entries<I>(source: &str, granularity: Granularity, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        let mut values = BTreeMap::new();
        for (date, value) in entries {
            if !value.is_finite() {
                return Err(BacktestError::data_load(
                    source,
                    format!("value for {date} is not a finite number"),
                ));
            }
            let Some(key) = granularity.period_start(date) else {
                return Err(BacktestError::data_load(
                    source,
                    format!("cannot normalize {date} to a period start"),
                ));
            };
            if values.insert(key, value).is_some() {
                return Err(BacktestError::data_load(
                    source,
                    format!("duplicate value for the period starting {key}"),
                ));
            }
        }

        let (Some((&first_date, _)), Some((&last_start, _))) =
            (values.first_key_value(), values.last_key_value())
        else {
            return Err(BacktestError::data_load(source, "period series is empty"));
        };
        let Some(last_date) = granularity.period_end(last_start) else {
            return Err(BacktestError::data_load(
                source,
                format!("period starting {last_start} has no representable end"),
            ));
        };

        Ok(Self {
            granularity,
            values,
            first_date,
            last_date,
        })
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn value_for_period(&self, date: NaiveDate) -> Option<f64> {
        let key = self.granularity.period_start(date)?;
        self.values.get(&key).copied()
    }

    /// Value of the period immediately before the one containing `date`.
    pub fn value_for_previous_period(&self, date: NaiveDate) -> Option<f64> {
        let key = self.granularity.previous_period_start(date)?;
        self.values.get(&key).copied()
    }

    pub fn first_date(&self) -> NaiveDate {
        self.first_date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
