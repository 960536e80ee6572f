use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, info};

use crate::core::{
    AnnualRateSeries, DailyPriceSeries, Granularity, InflationSource, MarketData, PeriodSeries,
};
use crate::error::{BacktestError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InflationFormat {
    MonthlyTable,
    Annual,
}

#[derive(Debug, Clone)]
pub struct DataSources {
    pub prices: PathBuf,
    pub price_column: String,
    pub inflation: PathBuf,
    pub inflation_format: InflationFormat,
    pub dividends: Option<PathBuf>,
    pub consumption: Option<PathBuf>,
    pub consumption_granularity: Granularity,
}

pub fn load_market_data(sources: &DataSources) -> Result<MarketData> {
    let prices = load_price_csv(&sources.prices, &sources.price_column)?;
    let inflation = match sources.inflation_format {
        InflationFormat::MonthlyTable => {
            InflationSource::Periodic(load_monthly_inflation_table(&sources.inflation)?)
        }
        InflationFormat::Annual => InflationSource::Annual(load_annual_rates(&sources.inflation)?),
    };

    let mut data = MarketData::new(prices, inflation);
    if let Some(path) = &sources.dividends {
        data = data.with_dividend_yield(load_annual_rates(path)?);
    }
    if let Some(path) = &sources.consumption {
        data = data.with_consumption(load_period_values(path, sources.consumption_granularity)?);
    }

    info!(
        prices = data.prices.len(),
        first_price = %data.prices.first_date(),
        last_price = %data.prices.last_date(),
        coverage = ?data.coverage(),
        "loaded market data"
    );
    Ok(data)
}

pub fn load_price_csv(path: &Path, price_column: &str) -> Result<DailyPriceSeries> {
    let source = path.display().to_string();
    read_price_csv(&source, open(path)?, price_column)
}

pub fn load_monthly_inflation_table(path: &Path) -> Result<PeriodSeries> {
    let source = path.display().to_string();
    read_monthly_inflation_table(&source, open(path)?)
}

pub fn load_annual_rates(path: &Path) -> Result<AnnualRateSeries> {
    let source = path.display().to_string();
    read_annual_rates(&source, open(path)?)
}

pub fn load_period_values(path: &Path, granularity: Granularity) -> Result<PeriodSeries> {
    let source = path.display().to_string();
    read_period_values(&source, open(path)?, granularity)
}

pub fn read_price_csv<R: Read>(
    source: &str,
    reader: R,
    price_column: &str,
) -> Result<DailyPriceSeries> {
    let mut rdr = csv_reader(reader);
    let headers = rdr.headers()?.clone();
    let date_idx = column_index(source, &headers, "Date")?;
    let price_idx = column_index(source, &headers, price_column)?;

    let mut entries = Vec::new();
    let mut skipped = 0_usize;
    for (row, record) in rdr.records().enumerate() {
        let row = row + 2;
        let record = record.map_err(|e| BacktestError::data_load(source, e.to_string()))?;
        let date = parse_date(source, row, cell(&record, date_idx))?;
        match parse_number(source, row, price_column, cell(&record, price_idx))? {
            Some(price) => entries.push((date, price)),
            None => skipped += 1,
        }
    }

    debug!(source, rows = entries.len(), skipped, "parsed price csv");
    DailyPriceSeries::from_entries(source, entries)
}

pub fn read_monthly_inflation_table<R: Read>(source: &str, reader: R) -> Result<PeriodSeries> {
    let mut rdr = csv_reader(reader);
    let mut entries = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let row = row + 2;
        let record = record.map_err(|e| BacktestError::data_load(source, e.to_string()))?;
        let year = parse_year(source, row, cell(&record, 0))?;
        for month in 1..=12_u32 {
            let Some(percent) =
                parse_number(source, row, "monthly inflation", cell(&record, month as usize))?
            else {
                continue;
            };
            let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) else {
                return Err(BacktestError::data_load(
                    source,
                    format!("row {row}: year {year} is out of range"),
                ));
            };
            entries.push((date, percent / 100.0));
        }
    }

    debug!(source, months = entries.len(), "parsed monthly inflation table");
    PeriodSeries::from_entries(source, Granularity::Monthly, entries)
}

pub fn read_annual_rates<R: Read>(source: &str, reader: R) -> Result<AnnualRateSeries> {
    let mut rdr = csv_reader(reader);
    let mut entries = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let row = row + 2;
        let record = record.map_err(|e| BacktestError::data_load(source, e.to_string()))?;
        let year = parse_year(source, row, cell(&record, 0))?;
        if let Some(percent) = parse_number(source, row, "rate", cell(&record, 1))? {
            entries.push((year, percent / 100.0));
        }
    }

    debug!(source, years = entries.len(), "parsed annual rates");
    AnnualRateSeries::from_entries(source, entries)
}

pub fn read_period_values<R: Read>(
    source: &str,
    reader: R,
    granularity: Granularity,
) -> Result<PeriodSeries> {
    let mut rdr = csv_reader(reader);
    let mut entries = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let row = row + 2;
        let record = record.map_err(|e| BacktestError::data_load(source, e.to_string()))?;
        let date = parse_date(source, row, cell(&record, 0))?;
        if let Some(value) = parse_number(source, row, "value", cell(&record, 1))? {
            entries.push((date, value));
        }
    }

    debug!(source, periods = entries.len(), "parsed period values");
    PeriodSeries::from_entries(source, granularity, entries)
}

fn open(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| BacktestError::data_load(path.display().to_string(), e.to_string()))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader)
}

fn cell(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("")
}

fn column_index(source: &str, headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| BacktestError::data_load(source, format!("missing column '{name}'")))
}

fn parse_date(source: &str, row: usize, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| {
        BacktestError::data_load(source, format!("row {row}: invalid date '{raw}': {e}"))
    })
}

fn parse_year(source: &str, row: usize, raw: &str) -> Result<i32> {
    raw.parse::<i32>().map_err(|e| {
        BacktestError::data_load(source, format!("row {row}: invalid year '{raw}': {e}"))
    })
}

fn parse_number(source: &str, row: usize, field: &str, raw: &str) -> Result<Option<f64>> {
    if raw.is_empty() || raw == "." || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|e| {
        BacktestError::data_load(source, format!("row {row}: invalid {field} '{raw}': {e}"))
    })
}
