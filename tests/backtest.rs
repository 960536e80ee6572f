use chrono::NaiveDate;
use drawdown::core::{
    Backtest, BacktestConfig, Holdings, InflationSource, MarketData, Outcome, Termination,
    WithdrawalPolicy,
};
use drawdown::data::{read_annual_rates, read_monthly_inflation_table, read_price_csv};
use drawdown::report::{SweepSummary, write_traces};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

fn market(prices_csv: &str, inflation_csv: &str) -> MarketData {
    let prices = read_price_csv("prices.csv", prices_csv.as_bytes(), "Close").expect("prices");
    let cpi = read_annual_rates("cpi.csv", inflation_csv.as_bytes()).expect("inflation");
    MarketData::new(prices, InflationSource::Annual(cpi))
}

fn fixed_config(rate: f64, years: u32, from: NaiveDate, to: NaiveDate) -> BacktestConfig {
    BacktestConfig {
        initial_capital: 1_000_000.0,
        horizon_years: years,
        policy: WithdrawalPolicy::FixedRate { rate },
        as_of: date(2024, 1, 1),
        start_range: Some((from, to)),
        record_trace: true,
        threads: Some(2),
    }
}

#[test]
fn two_year_fixed_rate_run_from_csv_sells_rounded_up_shares() {
    let data = market(
        "Date,Open,Close\n2020-01-02,99.0,100.0\n2021-01-04,108.0,110.0\n",
        "Year,Value\n2019,2.3\n2020,5\n",
    );
    let config = fixed_config(0.04, 2, date(2020, 1, 2), date(2020, 1, 2));
    let result = Backtest::new(config.clone(), &data)
        .expect("valid backtest")
        .run()
        .expect("sweep runs");

    assert_eq!(result.stats.success_count, 1);
    assert_eq!(result.stats.trials(), 1);
    assert_eq!(result.traces.len(), 1);

    let trace = &result.traces[0];
    assert_eq!(trace.years[0].holdings, Holdings::Shares(9_600));
    assert_eq!(trace.years[1].price_date, date(2021, 1, 4));
    assert_eq!(trace.years[1].shares_sold, Some(382));
    assert_eq!(trace.years[1].holdings, Holdings::Shares(9_218));
    assert_eq!(trace.termination, Some(Termination::HorizonReached));

    let summary = SweepSummary::new(&config, &result).to_string();
    assert!(summary.contains("success = 1, failed = 0, na = 0"));
    assert!(summary.contains("success rate = 1.000"));

    let mut out = Vec::new();
    write_traces(&mut out, &result.traces).expect("write traces");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("sold shares: 382"));
    assert!(text.contains("result: success (horizon reached)"));
}

#[test]
fn horizon_past_the_inflation_data_counts_as_no_data() {
    let data = market(
        "Date,Close\n2020-01-02,100\n2021-01-04,110\n2022-01-03,120\n",
        "Year,Value\n2020,5\n",
    );
    let config = fixed_config(0.04, 3, date(2020, 1, 2), date(2020, 1, 3));
    let backtest = Backtest::new(config, &data).expect("valid backtest");

    let report = backtest.run_trial(date(2020, 1, 2));
    assert_eq!(report.termination, Termination::MissingInflation);
    assert_eq!(report.outcome(), Outcome::NoData);

    let result = backtest.run().expect("sweep runs");
    assert_eq!(result.stats.na_count, 2);
    assert_eq!(result.stats.success_rate(), None);
}

#[test]
fn monthly_inflation_table_drives_a_sweep() {
    let mut prices = String::from("Date,Close\n");
    for year in 2000..=2006 {
        for month in 1..=12 {
            prices.push_str(&format!("{year}-{month:02}-01,{}\n", 100 + year - 2000));
        }
    }
    let mut table = String::from("Year,Jan,Feb,Mar,Apr,May,Jun,Jul,Aug,Sep,Oct,Nov,Dec,Avg\n");
    for year in 1999..=2006 {
        table.push_str(&format!("{year},2,2,2,2,2,2,2,2,2,2,2,2,2\n"));
    }

    let price_series = read_price_csv("prices.csv", prices.as_bytes(), "Close").expect("prices");
    let inflation = read_monthly_inflation_table("cpi.csv", table.as_bytes()).expect("table");
    let data = MarketData::new(price_series, InflationSource::Periodic(inflation));

    let mut config = fixed_config(0.04, 5, date(2000, 1, 1), date(2000, 12, 31));
    config.record_trace = false;
    let result = Backtest::new(config, &data)
        .expect("valid backtest")
        .run()
        .expect("sweep runs");

    assert_eq!(result.window, Some((date(2000, 1, 1), date(2000, 12, 31))));
    assert_eq!(result.stats.trials(), 366);
    assert_eq!(result.stats.success_count, 366);
    assert!(result.traces.is_empty());
}

#[test]
fn sweep_totals_do_not_depend_on_how_start_dates_are_split() {
    let mut prices = String::from("Date,Close\n");
    let mut level = 100.0_f64;
    for year in 1980..=2000 {
        for month in 1..=12_u32 {
            level *= if (year as u32 + month) % 4 == 0 { 0.9 } else { 1.03 };
            prices.push_str(&format!("{year}-{month:02}-10,{level:.4}\n"));
        }
    }
    let mut cpi = String::from("Year,Value\n");
    for year in 1980..=2000 {
        cpi.push_str(&format!("{year},{}\n", 1 + year % 4));
    }
    let data = market(&prices, &cpi);

    let mut config = fixed_config(0.06, 8, date(1980, 1, 1), date(1985, 12, 31));
    config.record_trace = false;
    let backtest = Backtest::new(config, &data).expect("valid backtest");
    let dates = backtest.start_dates();
    let whole = backtest.run_dates(&dates).stats;

    let (left, right) = dates.split_at(dates.len() / 3);
    let split = backtest.run_dates(left).stats + backtest.run_dates(right).stats;
    assert_eq!(whole, split);
    assert_eq!(whole.trials() as usize, dates.len());
}
