mod http;

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::core::{Backtest, BacktestConfig, Granularity, SolveConfig, WithdrawalPolicy};
use crate::data::{DataSources, InflationFormat, load_market_data};
use crate::error::{BacktestError, Result};
use crate::report::{SweepSummary, trace_file_name, write_traces};

pub use http::run_http_server;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliPolicy {
    Fixed,
    Adaptive,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliInflationFormat {
    MonthlyTable,
    Annual,
}

impl From<CliInflationFormat> for InflationFormat {
    fn from(value: CliInflationFormat) -> Self {
        match value {
            CliInflationFormat::MonthlyTable => InflationFormat::MonthlyTable,
            CliInflationFormat::Annual => InflationFormat::Annual,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliGranularity {
    Monthly,
    Quarterly,
}

impl From<CliGranularity> for Granularity {
    fn from(value: CliGranularity) -> Self {
        match value {
            CliGranularity::Monthly => Granularity::Monthly,
            CliGranularity::Quarterly => Granularity::Quarterly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Historical backtest of retirement withdrawal strategies over every start date"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Sweep every historical start date and report the survival rate")]
    Run(RunArgs),
    #[command(about = "Search for the highest fixed withdrawal rate meeting a success target")]
    Solve(SolveArgs),
    #[command(about = "Serve the backtest over a JSON HTTP API")]
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[arg(long, help = "Daily price CSV with a Date column")]
    pub prices: PathBuf,
    #[arg(long, default_value = "Close", help = "Price column in the price CSV")]
    pub price_column: String,
    #[arg(long, help = "Inflation CSV, see --inflation-format")]
    pub inflation: PathBuf,
    #[arg(long, value_enum, default_value_t = CliInflationFormat::MonthlyTable)]
    pub inflation_format: CliInflationFormat,
    #[arg(long, help = "Annual dividend yield CSV (Year,Value in percent)")]
    pub dividends: Option<PathBuf>,
    #[arg(long, help = "Personal consumption CSV (Date,Value)")]
    pub consumption: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = CliGranularity::Quarterly)]
    pub consumption_granularity: CliGranularity,
}

impl DataArgs {
    pub fn sources(&self) -> DataSources {
        DataSources {
            prices: self.prices.clone(),
            price_column: self.price_column.clone(),
            inflation: self.inflation.clone(),
            inflation_format: self.inflation_format.into(),
            dividends: self.dividends.clone(),
            consumption: self.consumption.clone(),
            consumption_granularity: self.consumption_granularity.into(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    #[arg(long, default_value_t = 1_000_000.0, help = "Initial capital")]
    pub capital: f64,
    #[arg(long, value_enum, default_value_t = CliPolicy::Fixed)]
    pub policy: CliPolicy,
    #[arg(long, help = "Fixed withdrawal rate in percent, e.g. 4")]
    pub withdraw_rate: Option<f64>,
    #[arg(long, help = "Adaptive rate used when behind target, in percent")]
    pub min_rate: Option<f64>,
    #[arg(long, help = "Adaptive rate used when on or ahead of target, in percent")]
    pub max_rate: Option<f64>,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Share of dividend yield lost to tax in percent (adaptive only)"
    )]
    pub dividend_tax_rate: f64,
    #[arg(long, default_value_t = 30, help = "Horizon in years")]
    pub years: u32,
    #[arg(long, help = "Earliest start date (YYYY-MM-DD)")]
    pub from: Option<NaiveDate>,
    #[arg(long, help = "Latest start date (YYYY-MM-DD)")]
    pub to: Option<NaiveDate>,
    #[arg(long, help = "Worker threads, defaults to all cores")]
    pub threads: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    pub backtest: BacktestArgs,
    #[arg(long, help = "Write a per-trial trace to this file")]
    pub trace_file: Option<PathBuf>,
    #[arg(long, help = "Write a timestamped trace file into this directory")]
    pub trace_dir: Option<PathBuf>,
    #[arg(long, help = "Print the summary as JSON")]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SolveArgs {
    #[command(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    pub backtest: BacktestArgs,
    #[arg(long, default_value_t = 95.0, help = "Required success rate in percent")]
    pub target_success: f64,
    #[arg(long, default_value_t = 0.0, help = "Lowest withdrawal rate to try, in percent")]
    pub search_min: f64,
    #[arg(long, default_value_t = 20.0, help = "Highest withdrawal rate to try, in percent")]
    pub search_max: f64,
    #[arg(long, default_value_t = 0.01, help = "Stop once the bracket is this narrow, in percent")]
    pub tolerance: f64,
    #[arg(long, default_value_t = 30)]
    pub max_iterations: u32,
    #[arg(long, help = "Print the result as JSON")]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub data: DataArgs,
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run_backtest(args),
        Command::Solve(args) => run_solve(args),
        Command::Serve(args) => {
            let data = load_market_data(&args.data.sources())?;
            run_http_server(args.port, data)
                .await
                .context("HTTP server stopped")
        }
    }
}

fn run_backtest(args: RunArgs) -> anyhow::Result<()> {
    let record_trace = args.trace_file.is_some() || args.trace_dir.is_some();
    let config = build_config(&args.backtest, today(), record_trace)?;
    let data = load_market_data(&args.data.sources())?;
    let result = Backtest::new(config.clone(), &data)?.run()?;

    let summary = SweepSummary::new(&config, &result);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{summary}");
    }

    let trace_path = match (args.trace_file, args.trace_dir) {
        (Some(path), _) => Some(path),
        (None, Some(dir)) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            Some(dir.join(trace_file_name(Utc::now())))
        }
        (None, None) => None,
    };
    if let Some(path) = trace_path {
        let file = File::create(&path)
            .with_context(|| format!("failed to create trace file {}", path.display()))?;
        write_traces(BufWriter::new(file), &result.traces)
            .with_context(|| format!("failed to write trace file {}", path.display()))?;
        info!(path = %path.display(), trials = result.traces.len(), "wrote trace file");
    }
    Ok(())
}

fn run_solve(mut args: SolveArgs) -> anyhow::Result<()> {
    args.backtest.policy = CliPolicy::Fixed;
    if args.backtest.withdraw_rate.is_none() {
        args.backtest.withdraw_rate = Some(args.search_min);
    }
    let config = build_config(&args.backtest, today(), false)?;
    let solve = build_solve_config(&args)?;
    let data = load_market_data(&args.data.sources())?;

    let result = crate::core::solve_max_rate(&config, &data, solve)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.message);
    if let Some(rate) = result.solved_rate {
        println!("max withdrawal rate = {:.3}%", rate * 100.0);
    }
    if let Some(rate) = result.achieved_success_rate {
        println!("success rate = {rate:.3}");
    }
    Ok(())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn build_config(
    args: &BacktestArgs,
    as_of: NaiveDate,
    record_trace: bool,
) -> Result<BacktestConfig> {
    if !args.capital.is_finite() || args.capital <= 0.0 {
        return Err(BacktestError::config("--capital must be > 0"));
    }

    if args.years == 0 {
        return Err(BacktestError::config("--years must be > 0"));
    }

    let policy = match args.policy {
        CliPolicy::Fixed => {
            let Some(rate) = args.withdraw_rate else {
                return Err(BacktestError::config(
                    "--withdraw-rate is required for --policy fixed",
                ));
            };
            if !(0.0..=100.0).contains(&rate) {
                return Err(BacktestError::config(
                    "--withdraw-rate must be between 0 and 100",
                ));
            }
            WithdrawalPolicy::FixedRate { rate: rate / 100.0 }
        }
        CliPolicy::Adaptive => {
            let (Some(min_rate), Some(max_rate)) = (args.min_rate, args.max_rate) else {
                return Err(BacktestError::config(
                    "--min-rate and --max-rate are required for --policy adaptive",
                ));
            };
            if !(0.0..=100.0).contains(&min_rate) {
                return Err(BacktestError::config("--min-rate must be between 0 and 100"));
            }
            if !(0.0..=100.0).contains(&max_rate) {
                return Err(BacktestError::config("--max-rate must be between 0 and 100"));
            }
            if min_rate > max_rate {
                return Err(BacktestError::config("--min-rate must be <= --max-rate"));
            }
            if !(0.0..=100.0).contains(&args.dividend_tax_rate) {
                return Err(BacktestError::config(
                    "--dividend-tax-rate must be between 0 and 100",
                ));
            }
            WithdrawalPolicy::AdaptiveDualRate {
                min_rate: min_rate / 100.0,
                max_rate: max_rate / 100.0,
                dividend_tax_rate: args.dividend_tax_rate / 100.0,
            }
        }
    };

    let start_range = match (args.from, args.to) {
        (None, None) => None,
        (from, to) => {
            let from = from.unwrap_or(NaiveDate::MIN);
            let to = to.unwrap_or(NaiveDate::MAX);
            if from > to {
                return Err(BacktestError::config("--from must be <= --to"));
            }
            Some((from, to))
        }
    };

    if args.threads == Some(0) {
        return Err(BacktestError::config("--threads must be > 0"));
    }

    let config = BacktestConfig {
        initial_capital: args.capital,
        horizon_years: args.years,
        policy,
        as_of,
        start_range,
        record_trace,
        threads: args.threads,
    };
    config.validate()?;
    Ok(config)
}

pub fn build_solve_config(args: &SolveArgs) -> Result<SolveConfig> {
    if !(0.0..=100.0).contains(&args.target_success) {
        return Err(BacktestError::config(
            "--target-success must be between 0 and 100",
        ));
    }
    if !(0.0..=100.0).contains(&args.search_min) || !(0.0..=100.0).contains(&args.search_max) {
        return Err(BacktestError::config(
            "--search-min and --search-max must be between 0 and 100",
        ));
    }
    if args.search_max <= args.search_min {
        return Err(BacktestError::config("--search-max must be > --search-min"));
    }
    if !args.tolerance.is_finite() || args.tolerance <= 0.0 {
        return Err(BacktestError::config("--tolerance must be > 0"));
    }
    if args.max_iterations == 0 {
        return Err(BacktestError::config("--max-iterations must be > 0"));
    }

    Ok(SolveConfig {
        target_success_rate: args.target_success / 100.0,
        search_min: args.search_min / 100.0,
        search_max: args.search_max / 100.0,
        tolerance: args.tolerance / 100.0,
        max_iterations: args.max_iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("valid command line")
    }

    fn run_args(cli: Cli) -> RunArgs {
        match cli.command {
            Command::Run(args) => args,
            other => panic!("expected run command, got {other:?}"),
        }
    }

    #[test]
    fn run_command_parses_fixed_policy_in_percent() {
        let args = run_args(parse(&[
            "drawdown",
            "run",
            "--prices",
            "SANDP500.csv",
            "--inflation",
            "USInflationRate.csv",
            "--capital",
            "500000",
            "--withdraw-rate",
            "4",
            "--years",
            "25",
            "--from",
            "1960-01-01",
        ]));
        assert_eq!(args.data.inflation_format, CliInflationFormat::MonthlyTable);
        assert_eq!(args.data.price_column, "Close");

        let config = build_config(&args.backtest, date(2024, 6, 1), false).expect("valid config");
        assert_approx(config.initial_capital, 500_000.0);
        assert_eq!(config.horizon_years, 25);
        assert_eq!(config.policy, WithdrawalPolicy::FixedRate { rate: 0.04 });
        assert_eq!(config.start_range, Some((date(1960, 1, 1), NaiveDate::MAX)));
        assert_eq!(config.as_of, date(2024, 6, 1));
    }

    #[test]
    fn run_command_parses_adaptive_policy() {
        let args = run_args(parse(&[
            "drawdown",
            "run",
            "--prices",
            "p.csv",
            "--inflation",
            "i.csv",
            "--inflation-format",
            "annual",
            "--dividends",
            "d.csv",
            "--policy",
            "adaptive",
            "--min-rate",
            "3",
            "--max-rate",
            "5",
            "--dividend-tax-rate",
            "15",
        ]));
        let sources = args.data.sources();
        assert_eq!(sources.inflation_format, InflationFormat::Annual);
        assert_eq!(sources.dividends, Some(PathBuf::from("d.csv")));

        let config = build_config(&args.backtest, date(2024, 6, 1), true).expect("valid config");
        let WithdrawalPolicy::AdaptiveDualRate {
            min_rate,
            max_rate,
            dividend_tax_rate,
        } = config.policy
        else {
            panic!("expected adaptive policy");
        };
        assert_approx(min_rate, 0.03);
        assert_approx(max_rate, 0.05);
        assert_approx(dividend_tax_rate, 0.15);
        assert!(config.record_trace);
    }

    #[test]
    fn build_config_requires_rate_for_chosen_policy() {
        let mut args = run_args(parse(&[
            "drawdown",
            "run",
            "--prices",
            "p.csv",
            "--inflation",
            "i.csv",
        ]))
        .backtest;
        let err = build_config(&args, date(2024, 1, 1), false).expect_err("missing rate");
        assert!(err.to_string().contains("--withdraw-rate is required"));

        args.policy = CliPolicy::Adaptive;
        args.min_rate = Some(3.0);
        let err = build_config(&args, date(2024, 1, 1), false).expect_err("missing max rate");
        assert!(err.to_string().contains("--max-rate"));
    }

    #[test]
    fn build_config_rejects_out_of_range_values() {
        let mut args = run_args(parse(&[
            "drawdown",
            "run",
            "--prices",
            "p.csv",
            "--inflation",
            "i.csv",
            "--withdraw-rate",
            "4",
        ]))
        .backtest;

        args.withdraw_rate = Some(120.0);
        let err = build_config(&args, date(2024, 1, 1), false).expect_err("rate above 100");
        assert!(err.to_string().contains("--withdraw-rate must be between 0 and 100"));

        args.withdraw_rate = Some(4.0);
        args.years = 0;
        let err = build_config(&args, date(2024, 1, 1), false).expect_err("zero years");
        assert!(err.to_string().contains("--years"));

        args.years = 30;
        args.from = Some(date(2000, 1, 1));
        args.to = Some(date(1990, 1, 1));
        let err = build_config(&args, date(2024, 1, 1), false).expect_err("inverted range");
        assert!(err.to_string().contains("--from must be <= --to"));

        args.from = None;
        args.to = None;
        args.policy = CliPolicy::Adaptive;
        args.min_rate = Some(6.0);
        args.max_rate = Some(4.0);
        let err = build_config(&args, date(2024, 1, 1), false).expect_err("min above max");
        assert!(err.to_string().contains("--min-rate must be <= --max-rate"));
    }

    #[test]
    fn solve_command_converts_percent_bounds() {
        let cli = parse(&[
            "drawdown",
            "solve",
            "--prices",
            "p.csv",
            "--inflation",
            "i.csv",
            "--target-success",
            "90",
            "--search-max",
            "10",
        ]);
        let Command::Solve(args) = cli.command else {
            panic!("expected solve command");
        };
        let solve = build_solve_config(&args).expect("valid solve config");
        assert_approx(solve.target_success_rate, 0.9);
        assert_approx(solve.search_min, 0.0);
        assert_approx(solve.search_max, 0.1);
        assert_approx(solve.tolerance, 0.0001);
        assert_eq!(solve.max_iterations, 30);

        let mut bad = args.clone();
        bad.search_max = 0.0;
        let err = build_solve_config(&bad).expect_err("empty bracket");
        assert!(err.to_string().contains("--search-max"));
    }

    #[test]
    fn serve_command_defaults_port() {
        let cli = parse(&["drawdown", "serve", "--prices", "p.csv", "--inflation", "i.csv"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.port, 8080);
    }
}
