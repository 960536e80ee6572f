use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::{BacktestArgs, CliPolicy, build_config};
use crate::core::{Backtest, BacktestConfig, MarketData, SolveConfig, solve_max_rate};
use crate::error::{BacktestError, Result};
use crate::report::{SweepSummary, Window};

#[derive(Clone)]
struct AppState {
    data: Arc<MarketData>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPolicy {
    #[serde(alias = "fixedRate")]
    Fixed,
    #[serde(alias = "adaptiveDualRate")]
    Adaptive,
}

impl From<ApiPolicy> for CliPolicy {
    fn from(value: ApiPolicy) -> Self {
        match value {
            ApiPolicy::Fixed => CliPolicy::Fixed,
            ApiPolicy::Adaptive => CliPolicy::Adaptive,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BacktestPayload {
    policy: Option<ApiPolicy>,
    initial_capital: Option<f64>,
    withdraw_rate: Option<f64>,
    min_rate: Option<f64>,
    max_rate: Option<f64>,
    dividend_tax_rate: Option<f64>,
    years: Option<u32>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,

    target_success: Option<f64>,
    search_min: Option<f64>,
    search_max: Option<f64>,
    tolerance: Option<f64>,
    max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    prices: Window,
    inflation: Window,
    coverage: Option<Window>,
}

pub async fn run_http_server(port: u16, data: MarketData) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState {
        data: Arc::new(data),
    });

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");

    axum::serve(listener, app).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/backtest",
            get(backtest_get_handler).post(backtest_post_handler),
        )
        .route("/api/solve", get(solve_get_handler).post(solve_post_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let data = &state.data;
    let body = HealthResponse {
        status: "ok",
        prices: Window {
            first: data.prices.first_date(),
            last: data.prices.last_date(),
        },
        inflation: Window {
            first: data.inflation.first_date(),
            last: data.inflation.last_date(),
        },
        coverage: data.coverage().map(|(first, last)| Window { first, last }),
    };
    json_response(StatusCode::OK, body)
}

async fn backtest_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<BacktestPayload>,
) -> Response {
    backtest_handler_impl(state, payload).await
}

async fn backtest_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<BacktestPayload>,
) -> Response {
    backtest_handler_impl(state, payload).await
}

async fn solve_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<BacktestPayload>,
) -> Response {
    solve_handler_impl(state, payload).await
}

async fn solve_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<BacktestPayload>,
) -> Response {
    solve_handler_impl(state, payload).await
}

async fn backtest_handler_impl(state: AppState, payload: BacktestPayload) -> Response {
    let config = match backtest_config_from_payload(&payload, today()) {
        Ok(config) => config,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let data = Arc::clone(&state.data);
    let joined = tokio::task::spawn_blocking(move || -> Result<SweepSummary> {
        let result = Backtest::new(config.clone(), &data)?.run()?;
        Ok(SweepSummary::new(&config, &result))
    })
    .await;

    match joined {
        Ok(Ok(summary)) => json_response(StatusCode::OK, summary),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            error!(error = %e, "backtest task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Backtest task failed")
        }
    }
}

async fn solve_handler_impl(state: AppState, mut payload: BacktestPayload) -> Response {
    payload.policy = Some(ApiPolicy::Fixed);
    let solve = match solve_config_from_payload(&payload) {
        Ok(solve) => solve,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if payload.withdraw_rate.is_none() {
        payload.withdraw_rate = Some(solve.search_min * 100.0);
    }
    let config = match backtest_config_from_payload(&payload, today()) {
        Ok(config) => config,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let data = Arc::clone(&state.data);
    let joined = tokio::task::spawn_blocking(move || solve_max_rate(&config, &data, solve)).await;

    match joined {
        Ok(Ok(result)) => json_response(StatusCode::OK, result),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(e) => {
            error!(error = %e, "solve task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Solve task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn default_args_for_api() -> BacktestArgs {
    BacktestArgs {
        capital: 1_000_000.0,
        policy: CliPolicy::Fixed,
        withdraw_rate: Some(4.0),
        min_rate: Some(3.0),
        max_rate: Some(5.0),
        dividend_tax_rate: 0.0,
        years: 30,
        from: None,
        to: None,
        threads: None,
    }
}

fn backtest_config_from_payload(
    payload: &BacktestPayload,
    as_of: NaiveDate,
) -> Result<BacktestConfig> {
    let mut args = default_args_for_api();

    if let Some(v) = payload.policy {
        args.policy = v.into();
    }
    if let Some(v) = payload.initial_capital {
        args.capital = v;
    }
    if let Some(v) = payload.withdraw_rate {
        args.withdraw_rate = Some(v);
    }
    if let Some(v) = payload.min_rate {
        args.min_rate = Some(v);
    }
    if let Some(v) = payload.max_rate {
        args.max_rate = Some(v);
    }
    if let Some(v) = payload.dividend_tax_rate {
        args.dividend_tax_rate = v;
    }
    if let Some(v) = payload.years {
        args.years = v;
    }
    args.from = payload.from;
    args.to = payload.to;

    build_config(&args, as_of, false).map_err(with_payload_field_names)
}

const PAYLOAD_FIELD_NAMES: [(&str, &str); 9] = [
    ("--capital", "initialCapital"),
    ("--withdraw-rate", "withdrawRate"),
    ("--min-rate", "minRate"),
    ("--max-rate", "maxRate"),
    ("--dividend-tax-rate", "dividendTaxRate"),
    ("--policy", "policy"),
    ("--years", "years"),
    ("--from", "from"),
    ("--to", "to"),
];

fn with_payload_field_names(err: BacktestError) -> BacktestError {
    match err {
        BacktestError::Config(message) => BacktestError::Config(
            PAYLOAD_FIELD_NAMES
                .iter()
                .fold(message, |message, (flag, field)| message.replace(*flag, field)),
        ),
        other => other,
    }
}

fn solve_config_from_payload(payload: &BacktestPayload) -> Result<SolveConfig> {
    let target = payload.target_success.unwrap_or(95.0);
    let search_min = payload.search_min.unwrap_or(0.0);
    let search_max = payload.search_max.unwrap_or(20.0);
    let tolerance = payload.tolerance.unwrap_or(0.01);
    let max_iterations = payload.max_iterations.unwrap_or(30);

    if !(0.0..=100.0).contains(&target) {
        return Err(BacktestError::config(
            "targetSuccess must be between 0 and 100",
        ));
    }
    if !(0.0..=100.0).contains(&search_min) || !(0.0..=100.0).contains(&search_max) {
        return Err(BacktestError::config(
            "searchMin and searchMax must be between 0 and 100",
        ));
    }
    if search_max <= search_min {
        return Err(BacktestError::config("searchMax must be > searchMin"));
    }
    if !tolerance.is_finite() || tolerance <= 0.0 {
        return Err(BacktestError::config("tolerance must be > 0"));
    }
    if max_iterations == 0 {
        return Err(BacktestError::config("maxIterations must be > 0"));
    }

    Ok(SolveConfig {
        target_success_rate: target / 100.0,
        search_min: search_min / 100.0,
        search_max: search_max / 100.0,
        tolerance: tolerance / 100.0,
        max_iterations,
    })
}

#[cfg(test)]
fn payload_from_json(json: &str) -> std::result::Result<BacktestPayload, String> {
    serde_json::from_str::<BacktestPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))
}
