use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::core::{
    CancelToken, DrawdownStats, FourPercentVariant, FundingOrder, GuardrailParams,
    InflationSource, MedianRun, PercentileBand, PortfolioState, RunResult, SamplingMode,
    SeriesFile, SeriesStore, SimError, SimulationOutput, SimulationParams, WithdrawalPolicy,
    WithdrawalTarget, assets_in_use, clamp_start_year, policy_label, run_simulation,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliSamplingMode {
    ActualSeq,
    ActualSeqRandomStart,
    RandomShuffle,
    Bootstrap,
}

impl From<CliSamplingMode> for SamplingMode {
    fn from(value: CliSamplingMode) -> Self {
        match value {
            CliSamplingMode::ActualSeq => SamplingMode::ActualSequence,
            CliSamplingMode::ActualSeqRandomStart => SamplingMode::ActualSequenceRandomStart,
            CliSamplingMode::RandomShuffle => SamplingMode::RandomShuffle,
            CliSamplingMode::Bootstrap => SamplingMode::Bootstrap,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliPolicy {
    FixedOrder,
    GuytonKlinger,
    FloorCeiling,
    FixedPercentage,
    Cape,
    FourPercent,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliFundingOrder {
    EquityAFirst,
    EquityBFirst,
    EqualParts,
    BestPerformer,
    WorstPerformer,
}

impl From<CliFundingOrder> for FundingOrder {
    fn from(value: CliFundingOrder) -> Self {
        match value {
            CliFundingOrder::EquityAFirst => FundingOrder::EquityAThenB,
            CliFundingOrder::EquityBFirst => FundingOrder::EquityBThenA,
            CliFundingOrder::EqualParts => FundingOrder::EqualParts,
            CliFundingOrder::BestPerformer => FundingOrder::BestPerformerFirst,
            CliFundingOrder::WorstPerformer => FundingOrder::WorstPerformerFirst,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliFourPercentVariant {
    Plain,
    PrincipalProtection,
    UpwardReset,
}

impl From<CliFourPercentVariant> for FourPercentVariant {
    fn from(value: CliFourPercentVariant) -> Self {
        match value {
            CliFourPercentVariant::Plain => FourPercentVariant::Plain,
            CliFourPercentVariant::PrincipalProtection => FourPercentVariant::PrincipalProtection,
            CliFourPercentVariant::UpwardReset => FourPercentVariant::UpwardReset,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiSamplingMode {
    #[serde(alias = "actualSeq", alias = "actual_seq", alias = "actual-sequence")]
    ActualSeq,
    #[serde(alias = "actualSeqRandomStart", alias = "actual_seq_random_start")]
    ActualSeqRandomStart,
    #[serde(alias = "randomShuffle", alias = "random_shuffle", alias = "shuffle")]
    RandomShuffle,
    Bootstrap,
}

impl From<ApiSamplingMode> for CliSamplingMode {
    fn from(value: ApiSamplingMode) -> Self {
        match value {
            ApiSamplingMode::ActualSeq => CliSamplingMode::ActualSeq,
            ApiSamplingMode::ActualSeqRandomStart => CliSamplingMode::ActualSeqRandomStart,
            ApiSamplingMode::RandomShuffle => CliSamplingMode::RandomShuffle,
            ApiSamplingMode::Bootstrap => CliSamplingMode::Bootstrap,
        }
    }
}

impl From<SamplingMode> for ApiSamplingMode {
    fn from(value: SamplingMode) -> Self {
        match value {
            SamplingMode::ActualSequence => ApiSamplingMode::ActualSeq,
            SamplingMode::ActualSequenceRandomStart => ApiSamplingMode::ActualSeqRandomStart,
            SamplingMode::RandomShuffle => ApiSamplingMode::RandomShuffle,
            SamplingMode::Bootstrap => ApiSamplingMode::Bootstrap,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiPolicy {
    #[serde(alias = "fixedOrder", alias = "fixed_order")]
    FixedOrder,
    #[serde(alias = "guytonKlinger", alias = "guyton_klinger", alias = "guardrails")]
    GuytonKlinger,
    #[serde(alias = "floorCeiling", alias = "floor_ceiling")]
    FloorCeiling,
    #[serde(alias = "fixedPercentage", alias = "fixed_percentage")]
    FixedPercentage,
    Cape,
    #[serde(alias = "fourPercent", alias = "four_percent")]
    FourPercent,
}

impl From<ApiPolicy> for CliPolicy {
    fn from(value: ApiPolicy) -> Self {
        match value {
            ApiPolicy::FixedOrder => CliPolicy::FixedOrder,
            ApiPolicy::GuytonKlinger => CliPolicy::GuytonKlinger,
            ApiPolicy::FloorCeiling => CliPolicy::FloorCeiling,
            ApiPolicy::FixedPercentage => CliPolicy::FixedPercentage,
            ApiPolicy::Cape => CliPolicy::Cape,
            ApiPolicy::FourPercent => CliPolicy::FourPercent,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiFundingOrder {
    #[serde(alias = "equityAFirst", alias = "equity_a_first")]
    EquityAFirst,
    #[serde(alias = "equityBFirst", alias = "equity_b_first")]
    EquityBFirst,
    #[serde(alias = "equalParts", alias = "equal_parts")]
    EqualParts,
    #[serde(alias = "bestPerformer", alias = "best_performer")]
    BestPerformer,
    #[serde(alias = "worstPerformer", alias = "worst_performer")]
    WorstPerformer,
}

impl From<ApiFundingOrder> for CliFundingOrder {
    fn from(value: ApiFundingOrder) -> Self {
        match value {
            ApiFundingOrder::EquityAFirst => CliFundingOrder::EquityAFirst,
            ApiFundingOrder::EquityBFirst => CliFundingOrder::EquityBFirst,
            ApiFundingOrder::EqualParts => CliFundingOrder::EqualParts,
            ApiFundingOrder::BestPerformer => CliFundingOrder::BestPerformer,
            ApiFundingOrder::WorstPerformer => CliFundingOrder::WorstPerformer,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiFourPercentVariant {
    Plain,
    #[serde(alias = "principalProtection", alias = "principal_protection")]
    PrincipalProtection,
    #[serde(alias = "upwardReset", alias = "upward_reset", alias = "ratchet")]
    UpwardReset,
}

impl From<ApiFourPercentVariant> for CliFourPercentVariant {
    fn from(value: ApiFourPercentVariant) -> Self {
        match value {
            ApiFourPercentVariant::Plain => CliFourPercentVariant::Plain,
            ApiFourPercentVariant::PrincipalProtection => {
                CliFourPercentVariant::PrincipalProtection
            }
            ApiFourPercentVariant::UpwardReset => CliFourPercentVariant::UpwardReset,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiLockedField {
    Rate,
    Amount,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    cash: Option<f64>,
    equity_a: Option<f64>,
    equity_b: Option<f64>,
    alternative: Option<f64>,
    bond: Option<f64>,

    horizon: Option<u32>,
    withdraw_rate: Option<f64>,
    #[serde(alias = "initialWithdrawalAmount")]
    withdraw_amount: Option<f64>,
    locked: Option<ApiLockedField>,

    inflation_adjust: Option<bool>,
    inflation_rate: Option<f64>,
    historical_inflation: Option<bool>,

    mode: Option<ApiSamplingMode>,
    runs: Option<u32>,
    start_year: Option<i32>,
    clamp_start_year: Option<bool>,
    seed: Option<u64>,

    policy: Option<ApiPolicy>,
    funding_order: Option<ApiFundingOrder>,
    four_percent_variant: Option<ApiFourPercentVariant>,
    gk_upper_guardrail: Option<f64>,
    gk_lower_guardrail: Option<f64>,
    gk_cut: Option<f64>,
    gk_raise: Option<f64>,
    floor: Option<f64>,
    ceiling: Option<f64>,
    fixed_rate: Option<f64>,
    cape_base: Option<f64>,
    cape_fraction: Option<f64>,

    series: Option<SeriesFile>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "fire-sim",
    about = "Historical-returns retirement withdrawal simulator (six withdrawal policies, four sampling modes)"
)]
struct Cli {
    #[arg(
        long,
        help = "JSON file with equityA/equityB/alternative/bond/inflation/cape tables"
    )]
    series: Option<PathBuf>,
    #[arg(long, default_value_t = 0.0)]
    cash: f64,
    #[arg(long, default_value_t = 1_000_000.0)]
    equity_a: f64,
    #[arg(long, default_value_t = 0.0)]
    equity_b: f64,
    #[arg(long, default_value_t = 0.0)]
    alternative: f64,
    #[arg(long, default_value_t = 0.0)]
    bond: f64,
    #[arg(long, default_value_t = 30, help = "Simulated years per run")]
    horizon: u32,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Initial withdrawal rate in percent of the starting balance"
    )]
    withdraw_rate: f64,
    #[arg(
        long,
        help = "Initial withdrawal amount; when set it is the source of truth and the rate is derived"
    )]
    withdraw_amount: Option<f64>,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    inflation_adjust: bool,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Flat annual inflation in percent, used unless --historical-inflation"
    )]
    inflation_rate: f64,
    #[arg(long, default_value_t = false)]
    historical_inflation: bool,
    #[arg(long, value_enum, default_value_t = CliSamplingMode::ActualSeq)]
    mode: CliSamplingMode,
    #[arg(
        long,
        default_value_t = 1_000,
        help = "Monte Carlo run count (ignored by actual-seq)"
    )]
    runs: u32,
    #[arg(long, default_value_t = 1966)]
    start_year: i32,
    #[arg(
        long,
        default_value_t = false,
        help = "Pull --start-year into the data window instead of rejecting it"
    )]
    clamp_start_year: bool,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, value_enum, default_value_t = CliPolicy::FourPercent)]
    policy: CliPolicy,
    #[arg(long, value_enum, default_value_t = CliFundingOrder::EquityAFirst)]
    funding_order: CliFundingOrder,
    #[arg(long, value_enum, default_value_t = CliFourPercentVariant::Plain)]
    four_percent_variant: CliFourPercentVariant,
    #[arg(
        long,
        default_value_t = 20.0,
        help = "Cut spending when the withdrawal rate exceeds the initial rate by this percent"
    )]
    gk_upper_guardrail: f64,
    #[arg(
        long,
        default_value_t = 20.0,
        help = "Raise spending when the withdrawal rate falls below the initial rate by this percent"
    )]
    gk_lower_guardrail: f64,
    #[arg(long, default_value_t = 10.0, help = "Guardrail cut in percent")]
    gk_cut: f64,
    #[arg(long, default_value_t = 10.0, help = "Guardrail raise in percent")]
    gk_raise: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Floor-ceiling: max cut below the initial withdrawal in percent"
    )]
    floor: f64,
    #[arg(
        long,
        default_value_t = 25.0,
        help = "Floor-ceiling: max raise above the initial withdrawal in percent"
    )]
    ceiling: f64,
    #[arg(long, default_value_t = 4.0, help = "Fixed-percentage rate in percent")]
    fixed_rate: f64,
    #[arg(long, default_value_t = 1.0, help = "CAPE policy base rate in percent")]
    cape_base: f64,
    #[arg(
        long,
        default_value_t = 50.0,
        help = "CAPE policy share of the earnings yield (1/CAPE) in percent"
    )]
    cape_fraction: f64,
}

#[derive(Debug)]
struct ApiRequest {
    params: SimulationParams,
    clamp_start_year: bool,
    series: Option<SeriesFile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    mode: ApiSamplingMode,
    policy: &'static str,
    runs: usize,
    horizon: u32,
    start_year: Option<i32>,
    withdrawal: WithdrawalTarget,
    success_rate: f64,
    percentile_bands: Vec<PercentileBand>,
    median_run: MedianRun,
    drawdown: DrawdownStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    deterministic_run: Option<RunResult>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    series_years: usize,
}

#[derive(Clone)]
struct AppState {
    series: Arc<SeriesStore>,
    in_flight: Arc<Mutex<Option<CancelToken>>>,
}

fn require_non_negative(flag: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{flag} must be >= 0"));
    }
    Ok(())
}

fn require_percent(flag: &str, value: f64) -> Result<(), String> {
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{flag} must be between 0 and 100"));
    }
    Ok(())
}

fn build_params(cli: &Cli) -> Result<SimulationParams, String> {
    if cli.horizon == 0 {
        return Err("--horizon must be > 0".to_string());
    }

    let mode = SamplingMode::from(cli.mode);
    if mode.is_monte_carlo() && cli.runs == 0 {
        return Err("--runs must be > 0".to_string());
    }

    require_non_negative("--cash", cli.cash)?;
    require_non_negative("--equity-a", cli.equity_a)?;
    require_non_negative("--equity-b", cli.equity_b)?;
    require_non_negative("--alternative", cli.alternative)?;
    require_non_negative("--bond", cli.bond)?;

    require_percent("--withdraw-rate", cli.withdraw_rate)?;
    if let Some(amount) = cli.withdraw_amount {
        require_non_negative("--withdraw-amount", amount)?;
    }

    if !cli.inflation_rate.is_finite() || cli.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    let initial = PortfolioState {
        cash: cli.cash,
        equity_a: cli.equity_a,
        equity_b: cli.equity_b,
        alternative: cli.alternative,
        bond: cli.bond,
    };
    let principal = initial.total();
    let withdrawal = match cli.withdraw_amount {
        Some(amount) => {
            if principal <= 0.0 {
                return Err(
                    "--withdraw-amount needs a starting balance above zero".to_string(),
                );
            }
            WithdrawalTarget::from_amount(amount, principal)
        }
        None => WithdrawalTarget::from_rate(cli.withdraw_rate, principal),
    };

    let policy = match cli.policy {
        CliPolicy::FixedOrder => WithdrawalPolicy::FixedOrder {
            order: cli.funding_order.into(),
        },
        CliPolicy::GuytonKlinger => {
            require_non_negative("--gk-upper-guardrail", cli.gk_upper_guardrail)?;
            require_percent("--gk-lower-guardrail", cli.gk_lower_guardrail)?;
            require_percent("--gk-cut", cli.gk_cut)?;
            require_non_negative("--gk-raise", cli.gk_raise)?;
            WithdrawalPolicy::GuytonKlinger(GuardrailParams {
                upper_guardrail: cli.gk_upper_guardrail / 100.0,
                lower_guardrail: cli.gk_lower_guardrail / 100.0,
                cut_pct: cli.gk_cut / 100.0,
                raise_pct: cli.gk_raise / 100.0,
            })
        }
        CliPolicy::FloorCeiling => {
            require_percent("--floor", cli.floor)?;
            require_non_negative("--ceiling", cli.ceiling)?;
            WithdrawalPolicy::FloorCeiling {
                floor: cli.floor / 100.0,
                ceiling: cli.ceiling / 100.0,
            }
        }
        CliPolicy::FixedPercentage => {
            require_percent("--fixed-rate", cli.fixed_rate)?;
            WithdrawalPolicy::FixedPercentage {
                rate: cli.fixed_rate / 100.0,
            }
        }
        CliPolicy::Cape => {
            require_percent("--cape-base", cli.cape_base)?;
            require_non_negative("--cape-fraction", cli.cape_fraction)?;
            WithdrawalPolicy::Cape {
                base: cli.cape_base / 100.0,
                fraction: cli.cape_fraction / 100.0,
            }
        }
        CliPolicy::FourPercent => WithdrawalPolicy::FourPercent {
            variant: cli.four_percent_variant.into(),
        },
    };

    Ok(SimulationParams {
        initial,
        horizon: cli.horizon,
        withdrawal,
        inflation_adjust: cli.inflation_adjust,
        inflation: if cli.historical_inflation {
            InflationSource::Historical
        } else {
            InflationSource::Flat(cli.inflation_rate / 100.0)
        },
        mode,
        runs: cli.runs,
        start_year: cli.start_year,
        seed: cli.seed,
        policy,
    })
}

pub fn load_series(path: &Path) -> Result<SeriesStore, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read series file {}: {e}", path.display()))?;
    SeriesStore::from_json(&json)
        .map_err(|e| format!("Invalid series file {}: {e}", path.display()))
}

/// Pulls an actual-sequence start year into the window the data can serve.
fn resolve_start_year(params: &mut SimulationParams, store: &SeriesStore) -> Result<(), String> {
    if params.mode.is_monte_carlo() {
        return Ok(());
    }
    let years = store
        .common_years(&assets_in_use(&params.initial))
        .map_err(|e| e.to_string())?;
    let Some(start_year) = clamp_start_year(&years, params.start_year, params.horizon) else {
        return Err(format!(
            "--horizon {} is longer than the {} years of data",
            params.horizon,
            years.len()
        ));
    };
    if start_year != params.start_year {
        log::warn!(
            "start year {} moved to {start_year} to fit a {}-year horizon",
            params.start_year,
            params.horizon
        );
        params.start_year = start_year;
    }
    Ok(())
}

/// One-shot simulation from command-line flags; prints the JSON response.
pub fn run_cli() -> Result<(), String> {
    let cli = Cli::parse();
    let Some(path) = cli.series.clone() else {
        return Err("--series <path> is required".to_string());
    };
    let store = load_series(&path)?;
    let mut params = build_params(&cli)?;
    if cli.clamp_start_year {
        resolve_start_year(&mut params, &store)?;
    }

    let output =
        run_simulation(&params, &store, &CancelToken::new()).map_err(|e| e.to_string())?;
    let response = build_simulate_response(&params, &output);
    let json = serde_json::to_string_pretty(&response)
        .map_err(|e| format!("Failed to serialize response: {e}"))?;
    println!("{json}");
    Ok(())
}

pub async fn run_http_server(port: u16, series: SeriesStore) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = AppState {
        series: Arc::new(series),
        in_flight: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    log::info!("fire-sim HTTP API listening on http://{addr}");
    log::info!("Local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            series_years: state.series.equity_a.len(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<SimulatePayload>,
) -> Response {
    simulate_handler_impl(state, payload).await
}

async fn simulate_handler_impl(state: AppState, payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => {
            log::warn!("rejected simulate request: {msg}");
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    };

    let store = match request.series {
        Some(file) => Arc::new(SeriesStore::from(file)),
        None => Arc::clone(&state.series),
    };
    let mut params = request.params;
    if request.clamp_start_year {
        if let Err(msg) = resolve_start_year(&mut params, &store) {
            return error_response(StatusCode::BAD_REQUEST, &msg);
        }
    }

    // A newer request supersedes whatever is still running.
    let cancel = CancelToken::new();
    {
        let mut in_flight = state
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = in_flight.replace(cancel.clone()) {
            previous.cancel();
        }
    }

    let job = tokio::task::spawn_blocking(move || {
        let result = run_simulation(&params, &store, &cancel);
        (params, result)
    });
    match job.await {
        Ok((params, Ok(output))) => {
            json_response(StatusCode::OK, build_simulate_response(&params, &output))
        }
        Ok((_, Err(err))) => {
            let status = status_for_error(&err);
            if status == StatusCode::CONFLICT {
                log::warn!("simulation superseded by a newer request");
            } else {
                log::warn!("simulation failed: {err}");
            }
            error_response(status, &err.to_string())
        }
        Err(join_error) => {
            log::error!("simulation task failed: {join_error}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulation task failed")
        }
    }
}

fn status_for_error(err: &SimError) -> StatusCode {
    match err {
        SimError::Cancelled => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
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

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.cash {
        cli.cash = v;
    }
    if let Some(v) = payload.equity_a {
        cli.equity_a = v;
    }
    if let Some(v) = payload.equity_b {
        cli.equity_b = v;
    }
    if let Some(v) = payload.alternative {
        cli.alternative = v;
    }
    if let Some(v) = payload.bond {
        cli.bond = v;
    }

    if let Some(v) = payload.horizon {
        cli.horizon = v;
    }
    if let Some(v) = payload.withdraw_rate {
        cli.withdraw_rate = v;
    }
    cli.withdraw_amount = match (payload.locked, payload.withdraw_amount) {
        (Some(ApiLockedField::Rate), _) => None,
        (Some(ApiLockedField::Amount), None) => {
            return Err("locked=amount requires withdrawAmount".to_string());
        }
        (_, amount) => amount,
    };

    if let Some(v) = payload.inflation_adjust {
        cli.inflation_adjust = v;
    }
    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }
    if let Some(v) = payload.historical_inflation {
        cli.historical_inflation = v;
    }

    if let Some(v) = payload.mode {
        cli.mode = v.into();
    }
    if let Some(v) = payload.runs {
        cli.runs = v;
    }
    if let Some(v) = payload.start_year {
        cli.start_year = v;
    }
    if let Some(v) = payload.clamp_start_year {
        cli.clamp_start_year = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    if let Some(v) = payload.policy {
        cli.policy = v.into();
    }
    if let Some(v) = payload.funding_order {
        cli.funding_order = v.into();
    }
    if let Some(v) = payload.four_percent_variant {
        cli.four_percent_variant = v.into();
    }
    if let Some(v) = payload.gk_upper_guardrail {
        cli.gk_upper_guardrail = v;
    }
    if let Some(v) = payload.gk_lower_guardrail {
        cli.gk_lower_guardrail = v;
    }
    if let Some(v) = payload.gk_cut {
        cli.gk_cut = v;
    }
    if let Some(v) = payload.gk_raise {
        cli.gk_raise = v;
    }
    if let Some(v) = payload.floor {
        cli.floor = v;
    }
    if let Some(v) = payload.ceiling {
        cli.ceiling = v;
    }
    if let Some(v) = payload.fixed_rate {
        cli.fixed_rate = v;
    }
    if let Some(v) = payload.cape_base {
        cli.cape_base = v;
    }
    if let Some(v) = payload.cape_fraction {
        cli.cape_fraction = v;
    }

    let params = build_params(&cli)?;
    Ok(ApiRequest {
        params,
        clamp_start_year: cli.clamp_start_year,
        series: payload.series,
    })
}

fn default_cli_for_api() -> Cli {
    Cli {
        series: None,
        cash: 0.0,
        equity_a: 1_000_000.0,
        equity_b: 0.0,
        alternative: 0.0,
        bond: 0.0,
        horizon: 30,
        withdraw_rate: 4.0,
        withdraw_amount: None,
        inflation_adjust: true,
        inflation_rate: 3.0,
        historical_inflation: false,
        mode: CliSamplingMode::ActualSeq,
        runs: 1_000,
        start_year: 1966,
        clamp_start_year: true,
        seed: 42,
        policy: CliPolicy::FourPercent,
        funding_order: CliFundingOrder::EquityAFirst,
        four_percent_variant: CliFourPercentVariant::Plain,
        gk_upper_guardrail: 20.0,
        gk_lower_guardrail: 20.0,
        gk_cut: 10.0,
        gk_raise: 10.0,
        floor: 10.0,
        ceiling: 25.0,
        fixed_rate: 4.0,
        cape_base: 1.0,
        cape_fraction: 50.0,
    }
}

fn build_simulate_response(
    params: &SimulationParams,
    output: &SimulationOutput,
) -> SimulateResponse {
    let deterministic_run = if params.mode.is_monte_carlo() {
        None
    } else {
        output.runs.first().cloned()
    };
    SimulateResponse {
        mode: params.mode.into(),
        policy: policy_label(&params.policy),
        runs: output.stats.run_count,
        horizon: params.horizon,
        start_year: deterministic_run.as_ref().map(|_| params.start_year),
        withdrawal: params.withdrawal,
        success_rate: output.stats.success_rate,
        percentile_bands: output.stats.percentile_bands.clone(),
        median_run: output.stats.median_run.clone(),
        drawdown: output.stats.drawdown,
        deterministic_run,
    }
}
