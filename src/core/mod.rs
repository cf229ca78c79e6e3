mod engine;
mod error;
mod funding;
mod policy;
mod sampler;
mod series;
mod stats;
mod types;

pub use engine::{
    CancelToken, assets_in_use, policy_label, run_simulation, simulate_run, validate_params,
};
pub use error::SimError;
pub use funding::{draw_equal_parts, draw_in_order, fund_withdrawal, ranked_by_return};
pub use policy::{LONGEVITY_YEARS, PolicyContext, PolicyMemory, YearOutcome, step};
pub use sampler::{build_path, clamp_start_year, sample_years};
pub use series::{DEFAULT_CAPE, InflationPoint, ReturnPoint, ReturnSeries, SeriesFile, SeriesStore};
pub use stats::{
    drawdown_stats, median_run, percentile, percentile_bands, run_drawdown, success_rate,
    summarize,
};
pub use types::{
    AssetBucket, DrawdownStats, FourPercentVariant, FundingOrder, GuardrailEvent, GuardrailKind,
    GuardrailParams, InflationSource, LockedField, MedianRun, PercentileBand, PortfolioState,
    ReturnPath, RunDrawdown, RunResult, SamplingMode, SimulationOutput, SimulationParams,
    SimulationStats, WithdrawalPolicy, WithdrawalTarget, YearReturns,
};
