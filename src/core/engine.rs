use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::error::SimError;
use super::policy::{PolicyContext, PolicyMemory, step};
use super::sampler::{build_path, sample_years};
use super::series::SeriesStore;
use super::stats::summarize;
use super::types::{
    AssetBucket, FourPercentVariant, InflationSource, PortfolioState, ReturnPath, RunResult,
    SimulationOutput, SimulationParams, WithdrawalPolicy,
};

/// Shared abort flag for a batch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Invested buckets that start with money. An all-cash portfolio still
/// samples equity A so the run has a year window to walk.
pub fn assets_in_use(initial: &PortfolioState) -> Vec<AssetBucket> {
    let funded = initial.funded_invested();
    if funded.is_empty() {
        vec![AssetBucket::EquityA]
    } else {
        funded
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), SimError> {
    if !value.is_finite() || value < 0.0 {
        return Err(SimError::InvalidParameter {
            name,
            reason: format!("must be a finite value >= 0, got {value}"),
        });
    }
    Ok(())
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), SimError> {
    check_non_negative(name, value)?;
    if value > 1.0 {
        return Err(SimError::InvalidParameter {
            name,
            reason: format!("must not exceed 100%, got {}%", value * 100.0),
        });
    }
    Ok(())
}

pub fn validate_params(params: &SimulationParams) -> Result<(), SimError> {
    if params.horizon == 0 {
        return Err(SimError::InvalidHorizon);
    }
    if params.mode.is_monte_carlo() && params.runs == 0 {
        return Err(SimError::InvalidRunCount);
    }
    for bucket in AssetBucket::ALL {
        let balance = params.initial.get(bucket);
        if !balance.is_finite() || balance < 0.0 {
            return Err(SimError::NegativeBalance { bucket });
        }
    }

    check_non_negative("withdrawal rate", params.withdrawal.rate())?;
    check_non_negative("withdrawal amount", params.withdrawal.amount)?;
    if let InflationSource::Flat(rate) = params.inflation {
        if !rate.is_finite() || rate <= -1.0 {
            return Err(SimError::InvalidParameter {
                name: "inflation",
                reason: format!("must be a finite rate above -100%, got {rate}"),
            });
        }
    }

    match params.policy {
        WithdrawalPolicy::FixedOrder { .. } | WithdrawalPolicy::FourPercent { .. } => {}
        WithdrawalPolicy::GuytonKlinger(gk) => {
            check_non_negative("upper guardrail", gk.upper_guardrail)?;
            check_fraction("lower guardrail", gk.lower_guardrail)?;
            check_fraction("guardrail cut", gk.cut_pct)?;
            check_non_negative("guardrail raise", gk.raise_pct)?;
        }
        WithdrawalPolicy::FloorCeiling { floor, ceiling } => {
            check_fraction("floor", floor)?;
            check_non_negative("ceiling", ceiling)?;
        }
        WithdrawalPolicy::FixedPercentage { rate } => check_fraction("fixed rate", rate)?,
        WithdrawalPolicy::Cape { base, fraction } => {
            check_fraction("cape base", base)?;
            check_non_negative("cape fraction", fraction)?;
        }
    }
    Ok(())
}

/// Plays one run over `path`. `balances` has `horizon + 1` entries (the
/// opening state first) and `withdrawals` has `horizon`. After a failure in
/// year `k` (1-based) every later slot is zero. A path shorter than the
/// horizon is rejected.
pub fn simulate_run(
    params: &SimulationParams,
    path: &ReturnPath,
) -> Result<RunResult, SimError> {
    let horizon = params.horizon as usize;
    if path.years.len() < horizon {
        return Err(SimError::ShortPath {
            available: path.years.len(),
            horizon: params.horizon,
        });
    }
    let ctx = PolicyContext::from_params(params);
    let mut memory = PolicyMemory::new(&params.policy, &ctx);
    let mut state = params.initial;

    let mut balances = Vec::with_capacity(horizon + 1);
    let mut withdrawals = Vec::with_capacity(horizon);
    let mut failed_year = None;
    balances.push(state);

    for (t, returns) in path.years.iter().take(horizon).enumerate() {
        let outcome = step(
            &params.policy,
            &ctx,
            &mut state,
            returns,
            t as u32,
            &mut memory,
        );
        withdrawals.push(outcome.withdrawal);
        balances.push(state);
        if outcome.failed {
            failed_year = Some(t as u32 + 1);
            break;
        }
    }

    withdrawals.resize(horizon, 0.0);
    balances.resize(horizon + 1, PortfolioState::zero());

    Ok(RunResult {
        balances,
        withdrawals,
        failed_year,
        sampled_years: path.sampled_years(),
        guardrail_events: memory.guardrail_events,
    })
}

/// Validates everything, then plays every run of the batch in parallel and
/// summarizes them. Any data or configuration problem is reported before a
/// single run executes.
pub fn run_simulation(
    params: &SimulationParams,
    store: &SeriesStore,
    cancel: &CancelToken,
) -> Result<SimulationOutput, SimError> {
    validate_params(params)?;

    let assets = assets_in_use(&params.initial);
    let years = store.common_years(&assets)?;
    let inflation = if params.inflation_adjust {
        params.inflation
    } else {
        InflationSource::Flat(0.0)
    };

    // Deterministic mode never touches the RNG; sample it once up front so a
    // bad start year is reported before the batch starts.
    let fixed_path = if params.mode.is_monte_carlo() {
        None
    } else {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let sampled = sample_years(
            params.mode,
            params.horizon,
            &years,
            params.start_year,
            &mut rng,
        )?;
        Some(build_path(store, &assets, &sampled, inflation)?)
    };

    let run_count = params.run_count();
    log::info!(
        "simulating {run_count} run(s): mode={:?} policy={} horizon={} window={}..={}",
        params.mode,
        policy_label(&params.policy),
        params.horizon,
        years[0],
        years[years.len() - 1],
    );

    let runs = (0..run_count)
        .into_par_iter()
        .map(|run_index| {
            if cancel.is_cancelled() {
                return Err(SimError::Cancelled);
            }
            if let Some(path) = &fixed_path {
                return simulate_run(params, path);
            }
            let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(params.seed, run_index));
            let sampled = sample_years(
                params.mode,
                params.horizon,
                &years,
                params.start_year,
                &mut rng,
            )?;
            let path = build_path(store, &assets, &sampled, inflation)?;
            simulate_run(params, &path)
        })
        .collect::<Result<Vec<_>, SimError>>()?;

    if cancel.is_cancelled() {
        log::warn!("simulation cancelled after {} run(s)", runs.len());
        return Err(SimError::Cancelled);
    }

    let stats = summarize(&runs);
    log::debug!(
        "batch finished: runs={} success_rate={:.4}",
        stats.run_count,
        stats.success_rate
    );
    Ok(SimulationOutput { runs, stats })
}

pub fn policy_label(policy: &WithdrawalPolicy) -> &'static str {
    match policy {
        WithdrawalPolicy::FixedOrder { .. } => "fixed-order",
        WithdrawalPolicy::GuytonKlinger(_) => "guyton-klinger",
        WithdrawalPolicy::FloorCeiling { .. } => "floor-ceiling",
        WithdrawalPolicy::FixedPercentage { .. } => "fixed-percentage",
        WithdrawalPolicy::Cape { .. } => "cape",
        WithdrawalPolicy::FourPercent { variant } => match variant {
            FourPercentVariant::Plain => "four-percent",
            FourPercentVariant::PrincipalProtection => "four-percent-principal-protection",
            FourPercentVariant::UpwardReset => "four-percent-upward-reset",
        },
    }
}

fn derive_seed(base_seed: u64, run_index: u32) -> u64 {
    splitmix64(base_seed ^ ((run_index as u64) << 32) ^ run_index as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
