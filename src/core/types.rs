use std::fmt;

use serde::Serialize;

use super::series::DEFAULT_CAPE;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetBucket {
    Cash,
    EquityA,
    EquityB,
    Alternative,
    Bond,
}

impl AssetBucket {
    pub const ALL: [AssetBucket; 5] = [
        AssetBucket::Cash,
        AssetBucket::EquityA,
        AssetBucket::EquityB,
        AssetBucket::Alternative,
        AssetBucket::Bond,
    ];

    /// Buckets that carry a return series, in declaration order.
    pub const INVESTED: [AssetBucket; 4] = [
        AssetBucket::EquityA,
        AssetBucket::EquityB,
        AssetBucket::Alternative,
        AssetBucket::Bond,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AssetBucket::Cash => "cash",
            AssetBucket::EquityA => "equity-a",
            AssetBucket::EquityB => "equity-b",
            AssetBucket::Alternative => "alternative",
            AssetBucket::Bond => "bond",
        }
    }
}

impl fmt::Display for AssetBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioState {
    pub cash: f64,
    pub equity_a: f64,
    pub equity_b: f64,
    pub alternative: f64,
    pub bond: f64,
}

impl PortfolioState {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn total(&self) -> f64 {
        self.cash + self.equity_a + self.equity_b + self.alternative + self.bond
    }

    pub fn get(&self, bucket: AssetBucket) -> f64 {
        match bucket {
            AssetBucket::Cash => self.cash,
            AssetBucket::EquityA => self.equity_a,
            AssetBucket::EquityB => self.equity_b,
            AssetBucket::Alternative => self.alternative,
            AssetBucket::Bond => self.bond,
        }
    }

    pub fn get_mut(&mut self, bucket: AssetBucket) -> &mut f64 {
        match bucket {
            AssetBucket::Cash => &mut self.cash,
            AssetBucket::EquityA => &mut self.equity_a,
            AssetBucket::EquityB => &mut self.equity_b,
            AssetBucket::Alternative => &mut self.alternative,
            AssetBucket::Bond => &mut self.bond,
        }
    }

    /// Takes up to `requested` from one bucket and returns what was actually drawn.
    pub fn draw(&mut self, bucket: AssetBucket, requested: f64) -> f64 {
        if requested <= 0.0 {
            return 0.0;
        }
        let balance = self.get_mut(bucket);
        let x = balance.max(0.0).min(requested);
        *balance -= x;
        x
    }

    /// Invested buckets holding money, in declaration order.
    pub fn funded_invested(&self) -> Vec<AssetBucket> {
        AssetBucket::INVESTED
            .into_iter()
            .filter(|bucket| self.get(*bucket) > 0.0)
            .collect()
    }
}

/// One simulated year of market data: a multiplier per invested bucket plus
/// the inflation rate (fraction) and CAPE ratio of the same sampled calendar year.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct YearReturns {
    pub year: i32,
    pub equity_a: f64,
    pub equity_b: f64,
    pub alternative: f64,
    pub bond: f64,
    pub inflation: f64,
    pub cape: f64,
}

impl YearReturns {
    pub fn flat(year: i32, multiplier: f64, inflation: f64) -> Self {
        Self {
            year,
            equity_a: multiplier,
            equity_b: multiplier,
            alternative: multiplier,
            bond: multiplier,
            inflation,
            cape: DEFAULT_CAPE,
        }
    }

    pub fn multiplier(&self, bucket: AssetBucket) -> f64 {
        match bucket {
            AssetBucket::Cash => 1.0,
            AssetBucket::EquityA => self.equity_a,
            AssetBucket::EquityB => self.equity_b,
            AssetBucket::Alternative => self.alternative,
            AssetBucket::Bond => self.bond,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReturnPath {
    pub years: Vec<YearReturns>,
}

impl ReturnPath {
    pub fn sampled_years(&self) -> Vec<i32> {
        self.years.iter().map(|y| y.year).collect()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingMode {
    ActualSequence,
    ActualSequenceRandomStart,
    RandomShuffle,
    Bootstrap,
}

impl SamplingMode {
    pub fn is_monte_carlo(self) -> bool {
        !matches!(self, SamplingMode::ActualSequence)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InflationSource {
    /// Constant annual rate as a fraction.
    Flat(f64),
    /// Looked up per sampled year; missing years count as zero.
    Historical,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FundingOrder {
    EquityAThenB,
    EquityBThenA,
    EqualParts,
    BestPerformerFirst,
    WorstPerformerFirst,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FourPercentVariant {
    Plain,
    PrincipalProtection,
    UpwardReset,
}

/// Guyton-Klinger bands, all fractions. `upper_guardrail` is the band above the
/// initial rate that triggers a cut; `lower_guardrail` the band below it that
/// triggers a raise.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailParams {
    pub upper_guardrail: f64,
    pub lower_guardrail: f64,
    pub cut_pct: f64,
    pub raise_pct: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WithdrawalPolicy {
    FixedOrder { order: FundingOrder },
    GuytonKlinger(GuardrailParams),
    FloorCeiling { floor: f64, ceiling: f64 },
    FixedPercentage { rate: f64 },
    Cape { base: f64, fraction: f64 },
    FourPercent { variant: FourPercentVariant },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockedField {
    Rate,
    Amount,
}

/// First-year withdrawal expressed both as a percent of principal and as a
/// dollar amount. Exactly one side is the source of truth; the other is
/// recomputed whenever the principal changes.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalTarget {
    pub rate_pct: f64,
    pub amount: f64,
    pub locked: LockedField,
}

impl WithdrawalTarget {
    pub fn from_rate(rate_pct: f64, principal: f64) -> Self {
        let mut target = Self {
            rate_pct,
            amount: 0.0,
            locked: LockedField::Rate,
        };
        target.rebase(principal);
        target
    }

    pub fn from_amount(amount: f64, principal: f64) -> Self {
        let mut target = Self {
            rate_pct: 0.0,
            amount,
            locked: LockedField::Amount,
        };
        target.rebase(principal);
        target
    }

    pub fn set_rate(&mut self, rate_pct: f64, principal: f64) {
        self.rate_pct = rate_pct;
        self.locked = LockedField::Rate;
        self.rebase(principal);
    }

    pub fn set_amount(&mut self, amount: f64, principal: f64) {
        self.amount = amount;
        self.locked = LockedField::Amount;
        self.rebase(principal);
    }

    /// Recomputes the derived side for a new principal. Returns whether
    /// anything was written.
    pub fn rebase(&mut self, principal: f64) -> bool {
        match self.locked {
            LockedField::Rate => {
                let computed = principal * self.rate_pct / 100.0;
                if computed != self.amount {
                    self.amount = computed;
                    return true;
                }
                false
            }
            LockedField::Amount => {
                if principal <= 0.0 {
                    return false;
                }
                let computed = self.amount / principal * 100.0;
                if computed != self.rate_pct {
                    self.rate_pct = computed;
                    return true;
                }
                false
            }
        }
    }

    /// Rate as a fraction.
    pub fn rate(&self) -> f64 {
        self.rate_pct / 100.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimulationParams {
    pub initial: PortfolioState,
    pub horizon: u32,
    pub withdrawal: WithdrawalTarget,
    pub inflation_adjust: bool,
    pub inflation: InflationSource,
    pub mode: SamplingMode,
    pub runs: u32,
    pub start_year: i32,
    pub seed: u64,
    pub policy: WithdrawalPolicy,
}

impl SimulationParams {
    pub fn run_count(&self) -> u32 {
        if self.mode.is_monte_carlo() {
            self.runs
        } else {
            1
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailKind {
    Cut,
    Raise,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailEvent {
    pub year: u32,
    pub kind: GuardrailKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub balances: Vec<PortfolioState>,
    pub withdrawals: Vec<f64>,
    pub failed_year: Option<u32>,
    pub sampled_years: Vec<i32>,
    pub guardrail_events: Vec<GuardrailEvent>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.failed_year.is_none()
    }

    pub fn totals(&self) -> Vec<f64> {
        self.balances.iter().map(PortfolioState::total).collect()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBand {
    pub step: u32,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

/// Per-step cross-sectional medians. Not a trajectory any single run took.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MedianRun {
    pub totals: Vec<f64>,
    pub balances: Vec<PortfolioState>,
    pub withdrawals: Vec<f64>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDrawdown {
    pub max_drawdown: f64,
    pub low_point: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownStats {
    pub median_max_drawdown: f64,
    pub median_low_point: f64,
    pub worst_max_drawdown: f64,
    pub lowest_low_point: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStats {
    pub run_count: usize,
    pub success_rate: f64,
    pub percentile_bands: Vec<PercentileBand>,
    pub median_run: MedianRun,
    pub drawdown: DrawdownStats,
}

#[derive(Clone, Debug)]
pub struct SimulationOutput {
    pub runs: Vec<RunResult>,
    pub stats: SimulationStats,
}
