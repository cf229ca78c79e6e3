use super::funding::{draw_in_order, fund_withdrawal};
use super::types::{
    AssetBucket, FourPercentVariant, GuardrailEvent, GuardrailKind, GuardrailParams,
    PortfolioState, SimulationParams, WithdrawalPolicy, YearReturns,
};

/// Guardrails stay off for this many closing years of the horizon.
pub const LONGEVITY_YEARS: u32 = 15;

/// Run-wide inputs every policy step reads but never changes.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    pub start_balance: f64,
    /// Initial withdrawal rate as a fraction.
    pub initial_rate: f64,
    pub initial_amount: f64,
    pub inflation_adjust: bool,
    pub horizon: u32,
}

impl PolicyContext {
    pub fn from_params(params: &SimulationParams) -> Self {
        let start_balance = params.initial.total();
        let mut target = params.withdrawal;
        target.rebase(start_balance);
        Self {
            start_balance,
            initial_rate: target.rate(),
            initial_amount: target.amount,
            inflation_adjust: params.inflation_adjust,
            horizon: params.horizon,
        }
    }

    fn baseline(&self) -> f64 {
        self.start_balance * self.initial_rate
    }
}

/// State a policy carries from one year to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyMemory {
    /// Withdrawal planned for the coming year by the adaptive policies.
    pub withdrawal: f64,
    /// Cumulative inflation since year 0 (1.0 when inflation adjustment is off).
    pub price_index: f64,
    pub guardrail_events: Vec<GuardrailEvent>,
}

impl PolicyMemory {
    pub fn new(policy: &WithdrawalPolicy, ctx: &PolicyContext) -> Self {
        let withdrawal = match policy {
            WithdrawalPolicy::FourPercent { .. } => ctx.initial_amount,
            _ => ctx.baseline(),
        };
        Self {
            withdrawal,
            price_index: 1.0,
            guardrail_events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YearOutcome {
    /// Amount actually drawn this year.
    pub withdrawal: f64,
    pub failed: bool,
}

/// Advances one year: plan the withdrawal, fund it, detect depletion, grow
/// what is left and update the policy's memory for the next year.
pub fn step(
    policy: &WithdrawalPolicy,
    ctx: &PolicyContext,
    state: &mut PortfolioState,
    returns: &YearReturns,
    year: u32,
    memory: &mut PolicyMemory,
) -> YearOutcome {
    let start_total = state.total();
    let planned = planned_withdrawal(policy, ctx, start_total, returns, memory);

    let withdrawn = match policy {
        WithdrawalPolicy::FixedOrder { order } => fund_withdrawal(state, planned, *order, returns),
        _ => draw_in_order(state, planned, &AssetBucket::INVESTED),
    };

    let pre_growth = state.total();
    if pre_growth <= 0.0 {
        *state = PortfolioState::zero();
        return YearOutcome {
            withdrawal: withdrawn,
            failed: true,
        };
    }

    apply_growth(state, returns);
    let post_growth = state.total();

    let inflation_step = if ctx.inflation_adjust {
        1.0 + returns.inflation
    } else {
        1.0
    };
    memory.price_index *= inflation_step;

    match policy {
        WithdrawalPolicy::GuytonKlinger(params) => {
            update_guardrails(
                params,
                ctx,
                year,
                pre_growth,
                post_growth,
                inflation_step,
                memory,
            );
        }
        WithdrawalPolicy::FourPercent {
            variant: FourPercentVariant::UpwardReset,
        } => {
            let mut next = memory.withdrawal * inflation_step;
            if post_growth > start_total {
                next = next.max(post_growth * ctx.initial_rate);
            }
            memory.withdrawal = next;
        }
        _ => {}
    }

    YearOutcome {
        withdrawal: withdrawn,
        failed: false,
    }
}

fn planned_withdrawal(
    policy: &WithdrawalPolicy,
    ctx: &PolicyContext,
    start_total: f64,
    returns: &YearReturns,
    memory: &PolicyMemory,
) -> f64 {
    let amount = match policy {
        WithdrawalPolicy::FixedOrder { .. } => ctx.baseline() * memory.price_index,
        WithdrawalPolicy::GuytonKlinger(_) => memory.withdrawal,
        WithdrawalPolicy::FloorCeiling { floor, ceiling } => {
            let initial = ctx.baseline();
            let lower = initial * (1.0 - floor);
            let upper = initial * (1.0 + ceiling);
            (start_total * ctx.initial_rate).max(lower).min(upper) * memory.price_index
        }
        WithdrawalPolicy::FixedPercentage { rate } => start_total * rate,
        WithdrawalPolicy::Cape { base, fraction } => {
            let earnings_yield = if returns.cape > 0.0 {
                1.0 / returns.cape
            } else {
                0.0
            };
            start_total * (base + fraction * earnings_yield)
        }
        WithdrawalPolicy::FourPercent { variant } => match variant {
            FourPercentVariant::Plain => ctx.initial_amount * memory.price_index,
            FourPercentVariant::PrincipalProtection => {
                if start_total < ctx.start_balance {
                    0.0
                } else {
                    ctx.initial_amount * memory.price_index
                }
            }
            FourPercentVariant::UpwardReset => memory.withdrawal,
        },
    };
    amount.max(0.0)
}

fn apply_growth(state: &mut PortfolioState, returns: &YearReturns) {
    for bucket in AssetBucket::ALL {
        let balance = state.get_mut(bucket);
        *balance = (*balance * returns.multiplier(bucket)).max(0.0);
    }
}

fn update_guardrails(
    params: &GuardrailParams,
    ctx: &PolicyContext,
    year: u32,
    pre_growth: f64,
    post_growth: f64,
    inflation_step: f64,
    memory: &mut PolicyMemory,
) {
    let realized_return = post_growth / pre_growth - 1.0;
    let mut next = memory.withdrawal;
    if realized_return >= 0.0 {
        next *= inflation_step;
    }

    let guardrails_active = year < ctx.horizon.saturating_sub(LONGEVITY_YEARS);
    if guardrails_active && post_growth > 0.0 {
        let current_rate = next / post_growth;
        let cut_above = ctx.initial_rate * (1.0 + params.upper_guardrail);
        let raise_below = ctx.initial_rate * (1.0 - params.lower_guardrail);

        if current_rate > cut_above {
            next *= 1.0 - params.cut_pct;
            memory.guardrail_events.push(GuardrailEvent {
                year,
                kind: GuardrailKind::Cut,
            });
        } else if current_rate < raise_below {
            next *= 1.0 + params.raise_pct;
            memory.guardrail_events.push(GuardrailEvent {
                year,
                kind: GuardrailKind::Raise,
            });
        }
    }

    memory.withdrawal = next;
}
