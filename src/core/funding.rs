use super::types::{AssetBucket, FundingOrder, PortfolioState, YearReturns};

/// Shortfall below which an equal-parts withdrawal counts as fully funded.
const FUNDED_TOLERANCE: f64 = 1e-9;

/// Draws `amount` from cash first and then from `order`, each bucket capped at
/// its balance. Returns what was actually drawn.
pub fn draw_in_order(state: &mut PortfolioState, amount: f64, order: &[AssetBucket]) -> f64 {
    if amount <= 0.0 {
        return 0.0;
    }

    let mut drawn = state.draw(AssetBucket::Cash, amount);
    for bucket in order {
        let remaining = amount - drawn;
        if remaining <= 0.0 {
            break;
        }
        drawn += state.draw(*bucket, remaining);
    }
    drawn
}

/// Cash first, then an even split over every funded invested bucket. Buckets
/// that run dry push their unmet share onto the buckets still holding money in
/// the next round.
pub fn draw_equal_parts(state: &mut PortfolioState, amount: f64) -> f64 {
    if amount <= 0.0 {
        return 0.0;
    }

    let mut drawn = state.draw(AssetBucket::Cash, amount);
    for _ in 0..AssetBucket::INVESTED.len() {
        let remaining = amount - drawn;
        if remaining <= FUNDED_TOLERANCE {
            break;
        }
        let funded = state.funded_invested();
        if funded.is_empty() {
            break;
        }

        let share = remaining / funded.len() as f64;
        let mut round = 0.0;
        for bucket in funded {
            round += state.draw(bucket, share);
        }
        drawn += round;
        if round <= 0.0 {
            break;
        }
    }

    // floating residue
    for bucket in AssetBucket::INVESTED {
        let remaining = amount - drawn;
        if remaining <= FUNDED_TOLERANCE {
            break;
        }
        drawn += state.draw(bucket, remaining);
    }
    drawn
}

/// Invested buckets ranked by this year's multiplier; ties keep declaration order.
pub fn ranked_by_return(returns: &YearReturns, best_first: bool) -> Vec<AssetBucket> {
    let mut order = AssetBucket::INVESTED.to_vec();
    if best_first {
        order.sort_by(|a, b| returns.multiplier(*b).total_cmp(&returns.multiplier(*a)));
    } else {
        order.sort_by(|a, b| returns.multiplier(*a).total_cmp(&returns.multiplier(*b)));
    }
    order
}

pub fn fund_withdrawal(
    state: &mut PortfolioState,
    amount: f64,
    order: FundingOrder,
    returns: &YearReturns,
) -> f64 {
    match order {
        FundingOrder::EquityAThenB => draw_in_order(state, amount, &AssetBucket::INVESTED),
        FundingOrder::EquityBThenA => draw_in_order(
            state,
            amount,
            &[
                AssetBucket::EquityB,
                AssetBucket::EquityA,
                AssetBucket::Alternative,
                AssetBucket::Bond,
            ],
        ),
        FundingOrder::EqualParts => draw_equal_parts(state, amount),
        FundingOrder::BestPerformerFirst => {
            draw_in_order(state, amount, &ranked_by_return(returns, true))
        }
        FundingOrder::WorstPerformerFirst => {
            draw_in_order(state, amount, &ranked_by_return(returns, false))
        }
    }
}
