use custody_types::{AssetId, CustodyError, CustodyResult, BASIS_POINTS_TOTAL};
use serde::{Deserialize, Serialize};

/// An active asset with its current value, as seen by a planner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Holding {
    pub asset: AssetId,
    pub target_bps: u32,
    pub rebalance_threshold_bps: u32,
    pub value: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Reduce,
    Increase,
}

/// A corrective move that brings `asset` from `before` to `after`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub asset: AssetId,
    pub direction: Direction,
    pub amount: u64,
    pub before: u64,
    pub after: u64,
}

/// Relative drift of `current` from `target`, in basis points of the target.
/// `None` when the target is zero and drift is undefined.
pub fn deviation_bps(current: u64, target: u64) -> Option<u128> {
    if target == 0 {
        return None;
    }
    let gap = current.abs_diff(target) as u128;
    Some(gap * BASIS_POINTS_TOTAL as u128 / target as u128)
}

/// Plan adjustments for every holding outside its band.
///
/// A zero target with a nonzero holding is always out of band.
pub fn plan_adjustments(holdings: &[Holding]) -> CustodyResult<Vec<Adjustment>> {
    let total = holdings.iter().try_fold(0u64, |acc, h| {
        acc.checked_add(h.value).ok_or_else(|| {
            CustodyError::InvariantViolation("portfolio value overflows u64".into())
        })
    })?;

    let mut adjustments = Vec::new();
    for holding in holdings {
        let target =
            (total as u128 * holding.target_bps as u128 / BASIS_POINTS_TOTAL as u128) as u64;
        let out_of_band = match deviation_bps(holding.value, target) {
            Some(deviation) => deviation > holding.rebalance_threshold_bps as u128,
            None => holding.value > 0,
        };
        if !out_of_band {
            continue;
        }
        let direction = if holding.value > target {
            Direction::Reduce
        } else {
            Direction::Increase
        };
        adjustments.push(Adjustment {
            asset: holding.asset.clone(),
            direction,
            amount: holding.value.abs_diff(target),
            before: holding.value,
            after: target,
        });
    }
    Ok(adjustments)
}
