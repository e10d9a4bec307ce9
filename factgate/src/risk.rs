//! Deterministic risk scoring over venue metrics.
//!
//! The formula mirrors the on-chain contract term for term, including its
//! integer divisions, so the score submitted in calldata always matches what
//! the contract would recompute.

use serde::{Deserialize, Serialize};

/// Point-in-time metrics for one venue. Rates are in basis points,
/// `liquidity` is a depth tier (0 deepest), `audit_score` is 0..=100.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMetrics {
    pub utilization: u32,
    pub volatility: u32,
    pub liquidity: u32,
    pub audit_score: u32,
    pub age_days: u32,
}

/// The two venues the gated router allocates across, in calldata order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsPair {
    pub jediswap: ProtocolMetrics,
    pub ekubo: ProtocolMetrics,
}

pub const MIN_SCORE: u32 = 5;
pub const MAX_SCORE: u32 = 95;
pub const TOTAL_BPS: u32 = 10_000;

/// Days after which a venue no longer accrues an age penalty.
const MATURITY_DAYS: u32 = 730;

/// Risk score in [MIN_SCORE, MAX_SCORE]. Higher is riskier.
pub fn risk_score(m: &ProtocolMetrics) -> u32 {
    // Rates arrive from an external document and can exceed the bps scale;
    // saturate instead of wrapping so oversized values land in the clamp.
    let utilization = m.utilization.saturating_mul(25) / 10_000;
    let volatility = m.volatility.saturating_mul(40) / 10_000;
    let liquidity = match m.liquidity {
        0 => 0,
        1 => 5,
        2 => 15,
        _ => 30,
    };
    let audit = (100 - m.audit_score.min(100)) * 3 / 10;
    let age = if m.age_days < MATURITY_DAYS {
        (MATURITY_DAYS - m.age_days) * 10 / MATURITY_DAYS
    } else {
        0
    };
    (utilization + volatility + liquidity + audit + age).clamp(MIN_SCORE, MAX_SCORE)
}

/// Basis-point split across the two venues, always summing to [`TOTAL_BPS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSplit {
    pub jediswap_bps: u32,
    pub ekubo_bps: u32,
}

/// Splits the allocation inversely to risk: the safer venue earns the larger
/// share. `max_single_bps` of `None` leaves the split uncapped; a cap below
/// an even split is raised to one, since with two venues neither side can
/// hold less than the other's remainder.
pub fn allocation_split(
    jediswap_risk: u32,
    ekubo_risk: u32,
    max_single_bps: Option<u32>,
) -> AllocationSplit {
    // Scores are clamped to MIN_SCORE upstream, so the sum is never zero.
    let total = jediswap_risk + ekubo_risk;
    let uncapped = ekubo_risk * TOTAL_BPS / total;
    let cap = max_single_bps
        .map(|c| c.clamp(TOTAL_BPS / 2, TOTAL_BPS))
        .unwrap_or(TOTAL_BPS);
    let jediswap_bps = uncapped.clamp(TOTAL_BPS - cap, cap);
    AllocationSplit {
        jediswap_bps,
        ekubo_bps: TOTAL_BPS - jediswap_bps,
    }
}
