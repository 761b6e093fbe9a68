use crate::models::PlanTier;
use rust_decimal::Decimal;

pub fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Tiers are scanned from the highest price down and the first match wins, so
/// the result is deterministic even when tolerance bands overlap.
pub fn resolve_plan(amount_usd: Decimal, tiers: &[PlanTier]) -> Option<&PlanTier> {
    let mut ordered: Vec<&PlanTier> = tiers.iter().filter(|t| t.price > Decimal::ZERO).collect();
    ordered.sort_by(|a, b| b.price.cmp(&a.price));

    ordered
        .into_iter()
        .find(|tier| (amount_usd - tier.price).abs() / tier.price <= tolerance())
}

pub fn overlapping_tiers(tiers: &[PlanTier]) -> Vec<(String, String)> {
    let band = |t: &PlanTier| {
        let delta = t.price * tolerance();
        (t.price - delta, t.price + delta)
    };

    let mut overlaps = Vec::new();
    for (i, a) in tiers.iter().enumerate() {
        for b in tiers.iter().skip(i + 1) {
            let (a_lo, a_hi) = band(a);
            let (b_lo, b_hi) = band(b);
            if a_lo <= b_hi && b_lo <= a_hi {
                overlaps.push((a.name.clone(), b.name.clone()));
            }
        }
    }
    overlaps
}
