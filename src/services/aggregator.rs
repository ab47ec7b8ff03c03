use crate::models::metric::MetricRow;
use crate::services::stats::weighted_mean;

/// Volume-weighted mean of open interest across a batch:
/// `Σ(oi_i × vol_i) / Σ(vol_i)`. 0.0 for an empty batch or zero total volume.
pub fn compute_weighted_open_interest(rows: &[MetricRow]) -> f64 {
    let pairs: Vec<(f64, f64)> = rows
        .iter()
        .map(|r| (r.open_interest_usd, r.volume_24h_usd))
        .collect();
    weighted_mean(&pairs)
}

/// Stamp the batch aggregate onto every row. Rows always carry the field;
/// it is 0.0 when there is nothing to weight.
pub fn apply_weighted_open_interest(rows: &mut [MetricRow]) -> f64 {
    let weighted = compute_weighted_open_interest(rows);
    for row in rows.iter_mut() {
        row.weighted_open_interest_usd = weighted;
    }
    weighted
}
