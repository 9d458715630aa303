use tracing::debug;

use crate::config::ValleyConfig;
use crate::errors::Result;
use crate::grouping::{group_rows, par_map_groups};
use crate::models::FlaggedObservation;

/// Flag local minima per (year, field_id) group.
///
/// An interior point is a valley when it sits at least `drop_threshold`
/// below both neighbours. The first and last point of a group never are.
/// Any flag already present on the input rows is overwritten.
pub fn flag_valleys(
    rows: Vec<FlaggedObservation>,
    config: &ValleyConfig,
) -> Result<Vec<FlaggedObservation>> {
    let threshold = config.drop_threshold;
    let out = par_map_groups(group_rows(rows), |key, mut group| {
        let ndvi: Vec<f64> = group.iter().map(|r| r.ndvi).collect();
        let flags = valley_flags(&ndvi, threshold);
        for (row, flag) in group.iter_mut().zip(flags) {
            row.valley = flag;
        }
        debug!(
            "valley: {} {} -> {} of {} flagged",
            key.year,
            key.field_id,
            group.iter().filter(|r| r.valley).count(),
            group.len()
        );
        Ok(group)
    })?;
    Ok(out)
}

/// Valley flags for one date-ordered NDVI sequence.
pub fn valley_flags(ndvi: &[f64], threshold: f64) -> Vec<bool> {
    let n = ndvi.len();
    (0..n)
        .map(|i| {
            if i == 0 || i + 1 == n {
                return false;
            }
            let diff_prev = ndvi[i] - ndvi[i - 1];
            let diff_next = ndvi[i] - ndvi[i + 1];
            diff_prev <= threshold && diff_next <= threshold
        })
        .collect()
}
