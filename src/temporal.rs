use crate::config::TemporalConfig;
use crate::errors::Result;
use crate::grouping::{group_rows, par_map_groups};
use crate::models::SeriesRow;

/// Recompute `dif_to_forelast` on every row, group by group.
///
/// Any previous value in the column is discarded. The first `lag` rows of
/// each group are left undefined.
pub fn compute_dif_to_forelast(rows: Vec<SeriesRow>, config: &TemporalConfig) -> Result<Vec<SeriesRow>> {
    let lag = config.lag;
    par_map_groups(group_rows(rows), |_, mut group| {
        let values: Vec<f64> = group.iter().map(|r| r.ndvi).collect();
        for (row, dif) in group.iter_mut().zip(lagged_difference(&values, lag)) {
            row.dif_to_forelast = dif;
        }
        Ok(group)
    })
}

/// `values[i] - values[i - lag]`, `None` where no earlier value exists.
pub fn lagged_difference(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| i.checked_sub(lag).map(|j| v - values[j]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_lag_two_difference() {
        let d = lagged_difference(&[10.0, 12.0, 8.0, 20.0], 2);
        assert_eq!(d, vec![None, None, Some(-2.0), Some(8.0)]);
    }

    #[test]
    fn test_short_sequences_are_undefined() {
        assert_eq!(lagged_difference(&[1.0], 2), vec![None]);
        assert_eq!(lagged_difference(&[1.0, 2.0], 2), vec![None, None]);
        assert!(lagged_difference(&[], 2).is_empty());
    }

    #[test]
    fn test_groups_do_not_leak_into_each_other() {
        let row = |y, m, d, f: &str, v| SeriesRow {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            field_id: f.to_string(),
            ndvi: v,
            dif_to_forelast: Some(99.0),
        };
        let rows = vec![
            row(2020, 12, 1, "a", 1.0),
            row(2020, 12, 5, "a", 2.0),
            row(2021, 1, 1, "a", 5.0),
            row(2020, 12, 9, "a", 4.0),
            row(2021, 1, 3, "b", 7.0),
        ];
        let out = compute_dif_to_forelast(rows, &TemporalConfig::default()).unwrap();
        let difs: Vec<Option<f64>> = out.iter().map(|r| r.dif_to_forelast).collect();
        // 2020/a: [1, 2, 4] -> [-, -, 3]; 2021/a: [5] -> [-]; 2021/b: [7] -> [-]
        assert_eq!(difs, vec![None, None, Some(3.0), None, None]);
    }
}
