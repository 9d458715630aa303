use chrono::{Datelike, NaiveDate};
use tracing::{debug, info};

use crate::config::CuttingConfig;
use crate::errors::Result;
use crate::grouping::{group_rows, par_map_groups};
use crate::models::{CuttingRecord, DifferenceRow};

/// Textual form of cut dates in the output table.
pub const CUT_DATE_FORMAT: &str = "%d/%m/%Y";

/// Drop observations from months with no expected mowing activity.
pub fn exclude_months(rows: Vec<DifferenceRow>, excluded_months: &[u32]) -> Vec<DifferenceRow> {
    rows.into_iter()
        .filter(|r| !excluded_months.contains(&r.date.month()))
        .collect()
}

/// First date of every maximal run of rows whose `dif_to_forelast` is at or
/// below `threshold`. Rows must be in date order. A row with no difference
/// closes the current run.
pub fn cluster_start_dates(rows: &[DifferenceRow], threshold: f64) -> Vec<NaiveDate> {
    let mut starts = Vec::new();
    let mut in_cluster = false;
    for row in rows {
        let drop = matches!(row.dif_to_forelast, Some(d) if d <= threshold);
        if drop && !in_cluster {
            starts.push(row.date);
        }
        in_cluster = drop;
    }
    starts
}

/// Detect cutting events per (year, field_id) after the month filter.
///
/// Every group that still has rows after filtering yields a record, possibly
/// with zero cuts.
pub fn detect_cutting_events(rows: Vec<DifferenceRow>, config: &CuttingConfig) -> Result<Vec<CuttingRecord>> {
    let before = rows.len();
    let rows = exclude_months(rows, &config.excluded_months);
    info!(
        "Cutting detection: {} of {} rows outside excluded months {:?}",
        rows.len(),
        before,
        config.excluded_months
    );

    let threshold = config.drop_threshold;
    let records = par_map_groups(group_rows(rows), |key, group| {
        let cut_dates = cluster_start_dates(&group, threshold);
        debug!("cuts: {} {} -> {:?}", key.year, key.field_id, cut_dates);
        Ok(vec![CuttingRecord {
            year: key.year,
            field_id: key.field_id.clone(),
            cut_dates,
        }])
    })?;
    Ok(records)
}

/// Cutting records pivoted into `cut_1 .. cut_k` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutTable {
    pub records: Vec<CuttingRecord>,
}

impl CutTable {
    pub fn new(records: Vec<CuttingRecord>) -> Self {
        Self { records }
    }

    /// Largest cluster count of any group; the number of `cut_i` columns.
    pub fn max_cuts(&self) -> usize {
        self.records.iter().map(CuttingRecord::num_cuts).max().unwrap_or(0)
    }

    pub fn cut_column_names(&self) -> Vec<String> {
        (1..=self.max_cuts()).map(|i| format!("cut_{}", i)).collect()
    }

    /// Formatted value of `cut_{index+1}` for every record, `None` past a
    /// record's own count.
    pub fn cut_column(&self, index: usize) -> Vec<Option<String>> {
        self.records
            .iter()
            .map(|r| r.cut_dates.get(index).map(|d| d.format(CUT_DATE_FORMAT).to_string()))
            .collect()
    }

    pub fn total_cuts(&self) -> usize {
        self.records.iter().map(CuttingRecord::num_cuts).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(m: u32, d: u32, dif: Option<f64>) -> DifferenceRow {
        DifferenceRow {
            date: NaiveDate::from_ymd_opt(2021, m, d).unwrap(),
            field_id: "meadow".to_string(),
            dif_to_forelast: dif,
        }
    }

    #[test]
    fn test_two_clusters() {
        let rows = vec![
            row(6, 1, Some(-0.2)),
            row(6, 2, Some(-0.15)),
            row(6, 3, Some(0.1)),
            row(6, 4, Some(-0.3)),
        ];
        let starts = cluster_start_dates(&rows, -0.1);
        assert_eq!(starts, vec![rows[0].date, rows[3].date]);
    }

    #[test]
    fn test_no_qualifying_rows() {
        let rows = vec![row(6, 1, None), row(6, 2, Some(-0.05)), row(6, 3, Some(0.2))];
        assert!(cluster_start_dates(&rows, -0.1).is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let rows = vec![row(6, 1, Some(-0.1))];
        assert_eq!(cluster_start_dates(&rows, -0.1).len(), 1);
    }

    #[test]
    fn test_missing_difference_closes_cluster() {
        let rows = vec![row(6, 1, Some(-0.2)), row(6, 2, None), row(6, 3, Some(-0.2))];
        assert_eq!(cluster_start_dates(&rows, -0.1).len(), 2);
    }

    #[test]
    fn test_sampling_gap_does_not_split_cluster() {
        let rows = vec![row(6, 1, Some(-0.2)), row(6, 20, Some(-0.4))];
        assert_eq!(cluster_start_dates(&rows, -0.1), vec![rows[0].date]);
    }

    #[test]
    fn test_excluded_months_are_removed_before_clustering() {
        let rows = vec![row(3, 30, Some(-0.5)), row(4, 2, Some(-0.5)), row(5, 2, Some(-0.5))];
        let records = detect_cutting_events(rows, &CuttingConfig::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cut_dates, vec![NaiveDate::from_ymd_opt(2021, 5, 2).unwrap()]);
    }

    #[test]
    fn test_pivot_pads_trailing_columns() {
        let d = |m, day| NaiveDate::from_ymd_opt(2021, m, day).unwrap();
        let table = CutTable::new(vec![
            CuttingRecord { year: 2021, field_id: "a".into(), cut_dates: vec![d(5, 3), d(7, 9)] },
            CuttingRecord { year: 2021, field_id: "b".into(), cut_dates: vec![] },
        ]);
        assert_eq!(table.cut_column_names(), vec!["cut_1", "cut_2"]);
        assert_eq!(table.cut_column(1), vec![Some("09/07/2021".to_string()), None]);
        assert_eq!(table.total_cuts(), 2);
    }
}
