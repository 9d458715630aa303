#[cfg(test)]
mod pipeline_tests {
    use crate::models::{Observation, SeriesInput, SeriesRow};
    use crate::{CleaningPipeline, PipelineConfig};
    use chrono::{Duration, NaiveDate};

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 5, 1).unwrap()
    }

    /// Field `f1`: growing meadow cut once at observation 20.
    /// Field `f2`: flat signal with a single-point noise spike at observation 15.
    fn meadow_observations() -> Vec<Observation> {
        let mut rows = Vec::new();
        for i in 0..40i64 {
            let ndvi = if i < 20 {
                0.4 + 0.02 * i as f64
            } else {
                0.3 + 0.02 * (i - 20) as f64
            };
            rows.push(Observation {
                date: start() + Duration::days(3 * i),
                field_id: "f1".to_string(),
                ndvi: Some(ndvi),
            });
            rows.push(Observation {
                date: start() + Duration::days(3 * i),
                field_id: "f2".to_string(),
                ndvi: Some(if i == 15 { 0.1 } else { 0.6 }),
            });
        }
        rows.push(Observation {
            date: start() + Duration::days(200),
            field_id: "f2".to_string(),
            ndvi: None,
        });
        rows
    }

    fn pipeline() -> CleaningPipeline {
        CleaningPipeline::new(PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.smoothing.window_length = 6;
        assert!(CleaningPipeline::new(config).is_err());
    }

    #[test]
    fn test_cleaning_removes_spike_and_missing_rows() {
        let cleaned = pipeline().run(meadow_observations(), meadow_observations()).unwrap();

        assert_eq!(cleaned.missing_ndvi, 1);
        assert_eq!(cleaned.filter_report.original, 80);
        assert!(cleaned.filter_report.kept <= cleaned.filter_report.original);
        assert_eq!(cleaned.raw_differences.len(), cleaned.filter_report.kept);
        assert_eq!(cleaned.smoothed.len(), cleaned.filter_report.kept);
        assert!(cleaned
            .raw_differences
            .iter()
            .filter(|r| r.field_id == "f2")
            .all(|r| r.ndvi > 0.5));
    }

    #[test]
    fn test_first_two_rows_per_group_have_no_difference() {
        let cleaned = pipeline().run(meadow_observations(), meadow_observations()).unwrap();
        for field in ["f1", "f2"] {
            let group: Vec<&SeriesRow> = cleaned.smoothed.iter().filter(|r| r.field_id == field).collect();
            assert!(group.windows(2).all(|w| w[0].date < w[1].date));
            assert!(group[0].dif_to_forelast.is_none());
            assert!(group[1].dif_to_forelast.is_none());
            assert!(group[2..].iter().all(|r| r.dif_to_forelast.is_some()));
        }
    }

    #[test]
    fn test_smoothed_difference_matches_smoothed_values() {
        let cleaned = pipeline().run(meadow_observations(), meadow_observations()).unwrap();
        let group: Vec<&SeriesRow> = cleaned.smoothed.iter().filter(|r| r.field_id == "f1").collect();
        for i in 2..group.len() {
            let expected = group[i].ndvi - group[i - 2].ndvi;
            assert!((group[i].dif_to_forelast.unwrap() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cleaning_is_reproducible() {
        let a = pipeline().run(meadow_observations(), meadow_observations()).unwrap();
        let b = pipeline().run(meadow_observations(), meadow_observations()).unwrap();
        assert_eq!(a.smoothed, b.smoothed);
        assert_eq!(a.filter_report, b.filter_report);
    }

    #[test]
    fn test_cut_detected_near_mowing_date() {
        let p = pipeline();
        let cleaned = p.run(meadow_observations(), meadow_observations()).unwrap();
        let table = p.detect_cuts(SeriesInput::with_differences(cleaned.smoothed)).unwrap();

        assert_eq!(table.records.len(), 2);
        let f1 = table.records.iter().find(|r| r.field_id == "f1").unwrap();
        let f2 = table.records.iter().find(|r| r.field_id == "f2").unwrap();

        assert_eq!(f1.year, 2021);
        assert_eq!(f1.num_cuts(), 1);
        let mowing = start() + Duration::days(60);
        assert!((f1.cut_dates[0] - mowing).num_days().abs() <= 9);
        assert_eq!(f2.num_cuts(), 0);
        assert_eq!(table.max_cuts(), 1);
    }

    #[test]
    fn test_detect_cuts_computes_missing_differences() {
        let rows: Vec<SeriesRow> = [0.8, 0.8, 0.5, 0.4, 0.6, 0.8]
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesRow {
                date: start() + Duration::days(2 * i as i64),
                field_id: "f9".to_string(),
                ndvi: *v,
                dif_to_forelast: None,
            })
            .collect();
        let table = pipeline().detect_cuts(SeriesInput::NdviOnly(rows)).unwrap();
        // differences: [-, -, -0.3, -0.4, 0.1, 0.4]
        assert_eq!(table.records[0].cut_dates, vec![start() + Duration::days(4)]);
    }
}
