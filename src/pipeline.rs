use std::time::Instant;
use tracing::{info, warn};

use crate::anomaly::{filter_outliers, AnomalyScorer, FilterReport};
use crate::config::PipelineConfig;
use crate::cutting::{detect_cutting_events, CutTable};
use crate::errors::Result;
use crate::models::{DifferenceRow, FlaggedObservation, Observation, SeriesInput, SeriesRow};
use crate::smoothing::smooth_series;
use crate::temporal::compute_dif_to_forelast;
use crate::valley::flag_valleys;

/// Output of the cleaning pipeline.
#[derive(Debug, Clone)]
pub struct CleanedSeries {
    /// Outlier-free raw NDVI with lag differences.
    pub raw_differences: Vec<SeriesRow>,
    /// Smoothed NDVI with lag differences recomputed on the smoothed values.
    pub smoothed: Vec<SeriesRow>,
    pub filter_report: FilterReport,
    /// Target rows dropped before scoring because NDVI was missing.
    pub missing_ndvi: usize,
}

pub struct CleaningPipeline {
    config: PipelineConfig,
}

impl CleaningPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stage 1: drop rows without NDVI and compute valley features.
    pub fn stage1_valley_features(&self, rows: Vec<Observation>, table: &str) -> Result<(Vec<FlaggedObservation>, usize)> {
        let total = rows.len();
        let complete: Vec<FlaggedObservation> = rows
            .into_iter()
            .filter_map(FlaggedObservation::from_observation)
            .collect();
        let missing = total - complete.len();
        if missing > 0 {
            warn!("{}: dropped {} of {} rows with missing NDVI", table, missing, total);
        }
        let flagged = flag_valleys(complete, &self.config.valley)?;
        info!(
            "Stage 1 ({}): {} valleys among {} rows",
            table,
            flagged.iter().filter(|r| r.valley).count(),
            flagged.len()
        );
        Ok((flagged, missing))
    }

    /// Stage 2: fit on the training table, score and filter the target table.
    pub fn stage2_remove_outliers(
        &self,
        training: &[FlaggedObservation],
        target: Vec<FlaggedObservation>,
    ) -> Result<(Vec<FlaggedObservation>, FilterReport)> {
        let scorer = AnomalyScorer::fit(training, &self.config.anomaly)?;
        let labels = scorer.score(&target)?;
        let (kept, report) = filter_outliers(target, &labels)?;
        info!(
            "Stage 2: removed {} of {} rows ({:.2}%)",
            report.removed, report.original, report.percent_removed
        );
        Ok((kept, report))
    }

    /// Stage 3: lag differences on the outlier-free raw NDVI.
    pub fn stage3_raw_differences(&self, rows: Vec<FlaggedObservation>) -> Result<Vec<SeriesRow>> {
        let series: Vec<SeriesRow> = rows.into_iter().map(SeriesRow::from).collect();
        compute_dif_to_forelast(series, &self.config.temporal)
    }

    /// Stage 4: smooth NDVI per group and recompute the differences.
    pub fn stage4_smooth(&self, rows: Vec<SeriesRow>) -> Result<Vec<SeriesRow>> {
        let smoothed = smooth_series(rows, &self.config.smoothing)?;
        compute_dif_to_forelast(smoothed, &self.config.temporal)
    }

    pub fn run(&self, training: Vec<Observation>, target: Vec<Observation>) -> Result<CleanedSeries> {
        let start = Instant::now();
        info!(
            "Starting cleaning pipeline: {} training rows, {} target rows",
            training.len(),
            target.len()
        );

        let (training, _) = self.stage1_valley_features(training, "training")?;
        let (target, missing_ndvi) = self.stage1_valley_features(target, "target")?;

        let stage_start = Instant::now();
        let (kept, filter_report) = self.stage2_remove_outliers(&training, target)?;
        info!("Stage 2 complete in {:.2?}", stage_start.elapsed());

        let raw_differences = self.stage3_raw_differences(kept)?;
        info!("Stage 3 complete: {} rows with raw differences", raw_differences.len());

        let stage_start = Instant::now();
        let smoothed = self.stage4_smooth(raw_differences.clone())?;
        info!("Stage 4 complete in {:.2?}", stage_start.elapsed());

        info!("Cleaning pipeline finished in {:.2?}", start.elapsed());
        Ok(CleanedSeries {
            raw_differences,
            smoothed,
            filter_report,
            missing_ndvi,
        })
    }

    /// Cutting events from a series; differences are computed first when
    /// the series does not carry them.
    pub fn detect_cuts(&self, input: SeriesInput) -> Result<CutTable> {
        let rows: Vec<DifferenceRow> = match input {
            SeriesInput::WithDifferences(rows) => rows,
            SeriesInput::NdviOnly(rows) => {
                info!("Input has no dif_to_forelast column, computing it");
                compute_dif_to_forelast(rows, &self.config.temporal)?
                    .into_iter()
                    .map(DifferenceRow::from)
                    .collect()
            }
        };
        let table = CutTable::new(detect_cutting_events(rows, &self.config.cutting)?);
        info!(
            "Found {} cutting events across {} field-years (max {} per field-year)",
            table.total_cuts(),
            table.records.len(),
            table.max_cuts()
        );
        Ok(table)
    }
}
