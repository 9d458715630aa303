use ndarray::Array2;
use tracing::info;

use crate::anomaly::isolation_forest::IsolationForest;
use crate::config::AnomalyConfig;
use crate::errors::{PipelineError, Result};
use crate::models::{AnomalyLabel, FlaggedObservation};

/// Isolation forest trained on `[NDVI, valley]` of a reference table.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    forest: IsolationForest,
}

/// Row accounting for one outlier-filtering pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterReport {
    pub original: usize,
    pub kept: usize,
    pub removed: usize,
    pub percent_removed: f64,
}

impl FilterReport {
    fn new(original: usize, kept: usize) -> Self {
        let removed = original - kept;
        let percent_removed = if original == 0 {
            0.0
        } else {
            removed as f64 / original as f64 * 100.0
        };
        Self {
            original,
            kept,
            removed,
            percent_removed,
        }
    }
}

pub fn feature_matrix(rows: &[FlaggedObservation]) -> Array2<f64> {
    Array2::from_shape_fn((rows.len(), 2), |(i, j)| rows[i].features()[j])
}

impl AnomalyScorer {
    pub fn fit(training: &[FlaggedObservation], config: &AnomalyConfig) -> Result<Self> {
        if training.is_empty() {
            return Err(PipelineError::EmptyTrainingTable);
        }
        let features = feature_matrix(training);
        let forest = IsolationForest::fit(
            features.view(),
            config.n_trees,
            config.max_samples,
            config.contamination,
            config.seed,
        )?;
        info!(
            "Fitted isolation forest on {} rows (contamination={}, seed={}, threshold={:.4})",
            training.len(),
            config.contamination,
            config.seed,
            forest.threshold()
        );
        Ok(Self { forest })
    }

    pub fn score(&self, target: &[FlaggedObservation]) -> Result<Vec<AnomalyLabel>> {
        let features = feature_matrix(target);
        let labels = self
            .forest
            .predict(features.view())?
            .into_iter()
            .map(|is_outlier| {
                if is_outlier {
                    AnomalyLabel::Outlier
                } else {
                    AnomalyLabel::Normal
                }
            })
            .collect();
        Ok(labels)
    }
}

/// Drop every row labelled `Outlier`; `Normal` rows are kept in order.
pub fn filter_outliers(
    rows: Vec<FlaggedObservation>,
    labels: &[AnomalyLabel],
) -> Result<(Vec<FlaggedObservation>, FilterReport)> {
    if rows.len() != labels.len() {
        return Err(PipelineError::LabelMismatch {
            rows: rows.len(),
            labels: labels.len(),
        });
    }
    let original = rows.len();
    let kept: Vec<FlaggedObservation> = rows
        .into_iter()
        .zip(labels)
        .filter(|(_, label)| **label == AnomalyLabel::Normal)
        .map(|(row, _)| row)
        .collect();
    let report = FilterReport::new(original, kept.len());
    info!("Length of original dataset: {}", report.original);
    info!("Length of cleaned dataset: {}", report.kept);
    info!("Percent removed: {:.2}", report.percent_removed);
    Ok((kept, report))
}
