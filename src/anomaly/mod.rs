//! Outlier detection on NDVI observations.
//!
//! An isolation forest is trained on `[NDVI, valley]` from a reference
//! table and applied to a target table; outlier rows are removed before
//! any temporal computation.

pub mod isolation_forest;
pub mod scorer;

pub use isolation_forest::IsolationForest;
pub use scorer::{feature_matrix, filter_outliers, AnomalyScorer, FilterReport};
