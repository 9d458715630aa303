pub mod anomaly;
pub mod config;
pub mod cutting;
pub mod errors;
pub mod grouping;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod smoothing;
pub mod temporal;
pub mod valley;

pub use config::PipelineConfig;
pub use errors::{PipelineError, Result};
pub use pipeline::{CleanedSeries, CleaningPipeline};

#[cfg(test)]
mod tests;
