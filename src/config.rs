use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::errors::{PipelineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub valley: ValleyConfig,
    pub anomaly: AnomalyConfig,
    pub temporal: TemporalConfig,
    pub smoothing: SmoothingConfig,
    pub cutting: CuttingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValleyConfig {
    /// Both neighbour differences must be at or below this for a valley.
    pub drop_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Expected fraction of outliers in the training table.
    pub contamination: f64,
    pub seed: u64,
    pub n_trees: usize,
    pub max_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub lag: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub window_length: usize,
    pub poly_order: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuttingConfig {
    pub drop_threshold: f64,
    /// Calendar months (1-12) with no expected mowing activity.
    pub excluded_months: Vec<u32>,
}

impl Default for ValleyConfig {
    fn default() -> Self {
        Self { drop_threshold: -0.1 }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.06,
            seed: 42,
            n_trees: 100,
            max_samples: 256,
        }
    }
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self { lag: 2 }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window_length: 5,
            poly_order: 2,
        }
    }
}

impl Default for CuttingConfig {
    fn default() -> Self {
        Self {
            drop_threshold: -0.1,
            excluded_months: vec![3, 4],
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration. Keys that are absent keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| PipelineError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply `MOWING_*` environment overrides on top of the current values.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<f64>("MOWING_CONTAMINATION")? {
            self.anomaly.contamination = v;
        }
        if let Some(v) = env_parse::<u64>("MOWING_SEED")? {
            self.anomaly.seed = v;
        }
        if let Some(v) = env_parse::<f64>("MOWING_VALLEY_THRESHOLD")? {
            self.valley.drop_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("MOWING_SG_WINDOW")? {
            self.smoothing.window_length = v;
        }
        if let Some(v) = env_parse::<usize>("MOWING_SG_POLYORDER")? {
            self.smoothing.poly_order = v;
        }
        if let Some(v) = env_parse::<f64>("MOWING_CUT_THRESHOLD")? {
            self.cutting.drop_threshold = v;
        }
        if let Ok(raw) = std::env::var("MOWING_EXCLUDED_MONTHS") {
            self.cutting.excluded_months = parse_month_list(&raw)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let a = &self.anomaly;
        if !(a.contamination > 0.0 && a.contamination <= 0.5) {
            return Err(PipelineError::InvalidConfig(format!(
                "contamination must be in (0, 0.5], got {}",
                a.contamination
            )));
        }
        if a.n_trees == 0 || a.max_samples == 0 {
            return Err(PipelineError::InvalidConfig(
                "n_trees and max_samples must be positive".to_string(),
            ));
        }
        if self.temporal.lag == 0 {
            return Err(PipelineError::InvalidConfig(
                "difference lag must be at least 1".to_string(),
            ));
        }
        let s = &self.smoothing;
        if s.window_length == 0 || s.window_length % 2 == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "smoothing window_length must be a positive odd number, got {}",
                s.window_length
            )));
        }
        if s.poly_order >= s.window_length {
            return Err(PipelineError::InvalidConfig(format!(
                "poly_order ({}) must be less than window_length ({})",
                s.poly_order, s.window_length
            )));
        }
        if let Some(m) = self
            .cutting
            .excluded_months
            .iter()
            .find(|m| !(1..=12).contains(*m))
        {
            return Err(PipelineError::InvalidConfig(format!(
                "excluded month {} is not in 1..=12",
                m
            )));
        }
        for (name, t) in [
            ("valley", self.valley.drop_threshold),
            ("cutting", self.cutting.drop_threshold),
        ] {
            if !t.is_finite() {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} drop_threshold must be finite",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Parse a comma separated month list such as `"3,4"`.
pub fn parse_month_list(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|e| {
                PipelineError::InvalidConfig(format!("invalid month '{}': {}", s, e))
            })
        })
        .collect()
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}='{}': {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}
