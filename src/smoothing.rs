use ndarray::{Array1, Array2};
use tracing::debug;

use crate::config::SmoothingConfig;
use crate::errors::{PipelineError, Result};
use crate::grouping::{group_rows, par_map_groups};
use crate::models::SeriesRow;

/// Savitzky-Golay smoothing filter with nearest-value boundary extension.
///
/// Samples outside the sequence take the value of the closest edge sample,
/// so sequences shorter than the window still get a defined result.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    coeffs: Vec<f64>,
}

impl SavitzkyGolay {
    pub fn new(window_length: usize, poly_order: usize) -> Result<Self> {
        if window_length == 0 || window_length % 2 == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "window_length must be a positive odd number, got {}",
                window_length
            )));
        }
        if poly_order >= window_length {
            return Err(PipelineError::InvalidConfig(format!(
                "poly_order ({}) must be less than window_length ({})",
                poly_order, window_length
            )));
        }
        Ok(Self {
            coeffs: smoothing_coefficients(window_length, poly_order)?,
        })
    }

    pub fn from_config(config: &SmoothingConfig) -> Result<Self> {
        Self::new(config.window_length, config.poly_order)
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn window_length(&self) -> usize {
        self.coeffs.len()
    }

    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        if n == 0 {
            return Vec::new();
        }
        let half = (self.coeffs.len() / 2) as isize;
        let last = (n - 1) as isize;
        (0..n as isize)
            .map(|k| {
                self.coeffs
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let idx = (k + i as isize - half).clamp(0, last) as usize;
                        c * values[idx]
                    })
                    .sum()
            })
            .collect()
    }
}

/// Least-squares weights evaluating a centred polynomial fit at offset 0.
fn smoothing_coefficients(window_length: usize, poly_order: usize) -> Result<Vec<f64>> {
    let half = (window_length / 2) as f64;
    let vander = Array2::from_shape_fn((window_length, poly_order + 1), |(i, j)| {
        (i as f64 - half).powi(j as i32)
    });
    let normal = vander.t().dot(&vander);
    let mut unit = Array1::<f64>::zeros(poly_order + 1);
    unit[0] = 1.0;
    let solution = solve(normal, unit)?;
    Ok(vander.dot(&solution).to_vec())
}

/// Gaussian elimination with partial pivoting for a small dense system.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&r, &s| a[[r, col]].abs().total_cmp(&a[[s, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            return Err(PipelineError::InvalidConfig(
                "singular system while computing smoothing coefficients".to_string(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}

/// Replace NDVI with its smoothed value per (year, field_id) group.
///
/// Differences computed on the raw values are cleared; re-run the
/// temporal difference step on the output.
pub fn smooth_series(rows: Vec<SeriesRow>, config: &SmoothingConfig) -> Result<Vec<SeriesRow>> {
    let filter = SavitzkyGolay::from_config(config)?;
    par_map_groups(group_rows(rows), |key, mut group| {
        if group.len() < filter.window_length() {
            debug!(
                "smoothing: {} {} has {} points (< window {}), edge values extended",
                key.year,
                key.field_id,
                group.len(),
                filter.window_length()
            );
        }
        let raw: Vec<f64> = group.iter().map(|r| r.ndvi).collect();
        for (row, smoothed) in group.iter_mut().zip(filter.apply(&raw)) {
            row.ndvi = smoothed;
            row.dif_to_forelast = None;
        }
        Ok(group)
    })
}
