//! Standard feature scaler.
//!
//! `(x - mean) / scale` per column, where `mean` and `scale` (population standard
//! deviation) are learned from the training split only. A constant column gets
//! `scale = 1` so it maps to zero instead of NaN.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::math::stats::mean_std;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Learn per-column mean and scale.
    pub fn fit(x: &DMatrix<f64>) -> Result<Self, AppError> {
        if x.nrows() == 0 {
            return Err(AppError::training("Cannot fit scaler on an empty matrix."));
        }
        let mut mean = Vec::with_capacity(x.ncols());
        let mut scale = Vec::with_capacity(x.ncols());
        for col in x.column_iter() {
            let values: Vec<f64> = col.iter().copied().collect();
            let (m, s) = mean_std(&values)
                .ok_or_else(|| AppError::training("Cannot fit scaler on an empty column."))?;
            if !(m.is_finite() && s.is_finite()) {
                return Err(AppError::training("Non-finite value while fitting scaler."));
            }
            mean.push(m);
            scale.push(if s > 0.0 { s } else { 1.0 });
        }
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        if x.ncols() != self.n_features() {
            return Err(AppError::input(format!(
                "Scaler expects {} features, got {}.",
                self.n_features(),
                x.ncols()
            )));
        }
        Ok(DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
            (x[(i, j)] - self.mean[j]) / self.scale[j]
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_to_zero_mean_unit_variance() {
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0, 4.0, 5.0]);
        let scaler = StandardScaler::fit(&x).unwrap();
        assert!((scaler.mean[0] - 2.5).abs() < 1e-12);
        assert_eq!(scaler.scale[1], 1.0);

        let z = scaler.transform(&x).unwrap();
        let col0: Vec<f64> = z.column(0).iter().copied().collect();
        let (m, s) = mean_std(&col0).unwrap();
        assert!(m.abs() < 1e-12);
        assert!((s - 1.0).abs() < 1e-12);
        assert!(z.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rejects_wrong_width() {
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let scaler = StandardScaler::fit(&x).unwrap();
        let wide = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 3.0]);
        assert!(scaler.transform(&wide).is_err());
    }
}
