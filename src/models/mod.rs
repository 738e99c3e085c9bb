//! Tree-ensemble classifier families.
//!
//! - `oblivious`: gradient boosting over symmetric trees (`ObliviousBoost`)
//! - `forest`: bagged gini trees (`RandomForest`)
//! - `leafwise`: best-first histogram gradient boosting (`LeafwiseBoost`)
//!
//! All learners share histogram binning (`binning`) and, except the oblivious
//! one, the arena tree (`tree`). `model` wraps them behind one enum.

pub mod binning;
pub mod forest;
pub mod leafwise;
pub mod model;
pub mod oblivious;
pub mod tree;

pub use model::*;

use nalgebra::DMatrix;

use crate::domain::N_CLASSES;
use crate::error::AppError;

fn check_training_input(x: &DMatrix<f64>, y: &[usize]) -> Result<(), AppError> {
    if x.nrows() == 0 {
        return Err(AppError::training("Cannot fit a model on zero rows."));
    }
    if x.nrows() != y.len() {
        return Err(AppError::training(format!(
            "Feature rows ({}) and labels ({}) differ.",
            x.nrows(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|c| **c >= N_CLASSES) {
        return Err(AppError::training(format!("Unknown class id {bad}.")));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(AppError::training("Training features contain non-finite values."));
    }
    Ok(())
}

/// Log class frequencies, the starting raw score of both boosters.
fn log_priors(y: &[usize]) -> [f64; N_CLASSES] {
    let mut counts = [0usize; N_CLASSES];
    for c in y {
        counts[*c] += 1;
    }
    let n = y.len().max(1) as f64;
    // Absent classes get a floor instead of -inf.
    counts.map(|c| ((c as f64).max(0.5) / n).ln())
}

#[cfg(test)]
pub(crate) mod testing {
    use nalgebra::DMatrix;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    use crate::domain::N_FEATURES;

    /// `per_class` rows of each class, separated along the first three features.
    pub fn three_blobs(per_class: usize, seed: u64) -> (DMatrix<f64>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.3).unwrap();
        let n = per_class * 3;
        let mut x = DMatrix::zeros(n, N_FEATURES);
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let class = i % 3;
            for j in 0..N_FEATURES {
                let center = if j == class { 3.0 } else { 0.0 };
                x[(i, j)] = center + noise.sample(&mut rng);
            }
            y.push(class);
        }
        (x, y)
    }
}
