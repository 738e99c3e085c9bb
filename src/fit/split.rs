//! Stratified train/test split.
//!
//! Given class ids and a test fraction, the held-out set gets `ceil(n * test_size)`
//! rows with each class represented in proportion to its frequency:
//!
//! - per-class test counts: floor of the exact share, then the leftover rows go
//!   to the largest fractional remainders (ties: larger class, then lower id)
//! - within each class, rows are shuffled with a `StdRng` seeded by `seed`
//!   (classes processed in id order) and the first rows become the test set
//!
//! Identical labels, fraction and seed always yield identical index sets.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::domain::N_CLASSES;
use crate::error::AppError;

/// Row indices of each side of a split, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split `labels` into stratified train/test index sets.
pub fn stratified_split(labels: &[usize], test_size: f64, seed: u64) -> Result<SplitIndices, AppError> {
    if !(test_size.is_finite() && test_size > 0.0 && test_size < 1.0) {
        return Err(AppError::input(format!(
            "test_size must be in (0, 1) (got {test_size})."
        )));
    }
    let n = labels.len();
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); N_CLASSES];
    for (i, c) in labels.iter().enumerate() {
        let bucket = by_class
            .get_mut(*c)
            .ok_or_else(|| AppError::input(format!("Unknown class id {c} at row {i}.")))?;
        bucket.push(i);
    }

    let present = by_class.iter().filter(|rows| !rows.is_empty()).count();
    if let Some((class, rows)) = by_class
        .iter()
        .enumerate()
        .find(|(_, rows)| rows.len() == 1)
    {
        return Err(AppError::training(format!(
            "Class {class} has only {} row; each class needs at least 2 for a stratified split.",
            rows.len()
        )));
    }

    let n_test = (n as f64 * test_size).ceil() as usize;
    let n_train = n - n_test.min(n);
    if n_test < present || n_train < present {
        return Err(AppError::training(format!(
            "Cannot split {n} rows into a {n_test}-row test set covering {present} classes."
        )));
    }

    let counts: Vec<usize> = by_class.iter().map(Vec::len).collect();
    let test_counts = allocate(&counts, n_test);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (rows, take) in by_class.iter_mut().zip(test_counts) {
        rows.shuffle(&mut rng);
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    Ok(SplitIndices { train, test })
}

/// Largest-remainder allocation of `total` test rows across class `counts`.
///
/// A class never gives up its last row to the test side.
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    if n == 0 {
        return vec![0; counts.len()];
    }
    let caps: Vec<usize> = counts.iter().map(|c| c.saturating_sub(1)).collect();
    let shares: Vec<f64> = counts
        .iter()
        .map(|c| total as f64 * *c as f64 / n as f64)
        .collect();
    let mut out: Vec<usize> = shares
        .iter()
        .zip(&caps)
        .map(|(s, cap)| (s.floor() as usize).min(*cap))
        .collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|a, b| {
        let ra = shares[*a] - shares[*a].floor();
        let rb = shares[*b] - shares[*b].floor();
        rb.total_cmp(&ra)
            .then(counts[*b].cmp(&counts[*a]))
            .then(a.cmp(b))
    });

    let mut left = total.saturating_sub(out.iter().sum::<usize>());
    while left > 0 {
        let mut progressed = false;
        for &class in &order {
            if left == 0 {
                break;
            }
            if out[class] < caps[class] {
                out[class] += 1;
                left -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}

/// Rows of `x` at `indices`, in order.
pub fn select_rows(x: &DMatrix<f64>, indices: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(indices.len(), x.ncols(), |i, j| x[(indices[i], j)])
}

/// Labels at `indices`, in order.
pub fn select_labels(y: &[usize], indices: &[usize]) -> Vec<usize> {
    indices.iter().map(|i| y[*i]).collect()
}
