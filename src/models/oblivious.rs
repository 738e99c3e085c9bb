//! Gradient boosting over oblivious (symmetric) decision trees.
//!
//! Every tree applies the same `(feature, threshold)` test at each depth level,
//! so a tree of depth `d` is just `d` splits plus `2^d` leaves, and the leaf of
//! a row is the bit pattern of its test outcomes. Leaves carry one value per
//! class; boosting runs on the multiclass softmax loss with Newton leaf values
//! `-G / (H + l2)`.
//!
//! The native artifact (`model.cbm`) is this struct serialized as JSON.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{BoostParams, N_CLASSES};
use crate::error::AppError;
use crate::math::softmax_in_place;
use crate::models::binning::{BinMapper, row_vec};

const NATIVE_FORMAT: &str = "oblivious-boost";
const NATIVE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousTree {
    /// One `(feature, threshold)` test per depth level, root first.
    pub splits: Vec<(usize, f64)>,
    /// `2^splits.len()` leaves of per-class raw scores.
    pub leaves: Vec<[f64; N_CLASSES]>,
}

impl ObliviousTree {
    fn leaf_index(&self, row: &[f64]) -> usize {
        self.splits.iter().fold(0, |idx, (feature, threshold)| {
            (idx << 1) | usize::from(row[*feature] > *threshold)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousBoostModel {
    pub n_features: usize,
    /// Initial raw score per class (log prior).
    pub base_score: [f64; N_CLASSES],
    pub trees: Vec<ObliviousTree>,
}

#[derive(Serialize, Deserialize)]
struct NativeFile {
    format: String,
    version: u32,
    model: ObliviousBoostModel,
}

impl ObliviousBoostModel {
    pub fn fit(params: &BoostParams, x: &DMatrix<f64>, y: &[usize]) -> Result<Self, AppError> {
        super::check_training_input(x, y)?;
        let n = x.nrows();
        let n_features = x.ncols();
        let mapper = BinMapper::fit(x, params.max_bins);
        let binned = mapper.transform(x);
        let base_score = super::log_priors(y);
        let lambda = params.l2_leaf_reg;

        let mut scores = vec![base_score; n];
        let mut grad = vec![[0.0; N_CLASSES]; n];
        let mut hess = vec![[0.0; N_CLASSES]; n];
        let mut trees = Vec::with_capacity(params.iterations);

        for iteration in 0..params.iterations {
            for i in 0..n {
                let mut p = scores[i];
                softmax_in_place(&mut p);
                for k in 0..N_CLASSES {
                    let target = if y[i] == k { 1.0 } else { 0.0 };
                    grad[i][k] = p[k] - target;
                    hess[i][k] = (p[k] * (1.0 - p[k])).max(1e-16);
                }
            }

            let mut leaf_of = vec![0usize; n];
            let mut splits = Vec::with_capacity(params.depth);
            for level in 0..params.depth {
                let n_leaves = 1usize << level;
                let mut best: Option<(usize, usize, f64)> = None;

                for feature in 0..n_features {
                    let n_bins = mapper.n_bins(feature);
                    if n_bins < 2 {
                        continue;
                    }
                    // hist[leaf][bin] = (G, H) per class
                    let mut g_hist = vec![[0.0; N_CLASSES]; n_leaves * n_bins];
                    let mut h_hist = vec![[0.0; N_CLASSES]; n_leaves * n_bins];
                    let column = binned.column(feature);
                    for i in 0..n {
                        let cell = leaf_of[i] * n_bins + column[i] as usize;
                        for k in 0..N_CLASSES {
                            g_hist[cell][k] += grad[i][k];
                            h_hist[cell][k] += hess[i][k];
                        }
                    }

                    let mut totals_g = vec![[0.0; N_CLASSES]; n_leaves];
                    let mut totals_h = vec![[0.0; N_CLASSES]; n_leaves];
                    for leaf in 0..n_leaves {
                        for bin in 0..n_bins {
                            for k in 0..N_CLASSES {
                                totals_g[leaf][k] += g_hist[leaf * n_bins + bin][k];
                                totals_h[leaf][k] += h_hist[leaf * n_bins + bin][k];
                            }
                        }
                    }

                    let mut left_g = vec![[0.0; N_CLASSES]; n_leaves];
                    let mut left_h = vec![[0.0; N_CLASSES]; n_leaves];
                    for bin in 0..n_bins - 1 {
                        let mut score = 0.0;
                        for leaf in 0..n_leaves {
                            let cell = leaf * n_bins + bin;
                            for k in 0..N_CLASSES {
                                left_g[leaf][k] += g_hist[cell][k];
                                left_h[leaf][k] += h_hist[cell][k];
                                let rg = totals_g[leaf][k] - left_g[leaf][k];
                                let rh = totals_h[leaf][k] - left_h[leaf][k];
                                score += left_g[leaf][k].powi(2) / (left_h[leaf][k] + lambda + 1e-12)
                                    + rg.powi(2) / (rh + lambda + 1e-12);
                            }
                        }
                        if best.is_none_or(|(_, _, s)| score > s) {
                            best = Some((feature, bin, score));
                        }
                    }
                }

                let Some((feature, bin, _)) = best else {
                    break;
                };
                let column = binned.column(feature);
                for i in 0..n {
                    leaf_of[i] = (leaf_of[i] << 1) | usize::from(column[i] as usize > bin);
                }
                splits.push((feature, mapper.threshold(feature, bin)));
            }

            let n_leaves = 1usize << splits.len();
            let mut leaf_g = vec![[0.0; N_CLASSES]; n_leaves];
            let mut leaf_h = vec![[0.0; N_CLASSES]; n_leaves];
            for i in 0..n {
                for k in 0..N_CLASSES {
                    leaf_g[leaf_of[i]][k] += grad[i][k];
                    leaf_h[leaf_of[i]][k] += hess[i][k];
                }
            }
            let leaves: Vec<[f64; N_CLASSES]> = (0..n_leaves)
                .map(|leaf| {
                    let mut v = [0.0; N_CLASSES];
                    for k in 0..N_CLASSES {
                        v[k] = -params.learning_rate * leaf_g[leaf][k]
                            / (leaf_h[leaf][k] + lambda + 1e-12);
                    }
                    v
                })
                .collect();

            for i in 0..n {
                for k in 0..N_CLASSES {
                    scores[i][k] += leaves[leaf_of[i]][k];
                }
            }
            trees.push(ObliviousTree { splits, leaves });

            if iteration % 50 == 0 {
                debug!(iteration, "oblivious boosting progress");
            }
        }

        Ok(Self {
            n_features,
            base_score,
            trees,
        })
    }

    pub fn predict_proba(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(x.nrows(), N_CLASSES);
        for i in 0..x.nrows() {
            let row = row_vec(x, i);
            let mut score = self.base_score;
            for tree in &self.trees {
                let leaf = &tree.leaves[tree.leaf_index(&row)];
                for k in 0..N_CLASSES {
                    score[k] += leaf[k];
                }
            }
            softmax_in_place(&mut score);
            for k in 0..N_CLASSES {
                out[(i, k)] = score[k];
            }
        }
        out
    }

    /// Serialize to the native artifact format.
    pub fn to_native(&self) -> Result<Vec<u8>, AppError> {
        let file = NativeFile {
            format: NATIVE_FORMAT.to_string(),
            version: NATIVE_VERSION,
            model: self.clone(),
        };
        serde_json::to_vec(&file)
            .map_err(|e| AppError::training(format!("Failed to encode native model: {e}")))
    }

    /// Parse a native artifact, checking its header and tree shapes.
    pub fn from_native(bytes: &[u8]) -> Result<Self, AppError> {
        let file: NativeFile = serde_json::from_slice(bytes)
            .map_err(|e| AppError::training(format!("Invalid native model: {e}")))?;
        if file.format != NATIVE_FORMAT || file.version != NATIVE_VERSION {
            return Err(AppError::training(format!(
                "Unsupported native model '{}' v{}.",
                file.format, file.version
            )));
        }
        let model = file.model;
        model.validate()?;
        Ok(model)
    }

    /// Every tree has `2^depth` leaves and splits on known features.
    pub fn validate(&self) -> Result<(), AppError> {
        for (t, tree) in self.trees.iter().enumerate() {
            let shape_ok = tree.splits.len() < usize::BITS as usize
                && tree.leaves.len() == 1usize << tree.splits.len()
                && tree.splits.iter().all(|(f, _)| *f < self.n_features);
            if !shape_ok {
                return Err(AppError::training(format!("Oblivious tree {t} is malformed.")));
            }
        }
        Ok(())
    }
}
