//! Random forest classifier.
//!
//! Each tree is grown on a bootstrap sample with its own `StdRng` seeded from
//! `seed + tree index`, so the forest is reproducible regardless of how rayon
//! schedules the work. Splits are chosen by gini impurity decrease over
//! histogram bins, considering `round(sqrt(n_features))` random features per
//! node. Leaves hold class frequencies; the forest averages them.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{ForestParams, N_CLASSES};
use crate::error::AppError;
use crate::models::binning::{BinMapper, BinnedMatrix, row_vec};
use crate::models::tree::{Node, Tree};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    pub n_features: usize,
    pub trees: Vec<Tree<[f64; N_CLASSES]>>,
}

impl RandomForestModel {
    /// Every tree is well-formed and splits on known features.
    pub fn validate(&self) -> Result<(), AppError> {
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate_for(self.n_features)
                .map_err(|e| AppError::training(format!("Forest tree {t} is malformed: {e}.")))?;
        }
        Ok(())
    }

    pub fn fit(params: &ForestParams, x: &DMatrix<f64>, y: &[usize]) -> Result<Self, AppError> {
        super::check_training_input(x, y)?;
        let mapper = BinMapper::fit(x, params.max_bins);
        let binned = mapper.transform(x);
        let n_rows = x.nrows();
        let mtry = ((x.ncols() as f64).sqrt().round() as usize).clamp(1, x.ncols());

        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                let mut builder = TreeBuilder {
                    binned: &binned,
                    mapper: &mapper,
                    y,
                    params,
                    mtry,
                    rng,
                    nodes: Vec::new(),
                };
                builder.grow(rows, 0);
                Tree {
                    nodes: builder.nodes,
                }
            })
            .collect();

        Ok(Self {
            n_features: x.ncols(),
            trees,
        })
    }

    pub fn predict_proba(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(x.nrows(), N_CLASSES);
        if self.trees.is_empty() {
            return out;
        }
        let scale = 1.0 / self.trees.len() as f64;
        for i in 0..x.nrows() {
            let row = row_vec(x, i);
            for tree in &self.trees {
                let dist = tree.leaf_for(&row);
                for k in 0..N_CLASSES {
                    out[(i, k)] += dist[k] * scale;
                }
            }
        }
        out
    }
}

struct TreeBuilder<'a> {
    binned: &'a BinnedMatrix,
    mapper: &'a BinMapper,
    y: &'a [usize],
    params: &'a ForestParams,
    mtry: usize,
    rng: StdRng,
    nodes: Vec<Node<[f64; N_CLASSES]>>,
}

struct BestSplit {
    feature: usize,
    bin: usize,
    score: f64,
}

impl TreeBuilder<'_> {
    /// Grow the subtree for `rows`, returning its node index.
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let counts = class_counts(self.y, &rows);
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: distribution(&counts, rows.len()),
        });

        let pure = counts.iter().filter(|c| **c > 0).count() <= 1;
        if pure
            || depth >= self.params.max_depth
            || rows.len() < 2 * self.params.min_samples_leaf
        {
            return idx;
        }

        let Some(best) = self.best_split(&rows, &counts) else {
            return idx;
        };

        let column = self.binned.column(best.feature);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|r| column[*r] as usize <= best.bin);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: self.mapper.threshold(best.feature, best.bin),
            left,
            right,
        };
        idx
    }

    fn best_split(&mut self, rows: &[usize], parent: &[usize; N_CLASSES]) -> Option<BestSplit> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf;
        let parent_impurity = gini(parent, n);
        let features = sample(&mut self.rng, self.binned.n_features(), self.mtry);

        let mut best: Option<BestSplit> = None;
        for feature in features.iter() {
            let n_bins = self.mapper.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let column = self.binned.column(feature);
            let mut hist = vec![[0usize; N_CLASSES]; n_bins];
            for r in rows {
                hist[column[*r] as usize][self.y[*r]] += 1;
            }

            let mut left = [0usize; N_CLASSES];
            let mut n_left = 0;
            for (bin, bin_counts) in hist.iter().enumerate().take(n_bins - 1) {
                for k in 0..N_CLASSES {
                    left[k] += bin_counts[k];
                }
                n_left += bin_counts.iter().sum::<usize>();
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let mut right = [0usize; N_CLASSES];
                for k in 0..N_CLASSES {
                    right[k] = parent[k] - left[k];
                }
                let weighted = (n_left as f64 * gini(&left, n_left)
                    + n_right as f64 * gini(&right, n_right))
                    / n as f64;
                let score = parent_impurity - weighted;
                if score > 1e-12 && best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(BestSplit {
                        feature,
                        bin,
                        score,
                    });
                }
            }
        }
        best
    }
}

fn class_counts(y: &[usize], rows: &[usize]) -> [usize; N_CLASSES] {
    let mut counts = [0usize; N_CLASSES];
    for r in rows {
        counts[y[*r]] += 1;
    }
    counts
}

fn distribution(counts: &[usize; N_CLASSES], n: usize) -> [f64; N_CLASSES] {
    let mut out = [0.0; N_CLASSES];
    if n > 0 {
        for k in 0..N_CLASSES {
            out[k] = counts[k] as f64 / n as f64;
        }
    }
    out
}

fn gini(counts: &[usize; N_CLASSES], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    1.0 - counts
        .iter()
        .map(|c| {
            let p = *c as f64 / n;
            p * p
        })
        .sum::<f64>()
}
