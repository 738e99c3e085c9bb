//! Histogram gradient boosting with leaf-wise (best-first) tree growth.
//!
//! Each boosting round grows one regression tree per class on the softmax
//! gradients. A tree starts as a single leaf and repeatedly splits the leaf with
//! the largest gain until it has `num_leaves` leaves or no split passes
//! `min_data_in_leaf`.
//!
//! Text dump (`model.txt`):
//!
//! ```text
//! leafwise-boost v1
//! features 10
//! base <s0> <s1> <s2>
//! tree <class> <n_nodes>
//! split <feature> <threshold> <left> <right>
//! leaf <value>
//! ...
//! end
//! ```
//!
//! Node lines follow their `tree` header in arena order.

use std::fmt::Write as _;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{LeafwiseParams, N_CLASSES};
use crate::error::AppError;
use crate::math::softmax_in_place;
use crate::models::binning::{BinMapper, BinnedMatrix, row_vec};
use crate::models::tree::{Node, Tree};

const TEXT_HEADER: &str = "leafwise-boost v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafwiseBoostModel {
    pub n_features: usize,
    pub base_score: [f64; N_CLASSES],
    /// `rounds[r][k]` is the tree of class `k` in round `r`.
    pub rounds: Vec<[Tree<f64>; N_CLASSES]>,
}

impl LeafwiseBoostModel {
    /// Every tree of every round is well-formed and splits on known features.
    pub fn validate(&self) -> Result<(), AppError> {
        for (r, round) in self.rounds.iter().enumerate() {
            for tree in round {
                tree.validate_for(self.n_features).map_err(|e| {
                    AppError::training(format!("Leaf-wise round {r} is malformed: {e}."))
                })?;
            }
        }
        Ok(())
    }

    pub fn fit(params: &LeafwiseParams, x: &DMatrix<f64>, y: &[usize]) -> Result<Self, AppError> {
        super::check_training_input(x, y)?;
        let n = x.nrows();
        let mapper = BinMapper::fit(x, params.max_bins);
        let binned = mapper.transform(x);
        let base_score = super::log_priors(y);

        let mut scores = vec![base_score; n];
        let mut rounds = Vec::with_capacity(params.iterations);
        for _ in 0..params.iterations {
            let probs: Vec<[f64; N_CLASSES]> = scores
                .iter()
                .map(|s| {
                    let mut p = *s;
                    softmax_in_place(&mut p);
                    p
                })
                .collect();

            let trees: Vec<(Tree<f64>, Vec<f64>)> = (0..N_CLASSES)
                .into_par_iter()
                .map(|k| {
                    let grad: Vec<f64> = (0..n)
                        .map(|i| probs[i][k] - if y[i] == k { 1.0 } else { 0.0 })
                        .collect();
                    let hess: Vec<f64> = (0..n)
                        .map(|i| (probs[i][k] * (1.0 - probs[i][k])).max(1e-16))
                        .collect();
                    let grower = LeafGrower {
                        binned: &binned,
                        mapper: &mapper,
                        grad: &grad,
                        hess: &hess,
                        params,
                    };
                    grower.grow()
                })
                .collect();

            let mut round = Vec::with_capacity(N_CLASSES);
            for (k, (tree, row_values)) in trees.into_iter().enumerate() {
                for i in 0..n {
                    scores[i][k] += row_values[i];
                }
                round.push(tree);
            }
            let round: [Tree<f64>; N_CLASSES] = round
                .try_into()
                .map_err(|_| AppError::training("Boosting round lost a class tree."))?;
            rounds.push(round);
        }

        Ok(Self {
            n_features: x.ncols(),
            base_score,
            rounds,
        })
    }

    pub fn predict_proba(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(x.nrows(), N_CLASSES);
        for i in 0..x.nrows() {
            let row = row_vec(x, i);
            let mut score = self.base_score;
            for round in &self.rounds {
                for k in 0..N_CLASSES {
                    score[k] += round[k].leaf_for(&row);
                }
            }
            softmax_in_place(&mut score);
            for k in 0..N_CLASSES {
                out[(i, k)] = score[k];
            }
        }
        out
    }

    /// Render the text dump.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{TEXT_HEADER}");
        let _ = writeln!(out, "features {}", self.n_features);
        let _ = writeln!(
            out,
            "base {} {} {}",
            self.base_score[0], self.base_score[1], self.base_score[2]
        );
        for round in &self.rounds {
            for (k, tree) in round.iter().enumerate() {
                let _ = writeln!(out, "tree {k} {}", tree.nodes.len());
                for node in &tree.nodes {
                    match node {
                        Node::Split {
                            feature,
                            threshold,
                            left,
                            right,
                        } => {
                            let _ = writeln!(out, "split {feature} {threshold} {left} {right}");
                        }
                        Node::Leaf { value } => {
                            let _ = writeln!(out, "leaf {value}");
                        }
                    }
                }
            }
        }
        out.push_str("end\n");
        out
    }

    /// Parse a text dump produced by `to_text`.
    pub fn from_text(text: &str) -> Result<Self, AppError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let bad = |line: usize, msg: &str| AppError::training(format!("model.txt line {line}: {msg}"));

        match lines.next() {
            Some((_, TEXT_HEADER)) => {}
            Some((line, _)) => return Err(bad(line, "unknown header")),
            None => return Err(AppError::training("model.txt is empty.")),
        }

        let (line, features) = lines.next().ok_or_else(|| bad(2, "missing `features`"))?;
        let n_features = match features.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["features", n] => n.parse::<usize>().map_err(|_| bad(line, "invalid feature count"))?,
            _ => return Err(bad(line, "expected `features <n>`")),
        };

        let (line, base) = lines.next().ok_or_else(|| bad(3, "missing `base`"))?;
        let parts: Vec<&str> = base.split_whitespace().collect();
        if parts.len() != N_CLASSES + 1 || parts[0] != "base" {
            return Err(bad(line, "expected `base <s0> <s1> <s2>`"));
        }
        let mut base_score = [0.0; N_CLASSES];
        for k in 0..N_CLASSES {
            base_score[k] = parse_f64(parts[k + 1]).ok_or_else(|| bad(line, "invalid base score"))?;
        }

        let mut rounds = Vec::new();
        let mut pending: Vec<Tree<f64>> = Vec::with_capacity(N_CLASSES);
        loop {
            let (line, header) = lines.next().ok_or_else(|| AppError::training("model.txt is truncated."))?;
            if header == "end" {
                break;
            }
            let (class, n_nodes) = match header.split_whitespace().collect::<Vec<_>>().as_slice() {
                ["tree", k, n] => (
                    k.parse::<usize>().map_err(|_| bad(line, "invalid class"))?,
                    n.parse::<usize>().map_err(|_| bad(line, "invalid node count"))?,
                ),
                _ => return Err(bad(line, "expected `tree <class> <nodes>`")),
            };
            if class != pending.len() {
                return Err(bad(line, "trees out of class order"));
            }

            let mut nodes = Vec::with_capacity(n_nodes);
            for _ in 0..n_nodes {
                let (line, text) = lines.next().ok_or_else(|| AppError::training("model.txt is truncated."))?;
                let node = match text.split_whitespace().collect::<Vec<_>>().as_slice() {
                    ["leaf", v] => Node::Leaf {
                        value: parse_f64(v).ok_or_else(|| bad(line, "invalid leaf value"))?,
                    },
                    ["split", f, t, l, r] => {
                        let feature = f.parse::<usize>().map_err(|_| bad(line, "invalid feature"))?;
                        if feature >= n_features {
                            return Err(bad(line, "feature out of range"));
                        }
                        Node::Split {
                            feature,
                            threshold: parse_f64(t).ok_or_else(|| bad(line, "invalid threshold"))?,
                            left: l.parse().map_err(|_| bad(line, "invalid child"))?,
                            right: r.parse().map_err(|_| bad(line, "invalid child"))?,
                        }
                    }
                    _ => return Err(bad(line, "expected `leaf` or `split`")),
                };
                nodes.push(node);
            }
            let tree = Tree { nodes };
            tree.validate().map_err(|e| bad(line, e.as_str()))?;
            pending.push(tree);

            if pending.len() == N_CLASSES {
                let round: [Tree<f64>; N_CLASSES] = std::mem::take(&mut pending)
                    .try_into()
                    .map_err(|_| bad(line, "incomplete round"))?;
                rounds.push(round);
            }
        }
        if !pending.is_empty() {
            return Err(AppError::training("model.txt ends inside a boosting round."));
        }

        Ok(Self {
            n_features,
            base_score,
            rounds,
        })
    }
}

fn parse_f64(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

struct LeafGrower<'a> {
    binned: &'a BinnedMatrix,
    mapper: &'a BinMapper,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a LeafwiseParams,
}

struct Candidate {
    node: usize,
    rows: Vec<usize>,
    split: Option<SplitInfo>,
}

#[derive(Clone, Copy)]
struct SplitInfo {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl LeafGrower<'_> {
    /// Grow one tree, returning it together with the scaled leaf value of every row.
    fn grow(&self) -> (Tree<f64>, Vec<f64>) {
        let n = self.grad.len();
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let root_rows: Vec<usize> = (0..n).collect();
        let root_split = self.best_split(&root_rows);
        let mut open = vec![Candidate {
            node: 0,
            rows: root_rows,
            split: root_split,
        }];
        let mut done: Vec<Candidate> = Vec::new();

        let mut n_leaves = 1;
        while n_leaves < self.params.num_leaves {
            // Largest gain first; earliest candidate wins ties.
            let pick = open
                .iter()
                .enumerate()
                .filter_map(|(i, c)| c.split.map(|s| (i, s.gain)))
                .fold(None, |best: Option<(usize, f64)>, (i, g)| match best {
                    Some((_, bg)) if bg >= g => best,
                    _ => Some((i, g)),
                });
            let Some((pick, _)) = pick else {
                break;
            };
            let candidate = open.remove(pick);
            let Some(split) = candidate.split else {
                done.push(candidate);
                continue;
            };

            let column = self.binned.column(split.feature);
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = candidate
                .rows
                .into_iter()
                .partition(|r| column[*r] as usize <= split.bin);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { value: 0.0 });
            nodes.push(Node::Leaf { value: 0.0 });
            nodes[candidate.node] = Node::Split {
                feature: split.feature,
                threshold: self.mapper.threshold(split.feature, split.bin),
                left,
                right,
            };
            n_leaves += 1;

            for (node, rows) in [(left, left_rows), (right, right_rows)] {
                let split = self.best_split(&rows);
                open.push(Candidate { node, rows, split });
            }
        }
        done.extend(open);

        let mut row_values = vec![0.0; n];
        for leaf in done {
            let (g, h) = self.sums(&leaf.rows);
            let value = -self.params.learning_rate * g / (h + self.params.lambda_l2 + 1e-12);
            nodes[leaf.node] = Node::Leaf { value };
            for r in leaf.rows {
                row_values[r] = value;
            }
        }
        (Tree { nodes }, row_values)
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), r| (g + self.grad[*r], h + self.hess[*r]))
    }

    fn best_split(&self, rows: &[usize]) -> Option<SplitInfo> {
        let min_leaf = self.params.min_data_in_leaf;
        if rows.len() < 2 * min_leaf {
            return None;
        }
        let lambda = self.params.lambda_l2 + 1e-12;
        let (g_total, h_total) = self.sums(rows);
        let parent = g_total * g_total / (h_total + lambda);

        let mut best: Option<SplitInfo> = None;
        for feature in 0..self.binned.n_features() {
            let n_bins = self.mapper.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let column = self.binned.column(feature);
            let mut hist = vec![(0.0f64, 0.0f64, 0usize); n_bins];
            for r in rows {
                let cell = &mut hist[column[*r] as usize];
                cell.0 += self.grad[*r];
                cell.1 += self.hess[*r];
                cell.2 += 1;
            }

            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
            for (bin, (g, h, c)) in hist.iter().enumerate().take(n_bins - 1) {
                gl += g;
                hl += h;
                nl += c;
                let nr = rows.len() - nl;
                if nl < min_leaf || nr < min_leaf {
                    continue;
                }
                let gr = g_total - gl;
                let hr = h_total - hl;
                let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent;
                if gain > 1e-12 && best.is_none_or(|b| gain > b.gain) {
                    best = Some(SplitInfo { feature, bin, gain });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::three_blobs;

    fn small_params() -> LeafwiseParams {
        LeafwiseParams {
            iterations: 30,
            learning_rate: 0.3,
            num_leaves: 8,
            min_data_in_leaf: 5,
            ..LeafwiseParams::default()
        }
    }

    #[test]
    fn learns_three_blobs_within_leaf_budget() {
        let (x, y) = three_blobs(40, 13);
        let params = small_params();
        let model = LeafwiseBoostModel::fit(&params, &x, &y).unwrap();
        let proba = model.predict_proba(&x);
        let correct = (0..x.nrows())
            .filter(|i| {
                let row: Vec<f64> = proba.row(*i).iter().copied().collect();
                crate::math::argmax(&row) == y[*i]
            })
            .count();
        assert!(correct as f64 / x.nrows() as f64 > 0.9);
        for round in &model.rounds {
            for tree in round {
                assert!(tree.n_leaves() <= params.num_leaves);
            }
        }
    }

    #[test]
    fn text_dump_reloads_identically() {
        let (x, y) = three_blobs(15, 2);
        let model = LeafwiseBoostModel::fit(&small_params(), &x, &y).unwrap();
        let text = model.to_text();
        assert!(text.starts_with(TEXT_HEADER));
        let back = LeafwiseBoostModel::from_text(&text).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn text_parser_reports_line_numbers() {
        let text = "leafwise-boost v1\nfeatures 2\nbase 0 0 0\ntree 0 1\nsplit 5 0.5 1 2\nend\n";
        let err = LeafwiseBoostModel::from_text(text).unwrap_err();
        assert!(err.message().contains("line 5"), "{}", err.message());
    }
}
