//! Histogram binning of feature columns.
//!
//! Every tree learner in this crate searches splits over per-feature histograms
//! instead of sorted raw values. A `BinMapper` learns at most `max_bins` bins per
//! feature from the training matrix; bin `b` of feature `f` holds values
//! `x <= thresholds[f][b]` (and above the previous edge). The last bin is open
//! ended. A split "bin <= b" is therefore the raw-value split
//! `x <= thresholds[f][b]`, which is what trained trees store.

use nalgebra::DMatrix;

/// Per-feature bin edges learned from training data.
#[derive(Debug, Clone)]
pub struct BinMapper {
    thresholds: Vec<Vec<f64>>,
}

impl BinMapper {
    /// Learn bin edges for every column of `x`.
    pub fn fit(x: &DMatrix<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.max(2);
        let thresholds = x
            .column_iter()
            .map(|col| {
                let mut values: Vec<f64> = col.iter().copied().filter(|v| v.is_finite()).collect();
                values.sort_by(f64::total_cmp);
                column_edges(&values, max_bins)
            })
            .collect();
        Self { thresholds }
    }

    pub fn n_features(&self) -> usize {
        self.thresholds.len()
    }

    /// Number of bins of `feature` (edges + 1).
    pub fn n_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }

    /// Raw-value threshold equivalent to the split "bin <= `bin`".
    pub fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.thresholds[feature][bin]
    }

    /// Bin index of `value` for `feature`.
    pub fn bin(&self, feature: usize, value: f64) -> u16 {
        let edges = &self.thresholds[feature];
        // First edge with value <= edge.
        edges.partition_point(|edge| *edge < value) as u16
    }

    /// Bin every cell of `x`.
    pub fn transform(&self, x: &DMatrix<f64>) -> BinnedMatrix {
        let n_rows = x.nrows();
        let n_features = x.ncols();
        let mut bins = Vec::with_capacity(n_rows * n_features);
        for (f, col) in x.column_iter().enumerate() {
            bins.extend(col.iter().map(|v| self.bin(f, *v)));
        }
        BinnedMatrix {
            n_rows,
            n_features,
            bins,
        }
    }
}

/// Column-major matrix of bin indices.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    n_rows: usize,
    n_features: usize,
    bins: Vec<u16>,
}

impl BinnedMatrix {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn column(&self, feature: usize) -> &[u16] {
        &self.bins[feature * self.n_rows..(feature + 1) * self.n_rows]
    }

    pub fn get(&self, row: usize, feature: usize) -> u16 {
        self.bins[feature * self.n_rows + row]
    }
}

fn column_edges(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    let mut distinct: Vec<f64> = sorted.to_vec();
    distinct.dedup();
    if distinct.len() <= 1 {
        return Vec::new();
    }

    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }

    // Quantile edges over all values, so dense regions get finer bins.
    let n = sorted.len();
    let max = distinct[distinct.len() - 1];
    let mut edges: Vec<f64> = (1..max_bins)
        .map(|k| sorted[(k * n / max_bins).min(n - 1)])
        .filter(|v| *v < max)
        .collect();
    edges.dedup();
    edges
}

/// Row `i` of `x` as an owned vector.
pub fn row_vec(x: &DMatrix<f64>, i: usize) -> Vec<f64> {
    x.row(i).iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn few_distinct_values_get_midpoint_edges() {
        let x = DMatrix::from_column_slice(5, 1, &[1.0, 3.0, 1.0, 2.0, 3.0]);
        let mapper = BinMapper::fit(&x, 16);
        assert_eq!(mapper.n_bins(0), 3);
        assert_eq!(mapper.threshold(0, 0), 1.5);
        assert_eq!(mapper.bin(0, 1.0), 0);
        assert_eq!(mapper.bin(0, 2.0), 1);
        assert_eq!(mapper.bin(0, 3.0), 2);
        assert_eq!(mapper.bin(0, 100.0), 2);
    }

    #[test]
    fn value_on_edge_goes_left() {
        let x = DMatrix::from_column_slice(2, 1, &[0.0, 2.0]);
        let mapper = BinMapper::fit(&x, 4);
        assert_eq!(mapper.bin(0, 1.0), 0);
        assert_eq!(mapper.bin(0, 1.0 + 1e-9), 1);
    }

    #[test]
    fn respects_max_bins_and_constant_columns() {
        let values: Vec<f64> = (0..1000).map(f64::from).collect();
        let mut data = values.clone();
        data.extend(std::iter::repeat_n(7.0, 1000));
        let x = DMatrix::from_column_slice(1000, 2, &data);
        let mapper = BinMapper::fit(&x, 32);
        assert!(mapper.n_bins(0) <= 32);
        assert_eq!(mapper.n_bins(1), 1);

        let binned = mapper.transform(&x);
        assert_eq!(binned.get(0, 0), 0);
        assert_eq!(binned.get(999, 0) as usize, mapper.n_bins(0) - 1);
        assert!(binned.column(1).iter().all(|b| *b == 0));
    }
}
