//! Dataset combination and median imputation.
//!
//! Steps, in order:
//! 1. concatenate every normalized mission table (no deduplication)
//! 2. drop rows without a recognised disposition
//! 3. for each feature, fill missing values with the median of that column over
//!    the whole combined dataset (a column with no values at all is zero-filled)
//!
//! The output always satisfies the canonical-record invariant: every feature is a
//! finite number and every row has a class.

use tracing::{info, warn};

use crate::data::normalize::NormalizedTable;
use crate::domain::{CanonicalDataset, CanonicalRecord, Feature, N_FEATURES};
use crate::error::AppError;
use crate::math::median;

/// Fill value used when a feature has no observed value in any mission.
pub const ALL_MISSING_FILL: f64 = 0.0;

/// How a single feature column was imputed.
#[derive(Debug, Clone, PartialEq)]
pub struct Imputation {
    pub feature: Feature,
    pub fill_value: f64,
    pub filled: usize,
    /// `true` when no value was observed and `ALL_MISSING_FILL` was used.
    pub fallback: bool,
}

/// Diagnostics of a combine run.
#[derive(Debug, Clone, Default)]
pub struct CombineSummary {
    /// `(mission, rows)` in input order.
    pub missions: Vec<(String, usize)>,
    pub rows_before: usize,
    pub rows_unlabeled: usize,
    pub imputations: Vec<Imputation>,
}

/// Combine normalized mission tables into the canonical dataset.
pub fn combine_tables(
    tables: &[NormalizedTable],
) -> Result<(CanonicalDataset, CombineSummary), AppError> {
    if tables.is_empty() {
        return Err(AppError::no_data(
            "No data could be processed. Check the mission CSV files and paths.",
        ));
    }

    let mut summary = CombineSummary::default();
    let mut labeled = Vec::new();
    for table in tables {
        summary.missions.push((table.mission.clone(), table.rows.len()));
        summary.rows_before += table.rows.len();
        for row in &table.rows {
            match row.disposition {
                Some(d) => labeled.push((d, row.values)),
                None => summary.rows_unlabeled += 1,
            }
        }
    }
    info!(rows = summary.rows_before, "combined mission rows before cleaning");

    if labeled.is_empty() {
        return Err(AppError::no_data(
            "Every combined row lacks a recognised disposition.",
        ));
    }

    let mut fill = [ALL_MISSING_FILL; N_FEATURES];
    for feature in Feature::ALL {
        let j = feature.index();
        let observed: Vec<f64> = labeled.iter().filter_map(|(_, v)| v[j]).collect();
        let missing = labeled.len() - observed.len();
        if missing == 0 {
            continue;
        }
        let (value, fallback) = match median(&observed) {
            Some(m) => (m, false),
            None => (ALL_MISSING_FILL, true),
        };
        fill[j] = value;
        if fallback {
            warn!(
                feature = feature.name(),
                fill = value,
                "feature missing in every mission, filling with constant"
            );
        } else {
            info!(
                feature = feature.name(),
                median = format_args!("{value:.2}"),
                filled = missing,
                "filled missing values using median"
            );
        }
        summary.imputations.push(Imputation {
            feature,
            fill_value: value,
            filled: missing,
            fallback,
        });
    }

    let records = labeled
        .into_iter()
        .map(|(disposition, values)| {
            let mut features = [0.0; N_FEATURES];
            for j in 0..N_FEATURES {
                features[j] = values[j].unwrap_or(fill[j]);
            }
            CanonicalRecord {
                disposition,
                features,
            }
        })
        .collect();

    Ok((CanonicalDataset { records }, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::normalize::NormalizedRow;
    use crate::domain::Disposition;

    fn row(d: Option<Disposition>, period: Option<f64>, depth: Option<f64>) -> NormalizedRow {
        let mut values = [None; N_FEATURES];
        values[Feature::Period.index()] = period;
        values[Feature::Depth.index()] = depth;
        NormalizedRow {
            disposition: d,
            values,
        }
    }

    fn table(mission: &str, features: Vec<Feature>, rows: Vec<NormalizedRow>) -> NormalizedTable {
        NormalizedTable {
            mission: mission.to_string(),
            features,
            rows,
        }
    }

    #[test]
    fn empty_input_is_no_data() {
        let err = combine_tables(&[]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn drops_unlabeled_and_imputes_global_median() {
        let a = table(
            "A",
            vec![Feature::Period, Feature::Depth],
            vec![
                row(Some(Disposition::Confirmed), Some(1.0), Some(10.0)),
                row(None, Some(100.0), Some(100.0)),
                row(Some(Disposition::Candidate), None, Some(30.0)),
            ],
        );
        let b = table(
            "B",
            vec![Feature::Period],
            vec![
                row(Some(Disposition::FalsePositive), Some(3.0), None),
                row(Some(Disposition::FalsePositive), Some(5.0), None),
            ],
        );

        let (dataset, summary) = combine_tables(&[a, b]).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(summary.rows_before, 5);
        assert_eq!(summary.rows_unlabeled, 1);

        // Period median over labeled rows {1, 3, 5} = 3; the unlabeled 100 is excluded.
        assert_eq!(dataset.records[1].features[Feature::Period.index()], 3.0);
        // Depth median over {10, 30} = 20, filled into mission B rows.
        assert_eq!(dataset.records[2].features[Feature::Depth.index()], 20.0);
        assert_eq!(dataset.records[3].features[Feature::Depth.index()], 20.0);
    }

    #[test]
    fn never_leaves_missing_values() {
        let a = table(
            "A",
            vec![Feature::Period],
            vec![
                row(Some(Disposition::Confirmed), Some(1.0), None),
                row(Some(Disposition::Candidate), None, None),
            ],
        );
        let (dataset, summary) = combine_tables(&[a]).unwrap();
        for r in &dataset.records {
            assert!(r.features.iter().all(|v| v.is_finite()));
        }
        // Only period was ever observed.
        let fallbacks: Vec<_> = summary.imputations.iter().filter(|i| i.fallback).collect();
        assert_eq!(fallbacks.len(), 9);
        assert!(fallbacks.iter().all(|i| i.fill_value == ALL_MISSING_FILL));
    }

    #[test]
    fn all_unlabeled_is_no_data() {
        let a = table("A", vec![], vec![row(None, Some(1.0), None)]);
        assert_eq!(combine_tables(&[a]).unwrap_err().exit_code(), 3);
    }
}
