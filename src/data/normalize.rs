//! Schema normalization: mission table → canonical columns.
//!
//! Only mappings whose source column exists are applied. A table that matches
//! none of the mapped columns, or that has no disposition column, yields `None`
//! ("no usable data") so a single bad mission never fails the whole run.

use tracing::{info, warn};

use crate::data::missions::{CanonicalColumn, MissionSpec};
use crate::domain::{Disposition, Feature, N_FEATURES};
use crate::io::ingest::{RawTable, parse_opt_f64};

/// One normalized row. `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub disposition: Option<Disposition>,
    pub values: [Option<f64>; N_FEATURES],
}

/// A mission table restricted to canonical columns.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub mission: String,
    /// Canonical feature columns present in the source, in canonical order.
    pub features: Vec<Feature>,
    pub rows: Vec<NormalizedRow>,
}

impl NormalizedTable {
    /// Canonical column names of this table (`disposition` first).
    pub fn column_names(&self) -> Vec<&'static str> {
        std::iter::once("disposition")
            .chain(self.features.iter().map(|f| f.name()))
            .collect()
    }

    pub fn unlabeled_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.disposition.is_none()).count()
    }
}

/// Apply a mission's column map to a raw table.
pub fn normalize_table(raw: &RawTable, mission: &MissionSpec) -> Option<NormalizedTable> {
    let available: Vec<(usize, CanonicalColumn)> = mission
        .column_map
        .iter()
        .filter_map(|(source, target)| raw.column_index(source).map(|idx| (idx, *target)))
        .collect();

    if available.is_empty() {
        warn!(
            mission = mission.name,
            source = %raw.source.display(),
            "none of the target columns found, skipping"
        );
        return None;
    }
    info!(
        mission = mission.name,
        found = available.len(),
        total = mission.column_map.len(),
        "matched target columns"
    );

    let Some(disposition_idx) = available
        .iter()
        .find(|(_, c)| *c == CanonicalColumn::Disposition)
        .map(|(idx, _)| *idx)
    else {
        warn!(mission = mission.name, "disposition column not found, skipping");
        return None;
    };

    let mut feature_cols: Vec<(usize, Feature)> = available
        .iter()
        .filter_map(|(idx, c)| match c {
            CanonicalColumn::Feature(f) => Some((*idx, *f)),
            CanonicalColumn::Disposition => None,
        })
        .collect();
    feature_cols.sort_by_key(|(_, f)| *f);
    feature_cols.dedup_by_key(|(_, f)| *f);

    let rows = raw
        .records
        .iter()
        .map(|record| {
            let disposition = raw
                .cell(record, disposition_idx)
                .and_then(Disposition::from_label);
            let mut values = [None; N_FEATURES];
            for (idx, feature) in &feature_cols {
                values[feature.index()] = parse_opt_f64(raw.cell(record, *idx));
            }
            NormalizedRow {
                disposition,
                values,
            }
        })
        .collect();

    Some(NormalizedTable {
        mission: mission.name.to_string(),
        features: feature_cols.into_iter().map(|(_, f)| f).collect(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::missions::{KEPLER, TESS};

    fn table(csv: &str) -> RawTable {
        RawTable::from_reader("test.csv", csv.as_bytes()).unwrap()
    }

    #[test]
    fn keeps_only_mapped_columns_that_exist() {
        let raw = table(
            "kepid,koi_disposition,koi_period,koi_prad,koi_score\n\
             1,CONFIRMED,9.5,2.3,0.9\n\
             2,candidate,,1.1,0.4\n",
        );
        let out = normalize_table(&raw, &KEPLER).unwrap();
        assert_eq!(out.column_names(), vec!["disposition", "period", "planet_radius"]);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].disposition, Some(Disposition::Confirmed));
        assert_eq!(out.rows[0].values[Feature::Period.index()], Some(9.5));
        assert_eq!(out.rows[1].values[Feature::Period.index()], None);
        assert_eq!(out.rows[1].values[Feature::Depth.index()], None);
    }

    #[test]
    fn unknown_labels_become_missing() {
        let raw = table("tfopwg_disp,pl_orbper\nCP,1.0\nKP,2.0\nAPC,3.0\nFP,4.0\n");
        let out = normalize_table(&raw, &TESS).unwrap();
        let labels: Vec<_> = out.rows.iter().map(|r| r.disposition).collect();
        assert_eq!(
            labels,
            vec![
                Some(Disposition::Confirmed),
                None,
                None,
                Some(Disposition::FalsePositive)
            ]
        );
        assert_eq!(out.unlabeled_rows(), 2);
    }

    #[test]
    fn no_target_columns_is_no_usable_data() {
        let raw = table("a,b\n1,2\n");
        assert!(normalize_table(&raw, &KEPLER).is_none());
    }

    #[test]
    fn missing_disposition_is_no_usable_data() {
        let raw = table("koi_period,koi_depth\n1.0,200\n");
        assert!(normalize_table(&raw, &KEPLER).is_none());
    }

    #[test]
    fn unparseable_numbers_are_missing_not_errors() {
        let raw = table("koi_disposition,koi_period\nFALSE POSITIVE,abc\n");
        let out = normalize_table(&raw, &KEPLER).unwrap();
        assert_eq!(out.rows[0].values[Feature::Period.index()], None);
    }
}
