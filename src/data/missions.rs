//! Built-in mission schemas.
//!
//! Each mission export names the same physical quantities differently. A
//! `MissionSpec` maps the mission's column names onto canonical columns; the
//! normalizer applies whichever mappings the actual file supports.

use std::path::PathBuf;

use crate::domain::{Feature, ProjectPaths};

/// Target of a column mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalColumn {
    Disposition,
    Feature(Feature),
}

impl CanonicalColumn {
    pub fn name(self) -> &'static str {
        match self {
            CanonicalColumn::Disposition => "disposition",
            CanonicalColumn::Feature(f) => f.name(),
        }
    }
}

/// A mission and its source-column → canonical-column mapping.
#[derive(Debug, Clone, Copy)]
pub struct MissionSpec {
    pub name: &'static str,
    pub column_map: &'static [(&'static str, CanonicalColumn)],
}

use CanonicalColumn::{Disposition as Disp, Feature as F};

const KOI_COLUMNS: &[(&str, CanonicalColumn)] = &[
    ("koi_disposition", Disp),
    ("koi_period", F(Feature::Period)),
    ("koi_duration", F(Feature::Duration)),
    ("koi_depth", F(Feature::Depth)),
    ("koi_prad", F(Feature::PlanetRadius)),
    ("koi_teq", F(Feature::EquilibriumTemp)),
    ("koi_insol", F(Feature::InsolationFlux)),
    ("koi_model_snr", F(Feature::ModelSnr)),
    ("koi_steff", F(Feature::StellarTemp)),
    ("koi_slogg", F(Feature::StellarLogg)),
    ("koi_srad", F(Feature::StellarRadius)),
];

/// Kepler cumulative KOI table (`cumulative.csv`).
pub const KEPLER: MissionSpec = MissionSpec {
    name: "Kepler",
    column_map: KOI_COLUMNS,
};

/// K2 exports reuse the KOI column names (`k2.csv`).
pub const K2: MissionSpec = MissionSpec {
    name: "K2",
    column_map: KOI_COLUMNS,
};

/// TESS Objects of Interest (`TOI.csv`).
pub const TESS: MissionSpec = MissionSpec {
    name: "TESS",
    column_map: &[
        ("tfopwg_disp", Disp),
        ("pl_orbper", F(Feature::Period)),
        ("pl_trandurh", F(Feature::Duration)),
        ("pl_trandep", F(Feature::Depth)),
        ("pl_rade", F(Feature::PlanetRadius)),
        ("pl_eqt", F(Feature::EquilibriumTemp)),
        ("pl_insol", F(Feature::InsolationFlux)),
        ("pl_snr", F(Feature::ModelSnr)),
        ("st_teff", F(Feature::StellarTemp)),
        ("st_logg", F(Feature::StellarLogg)),
        ("st_rad", F(Feature::StellarRadius)),
    ],
};

/// Built-in missions paired with their input files, in processing order.
pub fn builtin_missions(paths: &ProjectPaths) -> Vec<(MissionSpec, PathBuf)> {
    vec![
        (KEPLER, paths.kepler_csv.clone()),
        (K2, paths.k2_csv.clone()),
        (TESS, paths.tess_csv.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mission_maps_disposition_and_all_features() {
        for mission in [KEPLER, K2, TESS] {
            assert_eq!(mission.column_map.len(), 11, "{}", mission.name);
            assert!(
                mission
                    .column_map
                    .iter()
                    .any(|(_, c)| *c == CanonicalColumn::Disposition)
            );
            for feature in Feature::ALL {
                assert!(
                    mission
                        .column_map
                        .iter()
                        .any(|(_, c)| *c == CanonicalColumn::Feature(feature)),
                    "{} lacks {feature}",
                    mission.name
                );
            }
        }
    }
}
