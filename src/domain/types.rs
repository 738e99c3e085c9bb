//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during training and serving
//! - written to the canonical CSV and the serving artifacts
//! - reloaded later by the inference service

use std::fmt;

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Number of canonical numeric features.
pub const N_FEATURES: usize = 10;

/// Number of disposition classes.
pub const N_CLASSES: usize = 3;

/// Version of the canonical feature schema. Bump when `Feature::ALL` changes.
pub const SCHEMA_VERSION: u32 = 1;

/// A canonical, mission-agnostic feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Period,
    Duration,
    Depth,
    PlanetRadius,
    EquilibriumTemp,
    InsolationFlux,
    ModelSnr,
    StellarTemp,
    StellarLogg,
    StellarRadius,
}

impl Feature {
    /// All features in canonical column order.
    pub const ALL: [Feature; N_FEATURES] = [
        Feature::Period,
        Feature::Duration,
        Feature::Depth,
        Feature::PlanetRadius,
        Feature::EquilibriumTemp,
        Feature::InsolationFlux,
        Feature::ModelSnr,
        Feature::StellarTemp,
        Feature::StellarLogg,
        Feature::StellarRadius,
    ];

    /// Column name used in the canonical CSV and in prediction requests.
    pub fn name(self) -> &'static str {
        match self {
            Feature::Period => "period",
            Feature::Duration => "duration",
            Feature::Depth => "depth",
            Feature::PlanetRadius => "planet_radius",
            Feature::EquilibriumTemp => "equilibrium_temp",
            Feature::InsolationFlux => "insolation_flux",
            Feature::ModelSnr => "model_snr",
            Feature::StellarTemp => "stellar_temp",
            Feature::StellarLogg => "stellar_logg",
            Feature::StellarRadius => "stellar_radius",
        }
    }

    /// Position of this feature in the canonical order.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Three-class label of a transit signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Disposition {
    FalsePositive = 0,
    Candidate = 1,
    Confirmed = 2,
}

impl Disposition {
    /// All classes in class-id order.
    pub const ALL: [Disposition; N_CLASSES] = [
        Disposition::FalsePositive,
        Disposition::Candidate,
        Disposition::Confirmed,
    ];

    /// Normalize a mission label (`"confirmed "`, `"cp"`, `"False Positive"`, ...).
    ///
    /// Returns `None` for anything outside the known vocabulary (`"UNK"`, `"SEE OTHER"`,
    /// empty cells); unknown labels are never an error.
    pub fn from_label(label: &str) -> Option<Disposition> {
        match label.trim().to_uppercase().as_str() {
            "CONFIRMED" | "CP" => Some(Disposition::Confirmed),
            "CANDIDATE" | "PC" => Some(Disposition::Candidate),
            "FALSE POSITIVE" | "FP" => Some(Disposition::FalsePositive),
            _ => None,
        }
    }

    pub fn class_id(self) -> usize {
        self as usize
    }

    pub fn from_class_id(id: usize) -> Option<Disposition> {
        Disposition::ALL.get(id).copied()
    }

    /// Label returned by the prediction endpoint.
    pub fn prediction_label(self) -> &'static str {
        match self {
            Disposition::FalsePositive => "FALSE POSITIVE",
            Disposition::Candidate => "CANDIDATE",
            Disposition::Confirmed => "CONFIRMED EXOPLANET",
        }
    }

    /// Key used in the prediction confidence map.
    pub fn confidence_key(self) -> &'static str {
        match self {
            Disposition::FalsePositive => "FALSE_POSITIVE",
            Disposition::Candidate => "CANDIDATE",
            Disposition::Confirmed => "CONFIRMED",
        }
    }

    /// Row label used in classification reports.
    pub fn report_name(self) -> &'static str {
        match self {
            Disposition::FalsePositive => "False Positive",
            Disposition::Candidate => "Candidate",
            Disposition::Confirmed => "Confirmed",
        }
    }
}

/// Explicit feature-order contract stored next to every serialized model/scaler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub features: Vec<String>,
}

impl FeatureSchema {
    pub fn canonical() -> Self {
        Self {
            version: SCHEMA_VERSION,
            features: Feature::ALL.iter().map(|f| f.name().to_string()).collect(),
        }
    }

    pub fn is_canonical(&self) -> bool {
        *self == Self::canonical()
    }
}

/// One fully-populated row of the combined dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub disposition: Disposition,
    /// Feature values in `Feature::ALL` order; always finite.
    pub features: [f64; N_FEATURES],
}

/// The combined, imputed dataset all training starts from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalDataset {
    pub records: Vec<CanonicalRecord>,
}

impl CanonicalDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Feature matrix (rows = records, columns = canonical features).
    pub fn feature_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.records.len(), N_FEATURES, |i, j| self.records[i].features[j])
    }

    /// Class ids in record order.
    pub fn labels(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.disposition.class_id()).collect()
    }

    pub fn class_counts(&self) -> [usize; N_CLASSES] {
        let mut counts = [0usize; N_CLASSES];
        for r in &self.records {
            counts[r.disposition.class_id()] += 1;
        }
        counts
    }
}

/// Classifier family compared by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ModelFamily {
    /// Gradient boosting over symmetric (oblivious) trees with vector leaves.
    #[value(name = "oblivious-boost")]
    ObliviousBoost,
    /// Bagged gini trees with per-node feature subsampling.
    #[value(name = "random-forest")]
    RandomForest,
    /// Histogram gradient boosting with best-first (leaf-wise) tree growth.
    #[value(name = "leafwise-boost")]
    LeafwiseBoost,
}

impl ModelFamily {
    /// Training (and tie-break) order.
    pub const ALL: [ModelFamily; 3] = [
        ModelFamily::ObliviousBoost,
        ModelFamily::RandomForest,
        ModelFamily::LeafwiseBoost,
    ];

    /// Short name used for run names, artifact paths and report files.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelFamily::ObliviousBoost => "ObliviousBoost",
            ModelFamily::RandomForest => "RandomForest",
            ModelFamily::LeafwiseBoost => "LeafwiseBoost",
        }
    }

    /// Value of the `model_class` run parameter.
    pub fn model_class(self) -> &'static str {
        match self {
            ModelFamily::ObliviousBoost => "ObliviousBoostClassifier",
            ModelFamily::RandomForest => "RandomForestClassifier",
            ModelFamily::LeafwiseBoost => "LeafwiseBoostClassifier",
        }
    }

    pub fn from_model_class(class: &str) -> Option<ModelFamily> {
        ModelFamily::ALL.into_iter().find(|f| f.model_class() == class)
    }

    /// On-disk format each family logs its model in.
    pub fn artifact_format(self) -> ArtifactFormat {
        match self {
            ModelFamily::ObliviousBoost => ArtifactFormat::Native,
            ModelFamily::RandomForest => ArtifactFormat::Generic,
            ModelFamily::LeafwiseBoost => ArtifactFormat::Text,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Serialized model formats found in tracking artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Tagged JSON of any trained model.
    Generic,
    /// Family-specific JSON without the family tag (oblivious boosting only).
    Native,
    /// Line-oriented text dump (leaf-wise boosting only).
    Text,
}

impl ArtifactFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactFormat::Generic => "model.json",
            ArtifactFormat::Native => "model.cbm",
            ArtifactFormat::Text => "model.txt",
        }
    }

    pub fn from_file_name(name: &str) -> Option<ArtifactFormat> {
        [ArtifactFormat::Generic, ArtifactFormat::Native, ArtifactFormat::Text]
            .into_iter()
            .find(|f| f.file_name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_normalization_is_total() {
        for label in ["confirmed", "CONFIRMED ", "cp", " Cp"] {
            assert_eq!(Disposition::from_label(label), Some(Disposition::Confirmed));
        }
        for label in ["fp", "false positive", "FALSE POSITIVE"] {
            assert_eq!(Disposition::from_label(label), Some(Disposition::FalsePositive));
        }
        for label in ["pc", "Candidate"] {
            assert_eq!(Disposition::from_label(label), Some(Disposition::Candidate));
        }
        for label in ["", "UNK", "SEE OTHER", "KP", "APC", "false  positive"] {
            assert_eq!(Disposition::from_label(label), None);
        }
    }

    #[test]
    fn label_normalization_is_idempotent() {
        for label in ["confirmed", "pc", "fp", "FALSE POSITIVE"] {
            let once = Disposition::from_label(label).unwrap();
            let name = match once {
                Disposition::Confirmed => "CONFIRMED",
                Disposition::Candidate => "CANDIDATE",
                Disposition::FalsePositive => "FALSE POSITIVE",
            };
            assert_eq!(Disposition::from_label(name), Some(once));
        }
    }

    #[test]
    fn canonical_schema_matches_feature_order() {
        let schema = FeatureSchema::canonical();
        assert_eq!(schema.features.len(), N_FEATURES);
        assert_eq!(schema.features[0], "period");
        assert_eq!(schema.features[9], "stellar_radius");
        for (i, f) in Feature::ALL.iter().enumerate() {
            assert_eq!(f.index(), i);
            assert_eq!(Feature::from_name(f.name()), Some(*f));
        }
    }

    #[test]
    fn artifact_formats_round_trip_through_file_names() {
        for family in ModelFamily::ALL {
            let format = family.artifact_format();
            assert_eq!(ArtifactFormat::from_file_name(format.file_name()), Some(format));
        }
    }
}
