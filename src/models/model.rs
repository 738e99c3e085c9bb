//! Family-agnostic model interface.
//!
//! The trainer and the inference service only see `TrainedModel`:
//! - fit any family from its `FamilyConfig`
//! - predict class probabilities on scaled features
//! - read/write every artifact format a family can be logged in

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactFormat, FamilyConfig, ModelFamily};
use crate::error::AppError;
use crate::math::argmax;
use crate::models::forest::RandomForestModel;
use crate::models::leafwise::LeafwiseBoostModel;
use crate::models::oblivious::ObliviousBoostModel;

/// Anything that maps a scaled feature matrix onto class probabilities.
pub trait Classifier {
    /// `n_rows x N_CLASSES` matrix whose rows sum to 1.
    fn predict_proba(&self, x: &DMatrix<f64>) -> DMatrix<f64>;

    /// Most probable class per row (lowest class id on ties).
    fn predict(&self, x: &DMatrix<f64>) -> Vec<usize> {
        let proba = self.predict_proba(x);
        (0..proba.nrows())
            .map(|i| {
                let row: Vec<f64> = proba.row(i).iter().copied().collect();
                argmax(&row)
            })
            .collect()
    }
}

/// A fitted classifier of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "model")]
pub enum TrainedModel {
    ObliviousBoost(ObliviousBoostModel),
    RandomForest(RandomForestModel),
    LeafwiseBoost(LeafwiseBoostModel),
}

impl TrainedModel {
    /// Fit the family described by `config` on scaled features `x` and class ids `y`.
    pub fn fit(config: &FamilyConfig, x: &DMatrix<f64>, y: &[usize]) -> Result<Self, AppError> {
        config.validate()?;
        Ok(match config {
            FamilyConfig::ObliviousBoost(p) => {
                TrainedModel::ObliviousBoost(ObliviousBoostModel::fit(p, x, y)?)
            }
            FamilyConfig::RandomForest(p) => {
                TrainedModel::RandomForest(RandomForestModel::fit(p, x, y)?)
            }
            FamilyConfig::LeafwiseBoost(p) => {
                TrainedModel::LeafwiseBoost(LeafwiseBoostModel::fit(p, x, y)?)
            }
        })
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            TrainedModel::ObliviousBoost(_) => ModelFamily::ObliviousBoost,
            TrainedModel::RandomForest(_) => ModelFamily::RandomForest,
            TrainedModel::LeafwiseBoost(_) => ModelFamily::LeafwiseBoost,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            TrainedModel::ObliviousBoost(m) => m.n_features,
            TrainedModel::RandomForest(m) => m.n_features,
            TrainedModel::LeafwiseBoost(m) => m.n_features,
        }
    }

    /// Structural checks for a deserialized model.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            TrainedModel::ObliviousBoost(m) => m.validate(),
            TrainedModel::RandomForest(m) => m.validate(),
            TrainedModel::LeafwiseBoost(m) => m.validate(),
        }
    }

    /// Encode in `format`. Native and text formats only exist for their own family.
    pub fn to_artifact(&self, format: ArtifactFormat) -> Result<Vec<u8>, AppError> {
        match (format, self) {
            (ArtifactFormat::Generic, _) => serde_json::to_vec(self)
                .map_err(|e| AppError::training(format!("Failed to encode model: {e}"))),
            (ArtifactFormat::Native, TrainedModel::ObliviousBoost(m)) => m.to_native(),
            (ArtifactFormat::Text, TrainedModel::LeafwiseBoost(m)) => Ok(m.to_text().into_bytes()),
            (format, model) => Err(AppError::training(format!(
                "{} cannot be written as {}.",
                model.family(),
                format.file_name()
            ))),
        }
    }

    /// Decode an artifact with the loader its format calls for.
    pub fn from_artifact(format: ArtifactFormat, bytes: &[u8]) -> Result<Self, AppError> {
        match format {
            ArtifactFormat::Generic => {
                let model: TrainedModel = serde_json::from_slice(bytes)
                    .map_err(|e| AppError::training(format!("Invalid model.json: {e}")))?;
                model.validate()?;
                Ok(model)
            }
            ArtifactFormat::Native => {
                ObliviousBoostModel::from_native(bytes).map(TrainedModel::ObliviousBoost)
            }
            ArtifactFormat::Text => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| AppError::training(format!("model.txt is not UTF-8: {e}")))?;
                LeafwiseBoostModel::from_text(text).map(TrainedModel::LeafwiseBoost)
            }
        }
    }
}

impl Classifier for TrainedModel {
    fn predict_proba(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            TrainedModel::ObliviousBoost(m) => m.predict_proba(x),
            TrainedModel::RandomForest(m) => m.predict_proba(x),
            TrainedModel::LeafwiseBoost(m) => m.predict_proba(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoostParams, ForestParams, LeafwiseParams};
    use crate::models::testing::three_blobs;

    fn quick_configs() -> Vec<FamilyConfig> {
        vec![
            FamilyConfig::ObliviousBoost(BoostParams {
                iterations: 10,
                depth: 2,
                ..BoostParams::default()
            }),
            FamilyConfig::RandomForest(ForestParams {
                n_estimators: 5,
                ..ForestParams::default()
            }),
            FamilyConfig::LeafwiseBoost(LeafwiseParams {
                iterations: 10,
                min_data_in_leaf: 3,
                ..LeafwiseParams::default()
            }),
        ]
    }

    #[test]
    fn every_family_reloads_from_its_declared_format() {
        let (x, y) = three_blobs(12, 1);
        for config in quick_configs() {
            let model = TrainedModel::fit(&config, &x, &y).unwrap();
            assert_eq!(model.family(), config.family());

            let format = model.family().artifact_format();
            let bytes = model.to_artifact(format).unwrap();
            let back = TrainedModel::from_artifact(format, &bytes).unwrap();
            assert_eq!(back.predict(&x), model.predict(&x));

            let generic = model.to_artifact(ArtifactFormat::Generic).unwrap();
            assert_eq!(TrainedModel::from_artifact(ArtifactFormat::Generic, &generic).unwrap(), model);
        }
    }

    #[test]
    fn foreign_formats_are_rejected() {
        let (x, y) = three_blobs(8, 1);
        let forest = TrainedModel::fit(&quick_configs()[1], &x, &y).unwrap();
        assert!(forest.to_artifact(ArtifactFormat::Native).is_err());
        assert!(forest.to_artifact(ArtifactFormat::Text).is_err());
    }

    #[test]
    fn corrupt_generic_trees_are_rejected() {
        let (x, y) = three_blobs(8, 2);
        for config in &quick_configs()[1..] {
            let model = TrainedModel::fit(config, &x, &y).unwrap();
            let mut json: serde_json::Value =
                serde_json::from_slice(&model.to_artifact(ArtifactFormat::Generic).unwrap()).unwrap();
            let root = match model.family() {
                ModelFamily::RandomForest => &mut json["model"]["trees"][0]["nodes"][0],
                _ => &mut json["model"]["rounds"][0][0]["nodes"][0],
            };
            *root = serde_json::json!({ "split": { "feature": 0, "threshold": 0.0, "left": 0, "right": 0 } });
            let bytes = serde_json::to_vec(&json).unwrap();
            assert!(TrainedModel::from_artifact(ArtifactFormat::Generic, &bytes).is_err());
        }
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, y) = three_blobs(10, 4);
        for config in quick_configs() {
            let model = TrainedModel::fit(&config, &x, &y).unwrap();
            let proba = model.predict_proba(&x);
            for i in 0..proba.nrows() {
                assert!((proba.row(i).sum() - 1.0).abs() < 1e-9);
            }
        }
    }
}
