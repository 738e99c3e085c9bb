//! Serving bundle persistence.
//!
//! The serving model and scaler live in two separate JSON files so the service
//! layout stays stable, but they are only meaningful as a pair:
//!
//! - both files carry the same `bundle_id` and the `FeatureSchema` they were
//!   trained with
//! - each file is written to a temporary sibling and renamed into place, so a
//!   reader never sees a half-written file
//! - loading rejects a mismatched pair or a non-canonical schema

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::domain::{Disposition, FeatureSchema, ModelFamily, N_CLASSES, N_FEATURES};
use crate::error::AppError;
use crate::math::{StandardScaler, argmax};
use crate::models::{Classifier, TrainedModel};

/// The (model, scaler, schema) triple the inference service serves from.
#[derive(Debug, Clone, PartialEq)]
pub struct ServingBundle {
    pub bundle_id: String,
    pub schema: FeatureSchema,
    pub model: TrainedModel,
    pub scaler: StandardScaler,
}

impl ServingBundle {
    /// Pair a freshly trained model and scaler under a new bundle id.
    pub fn new(model: TrainedModel, scaler: StandardScaler) -> Result<Self, AppError> {
        if model.n_features() != N_FEATURES || scaler.n_features() != N_FEATURES {
            return Err(AppError::training(format!(
                "Model ({}) and scaler ({}) must both use {N_FEATURES} features.",
                model.n_features(),
                scaler.n_features()
            )));
        }
        Ok(Self {
            bundle_id: new_bundle_id(),
            schema: FeatureSchema::canonical(),
            model,
            scaler,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }

    /// Classify one raw (unscaled) feature vector in canonical order.
    pub fn predict(&self, features: &[f64; N_FEATURES]) -> Result<Prediction, AppError> {
        if let Some(j) = features.iter().position(|v| !v.is_finite()) {
            return Err(AppError::input(format!(
                "Feature '{}' is not a finite number.",
                self.schema.features.get(j).map_or("?", String::as_str)
            )));
        }
        let x = DMatrix::from_row_slice(1, N_FEATURES, features);
        let proba = self.model.predict_proba(&self.scaler.transform(&x)?);
        let confidence: [f64; N_CLASSES] = std::array::from_fn(|k| proba[(0, k)]);
        let disposition = Disposition::from_class_id(argmax(&confidence))
            .ok_or_else(|| AppError::training("Model produced no class probabilities."))?;
        Ok(Prediction {
            disposition,
            confidence,
        })
    }
}

/// Most probable class and the per-class probabilities behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub disposition: Disposition,
    /// Indexed by class id; sums to 1.
    pub confidence: [f64; N_CLASSES],
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    bundle_id: String,
    schema: FeatureSchema,
    model: TrainedModel,
}

#[derive(Serialize, Deserialize)]
struct ScalerFile {
    bundle_id: String,
    schema: FeatureSchema,
    scaler: StandardScaler,
}

/// Write both serving files, replacing any previous bundle.
pub fn write_serving_bundle(
    model_path: &Path,
    scaler_path: &Path,
    bundle: &ServingBundle,
) -> Result<(), AppError> {
    let model_file = ModelFile {
        bundle_id: bundle.bundle_id.clone(),
        schema: bundle.schema.clone(),
        model: bundle.model.clone(),
    };
    let scaler_file = ScalerFile {
        bundle_id: bundle.bundle_id.clone(),
        schema: bundle.schema.clone(),
        scaler: bundle.scaler.clone(),
    };
    // Stage both files before replacing either, so a failed write keeps the old pair.
    let staged_scaler = stage_bytes(scaler_path, &encode_json(scaler_path, &scaler_file)?)?;
    let staged_model = encode_json(model_path, &model_file)
        .and_then(|bytes| stage_bytes(model_path, &bytes))
        .inspect_err(|_| {
            let _ = fs::remove_file(&staged_scaler);
        })?;
    commit_staged(&staged_scaler, scaler_path)?;
    commit_staged(&staged_model, model_path)?;
    info!(
        bundle_id = %bundle.bundle_id,
        family = %bundle.family(),
        model = %model_path.display(),
        scaler = %scaler_path.display(),
        "serving bundle saved"
    );
    Ok(())
}

/// Load and cross-check both serving files.
pub fn load_serving_bundle(model_path: &Path, scaler_path: &Path) -> Result<ServingBundle, AppError> {
    let model_file: ModelFile = read_json(model_path)?;
    let scaler_file: ScalerFile = read_json(scaler_path)?;

    if model_file.bundle_id != scaler_file.bundle_id {
        return Err(AppError::training(format!(
            "Model '{}' and scaler '{}' belong to different bundles ({} vs {}).",
            model_path.display(),
            scaler_path.display(),
            model_file.bundle_id,
            scaler_file.bundle_id
        )));
    }
    for (what, schema) in [("model", &model_file.schema), ("scaler", &scaler_file.schema)] {
        if !schema.is_canonical() {
            return Err(AppError::training(format!(
                "The {what} was trained with feature schema v{} {:?}; expected v{} {:?}.",
                schema.version,
                schema.features,
                FeatureSchema::canonical().version,
                FeatureSchema::canonical().features
            )));
        }
    }
    if model_file.model.n_features() != N_FEATURES || scaler_file.scaler.n_features() != N_FEATURES
    {
        return Err(AppError::training("Serving bundle has the wrong feature count."));
    }
    model_file.model.validate()?;

    Ok(ServingBundle {
        bundle_id: model_file.bundle_id,
        schema: model_file.schema,
        model: model_file.model,
        scaler: scaler_file.scaler,
    })
}

/// Serialize `value` as pretty JSON to `path` via a temporary sibling + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    write_bytes_atomic(path, &encode_json(path, value)?)
}

/// Write `bytes` to `path` via a temporary sibling + rename.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp = stage_bytes(path, bytes)?;
    commit_staged(&tmp, path)
}

fn encode_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::training(format!("Failed to encode '{}': {e}", path.display())))
}

/// Write `bytes` to the temporary sibling of `path` and return it.
fn stage_bytes(path: &Path, bytes: &[u8]) -> Result<PathBuf, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::input(format!("Failed to create '{}': {e}", parent.display()))
        })?;
    }
    let tmp = temp_sibling(path);
    fs::write(&tmp, bytes)
        .map_err(|e| AppError::input(format!("Failed to write '{}': {e}", tmp.display())))?;
    Ok(tmp)
}

fn commit_staged(tmp: &Path, path: &Path) -> Result<(), AppError> {
    fs::rename(tmp, path).map_err(|e| {
        let _ = fs::remove_file(tmp);
        AppError::input(format!("Failed to replace '{}': {e}", path.display()))
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let bytes = fs::read(path)
        .map_err(|e| AppError::input(format!("Failed to read '{}': {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::training(format!("Invalid JSON in '{}': {e}", path.display())))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", std::process::id()))
}

fn new_bundle_id() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}-{:08x}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S"),
        rng.gen_range(0..u32::MAX)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ForestParams;
    use crate::domain::FamilyConfig;
    use crate::models::testing::three_blobs;

    fn bundle() -> ServingBundle {
        let (x, y) = three_blobs(6, 9);
        let scaler = StandardScaler::fit(&x).unwrap();
        let xs = scaler.transform(&x).unwrap();
        let config = FamilyConfig::RandomForest(ForestParams {
            n_estimators: 3,
            ..ForestParams::default()
        });
        let model = TrainedModel::fit(&config, &xs, &y).unwrap();
        ServingBundle::new(model, scaler).unwrap()
    }

    #[test]
    fn bundle_round_trips_through_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("saved_models/model.json");
        let scaler_path = dir.path().join("saved_models/scaler.json");
        let original = bundle();

        write_serving_bundle(&model_path, &scaler_path, &original).unwrap();
        let loaded = load_serving_bundle(&model_path, &scaler_path).unwrap();
        assert_eq!(loaded, original);

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("saved_models"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 2);
    }

    #[test]
    fn mismatched_pair_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let scaler_path = dir.path().join("scaler.json");
        let a = bundle();
        let b = bundle();

        write_serving_bundle(&model_path, &scaler_path, &a).unwrap();
        let other_scaler = dir.path().join("other_scaler.json");
        write_serving_bundle(&dir.path().join("other_model.json"), &other_scaler, &b).unwrap();

        let err = load_serving_bundle(&model_path, &other_scaler).unwrap_err();
        assert!(err.message().contains("different bundles"));
    }

    #[test]
    fn failed_model_write_keeps_the_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let scaler_path = dir.path().join("scaler.json");
        let first = bundle();
        write_serving_bundle(&model_path, &scaler_path, &first).unwrap();

        // A directory squatting on the model's temp file makes staging fail.
        fs::create_dir(temp_sibling(&model_path)).unwrap();
        let second = ServingBundle::new(first.model.clone(), first.scaler.clone()).unwrap();
        assert!(write_serving_bundle(&model_path, &scaler_path, &second).is_err());

        let loaded = load_serving_bundle(&model_path, &scaler_path).unwrap();
        assert_eq!(loaded.bundle_id, first.bundle_id);
        assert!(!temp_sibling(&scaler_path).exists());
    }

    #[test]
    fn foreign_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.json");
        let scaler_path = dir.path().join("scaler.json");
        let mut b = bundle();
        b.schema.features.swap(0, 1);

        write_serving_bundle(&model_path, &scaler_path, &b).unwrap();
        let err = load_serving_bundle(&model_path, &scaler_path).unwrap_err();
        assert!(err.message().contains("feature schema"));
    }

    #[test]
    fn predict_is_deterministic_and_normalized() {
        let b = bundle();
        let row = [0.5; N_FEATURES];
        let first = b.predict(&row).unwrap();
        assert_eq!(first, b.predict(&row).unwrap());
        let total: f64 = first.confidence.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(first.disposition.class_id(), argmax(&first.confidence));

        let mut bad = row;
        bad[3] = f64::NAN;
        assert_eq!(b.predict(&bad).unwrap_err().exit_code(), 2);
    }
}
