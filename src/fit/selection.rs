//! Best-model selection and persistence of the serving bundle.
//!
//! Selection rules:
//! 1. Consider finished child runs of the comparison that logged `accuracy`
//! 2. Pick the strictly highest accuracy
//! 3. On ties keep the family trained first (`ModelFamily::ALL` order)
//!
//! The winner's model is then re-read from the tracking store (not from memory),
//! so the serving bundle is exactly what was logged.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::domain::{ArtifactFormat, ModelFamily, ProjectPaths, REGISTERED_MODEL_NAME};
use crate::error::AppError;
use crate::io::bundle::{ServingBundle, read_json, write_serving_bundle};
use crate::math::StandardScaler;
use crate::models::TrainedModel;
use crate::tracking::{MODEL_DESCRIPTOR, ModelDescriptor, ModelVersion, RunRecord, RunStatus, TrackingStore};

/// Model file names probed when the declared file is missing, in order.
pub const MODEL_FILE_CONVENTIONS: [&str; 3] = ["model.json", "model.cbm", "model.txt"];

/// Tag on the winning run naming the serving bundle it produced.
pub const SERVING_BUNDLE_TAG: &str = "serving_bundle";
/// Tag on the comparison run naming the winning family.
pub const BEST_MODEL_TAG: &str = "best_model";

/// First file in `conventions` that exists inside `dir`.
pub fn resolve_artifact(dir: &Path, conventions: &[&str]) -> Option<PathBuf> {
    conventions
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Model file inside a logged model directory: `declared` first, then the conventions.
pub fn resolve_model_file(dir: &Path, declared: Option<&str>) -> Result<PathBuf, AppError> {
    let mut order: Vec<&str> = declared.into_iter().collect();
    order.extend(MODEL_FILE_CONVENTIONS.iter().filter(|c| Some(**c) != declared));
    resolve_artifact(dir, &order).ok_or_else(|| {
        AppError::training(format!(
            "Model artifact not found in '{}' (tried {}).",
            dir.display(),
            order.join(", ")
        ))
    })
}

/// A run that can win the comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub family: ModelFamily,
    pub run_id: String,
    pub accuracy: f64,
}

/// Winner among `runs` (see module docs for the rules).
pub fn select_best(runs: &[RunRecord]) -> Result<Candidate, AppError> {
    let mut candidates: Vec<Candidate> = runs
        .iter()
        .filter(|run| run.status == RunStatus::Finished)
        .filter_map(|run| {
            let family = run
                .params
                .get("model_class")
                .and_then(|c| ModelFamily::from_model_class(c))?;
            let accuracy = *run.metrics.get("accuracy")?;
            accuracy.is_finite().then(|| Candidate {
                family,
                run_id: run.run_id.clone(),
                accuracy,
            })
        })
        .collect();
    candidates.sort_by_key(|c| family_rank(c.family));

    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        if best.as_ref().is_none_or(|b| candidate.accuracy > b.accuracy) {
            best = Some(candidate);
        }
    }
    best.ok_or_else(|| AppError::training("No finished training run recorded an accuracy."))
}

fn family_rank(family: ModelFamily) -> usize {
    ModelFamily::ALL
        .iter()
        .position(|f| *f == family)
        .unwrap_or(ModelFamily::ALL.len())
}

/// Outcome of `select_and_persist`.
#[derive(Debug, Clone)]
pub struct Selection {
    pub winner: Candidate,
    pub model_file: PathBuf,
    pub bundle: ServingBundle,
    /// `None` when registration failed (it never blocks the serving write).
    pub registered: Option<ModelVersion>,
}

/// Select the best child run of `parent_run_id`, load its logged model and write
/// it with `scaler` as the serving bundle.
pub fn select_and_persist(
    store: &TrackingStore,
    experiment_id: &str,
    parent_run_id: &str,
    scaler: StandardScaler,
    paths: &ProjectPaths,
) -> Result<Selection, AppError> {
    let runs = store.search_runs(experiment_id, Some(parent_run_id))?;
    let winner = select_best(&runs)?;
    info!(
        family = %winner.family,
        run_id = %winner.run_id,
        accuracy = format_args!("{:.4}", winner.accuracy),
        "best model selected"
    );

    let artifact_path = winner.family.display_name();
    let model_dir = store.download_artifact(&winner.run_id, artifact_path)?;
    let declared = declared_model_file(&model_dir).unwrap_or_else(|| {
        winner.family.artifact_format().file_name().to_string()
    });
    let model_file = resolve_model_file(&model_dir, Some(&declared))?;

    let model = load_model_file(&model_file)?;
    if model.family() != winner.family {
        return Err(AppError::training(format!(
            "Artifact '{}' holds a {} model, expected {}.",
            model_file.display(),
            model.family(),
            winner.family
        )));
    }

    let bundle = ServingBundle::new(model, scaler)?;
    write_serving_bundle(&paths.model_path, &paths.scaler_path, &bundle)?;
    info!(
        model = %paths.model_path.display(),
        scaler = %paths.scaler_path.display(),
        bundle_id = %bundle.bundle_id,
        "serving bundle written"
    );
    if let Err(e) = tag_winner(store, parent_run_id, &winner, &bundle.bundle_id) {
        warn!(error = %e, "tagging the selected run failed");
    }

    let registered = match store.register_model(REGISTERED_MODEL_NAME, &winner.run_id, artifact_path) {
        Ok(version) => Some(version),
        Err(e) => {
            warn!(error = %e, "model registration failed");
            None
        }
    };

    Ok(Selection {
        winner,
        model_file,
        bundle,
        registered,
    })
}

/// Mark the winning child with the bundle it produced and name it on the parent.
fn tag_winner(
    store: &TrackingStore,
    parent_run_id: &str,
    winner: &Candidate,
    bundle_id: &str,
) -> Result<(), AppError> {
    store.set_tag(&winner.run_id, SERVING_BUNDLE_TAG, bundle_id)?;
    store.set_tag(parent_run_id, BEST_MODEL_TAG, winner.family.display_name())
}

fn declared_model_file(model_dir: &Path) -> Option<String> {
    let descriptor = model_dir.join(MODEL_DESCRIPTOR);
    if !descriptor.is_file() {
        return None;
    }
    match read_json::<ModelDescriptor>(&descriptor) {
        Ok(d) => Some(d.model_file),
        Err(e) => {
            warn!(error = %e, "unreadable model descriptor, probing file names");
            None
        }
    }
}

/// Load a model file with the loader its name calls for.
pub fn load_model_file(path: &Path) -> Result<TrainedModel, AppError> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let format = ArtifactFormat::from_file_name(name).ok_or_else(|| {
        AppError::training(format!("No loader for model file '{}'.", path.display()))
    })?;
    let bytes = fs::read(path)
        .map_err(|e| AppError::training(format!("Failed to read '{}': {e}", path.display())))?;
    TrainedModel::from_artifact(format, &bytes)
}
