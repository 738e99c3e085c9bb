//! File-backed tracking store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<experiment_id>/meta.json
//! <root>/<experiment_id>/<run_id>/meta.json
//! <root>/<experiment_id>/<run_id>/artifacts/<artifact_path>/...
//! <root>/models/<registered name>/meta.json
//! ```
//!
//! Every metadata update rewrites the whole JSON file via temp file + rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;
use crate::io::bundle::{read_json, write_bytes_atomic, write_json_atomic};

const META_FILE: &str = "meta.json";
const ARTIFACTS_DIR: &str = "artifacts";
const REGISTRY_DIR: &str = "models";
/// Descriptor written next to every logged model.
pub const MODEL_DESCRIPTOR: &str = "MLmodel.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// Everything recorded about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: String,
    pub parent_run_id: Option<String>,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
}

/// Descriptor of a logged model (`MLmodel.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub run_id: String,
    pub artifact_path: String,
    /// Model family / flavor, e.g. `ObliviousBoostClassifier`.
    pub flavor: String,
    /// Serialized model file inside the artifact directory.
    pub model_file: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: u32,
    pub run_id: String,
    /// `runs:/<run_id>/<artifact_path>`
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub versions: Vec<ModelVersion>,
}

impl RegisteredModel {
    pub fn latest_version(&self) -> Option<&ModelVersion> {
        self.versions.iter().max_by_key(|v| v.version)
    }
}

/// Handle to a tracking directory.
#[derive(Debug, Clone)]
pub struct TrackingStore {
    root: PathBuf,
}

impl TrackingStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(root).map_err(|e| {
            AppError::input(format!(
                "Failed to create tracking store '{}': {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the experiment named `name`, creating it if it does not exist.
    pub fn set_experiment(&self, name: &str) -> Result<Experiment, AppError> {
        let existing = self.list_experiments()?;
        if let Some(exp) = existing.iter().find(|e| e.name == name) {
            return Ok(exp.clone());
        }
        let next_id = existing
            .iter()
            .filter_map(|e| e.experiment_id.parse::<u64>().ok())
            .max()
            .map_or(0, |id| id + 1);
        let exp = Experiment {
            experiment_id: next_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        write_json_atomic(&self.root.join(&exp.experiment_id).join(META_FILE), &exp)?;
        info!(experiment = name, id = %exp.experiment_id, "created experiment");
        Ok(exp)
    }

    pub fn list_experiments(&self) -> Result<Vec<Experiment>, AppError> {
        let mut out = Vec::new();
        for dir in self.subdirs(&self.root)? {
            let meta = dir.join(META_FILE);
            if dir.file_name().is_some_and(|n| n == REGISTRY_DIR) || !meta.is_file() {
                continue;
            }
            out.push(read_json::<Experiment>(&meta)?);
        }
        out.sort_by(|a, b| a.experiment_id.cmp(&b.experiment_id));
        Ok(out)
    }

    /// Start a run, optionally nested under `parent_run_id`.
    pub fn start_run(
        &self,
        experiment: &Experiment,
        run_name: &str,
        parent_run_id: Option<&str>,
    ) -> Result<RunRecord, AppError> {
        let run_id = format!("{:032x}", rand::random::<u128>());
        let mut tags = BTreeMap::new();
        tags.insert("run_name".to_string(), run_name.to_string());
        if let Some(parent) = parent_run_id {
            tags.insert("parent_run_id".to_string(), parent.to_string());
        }
        let run = RunRecord {
            run_id,
            experiment_id: experiment.experiment_id.clone(),
            run_name: run_name.to_string(),
            parent_run_id: parent_run_id.map(str::to_string),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags,
        };
        self.save_run(&run)?;
        debug!(run_id = %run.run_id, run_name, "started run");
        Ok(run)
    }

    pub fn end_run(&self, run_id: &str, status: RunStatus) -> Result<RunRecord, AppError> {
        self.update_run(run_id, |run| {
            run.status = status;
            run.end_time = Some(Utc::now());
        })
    }

    pub fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<(), AppError> {
        self.update_run(run_id, |run| {
            run.params.insert(key.to_string(), value.to_string());
        })
        .map(|_| ())
    }

    pub fn log_metric(&self, run_id: &str, key: &str, value: f64) -> Result<(), AppError> {
        if !value.is_finite() {
            return Err(AppError::training(format!("Metric '{key}' is not finite.")));
        }
        self.update_run(run_id, |run| {
            run.metrics.insert(key.to_string(), value);
        })
        .map(|_| ())
    }

    pub fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), AppError> {
        self.update_run(run_id, |run| {
            run.tags.insert(key.to_string(), value.to_string());
        })
        .map(|_| ())
    }

    /// Copy a local file into the run's artifacts under `artifact_dir`.
    pub fn log_artifact(&self, run_id: &str, local: &Path, artifact_dir: &str) -> Result<PathBuf, AppError> {
        let file_name = local.file_name().ok_or_else(|| {
            AppError::input(format!("Artifact '{}' has no file name.", local.display()))
        })?;
        let dest_dir = self.artifact_dir(run_id, artifact_dir)?;
        fs::create_dir_all(&dest_dir).map_err(|e| {
            AppError::input(format!("Failed to create '{}': {e}", dest_dir.display()))
        })?;
        let dest = dest_dir.join(file_name);
        fs::copy(local, &dest).map_err(|e| {
            AppError::input(format!(
                "Failed to copy artifact '{}' to '{}': {e}",
                local.display(),
                dest.display()
            ))
        })?;
        Ok(dest)
    }

    /// Store a serialized model plus its `MLmodel.json` descriptor under `artifact_path`.
    pub fn log_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model_file: &str,
        bytes: &[u8],
        flavor: &str,
    ) -> Result<PathBuf, AppError> {
        let dir = self.artifact_dir(run_id, artifact_path)?;
        write_bytes_atomic(&dir.join(model_file), bytes)?;
        let descriptor = ModelDescriptor {
            run_id: run_id.to_string(),
            artifact_path: artifact_path.to_string(),
            flavor: flavor.to_string(),
            model_file: model_file.to_string(),
            created_at: Utc::now(),
        };
        write_json_atomic(&dir.join(MODEL_DESCRIPTOR), &descriptor)?;
        Ok(dir)
    }

    pub fn get_run(&self, run_id: &str) -> Result<RunRecord, AppError> {
        read_json(&self.run_dir(run_id)?.join(META_FILE))
    }

    /// Runs of an experiment, optionally only the children of `parent_run_id`,
    /// ordered by start time.
    pub fn search_runs(
        &self,
        experiment_id: &str,
        parent_run_id: Option<&str>,
    ) -> Result<Vec<RunRecord>, AppError> {
        let exp_dir = self.root.join(experiment_id);
        if !exp_dir.is_dir() {
            return Err(AppError::input(format!("Unknown experiment '{experiment_id}'.")));
        }
        let mut runs = Vec::new();
        for dir in self.subdirs(&exp_dir)? {
            let meta = dir.join(META_FILE);
            if !meta.is_file() {
                continue;
            }
            let run: RunRecord = read_json(&meta)?;
            if parent_run_id.is_none_or(|p| run.parent_run_id.as_deref() == Some(p)) {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    /// Local path of an artifact (file or directory) of a run.
    pub fn download_artifact(&self, run_id: &str, artifact_path: &str) -> Result<PathBuf, AppError> {
        let path = self.artifact_dir(run_id, artifact_path)?;
        if !path.exists() {
            return Err(AppError::training(format!(
                "Artifact '{artifact_path}' not found for run {run_id}."
            )));
        }
        Ok(path)
    }

    /// Register the model at `runs:/<run_id>/<artifact_path>` under `name`.
    pub fn register_model(
        &self,
        name: &str,
        run_id: &str,
        artifact_path: &str,
    ) -> Result<ModelVersion, AppError> {
        self.download_artifact(run_id, artifact_path)?;
        let meta = self.registry_meta(name)?;
        let mut model = if meta.is_file() {
            read_json::<RegisteredModel>(&meta)?
        } else {
            RegisteredModel {
                name: name.to_string(),
                created_at: Utc::now(),
                versions: Vec::new(),
            }
        };
        let version = ModelVersion {
            version: model.latest_version().map_or(1, |v| v.version + 1),
            run_id: run_id.to_string(),
            source: format!("runs:/{run_id}/{artifact_path}"),
            created_at: Utc::now(),
        };
        model.versions.push(version.clone());
        write_json_atomic(&meta, &model)?;
        info!(name, version = version.version, source = %version.source, "registered model version");
        Ok(version)
    }

    pub fn get_registered_model(&self, name: &str) -> Result<Option<RegisteredModel>, AppError> {
        let meta = self.registry_meta(name)?;
        if !meta.is_file() {
            return Ok(None);
        }
        read_json(&meta).map(Some)
    }

    fn registry_meta(&self, name: &str) -> Result<PathBuf, AppError> {
        check_segment(name)?;
        Ok(self.root.join(REGISTRY_DIR).join(name).join(META_FILE))
    }

    fn artifact_dir(&self, run_id: &str, artifact_path: &str) -> Result<PathBuf, AppError> {
        let mut dir = self.run_dir(run_id)?.join(ARTIFACTS_DIR);
        for segment in artifact_path.split('/').filter(|s| !s.is_empty()) {
            check_segment(segment)?;
            dir.push(segment);
        }
        Ok(dir)
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf, AppError> {
        check_segment(run_id)?;
        for exp in self.list_experiments()? {
            let dir = self.root.join(&exp.experiment_id).join(run_id);
            if dir.join(META_FILE).is_file() {
                return Ok(dir);
            }
        }
        Err(AppError::input(format!("Unknown run '{run_id}'.")))
    }

    fn save_run(&self, run: &RunRecord) -> Result<(), AppError> {
        let path = self
            .root
            .join(&run.experiment_id)
            .join(&run.run_id)
            .join(META_FILE);
        write_json_atomic(&path, run)
    }

    fn update_run(&self, run_id: &str, f: impl FnOnce(&mut RunRecord)) -> Result<RunRecord, AppError> {
        let mut run = self.get_run(run_id)?;
        f(&mut run);
        self.save_run(&run)?;
        Ok(run)
    }

    fn subdirs(&self, dir: &Path) -> Result<Vec<PathBuf>, AppError> {
        let entries = fs::read_dir(dir)
            .map_err(|e| AppError::input(format!("Failed to list '{}': {e}", dir.display())))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| AppError::input(format!("Failed to list '{}': {e}", dir.display())))?;
            let path = entry.path();
            if path.is_dir() {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }
}

fn check_segment(segment: &str) -> Result<(), AppError> {
    if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
        return Err(AppError::input(format!("Invalid tracking path segment '{segment}'.")));
    }
    Ok(())
}
