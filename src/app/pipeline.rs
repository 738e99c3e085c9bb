//! Shared pipeline steps used by the CLI subcommands and the integration tests.
//!
//! Keeping these in one place avoids duplicating the core workflow:
//! mission CSVs -> normalize -> combine -> canonical CSV -> train x3 -> select -> serving bundle
//!
//! The CLI then focuses on presentation (printing summaries).

use std::path::PathBuf;

use tracing::{info, warn};

use crate::data::combine::{CombineSummary, combine_tables};
use crate::data::missions::builtin_missions;
use crate::data::normalize::normalize_table;
use crate::domain::{CanonicalDataset, Feature, N_FEATURES, ProjectPaths, TrainConfig};
use crate::error::AppError;
use crate::fit::selection::{Selection, select_and_persist};
use crate::fit::trainer::{TrainingOutcome, train_and_evaluate};
use crate::io::bundle::{Prediction, load_serving_bundle};
use crate::io::export::write_canonical_csv;
use crate::io::ingest::{read_canonical_csv, read_mission_csv};
use crate::tracking::TrackingStore;

/// Outputs of `exo preprocess`.
#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    pub dataset: CanonicalDataset,
    pub summary: CombineSummary,
    pub output: PathBuf,
}

/// Normalize every available mission file, combine them and write the canonical CSV.
pub fn run_preprocess(paths: &ProjectPaths) -> Result<PreprocessOutput, AppError> {
    let mut tables = Vec::new();
    for (mission, path) in builtin_missions(paths) {
        let Some(raw) = read_mission_csv(&path)? else {
            continue;
        };
        match normalize_table(&raw, &mission) {
            Some(table) => tables.push(table),
            None => warn!(mission = mission.name, path = %path.display(), "no usable data, skipping"),
        }
    }

    let (dataset, summary) = combine_tables(&tables)?;
    write_canonical_csv(&paths.combined_csv, &dataset)?;
    info!(
        rows = dataset.len(),
        path = %paths.combined_csv.display(),
        "canonical dataset written"
    );
    Ok(PreprocessOutput {
        dataset,
        summary,
        output: paths.combined_csv.clone(),
    })
}

/// Outputs of `exo train`.
#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub outcome: TrainingOutcome,
    pub selection: Selection,
}

/// Train every configured family on the canonical CSV and persist the winner.
pub fn run_train(paths: &ProjectPaths, config: &TrainConfig) -> Result<TrainOutput, AppError> {
    let dataset = read_canonical_csv(&paths.combined_csv)?;
    info!(rows = dataset.len(), "canonical dataset loaded");
    let store = TrackingStore::open(&paths.tracking_dir)?;

    let outcome = train_and_evaluate(&dataset, config, &store, &paths.performance_dir)?;
    let selection = select_and_persist(
        &store,
        &outcome.experiment.experiment_id,
        &outcome.parent_run_id,
        outcome.scaler.clone(),
        paths,
    )?;
    Ok(TrainOutput { outcome, selection })
}

/// `preprocess` then `train`; the first failure aborts the run.
pub fn run_pipeline(
    paths: &ProjectPaths,
    config: &TrainConfig,
) -> Result<(PreprocessOutput, TrainOutput), AppError> {
    info!("pipeline step 1/2: preprocess");
    let preprocess = run_preprocess(paths)?;
    info!("pipeline step 2/2: train");
    let train = run_train(paths, config)?;
    Ok((preprocess, train))
}

/// Classify `name=value` pairs with the persisted serving bundle.
///
/// Unknown names are rejected; absent features default to 0.0.
pub fn predict_features(paths: &ProjectPaths, pairs: &[(String, f64)]) -> Result<Prediction, AppError> {
    let mut features = [0.0; N_FEATURES];
    for (name, value) in pairs {
        let feature = Feature::from_name(name).ok_or_else(|| {
            let known: Vec<&str> = Feature::ALL.iter().map(|f| f.name()).collect();
            AppError::input(format!(
                "Unknown feature '{name}' (expected one of: {}).",
                known.join(", ")
            ))
        })?;
        features[feature.index()] = *value;
    }
    let bundle = load_serving_bundle(&paths.model_path, &paths.scaler_path)?;
    bundle.predict(&features)
}
