//! Training and held-out evaluation of every classifier family.
//!
//! Protocol (identical for every family):
//!
//! - stratified split of the canonical dataset (`split`)
//! - a `StandardScaler` fit on the training rows only, applied to both sides
//! - each family fit on the scaled training rows (families run in parallel)
//! - accuracy, classification report and confusion matrix on the scaled test rows
//!
//! Tracking writes happen after all fits finish, in the fixed family order: one
//! parent run plus one `Train_<Family>` child run per family carrying
//! `model_class`, hyperparameters, `accuracy`, the report, the confusion-matrix
//! PNG and the serialized model.

use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{
    ArtifactFormat, BoostParams, CanonicalDataset, EXPERIMENT_NAME, FamilyConfig, ModelFamily,
    TrainConfig,
};
use crate::error::AppError;
use crate::fit::metrics::{
    ClassificationReport, ConfusionMatrix, accuracy, classification_report, confusion_matrix,
};
use crate::fit::split::{SplitIndices, select_labels, select_rows, stratified_split};
use crate::io::bundle::{ServingBundle, write_json_atomic};
use crate::math::StandardScaler;
use crate::models::{Classifier, TrainedModel};
use crate::plot::write_confusion_png;
use crate::report::format_classification_report;
use crate::tracking::{Experiment, RunStatus, TrackingStore};

/// Name of the run grouping one comparison.
pub const PARENT_RUN_NAME: &str = "Model_Comparison_Parent_Run";
/// Artifact directory of the per-family text reports.
pub const REPORTS_ARTIFACT_DIR: &str = "performance_reports";
/// Artifact directory of the confusion-matrix images.
pub const PLOTS_ARTIFACT_DIR: &str = "plots";
/// Artifact directory of the scaler logged on the parent run.
pub const SCALER_ARTIFACT_DIR: &str = "preprocessing";

/// Child run name of a family.
pub fn child_run_name(family: ModelFamily) -> String {
    format!("Train_{}", family.display_name())
}

/// Scaled train/test matrices for one split.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub split: SplitIndices,
    pub scaler: StandardScaler,
    pub x_train: DMatrix<f64>,
    pub y_train: Vec<usize>,
    pub x_test: DMatrix<f64>,
    pub y_test: Vec<usize>,
}

/// Split `dataset` and scale both sides with a scaler fit on the training rows.
pub fn prepare(dataset: &CanonicalDataset, seed: u64, test_size: f64) -> Result<PreparedData, AppError> {
    if dataset.is_empty() {
        return Err(AppError::no_data("The canonical dataset is empty."));
    }
    let x = dataset.feature_matrix();
    let y = dataset.labels();
    let split = stratified_split(&y, test_size, seed)?;

    let x_train_raw = select_rows(&x, &split.train);
    let scaler = StandardScaler::fit(&x_train_raw)?;
    let x_train = scaler.transform(&x_train_raw)?;
    let x_test = scaler.transform(&select_rows(&x, &split.test))?;

    Ok(PreparedData {
        y_train: select_labels(&y, &split.train),
        y_test: select_labels(&y, &split.test),
        split,
        scaler,
        x_train,
        x_test,
    })
}

/// Held-out result of one family.
#[derive(Debug, Clone)]
pub struct EvaluationRecord {
    pub family: ModelFamily,
    pub run_id: String,
    pub model: TrainedModel,
    pub accuracy: f64,
    pub report: ClassificationReport,
    pub confusion: ConfusionMatrix,
    /// Artifact directory of the logged model inside the child run.
    pub artifact_path: String,
    pub artifact_format: ArtifactFormat,
    pub report_path: PathBuf,
    pub plot_path: PathBuf,
}

/// Everything one training comparison produced.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub experiment: Experiment,
    pub parent_run_id: String,
    pub scaler: StandardScaler,
    pub n_train: usize,
    pub n_test: usize,
    pub evaluations: Vec<EvaluationRecord>,
}

/// Train, evaluate and log every configured family.
pub fn train_and_evaluate(
    dataset: &CanonicalDataset,
    config: &TrainConfig,
    store: &TrackingStore,
    performance_dir: &Path,
) -> Result<TrainingOutcome, AppError> {
    if config.families.is_empty() {
        return Err(AppError::input("No model families configured."));
    }
    for family in &config.families {
        family.validate()?;
    }

    let data = prepare(dataset, config.seed, config.test_size)?;
    info!(
        train = data.y_train.len(),
        test = data.y_test.len(),
        seed = config.seed,
        "data preparation complete"
    );

    let fitted: Vec<TrainedModel> = config
        .families
        .par_iter()
        .map(|family| {
            info!(family = %family.family(), "training");
            TrainedModel::fit(family, &data.x_train, &data.y_train)
        })
        .collect::<Result<_, _>>()?;

    fs::create_dir_all(performance_dir).map_err(|e| {
        AppError::input(format!(
            "Failed to create '{}': {e}",
            performance_dir.display()
        ))
    })?;

    let experiment = store.set_experiment(EXPERIMENT_NAME)?;
    let parent = store.start_run(&experiment, PARENT_RUN_NAME, None)?;
    info!(run_id = %parent.run_id, "parent run started");

    let result = log_comparison(store, &experiment, &parent.run_id, config, &data, fitted, performance_dir);
    let status = if result.is_ok() {
        RunStatus::Finished
    } else {
        RunStatus::Failed
    };
    store.end_run(&parent.run_id, status)?;
    let evaluations = result?;

    Ok(TrainingOutcome {
        experiment,
        parent_run_id: parent.run_id,
        scaler: data.scaler,
        n_train: data.y_train.len(),
        n_test: data.y_test.len(),
        evaluations,
    })
}

fn log_comparison(
    store: &TrackingStore,
    experiment: &Experiment,
    parent_run_id: &str,
    config: &TrainConfig,
    data: &PreparedData,
    fitted: Vec<TrainedModel>,
    performance_dir: &Path,
) -> Result<Vec<EvaluationRecord>, AppError> {
    store.log_param(parent_run_id, "seed", &config.seed.to_string())?;
    store.log_param(parent_run_id, "test_size", &config.test_size.to_string())?;
    store.log_param(parent_run_id, "n_train", &data.y_train.len().to_string())?;
    store.log_param(parent_run_id, "n_test", &data.y_test.len().to_string())?;

    let scaler_path = performance_dir.join("scaler.json");
    write_json_atomic(&scaler_path, &data.scaler)?;
    store.log_artifact(parent_run_id, &scaler_path, SCALER_ARTIFACT_DIR)?;

    let mut evaluations = Vec::with_capacity(fitted.len());
    for (family_config, model) in config.families.iter().zip(fitted) {
        let family = family_config.family();
        let child = store.start_run(experiment, &child_run_name(family), Some(parent_run_id))?;
        match log_family(store, &child.run_id, family_config, model, data, performance_dir) {
            Ok(record) => {
                store.end_run(&child.run_id, RunStatus::Finished)?;
                info!(
                    family = %family,
                    run_id = %child.run_id,
                    accuracy = format_args!("{:.4}", record.accuracy),
                    "family evaluated"
                );
                evaluations.push(record);
            }
            Err(e) => {
                warn!(family = %family, error = %e, "family logging failed");
                store.end_run(&child.run_id, RunStatus::Failed)?;
                return Err(e);
            }
        }
    }
    Ok(evaluations)
}

fn log_family(
    store: &TrackingStore,
    run_id: &str,
    family_config: &FamilyConfig,
    model: TrainedModel,
    data: &PreparedData,
    performance_dir: &Path,
) -> Result<EvaluationRecord, AppError> {
    let family = family_config.family();
    store.log_param(run_id, "model_class", family.model_class())?;
    for (key, value) in family_config.params() {
        store.log_param(run_id, key, &value)?;
    }

    let y_pred = model.predict(&data.x_test);
    let acc = accuracy(&data.y_test, &y_pred)?;
    let report = classification_report(&data.y_test, &y_pred)?;
    let confusion = confusion_matrix(&data.y_test, &y_pred)?;
    store.log_metric(run_id, "accuracy", acc)?;
    store.log_metric(run_id, "f1_macro", report.macro_avg.f1)?;

    let name = family.display_name();
    let report_path = performance_dir.join(format!("{name}_report.txt"));
    fs::write(&report_path, format_classification_report(&report)).map_err(|e| {
        AppError::input(format!("Failed to write '{}': {e}", report_path.display()))
    })?;
    store.log_artifact(run_id, &report_path, REPORTS_ARTIFACT_DIR)?;

    let plot_path = performance_dir.join(format!("{name}_confusion_matrix.png"));
    write_confusion_png(&plot_path, &confusion)?;
    store.log_artifact(run_id, &plot_path, PLOTS_ARTIFACT_DIR)?;

    let artifact_format = family.artifact_format();
    let bytes = model.to_artifact(artifact_format)?;
    store.log_model(run_id, name, artifact_format.file_name(), &bytes, family.model_class())?;

    Ok(EvaluationRecord {
        family,
        run_id: run_id.to_string(),
        model,
        accuracy: acc,
        report,
        confusion,
        artifact_path: name.to_string(),
        artifact_format,
        report_path,
        plot_path,
    })
}

/// Accuracy of a serving bundle on the held-out rows of `dataset`.
///
/// The split is recomputed with `seed`/`test_size`, and the bundle's own scaler
/// is applied to the test rows.
pub fn holdout_accuracy(
    bundle: &ServingBundle,
    dataset: &CanonicalDataset,
    seed: u64,
    test_size: f64,
) -> Result<f64, AppError> {
    let x = dataset.feature_matrix();
    let y = dataset.labels();
    let split = stratified_split(&y, test_size, seed)?;
    let x_test = bundle.scaler.transform(&select_rows(&x, &split.test))?;
    let y_pred = bundle.model.predict(&x_test);
    accuracy(&select_labels(&y, &split.test), &y_pred)
}

/// Fit a fresh scaler and oblivious-boost model with `params`.
///
/// Returns the new (unsaved) bundle and its held-out accuracy.
pub fn retrain_oblivious(
    dataset: &CanonicalDataset,
    params: BoostParams,
    seed: u64,
    test_size: f64,
) -> Result<(ServingBundle, f64), AppError> {
    let config = FamilyConfig::ObliviousBoost(params);
    config.validate()?;
    let data = prepare(dataset, seed, test_size)?;
    let model = TrainedModel::fit(&config, &data.x_train, &data.y_train)?;
    let acc = accuracy(&data.y_test, &model.predict(&data.x_test))?;
    let bundle = ServingBundle::new(model, data.scaler)?;
    Ok((bundle, acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::synthetic_dataset;
    use crate::domain::{ForestParams, LeafwiseParams};

    fn quick_config() -> TrainConfig {
        TrainConfig {
            families: vec![
                FamilyConfig::ObliviousBoost(BoostParams {
                    iterations: 15,
                    depth: 3,
                    learning_rate: 0.2,
                    ..BoostParams::default()
                }),
                FamilyConfig::RandomForest(ForestParams {
                    n_estimators: 10,
                    max_depth: 6,
                    ..ForestParams::default()
                }),
                FamilyConfig::LeafwiseBoost(LeafwiseParams {
                    iterations: 15,
                    learning_rate: 0.2,
                    num_leaves: 8,
                    min_data_in_leaf: 5,
                    ..LeafwiseParams::default()
                }),
            ],
            ..TrainConfig::default()
        }
    }

    #[test]
    fn prepare_fits_scaler_on_training_rows_only() {
        let dataset = synthetic_dataset(120, 3).unwrap();
        let data = prepare(&dataset, 42, 0.25).unwrap();
        assert_eq!(data.y_test.len(), 30);
        assert_eq!(data.x_train.nrows(), 90);
        for j in 0..data.x_train.ncols() {
            let mean = data.x_train.column(j).mean();
            assert!(mean.abs() < 1e-9, "column {j} mean {mean}");
        }
    }

    #[test]
    fn logs_parent_and_child_runs_with_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&dir.path().join("mlruns")).unwrap();
        let perf = dir.path().join("model_performance");
        let dataset = synthetic_dataset(150, 5).unwrap();

        let outcome = train_and_evaluate(&dataset, &quick_config(), &store, &perf).unwrap();
        assert_eq!(outcome.evaluations.len(), 3);

        let children = store
            .search_runs(&outcome.experiment.experiment_id, Some(&outcome.parent_run_id))
            .unwrap();
        assert_eq!(children.len(), 3);
        for eval in &outcome.evaluations {
            assert!((0.0..=1.0).contains(&eval.accuracy));
            assert!(eval.report_path.is_file());
            assert!(eval.plot_path.is_file());

            let run = store.get_run(&eval.run_id).unwrap();
            assert_eq!(run.run_name, child_run_name(eval.family));
            assert_eq!(run.params["model_class"], eval.family.model_class());
            assert_eq!(run.metrics["accuracy"], eval.accuracy);

            let model_dir = store.download_artifact(&eval.run_id, &eval.artifact_path).unwrap();
            assert!(model_dir.join(eval.artifact_format.file_name()).is_file());
            store
                .download_artifact(&eval.run_id, REPORTS_ARTIFACT_DIR)
                .unwrap();
        }
        let parent = store.get_run(&outcome.parent_run_id).unwrap();
        assert_eq!(parent.status, RunStatus::Finished);
    }

    #[test]
    fn invalid_hyperparameters_fail_before_any_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(dir.path()).unwrap();
        let mut config = quick_config();
        config.families[0] = FamilyConfig::ObliviousBoost(BoostParams {
            depth: 0,
            ..BoostParams::default()
        });
        let err = train_and_evaluate(&synthetic_dataset(60, 1).unwrap(), &config, &store, dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(store.list_experiments().unwrap().is_empty());
    }

    #[test]
    fn retrain_reports_accuracy_of_new_bundle() {
        let dataset = synthetic_dataset(150, 8).unwrap();
        let params = BoostParams {
            iterations: 20,
            depth: 3,
            learning_rate: 0.2,
            ..BoostParams::default()
        };
        let (bundle, acc) = retrain_oblivious(&dataset, params, 42, 0.25).unwrap();
        assert_eq!(bundle.family(), ModelFamily::ObliviousBoost);
        let again = holdout_accuracy(&bundle, &dataset, 42, 0.25).unwrap();
        assert_eq!(acc, again);
    }
}
