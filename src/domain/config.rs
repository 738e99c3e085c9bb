//! Run configuration as understood by the pipeline.
//!
//! These structs are derived from CLI flags (plus environment and defaults) in
//! `app`, so library code never touches `clap` or the process environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::ModelFamily;
use crate::error::AppError;

/// Default seed for the train/test split and every seeded model.
pub const DEFAULT_SEED: u64 = 42;

/// Default held-out fraction.
pub const DEFAULT_TEST_SIZE: f64 = 0.25;

/// Experiment all training runs are grouped under.
pub const EXPERIMENT_NAME: &str = "ExoForge_Exoplanet_Classification";

/// Registry name of the serving model.
pub const REGISTERED_MODEL_NAME: &str = "ExoForge-Classifier";

/// Filesystem layout of a project.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub data_dir: PathBuf,
    pub kepler_csv: PathBuf,
    pub k2_csv: PathBuf,
    pub tess_csv: PathBuf,
    pub combined_csv: PathBuf,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub tracking_dir: PathBuf,
    pub performance_dir: PathBuf,
}

impl ProjectPaths {
    /// Conventional layout rooted at `root`.
    pub fn rooted_at(root: &Path) -> Self {
        let data_dir = root.join("data");
        let models_dir = root.join("saved_models");
        Self {
            kepler_csv: data_dir.join("cumulative.csv"),
            k2_csv: data_dir.join("k2.csv"),
            tess_csv: data_dir.join("TOI.csv"),
            combined_csv: data_dir.join("processed_combined.csv"),
            data_dir,
            model_path: models_dir.join("model.json"),
            scaler_path: models_dir.join("scaler.json"),
            tracking_dir: root.join("mlruns"),
            performance_dir: root.join("model_performance"),
        }
    }

    /// Move the mission inputs and the combined dataset under `data_dir`.
    pub fn with_data_dir(mut self, data_dir: &Path) -> Self {
        self.kepler_csv = data_dir.join("cumulative.csv");
        self.k2_csv = data_dir.join("k2.csv");
        self.tess_csv = data_dir.join("TOI.csv");
        self.combined_csv = data_dir.join("processed_combined.csv");
        self.data_dir = data_dir.to_path_buf();
        self
    }
}

/// Hyperparameters for oblivious-tree gradient boosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub iterations: usize,
    pub learning_rate: f64,
    /// Depth of every symmetric tree (`2^depth` leaves).
    pub depth: usize,
    /// L2 regularization on leaf values.
    pub l2_leaf_reg: f64,
    /// Maximum histogram bins per feature.
    pub max_bins: usize,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            iterations: 300,
            learning_rate: 0.05,
            depth: 6,
            l2_leaf_reg: 3.0,
            max_bins: 128,
        }
    }
}

/// Hyperparameters for the random forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 12,
            min_samples_leaf: 1,
            max_bins: 128,
            seed: DEFAULT_SEED,
        }
    }
}

/// Hyperparameters for leaf-wise histogram gradient boosting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafwiseParams {
    pub iterations: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub min_data_in_leaf: usize,
    pub lambda_l2: f64,
    pub max_bins: usize,
}

impl Default for LeafwiseParams {
    fn default() -> Self {
        Self {
            iterations: 200,
            learning_rate: 0.05,
            num_leaves: 31,
            min_data_in_leaf: 20,
            lambda_l2: 0.0,
            max_bins: 255,
        }
    }
}

/// One family plus its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FamilyConfig {
    ObliviousBoost(BoostParams),
    RandomForest(ForestParams),
    LeafwiseBoost(LeafwiseParams),
}

impl FamilyConfig {
    pub fn family(&self) -> ModelFamily {
        match self {
            FamilyConfig::ObliviousBoost(_) => ModelFamily::ObliviousBoost,
            FamilyConfig::RandomForest(_) => ModelFamily::RandomForest,
            FamilyConfig::LeafwiseBoost(_) => ModelFamily::LeafwiseBoost,
        }
    }

    /// Default hyperparameters for every family, in training order.
    pub fn defaults() -> Vec<FamilyConfig> {
        vec![
            FamilyConfig::ObliviousBoost(BoostParams::default()),
            FamilyConfig::RandomForest(ForestParams::default()),
            FamilyConfig::LeafwiseBoost(LeafwiseParams::default()),
        ]
    }

    /// Reject hyperparameters no family can train with.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            FamilyConfig::ObliviousBoost(p) => {
                check_iterations(p.iterations)?;
                check_learning_rate(p.learning_rate)?;
                if !(1..=10).contains(&p.depth) {
                    return Err(AppError::input(format!(
                        "depth must be in 1..=10 (got {}).",
                        p.depth
                    )));
                }
                check_non_negative("l2_leaf_reg", p.l2_leaf_reg)?;
                check_bins(p.max_bins)
            }
            FamilyConfig::RandomForest(p) => {
                if p.n_estimators == 0 {
                    return Err(AppError::input("n_estimators must be >= 1."));
                }
                if p.max_depth == 0 {
                    return Err(AppError::input("max_depth must be >= 1."));
                }
                if p.min_samples_leaf == 0 {
                    return Err(AppError::input("min_samples_leaf must be >= 1."));
                }
                check_bins(p.max_bins)
            }
            FamilyConfig::LeafwiseBoost(p) => {
                check_iterations(p.iterations)?;
                check_learning_rate(p.learning_rate)?;
                if p.num_leaves < 2 {
                    return Err(AppError::input("num_leaves must be >= 2."));
                }
                if p.min_data_in_leaf == 0 {
                    return Err(AppError::input("min_data_in_leaf must be >= 1."));
                }
                check_non_negative("lambda_l2", p.lambda_l2)?;
                check_bins(p.max_bins)
            }
        }
    }

    /// Hyperparameters as `(name, value)` pairs for run tracking.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        match self {
            FamilyConfig::ObliviousBoost(p) => vec![
                ("iterations", p.iterations.to_string()),
                ("learning_rate", p.learning_rate.to_string()),
                ("depth", p.depth.to_string()),
                ("l2_leaf_reg", p.l2_leaf_reg.to_string()),
                ("max_bins", p.max_bins.to_string()),
            ],
            FamilyConfig::RandomForest(p) => vec![
                ("n_estimators", p.n_estimators.to_string()),
                ("max_depth", p.max_depth.to_string()),
                ("min_samples_leaf", p.min_samples_leaf.to_string()),
                ("max_bins", p.max_bins.to_string()),
                ("random_state", p.seed.to_string()),
            ],
            FamilyConfig::LeafwiseBoost(p) => vec![
                ("iterations", p.iterations.to_string()),
                ("learning_rate", p.learning_rate.to_string()),
                ("num_leaves", p.num_leaves.to_string()),
                ("min_data_in_leaf", p.min_data_in_leaf.to_string()),
                ("lambda_l2", p.lambda_l2.to_string()),
                ("max_bins", p.max_bins.to_string()),
            ],
        }
    }
}

fn check_iterations(iterations: usize) -> Result<(), AppError> {
    if iterations == 0 {
        return Err(AppError::input("iterations must be >= 1."));
    }
    Ok(())
}

fn check_learning_rate(lr: f64) -> Result<(), AppError> {
    if !(lr.is_finite() && lr > 0.0 && lr <= 1.0) {
        return Err(AppError::input(format!(
            "learning_rate must be in (0, 1] (got {lr})."
        )));
    }
    Ok(())
}

fn check_non_negative(name: &str, v: f64) -> Result<(), AppError> {
    if !(v.is_finite() && v >= 0.0) {
        return Err(AppError::input(format!("{name} must be finite and >= 0 (got {v}).")));
    }
    Ok(())
}

fn check_bins(max_bins: usize) -> Result<(), AppError> {
    if !(2..=256).contains(&max_bins) {
        return Err(AppError::input(format!(
            "max_bins must be in 2..=256 (got {max_bins})."
        )));
    }
    Ok(())
}

/// Training protocol shared by every family.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub seed: u64,
    pub test_size: f64,
    pub families: Vec<FamilyConfig>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            test_size: DEFAULT_TEST_SIZE,
            families: FamilyConfig::defaults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_override_moves_only_data_files() {
        let paths = ProjectPaths::rooted_at(Path::new("/proj")).with_data_dir(Path::new("/archive"));
        assert_eq!(paths.tess_csv, Path::new("/archive/TOI.csv"));
        assert_eq!(paths.combined_csv, Path::new("/archive/processed_combined.csv"));
        assert_eq!(paths.model_path, Path::new("/proj/saved_models/model.json"));
    }

    #[test]
    fn defaults_are_valid() {
        for family in FamilyConfig::defaults() {
            family.validate().unwrap();
        }
    }

    #[test]
    fn rejects_out_of_range_hyperparameters() {
        let bad = FamilyConfig::ObliviousBoost(BoostParams {
            iterations: 0,
            ..BoostParams::default()
        });
        assert_eq!(bad.validate().unwrap_err().exit_code(), 2);

        let bad = FamilyConfig::ObliviousBoost(BoostParams {
            learning_rate: 1.5,
            ..BoostParams::default()
        });
        assert!(bad.validate().is_err());

        let bad = FamilyConfig::ObliviousBoost(BoostParams {
            depth: 11,
            ..BoostParams::default()
        });
        assert!(bad.validate().is_err());

        let bad = FamilyConfig::LeafwiseBoost(LeafwiseParams {
            num_leaves: 1,
            ..LeafwiseParams::default()
        });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn default_layout_uses_conventional_names() {
        let paths = ProjectPaths::rooted_at(Path::new("/tmp/exo"));
        assert!(paths.combined_csv.ends_with("data/processed_combined.csv"));
        assert!(paths.tess_csv.ends_with("data/TOI.csv"));
        assert!(paths.scaler_path.ends_with("saved_models/scaler.json"));
    }
}
