//! Command-line parsing for the ExoForge pipeline and service.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline code: every subcommand's flags are turned into plain config structs
//! (`ProjectPaths`, `TrainConfig`, `ServiceConfig`) before anything runs.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{
    BoostParams, DEFAULT_SEED, DEFAULT_TEST_SIZE, EXPERIMENT_NAME, FamilyConfig, ForestParams,
    LeafwiseParams, ModelFamily, ProjectPaths, TrainConfig,
};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "exo", version, about = "ExoForge: exoplanet transit classifier pipeline and service")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Merge the Kepler, K2 and TESS exports into the canonical dataset.
    Preprocess(PreprocessArgs),
    /// Train and compare every classifier family, then persist the best one.
    Train(TrainArgs),
    /// Run `preprocess` then `train`, stopping at the first failure.
    Pipeline(PipelineArgs),
    /// Start the HTTP inference service.
    Serve(ServeArgs),
    /// Classify one feature vector with the persisted serving bundle.
    Predict(PredictArgs),
    /// List tracked runs and registered model versions.
    Runs(RunsArgs),
    /// Write synthetic mission exports (for demos and smoke tests).
    Synth(SynthArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Args, Clone)]
pub struct GlobalArgs {
    /// Project root holding `data/`, `saved_models/`, `mlruns/` and `model_performance/`.
    #[arg(long, global = true, env = "EXOFORGE_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Directory with the mission CSVs and the combined dataset (default: `<root>/data`).
    #[arg(long, global = true, env = "EXOFORGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl GlobalArgs {
    pub fn paths(&self) -> ProjectPaths {
        let paths = ProjectPaths::rooted_at(&self.root);
        match &self.data_dir {
            Some(dir) => paths.with_data_dir(dir),
            None => paths,
        }
    }
}

#[derive(Debug, Args, Clone, Default)]
pub struct PreprocessArgs {
    /// Kepler cumulative KOI export (default: `<data-dir>/cumulative.csv`).
    #[arg(long, value_name = "CSV")]
    pub kepler: Option<PathBuf>,

    /// K2 export (default: `<data-dir>/k2.csv`).
    #[arg(long, value_name = "CSV")]
    pub k2: Option<PathBuf>,

    /// TESS Objects of Interest export (default: `<data-dir>/TOI.csv`).
    #[arg(long, value_name = "CSV")]
    pub tess: Option<PathBuf>,

    /// Combined output CSV (default: `<data-dir>/processed_combined.csv`).
    #[arg(long, value_name = "CSV")]
    pub output: Option<PathBuf>,
}

impl PreprocessArgs {
    pub fn apply(&self, paths: &mut ProjectPaths) {
        if let Some(p) = &self.kepler {
            paths.kepler_csv = p.clone();
        }
        if let Some(p) = &self.k2 {
            paths.k2_csv = p.clone();
        }
        if let Some(p) = &self.tess {
            paths.tess_csv = p.clone();
        }
        if let Some(p) = &self.output {
            paths.combined_csv = p.clone();
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct TrainArgs {
    /// Seed of the stratified split and of every stochastic learner.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Held-out fraction of the dataset.
    #[arg(long, default_value_t = DEFAULT_TEST_SIZE)]
    pub test_size: f64,

    /// Families to compare (default: all, in training order).
    #[arg(long = "family", value_enum, value_name = "FAMILY")]
    pub families: Vec<ModelFamily>,

    /// Oblivious boosting: number of trees.
    #[arg(long)]
    pub boost_iterations: Option<usize>,

    /// Oblivious boosting: shrinkage.
    #[arg(long)]
    pub boost_learning_rate: Option<f64>,

    /// Oblivious boosting: tree depth (1..=10).
    #[arg(long)]
    pub boost_depth: Option<usize>,

    /// Random forest: number of trees.
    #[arg(long)]
    pub forest_trees: Option<usize>,

    /// Random forest: maximum tree depth.
    #[arg(long)]
    pub forest_max_depth: Option<usize>,

    /// Leaf-wise boosting: number of boosting rounds.
    #[arg(long)]
    pub leafwise_iterations: Option<usize>,

    /// Leaf-wise boosting: shrinkage.
    #[arg(long)]
    pub leafwise_learning_rate: Option<f64>,

    /// Leaf-wise boosting: maximum leaves per tree.
    #[arg(long)]
    pub leafwise_num_leaves: Option<usize>,
}

impl TrainArgs {
    /// Training protocol with the flag overrides applied (not yet validated).
    pub fn train_config(&self) -> TrainConfig {
        let selected = |family: ModelFamily| self.families.is_empty() || self.families.contains(&family);

        let mut families = Vec::new();
        if selected(ModelFamily::ObliviousBoost) {
            let mut p = BoostParams::default();
            override_with(&mut p.iterations, self.boost_iterations);
            override_with(&mut p.learning_rate, self.boost_learning_rate);
            override_with(&mut p.depth, self.boost_depth);
            families.push(FamilyConfig::ObliviousBoost(p));
        }
        if selected(ModelFamily::RandomForest) {
            let mut p = ForestParams {
                seed: self.seed,
                ..ForestParams::default()
            };
            override_with(&mut p.n_estimators, self.forest_trees);
            override_with(&mut p.max_depth, self.forest_max_depth);
            families.push(FamilyConfig::RandomForest(p));
        }
        if selected(ModelFamily::LeafwiseBoost) {
            let mut p = LeafwiseParams::default();
            override_with(&mut p.iterations, self.leafwise_iterations);
            override_with(&mut p.learning_rate, self.leafwise_learning_rate);
            override_with(&mut p.num_leaves, self.leafwise_num_leaves);
            families.push(FamilyConfig::LeafwiseBoost(p));
        }

        TrainConfig {
            seed: self.seed,
            test_size: self.test_size,
            families,
        }
    }
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

#[derive(Debug, Args, Clone)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub preprocess: PreprocessArgs,

    #[command(flatten)]
    pub train: TrainArgs,
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// Listen address.
    #[arg(long, env = "EXOFORGE_ADDR", default_value = "127.0.0.1:5000")]
    pub addr: SocketAddr,

    /// Directory holding `templates/index.html`, `static/` and `galaxy/` (default: root).
    #[arg(long, value_name = "DIR")]
    pub web_root: Option<PathBuf>,

    /// Split seed used by `/status` and `/retrain`.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Held-out fraction used by `/status` and `/retrain`.
    #[arg(long, default_value_t = DEFAULT_TEST_SIZE)]
    pub test_size: f64,
}

#[derive(Debug, Args, Clone)]
pub struct PredictArgs {
    /// Feature value as `name=value` (repeatable). Missing features default to 0.
    #[arg(short = 'f', long = "feature", value_name = "NAME=VALUE", value_parser = parse_feature)]
    pub features: Vec<(String, f64)>,
}

/// Parse `name=value`.
fn parse_feature(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    if !value.is_finite() {
        return Err(format!("value for '{name}' must be finite"));
    }
    Ok((name.trim().to_string(), value))
}

#[derive(Debug, Args, Clone)]
pub struct RunsArgs {
    /// Experiment to list.
    #[arg(long, default_value = EXPERIMENT_NAME)]
    pub experiment: String,
}

#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Rows per mission file.
    #[arg(short = 'n', long, default_value_t = 600)]
    pub rows: usize,

    /// Generator seed.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,
}
