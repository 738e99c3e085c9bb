//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - installs logging
//! - dispatches to the pipeline steps or the inference service
//! - prints summaries

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command, PipelineArgs, PredictArgs, RunsArgs, ServeArgs, SynthArgs, TrainArgs};
use crate::domain::{ProjectPaths, REGISTERED_MODEL_NAME};
use crate::error::AppError;
use crate::service::ServiceConfig;
use crate::tracking::TrackingStore;

pub mod pipeline;

/// Entry point for the `exo` binary.
pub fn run() -> Result<(), AppError> {
    // `.env` values act as defaults for the `env = ...` CLI fallbacks.
    let _ = dotenvy::dotenv();

    // `exo` alone runs the whole pipeline.
    let argv = rewrite_args(std::env::args().collect());
    let cli = Cli::parse_from(argv);
    crate::logging::init_tracing(cli.global.log_json);

    let paths = cli.global.paths();
    match cli.command {
        Command::Preprocess(args) => {
            let mut paths = paths;
            args.apply(&mut paths);
            handle_preprocess(&paths)
        }
        Command::Train(args) => handle_train(&paths, &args),
        Command::Pipeline(args) => handle_pipeline(paths, args),
        Command::Serve(args) => handle_serve(paths, &cli.global.root, args),
        Command::Predict(args) => handle_predict(&paths, &args),
        Command::Runs(args) => handle_runs(&paths, &args),
        Command::Synth(args) => handle_synth(&paths, &args),
    }
}

fn handle_preprocess(paths: &ProjectPaths) -> Result<(), AppError> {
    let out = pipeline::run_preprocess(paths)?;
    println!(
        "{}",
        crate::report::format_combine_summary(&out.summary, &out.dataset, &out.output)
    );
    Ok(())
}

fn handle_train(paths: &ProjectPaths, args: &TrainArgs) -> Result<(), AppError> {
    let config = args.train_config();
    let out = pipeline::run_train(paths, &config)?;
    println!(
        "{}",
        crate::report::format_training_summary(&out.outcome, &out.selection)
    );
    Ok(())
}

fn handle_pipeline(mut paths: ProjectPaths, args: PipelineArgs) -> Result<(), AppError> {
    args.preprocess.apply(&mut paths);
    let config = args.train.train_config();
    let (pre, train) = pipeline::run_pipeline(&paths, &config)?;
    println!(
        "{}",
        crate::report::format_combine_summary(&pre.summary, &pre.dataset, &pre.output)
    );
    println!(
        "{}",
        crate::report::format_training_summary(&train.outcome, &train.selection)
    );
    info!("pipeline finished");
    Ok(())
}

fn handle_serve(paths: ProjectPaths, root: &std::path::Path, args: ServeArgs) -> Result<(), AppError> {
    let config = ServiceConfig {
        addr: args.addr,
        paths,
        seed: args.seed,
        test_size: args.test_size,
        web_root: args.web_root.unwrap_or_else(|| root.to_path_buf()),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::input(format!("Failed to start async runtime: {e}")))?;
    runtime.block_on(crate::service::serve(config))
}

fn handle_predict(paths: &ProjectPaths, args: &PredictArgs) -> Result<(), AppError> {
    let prediction = pipeline::predict_features(paths, &args.features)?;
    print!("{}", crate::report::format_prediction(&prediction));
    Ok(())
}

fn handle_runs(paths: &ProjectPaths, args: &RunsArgs) -> Result<(), AppError> {
    let store = TrackingStore::open(&paths.tracking_dir)?;
    let Some(experiment) = store
        .list_experiments()?
        .into_iter()
        .find(|e| e.name == args.experiment)
    else {
        println!("No experiment named '{}' in {}.", args.experiment, store.root().display());
        return Ok(());
    };

    let runs = store.search_runs(&experiment.experiment_id, None)?;
    println!("Experiment: {} ({})", experiment.name, experiment.experiment_id);
    println!("{}", crate::report::format_runs(&runs));

    if let Some(model) = store.get_registered_model(REGISTERED_MODEL_NAME)? {
        println!("Registered model: {}", model.name);
        for v in &model.versions {
            println!(
                "  v{:<4} {}  {}",
                v.version,
                v.created_at.format("%Y-%m-%d %H:%M:%S"),
                v.source
            );
        }
    }
    Ok(())
}

fn handle_synth(paths: &ProjectPaths, args: &SynthArgs) -> Result<(), AppError> {
    let summary = crate::data::sample::write_mission_samples(paths, args.rows, args.seed)?;
    for (path, rows) in &summary.files {
        println!("wrote {rows} rows to {}", path.display());
    }
    Ok(())
}

/// Rewrite argv so `exo` defaults to `exo pipeline`.
///
/// Rules:
/// - `exo`                      -> `exo pipeline`
/// - `exo --seed 7 ...`         -> `exo pipeline --seed 7 ...`
/// - `exo --help/--version/-h`  -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("pipeline".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(
        arg1.as_str(),
        "preprocess" | "train" | "pipeline" | "serve" | "predict" | "runs" | "synth"
    );
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "pipeline flags".
    if arg1.starts_with('-') {
        argv.insert(1, "pipeline".to_string());
        return argv;
    }

    argv
}
