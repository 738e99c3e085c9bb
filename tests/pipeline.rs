use exoforge::app::pipeline::{predict_features, run_pipeline, run_preprocess, run_train};
use exoforge::data::sample::write_mission_samples;
use exoforge::domain::{
    BoostParams, FamilyConfig, ForestParams, LeafwiseParams, ProjectPaths, REGISTERED_MODEL_NAME,
    TrainConfig,
};
use exoforge::io::bundle::load_serving_bundle;
use exoforge::io::ingest::read_canonical_csv;
use exoforge::tracking::TrackingStore;

fn quick_config() -> TrainConfig {
    TrainConfig {
        families: vec![
            FamilyConfig::ObliviousBoost(BoostParams {
                iterations: 20,
                depth: 3,
                learning_rate: 0.2,
                ..BoostParams::default()
            }),
            FamilyConfig::RandomForest(ForestParams {
                n_estimators: 12,
                max_depth: 8,
                ..ForestParams::default()
            }),
            FamilyConfig::LeafwiseBoost(LeafwiseParams {
                iterations: 20,
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
fn synthetic_catalog_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::rooted_at(dir.path());
    write_mission_samples(&paths, 120, 3).unwrap();

    let (pre, train) = run_pipeline(&paths, &quick_config()).unwrap();
    assert!(pre.summary.rows_unlabeled > 0);
    assert_eq!(pre.dataset.len(), pre.summary.rows_before - pre.summary.rows_unlabeled);
    assert_eq!(read_canonical_csv(&paths.combined_csv).unwrap(), pre.dataset);

    assert_eq!(train.outcome.evaluations.len(), 3);
    for eval in &train.outcome.evaluations {
        assert!(eval.report_path.is_file());
        assert!(eval.plot_path.is_file());
    }

    let bundle = load_serving_bundle(&paths.model_path, &paths.scaler_path).unwrap();
    assert_eq!(bundle.bundle_id, train.selection.bundle.bundle_id);
    assert_eq!(bundle.family(), train.selection.winner.family);

    let prediction = predict_features(
        &paths,
        &[("period".to_string(), 11.0), ("depth".to_string(), 900.0)],
    )
    .unwrap();
    let total: f64 = prediction.confidence.iter().sum();
    assert!((total - 1.0).abs() < 1e-9);

    let store = TrackingStore::open(&paths.tracking_dir).unwrap();
    let registered = store.get_registered_model(REGISTERED_MODEL_NAME).unwrap().unwrap();
    assert_eq!(registered.versions.len(), 1);
    assert_eq!(registered.versions[0].run_id, train.selection.winner.run_id);
}

#[test]
fn retraining_the_same_data_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::rooted_at(dir.path());
    write_mission_samples(&paths, 100, 8).unwrap();
    run_preprocess(&paths).unwrap();

    let first = run_train(&paths, &quick_config()).unwrap();
    let second = run_train(&paths, &quick_config()).unwrap();

    let accuracies = |out: &exoforge::app::pipeline::TrainOutput| -> Vec<f64> {
        out.outcome.evaluations.iter().map(|e| e.accuracy).collect()
    };
    assert_eq!(accuracies(&first), accuracies(&second));
    assert_eq!(first.selection.winner.family, second.selection.winner.family);
    assert_eq!(first.selection.bundle.model, second.selection.bundle.model);
    assert_ne!(first.outcome.parent_run_id, second.outcome.parent_run_id);

    let store = TrackingStore::open(&paths.tracking_dir).unwrap();
    let registered = store.get_registered_model(REGISTERED_MODEL_NAME).unwrap().unwrap();
    assert_eq!(registered.latest_version().unwrap().version, 2);
}

#[test]
fn no_mission_files_means_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::rooted_at(dir.path());
    let err = run_preprocess(&paths).unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(!paths.combined_csv.exists());
}

#[test]
fn unknown_prediction_feature_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::rooted_at(dir.path());
    let err = predict_features(&paths, &[("radius".to_string(), 1.0)]).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(err.message().contains("planet_radius"));
}

#[test]
fn corrupt_mission_file_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let paths = ProjectPaths::rooted_at(dir.path());
    write_mission_samples(&paths, 60, 5).unwrap();
    let all_three = run_preprocess(&paths).unwrap();

    std::fs::write(&paths.k2_csv, b"koi_disposition,koi_period,r\xe9f\nCONFIRMED,3.1,1\n").unwrap();
    let two = run_preprocess(&paths).unwrap();
    assert!(!two.dataset.is_empty());
    assert_eq!(two.summary.missions.len(), 2);
    assert!(two.summary.rows_before < all_three.summary.rows_before);
}
