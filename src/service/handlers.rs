//! Route handlers.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as UrlPath, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{Html, IntoResponse, Response};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::domain::{BoostParams, Disposition, FamilyConfig, Feature, N_FEATURES};
use crate::error::AppError;
use crate::fit::trainer::{holdout_accuracy, retrain_oblivious};
use crate::io::bundle::{Prediction, ServingBundle, write_serving_bundle};
use crate::io::ingest::read_canonical_csv;
use crate::service::error::ServiceError;
use crate::service::state::AppState;

const NOT_LOADED: &str = "N/A - Model not loaded";

const FALLBACK_INDEX: &str = "<!doctype html>
<html>
<head><title>ExoForge</title></head>
<body>
<h1>ExoForge</h1>
<p>The web UI is not installed. The API is available at
<code>POST /predict</code>, <code>POST /retrain</code> and <code>GET /status</code>.</p>
</body>
</html>
";

pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ServiceError> {
    let Some(bundle) = state.current() else {
        return Ok(Json(json!({ "accuracy": NOT_LOADED })));
    };
    let path = state.paths.combined_csv.clone();
    let (seed, test_size) = (state.seed, state.test_size);

    let accuracy = tokio::task::spawn_blocking(move || {
        let dataset = read_canonical_csv(&path)?;
        holdout_accuracy(&bundle, &dataset, seed, test_size)
    })
    .await
    .map_err(|e| ServiceError::Status(format!("Status task failed: {e}")))?
    .map_err(|e| {
        warn!(error = %e, "status evaluation failed");
        ServiceError::Status(e.to_string())
    })?;

    Ok(Json(json!({ "accuracy": format_accuracy(accuracy) })))
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ServiceError> {
    let Json(body) = body?;
    let bundle = state.current().ok_or(ServiceError::ModelUnavailable)?;
    let object = body.as_object().ok_or_else(|| {
        ServiceError::InvalidRequest("Expected a JSON object of feature values.".to_string())
    })?;
    let features = feature_vector(object)?;

    let prediction = bundle.predict(&features).map_err(|e| {
        error!(error = ?e, bundle_id = %bundle.bundle_id, "prediction failed");
        ServiceError::Prediction(e.to_string())
    })?;
    debug!(prediction = prediction.disposition.prediction_label(), "prediction served");
    Ok(Json(prediction_body(&prediction)))
}

pub async fn retrain(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ServiceError> {
    let Json(body) = body?;
    let params = retrain_params(&body)?;
    FamilyConfig::ObliviousBoost(params.clone())
        .validate()
        .map_err(|e| ServiceError::InvalidRequest(e.to_string()))?;

    let _guard = state.retrain_lock.lock().await;
    info!(
        iterations = params.iterations,
        learning_rate = params.learning_rate,
        depth = params.depth,
        "retrain requested"
    );
    let paths = state.paths.clone();
    let (seed, test_size) = (state.seed, state.test_size);

    let (bundle, accuracy) = tokio::task::spawn_blocking(move || -> Result<(ServingBundle, f64), AppError> {
        let dataset = read_canonical_csv(&paths.combined_csv)?;
        let (bundle, accuracy) = retrain_oblivious(&dataset, params, seed, test_size)?;
        write_serving_bundle(&paths.model_path, &paths.scaler_path, &bundle)?;
        Ok((bundle, accuracy))
    })
    .await
    .map_err(|e| ServiceError::Retrain(format!("Retrain task failed: {e}")))?
    .map_err(|e| {
        error!(error = %e, "retrain failed");
        ServiceError::Retrain(e.to_string())
    })?;

    info!(
        bundle_id = %bundle.bundle_id,
        accuracy = format_args!("{accuracy:.4}"),
        "retrained model is now serving"
    );
    state.replace(bundle);

    Ok(Json(json!({
        "message": "Retraining successful!",
        "new_accuracy": format_accuracy(accuracy),
    })))
}

pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    match tokio::fs::read(state.web_root.join("templates").join("index.html")).await {
        Ok(bytes) => ([(CONTENT_TYPE, "text/html; charset=utf-8")], bytes).into_response(),
        Err(_) => Html(FALLBACK_INDEX).into_response(),
    }
}

pub async fn static_file(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response, ServiceError> {
    send_file(&state.web_root.join("static"), &path).await
}

pub async fn simulator(State(state): State<Arc<AppState>>) -> Result<Response, ServiceError> {
    send_file(&state.web_root.join("galaxy"), "Animation.html").await
}

pub async fn galaxy_file(
    State(state): State<Arc<AppState>>,
    UrlPath(path): UrlPath<String>,
) -> Result<Response, ServiceError> {
    send_file(&state.web_root.join("galaxy"), &path).await
}

async fn send_file(base: &Path, relative: &str) -> Result<Response, ServiceError> {
    let path = safe_join(base, relative).ok_or(ServiceError::NotFound)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ServiceError::NotFound)?;
    Ok(([(CONTENT_TYPE, content_type(&path))], bytes).into_response())
}

/// `base/relative`, or `None` when `relative` could escape `base`.
fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let mut components = relative.components().peekable();
    components.peek()?;
    components
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| base.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// Canonical feature vector from a request body. Absent keys become 0.0.
fn feature_vector(object: &Map<String, Value>) -> Result<[f64; N_FEATURES], ServiceError> {
    let mut features = [0.0; N_FEATURES];
    let mut defaulted = Vec::new();
    for feature in Feature::ALL {
        match object.get(feature.name()) {
            None | Some(Value::Null) => defaulted.push(feature.name()),
            Some(value) => {
                features[feature.index()] = number(value).ok_or_else(|| {
                    ServiceError::InvalidRequest(format!(
                        "Feature '{}' must be a number.",
                        feature.name()
                    ))
                })?;
            }
        }
    }
    if !defaulted.is_empty() {
        debug!(features = ?defaulted, "missing features defaulted to 0.0");
    }
    Ok(features)
}

/// A JSON number, or a string holding one.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn whole_number(body: &Value, key: &str) -> Result<usize, ServiceError> {
    let value = body
        .get(key)
        .and_then(number)
        .ok_or_else(|| ServiceError::InvalidRequest(format!("'{key}' must be a number.")))?;
    if value < 0.0 || value.fract() != 0.0 {
        return Err(ServiceError::InvalidRequest(format!(
            "'{key}' must be a non-negative integer."
        )));
    }
    Ok(value as usize)
}

fn retrain_params(body: &Value) -> Result<BoostParams, ServiceError> {
    let learning_rate = body
        .get("learning_rate")
        .and_then(number)
        .ok_or_else(|| ServiceError::InvalidRequest("'learning_rate' must be a number.".to_string()))?;
    Ok(BoostParams {
        iterations: whole_number(body, "iterations")?,
        learning_rate,
        depth: whole_number(body, "depth")?,
        ..BoostParams::default()
    })
}

fn prediction_body(prediction: &Prediction) -> Value {
    let confidence: Map<String, Value> = Disposition::ALL
        .iter()
        .rev()
        .map(|d| (d.confidence_key().to_string(), json!(prediction.confidence[d.class_id()])))
        .collect();
    json!({
        "prediction": prediction.disposition.prediction_label(),
        "confidence": confidence,
    })
}

fn format_accuracy(accuracy: f64) -> String {
    format!("{:.2}%", accuracy * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::data::sample::synthetic_dataset;
    use crate::domain::{CanonicalDataset, ProjectPaths};
    use crate::io::bundle::load_serving_bundle;
    use crate::io::export::write_canonical_csv;
    use crate::service::{ServiceConfig, router};

    struct Fixture {
        _dir: tempfile::TempDir,
        paths: ProjectPaths,
        dataset: CanonicalDataset,
        state: Arc<AppState>,
    }

    fn fixture(with_model: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::rooted_at(dir.path());
        let dataset = synthetic_dataset(120, 11).unwrap();
        write_canonical_csv(&paths.combined_csv, &dataset).unwrap();

        let bundle = with_model.then(|| {
            let params = BoostParams {
                iterations: 8,
                depth: 3,
                learning_rate: 0.3,
                ..BoostParams::default()
            };
            let (bundle, _) = retrain_oblivious(&dataset, params, 42, 0.25).unwrap();
            write_serving_bundle(&paths.model_path, &paths.scaler_path, &bundle).unwrap();
            bundle
        });
        let config = ServiceConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            paths: paths.clone(),
            seed: 42,
            test_size: 0.25,
            web_root: dir.path().join("web"),
        };
        Fixture {
            state: Arc::new(AppState::new(&config, bundle)),
            _dir: dir,
            paths,
            dataset,
        }
    }

    async fn call(state: &Arc<AppState>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).unwrap())
            }
            None => Body::empty(),
        };
        let resp = router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn predict_returns_label_and_normalized_confidence() {
        let f = fixture(true);
        let body = json!({
            "period": 11.2, "duration": "2.7", "depth": 850.0, "planet_radius": 2.1,
            "equilibrium_temp": 800, "insolation_flux": 95.0, "model_snr": 40.0,
            "stellar_temp": 5600, "stellar_logg": 4.4, "stellar_radius": 1.0
        });
        let (status, first) = call(&f.state, "POST", "/predict", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let label = first["prediction"].as_str().unwrap();
        assert!(["CONFIRMED EXOPLANET", "CANDIDATE", "FALSE POSITIVE"].contains(&label));
        let total: f64 = ["CONFIRMED", "CANDIDATE", "FALSE_POSITIVE"]
            .iter()
            .map(|k| first["confidence"][k].as_f64().unwrap())
            .sum();
        assert!((total - 1.0).abs() < 1e-9);

        let (_, second) = call(&f.state, "POST", "/predict", Some(body)).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_features_default_to_zero() {
        let f = fixture(true);
        let (_, partial) = call(&f.state, "POST", "/predict", Some(json!({ "period": 3.0 }))).await;
        let mut explicit = Map::new();
        for feature in Feature::ALL {
            explicit.insert(feature.name().to_string(), json!(0.0));
        }
        explicit.insert("period".to_string(), json!(3.0));
        let (_, full) = call(&f.state, "POST", "/predict", Some(Value::Object(explicit))).await;
        assert_eq!(partial, full);
    }

    #[tokio::test]
    async fn non_numeric_feature_is_rejected() {
        let f = fixture(true);
        let (status, body) = call(&f.state, "POST", "/predict", Some(json!({ "depth": "deep" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("depth"));
    }

    async fn call_raw(state: &Arc<AppState>, uri: &str, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        let resp = router(state.clone())
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let f = fixture(true);
        let (status, body) = call_raw(&f.state, "/predict", Some("application/json"), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = call_raw(&f.state, "/predict", None, "{}").await;
        assert!(status.is_client_error());
        assert!(body["error"].is_string());

        let (status, body) = call_raw(&f.state, "/retrain", Some("application/json"), "[1,").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        assert!(f.paths.model_path.exists());
    }

    #[tokio::test]
    async fn predict_without_model_is_unavailable() {
        let f = fixture(false);
        let (status, body) = call(&f.state, "POST", "/predict", Some(json!({}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn status_reports_holdout_accuracy() {
        let f = fixture(true);
        let (status, body) = call(&f.state, "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        let bundle = f.state.current().unwrap();
        let expected = holdout_accuracy(&bundle, &f.dataset, 42, 0.25).unwrap();
        assert_eq!(body["accuracy"], format_accuracy(expected));

        let (_, body) = call(&fixture(false).state, "GET", "/status", None).await;
        assert_eq!(body["accuracy"], NOT_LOADED);
    }

    #[tokio::test]
    async fn status_without_dataset_is_an_error() {
        let f = fixture(true);
        fs::remove_file(&f.paths.combined_csv).unwrap();
        let (status, body) = call(&f.state, "GET", "/status", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["accuracy"], "Error");
    }

    #[tokio::test]
    async fn invalid_retrain_leaves_serving_state_untouched() {
        let f = fixture(true);
        let before_id = f.state.current().unwrap().bundle_id.clone();
        let model_bytes = fs::read(&f.paths.model_path).unwrap();
        let scaler_bytes = fs::read(&f.paths.scaler_path).unwrap();

        let (status, body) = call(
            &f.state,
            "POST",
            "/retrain",
            Some(json!({ "iterations": 10, "learning_rate": 0.1, "depth": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("depth"));

        let (status, _) = call(
            &f.state,
            "POST",
            "/retrain",
            Some(json!({ "iterations": 10, "learning_rate": 1.5, "depth": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(f.state.current().unwrap().bundle_id, before_id);
        assert_eq!(fs::read(&f.paths.model_path).unwrap(), model_bytes);
        assert_eq!(fs::read(&f.paths.scaler_path).unwrap(), scaler_bytes);
    }

    #[tokio::test]
    async fn retrain_swaps_bundle_and_rewrites_files() {
        let f = fixture(true);
        let before_id = f.state.current().unwrap().bundle_id.clone();
        let (status, body) = call(
            &f.state,
            "POST",
            "/retrain",
            Some(json!({ "iterations": "6", "learning_rate": "0.3", "depth": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Retraining successful!");
        assert!(body["new_accuracy"].as_str().unwrap().ends_with('%'));

        let current = f.state.current().unwrap();
        assert_ne!(current.bundle_id, before_id);
        let on_disk = load_serving_bundle(&f.paths.model_path, &f.paths.scaler_path).unwrap();
        assert_eq!(on_disk.bundle_id, current.bundle_id);
    }

    #[tokio::test]
    async fn retrain_without_dataset_reports_the_cause() {
        let f = fixture(false);
        fs::remove_file(&f.paths.combined_csv).unwrap();
        let (status, body) = call(
            &f.state,
            "POST",
            "/retrain",
            Some(json!({ "iterations": 5, "learning_rate": 0.2, "depth": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("processed_combined.csv"));
        assert!(f.state.current().is_none());
    }

    #[tokio::test]
    async fn index_falls_back_without_web_root() {
        let f = fixture(false);
        let resp = router(f.state.clone())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("ExoForge"));
    }

    #[tokio::test]
    async fn static_files_are_served_from_web_root() {
        let f = fixture(false);
        let css = f.state.web_root.join("static").join("css");
        fs::create_dir_all(&css).unwrap();
        fs::write(css.join("style.css"), "body{}").unwrap();

        let resp = router(f.state.clone())
            .oneshot(Request::builder().uri("/static/css/style.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/css");

        let (status, _) = call(&f.state, "GET", "/simulator", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn parent_segments_never_resolve() {
        let base = Path::new("/srv/web/static");
        assert_eq!(safe_join(base, "js/app.js"), Some(base.join("js/app.js")));
        assert_eq!(safe_join(base, "../secret"), None);
        assert_eq!(safe_join(base, "a/../../b"), None);
        assert_eq!(safe_join(base, "/etc/passwd"), None);
        assert_eq!(safe_join(base, ""), None);
    }

    #[test]
    fn numbers_accept_numeric_strings() {
        assert_eq!(number(&json!(2.5)), Some(2.5));
        assert_eq!(number(&json!(" 7 ")), Some(7.0));
        assert_eq!(number(&json!("NaN")), None);
        assert_eq!(number(&json!(true)), None);
    }
}
