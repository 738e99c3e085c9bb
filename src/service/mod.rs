//! HTTP inference service.
//!
//! Routes:
//!
//! - `GET /status`: held-out accuracy of the resident model
//! - `POST /predict`: classify one feature vector
//! - `POST /retrain`: refit the oblivious-boost model with new hyperparameters
//! - `GET /`, `/static/*`, `/simulator`, `/galaxy/*`: pages of the web UI
//!
//! The server runs until Ctrl-C / SIGTERM, then drains in-flight requests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::{info, warn};

use crate::domain::ProjectPaths;
use crate::error::AppError;

pub mod error;
pub mod handlers;
pub mod state;

pub use error::ServiceError;
pub use state::AppState;

/// Everything `serve` needs.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub addr: SocketAddr,
    pub paths: ProjectPaths,
    /// Split seed shared by `/status` and `/retrain`.
    pub seed: u64,
    pub test_size: f64,
    /// Directory holding `templates/`, `static/` and `galaxy/`.
    pub web_root: PathBuf,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/static/*path", get(handlers::static_file))
        .route("/simulator", get(handlers::simulator))
        .route("/galaxy/*path", get(handlers::galaxy_file))
        .route("/status", get(handlers::status))
        .route("/predict", post(handlers::predict))
        .route("/retrain", post(handlers::retrain))
        .with_state(state)
}

/// Load the serving bundle and serve until a shutdown signal arrives.
pub async fn serve(config: ServiceConfig) -> Result<(), AppError> {
    let state = Arc::new(AppState::load(&config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| AppError::input(format!("Failed to bind {}: {e}", config.addr)))?;
    info!(addr = %config.addr, "inference service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::input(format!("Server error: {e}")))?;
    info!("inference service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutdown signal received (Ctrl-C)"),
        _ = terminate => info!("shutdown signal received (SIGTERM)"),
    }
}
