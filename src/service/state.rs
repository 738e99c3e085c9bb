//! Process-wide serving state.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::ProjectPaths;
use crate::io::bundle::{ServingBundle, load_serving_bundle};
use crate::service::ServiceConfig;

/// Shared by every handler.
///
/// The bundle is swapped as a whole: readers clone the `Arc` under a short read
/// lock and never observe a model paired with another bundle's scaler.
pub struct AppState {
    bundle: RwLock<Option<Arc<ServingBundle>>>,
    /// Serializes retrains.
    pub retrain_lock: Mutex<()>,
    pub paths: ProjectPaths,
    pub seed: u64,
    pub test_size: f64,
    pub web_root: PathBuf,
}

impl AppState {
    pub fn new(config: &ServiceConfig, bundle: Option<ServingBundle>) -> Self {
        Self {
            bundle: RwLock::new(bundle.map(Arc::new)),
            retrain_lock: Mutex::new(()),
            paths: config.paths.clone(),
            seed: config.seed,
            test_size: config.test_size,
            web_root: config.web_root.clone(),
        }
    }

    /// Load the serving files; a failed load leaves the service degraded.
    pub fn load(config: &ServiceConfig) -> Self {
        let paths = &config.paths;
        let bundle = match load_serving_bundle(&paths.model_path, &paths.scaler_path) {
            Ok(bundle) => {
                info!(
                    family = %bundle.family(),
                    bundle_id = %bundle.bundle_id,
                    "serving bundle loaded"
                );
                Some(bundle)
            }
            Err(e) => {
                warn!(error = %e, "could not load model or scaler, predictions will fail");
                None
            }
        };
        Self::new(config, bundle)
    }

    pub fn current(&self) -> Option<Arc<ServingBundle>> {
        self.bundle.read().clone()
    }

    pub fn replace(&self, bundle: ServingBundle) {
        *self.bundle.write() = Some(Arc::new(bundle));
    }
}
