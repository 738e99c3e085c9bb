//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the canonical feature schema and the 3-class disposition label (`types`)
//! - canonical records and the combined dataset (`types`)
//! - classifier families, artifact formats and hyperparameters (`types`, `config`)
//! - the project filesystem layout (`config`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
