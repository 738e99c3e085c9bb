//! Training orchestration.
//!
//! Responsibilities:
//!
//! - stratified train/test split (`split`)
//! - held-out metrics (`metrics`)
//! - fit and log every classifier family (`trainer`)
//! - pick the best family and persist it for serving (`selection`)

pub mod metrics;
pub mod selection;
pub mod split;
pub mod trainer;

pub use metrics::*;
pub use selection::*;
pub use split::*;
pub use trainer::*;
