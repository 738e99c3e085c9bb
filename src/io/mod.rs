//! Input/output helpers.
//!
//! - mission + canonical CSV ingest (`ingest`)
//! - canonical CSV export (`export`)
//! - serving model/scaler pair read/write (`bundle`)

pub mod bundle;
pub mod export;
pub mod ingest;

pub use bundle::*;
pub use export::*;
pub use ingest::*;
