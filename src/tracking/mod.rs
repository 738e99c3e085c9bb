//! Local experiment tracking.
//!
//! Responsibilities:
//!
//! - group training runs under named experiments, with parent/child nesting
//! - record params, metrics and tags per run
//! - store artifact files and serialized models per run
//! - keep a model registry with auto-incrementing versions
//!
//! Everything lives under one directory (`mlruns/` by default) as plain JSON
//! metadata next to the artifact files, so a finished run can be inspected with
//! any file browser.

pub mod store;

pub use store::*;
