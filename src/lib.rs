//! `exoforge` library crate.
//!
//! The binary (`exo`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable without spawning processes
//! - the inference service and the CLI share one implementation of every step
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod service;
pub mod tracking;
