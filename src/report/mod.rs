//! Human-facing text output: classification reports and command summaries.

pub mod format;

pub use format::*;
