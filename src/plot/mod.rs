//! Confusion-matrix rendering.
//!
//! - terminal output (`ascii`)
//! - PNG files logged with each training run (`heatmap`)

pub mod ascii;
pub mod heatmap;

pub use ascii::*;
pub use heatmap::*;
