//! Mission catalogs and the preprocessing that turns them into one dataset.
//!
//! - mission column layouts (`missions`)
//! - per-mission renaming and label normalization (`normalize`)
//! - concatenation and median imputation (`combine`)
//! - deterministic synthetic catalogs (`sample`)

pub mod combine;
pub mod missions;
pub mod normalize;
pub mod sample;

pub use combine::*;
pub use missions::*;
pub use normalize::*;
pub use sample::*;
