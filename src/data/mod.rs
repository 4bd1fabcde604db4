//! Data layer module
//!
//! - Domain models (countries, raw and normalized city records)
//! - Result cache (volatile)

mod cache;
mod models;

pub use cache::ResultCache;
pub use models::*;
