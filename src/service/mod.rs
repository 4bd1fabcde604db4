//! Service layer
//!
//! Record processing and the aggregation pipeline built on top of it.

mod aggregator;
mod processor;

pub use aggregator::{Aggregator, CacheMode, paginate};
pub use processor::{
    deduplicate, filter_valid, normalize, normalize_city_name, process, sort_by_pollution,
};
