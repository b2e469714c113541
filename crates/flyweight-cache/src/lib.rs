#![doc = include_str!("../README.md")]

mod builder;
mod cache;
mod error;
mod flight;
mod hashed;
#[cfg(feature = "metrics")]
mod metrics;
mod shard;
mod traits;

pub use builder::FlyweightCacheBuilder;
pub use cache::FlyweightCache;
pub use error::ConfigError;
#[cfg(feature = "metrics")]
pub use metrics::CacheMetrics;
pub use traits::{FlyweightKey, KeyLookup};
