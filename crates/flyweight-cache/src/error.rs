use thiserror::Error;

/// Invalid [`FlyweightCacheBuilder`](crate::FlyweightCacheBuilder) settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
	/// A bounded cache must hold at least one flyweight.
	#[error("bounded cache capacity must be at least 1")]
	ZeroCapacity,

	/// A cache needs at least one shard.
	#[error("shard count must be at least 1")]
	ZeroShards,

	/// The requested shard count is above the supported maximum.
	#[error("shard count {requested} exceeds the maximum of {max}")]
	TooManyShards { requested: usize, max: usize },
}
