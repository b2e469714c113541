use ahash::RandomState;

use crate::cache::{DEFAULT_SHARD_COUNT, FlyweightCache, MAX_SHARD_COUNT};
use crate::error::ConfigError;
use crate::traits::FlyweightKey;

/// Builder for configuring a [`FlyweightCache`].
///
/// # Example
///
/// ```
/// use flyweight_cache::{FlyweightCache, FlyweightCacheBuilder, FlyweightKey};
///
/// #[derive(Hash, Eq, PartialEq, Clone)]
/// struct Glyph(char);
///
/// impl FlyweightKey for Glyph {
///     type Value = String;
/// }
///
/// let cache: FlyweightCache<Glyph> = FlyweightCacheBuilder::new()
///     .capacity(1024)
///     .shards(8)
///     .build();
/// assert_eq!(cache.capacity(), Some(1024));
/// ```
///
/// # Shards
///
/// Caches use 16 shards unless told otherwise. The shard count only affects
/// lock contention: a bounded cache enforces its capacity and LRU order
/// across all shards together.
#[derive(Debug, Clone, Default)]
pub struct FlyweightCacheBuilder {
	capacity: Option<usize>,
	shard_count: Option<usize>,
	seed: Option<usize>,
}

impl FlyweightCacheBuilder {
	/// Create a builder for an unbounded cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Bound the cache to `capacity` flyweights with LRU eviction.
	pub fn capacity(mut self, capacity: usize) -> Self {
		self.capacity = Some(capacity);
		self
	}

	/// Set the number of shards.
	///
	/// Rounded up to the next power of two. At most 65536.
	///
	/// Default: 16
	pub fn shards(mut self, count: usize) -> Self {
		self.shard_count = Some(count);
		self
	}

	/// Seed the key hasher, making shard placement reproducible.
	///
	/// Default: a random seed per cache.
	pub fn seed(mut self, seed: usize) -> Self {
		self.seed = Some(seed);
		self
	}

	/// Build the cache, reporting invalid settings.
	pub fn try_build<K: FlyweightKey>(self) -> Result<FlyweightCache<K>, ConfigError> {
		if self.capacity == Some(0) {
			return Err(ConfigError::ZeroCapacity);
		}
		match self.shard_count {
			Some(0) => return Err(ConfigError::ZeroShards),
			Some(requested) if requested > MAX_SHARD_COUNT => {
				return Err(ConfigError::TooManyShards {
					requested,
					max: MAX_SHARD_COUNT,
				});
			}
			_ => {}
		}

		let hasher = match self.seed {
			Some(seed) => RandomState::with_seed(seed),
			None => RandomState::new(),
		};
		let shards = self.shard_count.unwrap_or(DEFAULT_SHARD_COUNT);

		tracing::debug!(capacity = ?self.capacity, shards, "building flyweight cache");
		Ok(FlyweightCache::with_config(self.capacity, shards, hasher))
	}

	/// Build the cache.
	///
	/// # Panics
	///
	/// Panics on a zero capacity or an out-of-range shard count.
	pub fn build<K: FlyweightKey>(self) -> FlyweightCache<K> {
		match self.try_build() {
			Ok(cache) => cache,
			Err(err) => panic!("invalid flyweight cache configuration: {err}"),
		}
	}
}
