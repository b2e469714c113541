//! Cache performance metrics.

/// Snapshot of cache activity counters.
///
/// Counters are reset by [`FlyweightCache::clear`](crate::FlyweightCache::clear).
///
/// # Example
///
/// ```
/// use flyweight_cache::{FlyweightCache, FlyweightKey};
///
/// #[derive(Hash, Eq, PartialEq, Clone)]
/// struct Glyph(char);
///
/// impl FlyweightKey for Glyph {
///     type Value = char;
/// }
///
/// let cache = FlyweightCache::new();
/// for c in "hello".chars() {
///     cache.get_or_create(Glyph(c), |g| g.0);
/// }
///
/// let metrics = cache.metrics();
/// println!("Hit rate: {:.2}%", metrics.hit_rate() * 100.0);
/// println!("Sharing ratio: {:.2}", metrics.sharing_ratio());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
	/// Lookups served by an existing flyweight (including waits on another
	/// caller's construction).
	pub hits: u64,
	/// Lookups that found nothing, or triggered a construction.
	pub misses: u64,
	/// Flyweights constructed and published.
	pub constructions: u64,
	/// Constructions that returned an error or panicked.
	pub failed_constructions: u64,
	/// Entries evicted by the bounded variant.
	pub evictions: u64,
	/// Entries removed via `remove()`.
	pub removals: u64,
	/// Current number of cached flyweights.
	pub entry_count: usize,
	/// Capacity of a bounded cache.
	pub capacity: Option<usize>,
}

impl CacheMetrics {
	/// Hit rate as a ratio between 0.0 and 1.0.
	///
	/// Returns 0.0 if there have been no lookups.
	pub fn hit_rate(&self) -> f64 {
		let total = self.total_lookups();
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Total number of lookups (hits + misses).
	pub fn total_lookups(&self) -> u64 {
		self.hits + self.misses
	}

	/// Average number of lookups served per constructed flyweight.
	///
	/// This is the memory win of the cache: a ratio of 1.0 means nothing was
	/// shared. Returns 0.0 before the first construction.
	pub fn sharing_ratio(&self) -> f64 {
		if self.constructions == 0 {
			0.0
		} else {
			(self.hits + self.constructions) as f64 / self.constructions as f64
		}
	}
}
