use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ahash::RandomState;
use parking_lot::RwLock;

use crate::builder::FlyweightCacheBuilder;
use crate::flight::Flight;
use crate::hashed::{HashedKey, HashedLookup};
#[cfg(feature = "metrics")]
use crate::metrics::CacheMetrics;
use crate::shard::{Claim, Shard};
use crate::traits::{FlyweightKey, KeyLookup};

/// Thread-safe flyweight cache: at most one shared instance per distinct key.
///
/// The cache hands out `Arc<K::Value>`. Equal keys always yield the same
/// allocation (`Arc::ptr_eq`), and the constructor passed to
/// [`get_or_create`](Self::get_or_create) runs at most once per key, even when
/// many threads miss on the same key at the same time.
///
/// # Sharding for Concurrency
///
/// Keys are hashed once and distributed over power-of-two shards, each behind
/// its own `RwLock`. Hits take a read lock. A miss takes a short write lock to
/// claim the key, then runs the constructor with no shard lock held, so
/// constructions for different keys never wait on each other.
///
/// # Unbounded and Bounded
///
/// [`FlyweightCache::new`] never evicts, which is the right choice when the key
/// space is small and finite. [`FlyweightCache::bounded`] caps the total number
/// of entries and, once full, evicts the least recently used flyweight across
/// all shards. Eviction only affects future lookups: references already handed
/// out stay valid.
///
/// # Example
///
/// ```
/// use flyweight_cache::{FlyweightCache, FlyweightKey};
/// use std::sync::Arc;
///
/// #[derive(Hash, Eq, PartialEq, Clone, Debug)]
/// struct StyleKey(&'static str, u32, &'static str);
///
/// #[derive(Debug)]
/// struct Style {
///     font: &'static str,
///     size: u32,
///     color: &'static str,
/// }
///
/// impl FlyweightKey for StyleKey {
///     type Value = Style;
/// }
///
/// let cache = FlyweightCache::new();
/// let make = |k: &StyleKey| Style { font: k.0, size: k.1, color: k.2 };
///
/// let a = cache.get_or_create(StyleKey("Arial", 12, "black"), make);
/// let b = cache.get_or_create(StyleKey("Arial", 12, "black"), make);
/// let c = cache.get_or_create(StyleKey("Courier", 14, "red"), make);
///
/// assert!(Arc::ptr_eq(&a, &b));
/// assert!(!Arc::ptr_eq(&a, &c));
/// assert_eq!(cache.size(), 2);
/// ```
pub struct FlyweightCache<K: FlyweightKey> {
	/// Sharded storage
	shards: Box<[RwLock<Shard<K>>]>,
	/// Hasher shared by every key of this cache
	hasher: RandomState,
	/// Logical clock for publication order and LRU recency
	clock: AtomicU64,
	/// Ready entries plus slots reserved by publishers about to insert
	entry_count: AtomicUsize,
	/// Total capacity for the bounded variant
	capacity: Option<usize>,
	/// Number of shards (power of two)
	shard_count: usize,
	#[cfg(feature = "metrics")]
	hits: AtomicU64,
	#[cfg(feature = "metrics")]
	misses: AtomicU64,
	#[cfg(feature = "metrics")]
	constructions: AtomicU64,
	#[cfg(feature = "metrics")]
	failed_constructions: AtomicU64,
	#[cfg(feature = "metrics")]
	evictions: AtomicU64,
	#[cfg(feature = "metrics")]
	removals: AtomicU64,
}

/// Default number of shards.
///
/// Flyweight key spaces are small, so this favors low overhead over maximal
/// write parallelism.
pub(crate) const DEFAULT_SHARD_COUNT: usize = 16;

/// Largest accepted shard count.
pub(crate) const MAX_SHARD_COUNT: usize = 1 << 16;

/// Round a requested shard count to a power of two in `1..=MAX_SHARD_COUNT`.
pub(crate) fn compute_shard_count(desired_shards: usize) -> usize {
	desired_shards.clamp(1, MAX_SHARD_COUNT).next_power_of_two()
}

impl<K: FlyweightKey> FlyweightCache<K> {
	/// Create an unbounded cache with default settings.
	pub fn new() -> Self {
		Self::with_config(None, DEFAULT_SHARD_COUNT, RandomState::new())
	}

	/// Create a cache holding at most `capacity` flyweights, evicting least
	/// recently used entries when full.
	///
	/// # Panics
	///
	/// Panics if `capacity` is zero.
	pub fn bounded(capacity: usize) -> Self {
		FlyweightCacheBuilder::new().capacity(capacity).build()
	}

	/// Start configuring a cache.
	pub fn builder() -> FlyweightCacheBuilder {
		FlyweightCacheBuilder::new()
	}

	/// Internal constructor; arguments are already validated.
	pub(crate) fn with_config(
		capacity: Option<usize>,
		desired_shards: usize,
		hasher: RandomState,
	) -> Self {
		let shard_count = compute_shard_count(desired_shards);
		let shards = (0..shard_count).map(|_| RwLock::new(Shard::new())).collect();

		Self {
			shards,
			hasher,
			clock: AtomicU64::new(0),
			entry_count: AtomicUsize::new(0),
			capacity,
			shard_count,
			#[cfg(feature = "metrics")]
			hits: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			misses: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			constructions: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			failed_constructions: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			evictions: AtomicU64::new(0),
			#[cfg(feature = "metrics")]
			removals: AtomicU64::new(0),
		}
	}

	/// Return the flyweight for `key`, constructing it on first use.
	///
	/// `constructor` runs only on a miss, and only in one caller: concurrent
	/// callers with an equal key block until it finishes and then receive the
	/// same `Arc`. It runs without any shard lock held and may use this cache
	/// for other keys.
	///
	/// # Panics
	///
	/// Panics if `constructor` asks this cache for the same key it is
	/// constructing (that would otherwise deadlock). A panic inside
	/// `constructor` propagates after the key is released for retry.
	///
	/// # Runtime Complexity
	///
	/// Expected case: O(1). An eviction in a full bounded cache scans every
	/// shard, O(n).
	pub fn get_or_create<F>(&self, key: K, constructor: F) -> Arc<K::Value>
	where
		F: FnOnce(&K) -> K::Value,
	{
		let result = self.resolve(&key, || key.clone(), |k| Ok::<_, Infallible>(constructor(k)));
		match result {
			Ok(value) => value,
			Err(never) => match never {},
		}
	}

	/// Fallible form of [`get_or_create`](Self::get_or_create).
	///
	/// If `constructor` returns `Err`, the error is returned unchanged, no
	/// entry is left behind for `key` and `size()` is unchanged. Callers that
	/// were waiting on this construction retry it themselves, and a later call
	/// with the same key constructs from scratch.
	pub fn try_get_or_create<F, E>(&self, key: K, constructor: F) -> Result<Arc<K::Value>, E>
	where
		F: FnOnce(&K) -> Result<K::Value, E>,
	{
		self.resolve(&key, || key.clone(), constructor)
	}

	/// Like [`get_or_create`](Self::get_or_create), probing with a borrowed key.
	///
	/// The owned key is only materialized (via [`KeyLookup::to_owned_key`])
	/// on a miss, before any shard lock is taken.
	pub fn get_or_create_by<Q, F>(&self, key: &Q, constructor: F) -> Arc<K::Value>
	where
		Q: KeyLookup<K> + ?Sized,
		F: FnOnce(&K) -> K::Value,
	{
		let result =
			self.resolve(key, || key.to_owned_key(), |k| Ok::<_, Infallible>(constructor(k)));
		match result {
			Ok(value) => value,
			Err(never) => match never {},
		}
	}

	/// Fallible form of [`get_or_create_by`](Self::get_or_create_by).
	pub fn try_get_or_create_by<Q, F, E>(
		&self,
		key: &Q,
		constructor: F,
	) -> Result<Arc<K::Value>, E>
	where
		Q: KeyLookup<K> + ?Sized,
		F: FnOnce(&K) -> Result<K::Value, E>,
	{
		self.resolve(key, || key.to_owned_key(), constructor)
	}

	/// Look up a cached flyweight without constructing one.
	///
	/// Counts as a use for LRU eviction.
	pub fn get<Q>(&self, key: &Q) -> Option<Arc<K::Value>>
	where
		Q: KeyLookup<K> + ?Sized,
	{
		let lookup = HashedLookup::new(&self.hasher, key);
		let value = self.lookup_ready(&lookup);

		#[cfg(feature = "metrics")]
		match value {
			Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
			None => self.misses.fetch_add(1, Ordering::Relaxed),
		};

		value
	}

	/// Check if a flyweight is cached, without affecting LRU order.
	pub fn contains<Q>(&self, key: &Q) -> bool
	where
		Q: KeyLookup<K> + ?Sized,
	{
		let lookup = HashedLookup::new(&self.hasher, key);
		self.get_shard(lookup.hash).read().get(&lookup).is_some()
	}

	/// Remove a flyweight from the cache.
	///
	/// Holders of the returned (or any earlier) `Arc` keep a valid value; only
	/// future lookups are affected. A construction in flight for `key` is not
	/// interrupted and `None` is returned.
	pub fn remove<Q>(&self, key: &Q) -> Option<Arc<K::Value>>
	where
		Q: KeyLookup<K> + ?Sized,
	{
		let lookup = HashedLookup::new(&self.hasher, key);
		let mut shard = self.get_shard(lookup.hash).write();
		let removed = shard.remove(&lookup)?;
		self.entry_count.fetch_sub(1, Ordering::Relaxed);

		#[cfg(feature = "metrics")]
		self.removals.fetch_add(1, Ordering::Relaxed);

		Some(removed)
	}

	/// Number of distinct flyweights currently cached.
	///
	/// Constructions still in flight are not counted.
	pub fn size(&self) -> usize {
		self.entry_count.load(Ordering::Relaxed)
	}

	/// Alias of [`size`](Self::size).
	pub fn len(&self) -> usize {
		self.size()
	}

	/// Check if cache is empty.
	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}

	/// Maximum number of flyweights, or `None` for an unbounded cache.
	pub fn capacity(&self) -> Option<usize> {
		self.capacity
	}

	/// Snapshot of cached keys in insertion order.
	///
	/// Each shard is read under its read lock; keys published while the
	/// snapshot is being taken may or may not appear.
	pub fn list_keys(&self) -> Vec<K> {
		let mut stamped = Vec::with_capacity(self.size());
		for shard_lock in self.shards.iter() {
			let shard = shard_lock.read();
			stamped.extend(shard.ready_keys().map(|(tick, key)| (tick, key.clone())));
		}
		stamped.sort_unstable_by_key(|(tick, _)| *tick);
		stamped.into_iter().map(|(_, key)| key).collect()
	}

	/// Drop every cached flyweight.
	///
	/// Outstanding references remain valid. Constructions in flight still
	/// publish their result.
	///
	/// # Runtime Complexity
	///
	/// O(n), taking each shard's write lock in turn.
	pub fn clear(&self) {
		for shard_lock in self.shards.iter() {
			let mut shard = shard_lock.write();
			let cleared = shard.clear();
			self.entry_count.fetch_sub(cleared, Ordering::Relaxed);
		}

		#[cfg(feature = "metrics")]
		{
			self.hits.store(0, Ordering::Relaxed);
			self.misses.store(0, Ordering::Relaxed);
			self.constructions.store(0, Ordering::Relaxed);
			self.failed_constructions.store(0, Ordering::Relaxed);
			self.evictions.store(0, Ordering::Relaxed);
			self.removals.store(0, Ordering::Relaxed);
		}
	}

	/// Get performance metrics snapshot.
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
	///     type Value = String;
	/// }
	///
	/// let cache = FlyweightCache::new();
	/// cache.get_or_create(Glyph('a'), |g| g.0.to_string());
	/// cache.get_or_create(Glyph('a'), |g| g.0.to_string());
	///
	/// let metrics = cache.metrics();
	/// assert_eq!(metrics.constructions, 1);
	/// assert_eq!(metrics.hits, 1);
	/// ```
	#[cfg(feature = "metrics")]
	pub fn metrics(&self) -> CacheMetrics {
		CacheMetrics {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			constructions: self.constructions.load(Ordering::Relaxed),
			failed_constructions: self.failed_constructions.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			removals: self.removals.load(Ordering::Relaxed),
			entry_count: self.entry_count.load(Ordering::Relaxed),
			capacity: self.capacity,
		}
	}

	/// Lookup-or-construct with single-flight per key.
	fn resolve<Q, M, F, E>(&self, key: &Q, make_key: M, constructor: F) -> Result<Arc<K::Value>, E>
	where
		Q: KeyLookup<K> + ?Sized,
		M: FnOnce() -> K,
		F: FnOnce(&K) -> Result<K::Value, E>,
	{
		let lookup = HashedLookup::new(&self.hasher, key);
		let shard_lock = self.get_shard(lookup.hash);

		if let Some(value) = self.lookup_ready(&lookup) {
			#[cfg(feature = "metrics")]
			self.hits.fetch_add(1, Ordering::Relaxed);
			return Ok(value);
		}

		let owned_key = make_key();
		let flight = loop {
			let mut shard = shard_lock.write();
			match shard.claim(&lookup, self.recency_stamp()) {
				Claim::Ready(value) => {
					#[cfg(feature = "metrics")]
					self.hits.fetch_add(1, Ordering::Relaxed);
					return Ok(value);
				}
				Claim::InFlight(flight) => {
					drop(shard);
					assert!(
						!flight.is_led_by_current_thread(),
						"flyweight constructor re-entered the cache with the key it is constructing"
					);
					if let Some(value) = flight.wait() {
						self.touch_ready(&lookup);
						#[cfg(feature = "metrics")]
						self.hits.fetch_add(1, Ordering::Relaxed);
						return Ok(value);
					}
					// Leader gave up; take another turn.
				}
				Claim::Vacant => {
					let flight = Flight::new();
					shard.install(HashedKey::new(lookup.hash, owned_key.clone()), Arc::clone(&flight));
					break flight;
				}
			}
		};

		#[cfg(feature = "metrics")]
		self.misses.fetch_add(1, Ordering::Relaxed);

		let construction = Construction {
			cache: self,
			shard: shard_lock,
			lookup: &lookup,
			flight,
			settled: false,
		};

		tracing::trace!(hash = lookup.hash, "constructing flyweight");
		let value = Arc::new(constructor(&owned_key)?);
		Ok(construction.publish(value))
	}

	/// Fast path: read-locked lookup of a ready flyweight.
	fn lookup_ready<Q>(&self, lookup: &HashedLookup<'_, Q>) -> Option<Arc<K::Value>>
	where
		Q: KeyLookup<K> + ?Sized,
	{
		let shard = self.get_shard(lookup.hash).read();
		let entry = shard.get(lookup)?;
		if let Some(tick) = self.recency_stamp() {
			entry.touch(tick);
		}
		Some(Arc::clone(&entry.value))
	}

	/// Record a use of a ready flyweight obtained without a shard lookup.
	fn touch_ready<Q>(&self, lookup: &HashedLookup<'_, Q>)
	where
		Q: KeyLookup<K> + ?Sized,
	{
		let Some(tick) = self.recency_stamp() else {
			return;
		};
		if let Some(entry) = self.get_shard(lookup.hash).read().get(lookup) {
			entry.touch(tick);
		}
	}

	/// Next stamp of the logical clock.
	fn tick(&self) -> u64 {
		self.clock.fetch_add(1, Ordering::Relaxed)
	}

	/// Access stamp for LRU bookkeeping; unbounded caches keep none.
	fn recency_stamp(&self) -> Option<u64> {
		self.capacity.map(|_| self.tick())
	}

	/// Count one more entry, evicting least recently used flyweights until the
	/// bounded cache has room for it.
	fn reserve_slot(&self) {
		let Some(capacity) = self.capacity else {
			self.entry_count.fetch_add(1, Ordering::Relaxed);
			return;
		};

		loop {
			let reserved = self.entry_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
				(count < capacity).then_some(count + 1)
			});
			if reserved.is_ok() {
				return;
			}
			if !self.evict_lru() {
				// Every counted slot belongs to a publisher that has not inserted yet
				std::thread::yield_now();
			}
		}
	}

	/// Evict the ready flyweight with the oldest access stamp in any shard.
	///
	/// Returns `false` when no shard holds a ready entry. A victim touched or
	/// removed between the scan and the write lock is left alone, and the
	/// caller re-checks the entry count.
	fn evict_lru(&self) -> bool {
		let mut oldest: Option<(u64, usize, HashedKey<K>)> = None;
		for (index, shard_lock) in self.shards.iter().enumerate() {
			let shard = shard_lock.read();
			if let Some((stamp, key)) = shard.lru_candidate()
				&& oldest.as_ref().is_none_or(|(best, ..)| stamp < *best)
			{
				oldest = Some((stamp, index, key.clone()));
			}
		}

		let Some((stamp, index, victim)) = oldest else {
			return false;
		};

		if self.shards[index].write().evict_if_idle(&victim, stamp) {
			self.entry_count.fetch_sub(1, Ordering::Relaxed);
			#[cfg(feature = "metrics")]
			self.evictions.fetch_add(1, Ordering::Relaxed);
			tracing::trace!(hash = victim.hash, "evicted least recently used flyweight");
		}
		true
	}

	/// Get the shard for a given hash.
	fn get_shard(&self, hash: u64) -> &RwLock<Shard<K>> {
		let index = (hash as usize) & (self.shard_count - 1);
		&self.shards[index]
	}
}

impl<K: FlyweightKey> Default for FlyweightCache<K> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: FlyweightKey> std::fmt::Debug for FlyweightCache<K> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlyweightCache")
			.field("size", &self.size())
			.field("capacity", &self.capacity)
			.field("shard_count", &self.shard_count)
			.finish_non_exhaustive()
	}
}

/// A claimed key whose flyweight is being constructed by this thread.
///
/// Dropping it without publishing (constructor error or unwinding panic)
/// removes the pending slot and wakes waiters so one of them can retry.
struct Construction<'a, K, Q>
where
	K: FlyweightKey,
	Q: KeyLookup<K> + ?Sized,
{
	cache: &'a FlyweightCache<K>,
	shard: &'a RwLock<Shard<K>>,
	lookup: &'a HashedLookup<'a, Q>,
	flight: Arc<Flight<K::Value>>,
	settled: bool,
}

impl<K, Q> Construction<'_, K, Q>
where
	K: FlyweightKey,
	Q: KeyLookup<K> + ?Sized,
{
	fn publish(mut self, value: Arc<K::Value>) -> Arc<K::Value> {
		self.cache.reserve_slot();
		let tick = self.cache.tick();
		let inserted =
			self.shard.write().publish(self.lookup, &self.flight, Arc::clone(&value), tick);
		if !inserted {
			self.cache.entry_count.fetch_sub(1, Ordering::Relaxed);
		}

		#[cfg(feature = "metrics")]
		self.cache.constructions.fetch_add(1, Ordering::Relaxed);

		self.flight.complete(Arc::clone(&value));
		self.settled = true;
		tracing::trace!(hash = self.lookup.hash, "published flyweight");
		value
	}
}

impl<K, Q> Drop for Construction<'_, K, Q>
where
	K: FlyweightKey,
	Q: KeyLookup<K> + ?Sized,
{
	fn drop(&mut self) {
		if self.settled {
			return;
		}

		let hash = self.lookup.hash;
		let removed = self.shard.write().abandon(self.lookup, &self.flight);

		#[cfg(feature = "metrics")]
		self.cache.failed_constructions.fetch_add(1, Ordering::Relaxed);

		self.flight.abandon();
		tracing::debug!(hash, removed, "flyweight construction failed; key released for retry");
	}
}
