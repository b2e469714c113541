//! Shard implementation for partitioned flyweight storage.
//!
//! A `Shard` holds one partition of the key space. The `FlyweightCache` wraps
//! each shard in an `RwLock`, so lookups of ready flyweights only take a read
//! lock while claiming a key for construction takes a short write lock.
//!
//! # Slots
//!
//! Every key maps to exactly one slot:
//! - `Ready`: the published flyweight plus its bookkeeping.
//! - `Pending`: a construction in flight. The slot is visible so racing callers
//!   for the same key wait instead of constructing a duplicate. Pending slots
//!   never count toward `len()` or capacity and are never evicted.
//!
//! # Recency
//!
//! Every ready entry carries an access stamp stored in an atomic, so hits
//! update it under the read lock. Shards have no capacity of their own: a
//! bounded cache asks each shard for its least recently used candidate and
//! evicts the globally oldest one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use hashbrown::hash_map::RawEntryMut;

use crate::flight::Flight;
use crate::hashed::{HashedKey, HashedLookup, PassthroughBuildHasher};
use crate::traits::{FlyweightKey, KeyLookup};

/// A published flyweight.
pub(crate) struct Entry<V> {
	pub value: Arc<V>,
	/// Publication stamp; orders `list_keys()` snapshots.
	pub inserted_at: u64,
	/// Last access stamp for LRU eviction.
	last_access: AtomicU64,
}

impl<V> Entry<V> {
	fn new(value: Arc<V>, tick: u64) -> Self {
		Self {
			value,
			inserted_at: tick,
			last_access: AtomicU64::new(tick),
		}
	}

	/// Record an access. Stamps only move forward.
	pub fn touch(&self, tick: u64) {
		self.last_access.fetch_max(tick, Ordering::Relaxed);
	}

	pub fn last_access(&self) -> u64 {
		self.last_access.load(Ordering::Relaxed)
	}
}

pub(crate) enum Slot<V> {
	Ready(Entry<V>),
	Pending(Arc<Flight<V>>),
}

/// Result of probing a shard for a key that may need constructing.
pub(crate) enum Claim<V> {
	Ready(Arc<V>),
	InFlight(Arc<Flight<V>>),
	Vacant,
}

pub(crate) struct Shard<K: FlyweightKey> {
	/// Slot storage (passthrough hasher, keys carry their hash)
	entries: HashMap<HashedKey<K>, Slot<K::Value>, PassthroughBuildHasher>,
	/// Number of `Ready` slots
	ready: usize,
}

impl<K: FlyweightKey> Shard<K> {
	pub fn new() -> Self {
		Self {
			entries: HashMap::with_hasher(PassthroughBuildHasher),
			ready: 0,
		}
	}

	/// Look up a ready flyweight.
	pub fn get<Q>(&self, lookup: &HashedLookup<'_, Q>) -> Option<&Entry<K::Value>>
	where
		Q: KeyLookup<K> + ?Sized,
	{
		let (_, slot) =
			self.entries.raw_entry().from_hash(lookup.hash, |stored| lookup.matches(stored))?;
		match slot {
			Slot::Ready(entry) => Some(entry),
			Slot::Pending(_) => None,
		}
	}

	/// Probe for a key, reporting whether it is ready, in flight, or vacant.
	///
	/// A ready entry is stamped with `touch` when given.
	pub fn claim<Q>(&self, lookup: &HashedLookup<'_, Q>, touch: Option<u64>) -> Claim<K::Value>
	where
		Q: KeyLookup<K> + ?Sized,
	{
		match self.entries.raw_entry().from_hash(lookup.hash, |stored| lookup.matches(stored)) {
			Some((_, Slot::Ready(entry))) => {
				if let Some(tick) = touch {
					entry.touch(tick);
				}
				Claim::Ready(Arc::clone(&entry.value))
			}
			Some((_, Slot::Pending(flight))) => Claim::InFlight(Arc::clone(flight)),
			None => Claim::Vacant,
		}
	}

	/// Install a pending slot for a vacant key.
	pub fn install(&mut self, key: HashedKey<K>, flight: Arc<Flight<K::Value>>) {
		let hash = key.hash;
		match self.entries.raw_entry_mut().from_hash(hash, |stored| *stored == key) {
			RawEntryMut::Vacant(vacant) => {
				vacant.insert_hashed_nocheck(hash, key, Slot::Pending(flight));
			}
			RawEntryMut::Occupied(_) => {
				debug_assert!(false, "install() called for an occupied key");
			}
		}
	}

	/// Replace this flight's pending slot with the constructed flyweight.
	///
	/// Returns `false` if the slot no longer belongs to `flight`.
	pub fn publish<Q>(
		&mut self,
		lookup: &HashedLookup<'_, Q>,
		flight: &Arc<Flight<K::Value>>,
		value: Arc<K::Value>,
		tick: u64,
	) -> bool
	where
		Q: KeyLookup<K> + ?Sized,
	{
		if !self.is_pending(lookup, flight) {
			return false;
		}

		if let RawEntryMut::Occupied(mut occupied) =
			self.entries.raw_entry_mut().from_hash(lookup.hash, |stored| lookup.matches(stored))
		{
			occupied.insert(Slot::Ready(Entry::new(value, tick)));
			self.ready += 1;
			return true;
		}
		false
	}

	/// Drop this flight's pending slot after a failed construction.
	pub fn abandon<Q>(&mut self, lookup: &HashedLookup<'_, Q>, flight: &Arc<Flight<K::Value>>) -> bool
	where
		Q: KeyLookup<K> + ?Sized,
	{
		if !self.is_pending(lookup, flight) {
			return false;
		}
		if let RawEntryMut::Occupied(occupied) =
			self.entries.raw_entry_mut().from_hash(lookup.hash, |stored| lookup.matches(stored))
		{
			occupied.remove();
			return true;
		}
		false
	}

	/// Remove a ready flyweight. In-flight constructions are left alone.
	pub fn remove<Q>(&mut self, lookup: &HashedLookup<'_, Q>) -> Option<Arc<K::Value>>
	where
		Q: KeyLookup<K> + ?Sized,
	{
		match self.entries.raw_entry_mut().from_hash(lookup.hash, |stored| lookup.matches(stored)) {
			RawEntryMut::Occupied(occupied) if matches!(occupied.get(), Slot::Ready(_)) => {
				match occupied.remove() {
					Slot::Ready(entry) => {
						self.ready -= 1;
						Some(entry.value)
					}
					Slot::Pending(_) => None,
				}
			}
			_ => None,
		}
	}

	/// Drop every ready entry. Returns how many were dropped.
	pub fn clear(&mut self) -> usize {
		let cleared = self.ready;
		self.entries.retain(|_, slot| matches!(slot, Slot::Pending(_)));
		self.ready = 0;
		cleared
	}

	/// Ready keys with their publication stamps.
	pub fn ready_keys(&self) -> impl Iterator<Item = (u64, &K)> + '_ {
		self.entries.iter().filter_map(|(key, slot)| match slot {
			Slot::Ready(entry) => Some((entry.inserted_at, &key.key)),
			Slot::Pending(_) => None,
		})
	}

	/// Number of ready entries in this shard.
	pub fn len(&self) -> usize {
		self.ready
	}

	fn is_pending<Q>(&self, lookup: &HashedLookup<'_, Q>, flight: &Arc<Flight<K::Value>>) -> bool
	where
		Q: KeyLookup<K> + ?Sized,
	{
		matches!(
			self.entries.raw_entry().from_hash(lookup.hash, |stored| lookup.matches(stored)),
			Some((_, Slot::Pending(pending))) if Arc::ptr_eq(pending, flight)
		)
	}

	/// The ready entry with the oldest access stamp, if any.
	pub fn lru_candidate(&self) -> Option<(u64, &HashedKey<K>)> {
		self.entries
			.iter()
			.filter_map(|(key, slot)| match slot {
				Slot::Ready(entry) => Some((entry.last_access(), key)),
				Slot::Pending(_) => None,
			})
			.min_by_key(|(last_access, _)| *last_access)
	}

	/// Evict `key` if it is still ready and untouched since `stamp`.
	pub fn evict_if_idle(&mut self, key: &HashedKey<K>, stamp: u64) -> bool {
		match self.entries.raw_entry_mut().from_hash(key.hash, |stored| stored == key) {
			RawEntryMut::Occupied(occupied)
				if matches!(occupied.get(), Slot::Ready(entry) if entry.last_access() == stamp) =>
			{
				occupied.remove();
				self.ready -= 1;
				true
			}
			_ => false,
		}
	}
}
