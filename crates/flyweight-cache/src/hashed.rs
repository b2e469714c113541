use std::hash::{BuildHasher, Hash, Hasher};

use crate::traits::{FlyweightKey, KeyLookup};

/// Owned key with its hash computed once by the owning cache.
///
/// The hash selects the shard and is fed straight into the shard's map through
/// [`PassthroughBuildHasher`], so a key is never rehashed after insertion.
#[derive(Clone, Debug)]
pub(crate) struct HashedKey<K> {
	pub hash: u64,
	pub key: K,
}

impl<K> HashedKey<K> {
	pub fn new(hash: u64, key: K) -> Self {
		Self {
			hash,
			key,
		}
	}
}

impl<K> Hash for HashedKey<K> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		state.write_u64(self.hash);
	}
}

impl<K: Eq> PartialEq for HashedKey<K> {
	fn eq(&self, other: &Self) -> bool {
		self.hash == other.hash && self.key == other.key
	}
}

impl<K: Eq> Eq for HashedKey<K> {}

/// Borrowed lookup key with a pre-computed hash (no allocation).
pub(crate) struct HashedLookup<'a, Q: ?Sized> {
	pub hash: u64,
	pub key: &'a Q,
}

impl<'a, Q: ?Sized + Hash> HashedLookup<'a, Q> {
	pub fn new<S: BuildHasher>(hasher: &S, key: &'a Q) -> Self {
		Self {
			hash: hasher.hash_one(key),
			key,
		}
	}

	/// Check equivalence with a stored key.
	pub fn matches<K>(&self, stored: &HashedKey<K>) -> bool
	where
		K: FlyweightKey,
		Q: KeyLookup<K>,
	{
		self.hash == stored.hash && self.key.eq_key(&stored.key)
	}
}

/// Passthrough hasher for [`HashedKey`], which already carries its hash.
#[derive(Default)]
pub(crate) struct PassthroughHasher(u64);

impl Hasher for PassthroughHasher {
	fn finish(&self) -> u64 {
		self.0
	}

	fn write(&mut self, _bytes: &[u8]) {
		panic!("PassthroughHasher only works with u64 hash values");
	}

	fn write_u64(&mut self, i: u64) {
		self.0 = i;
	}
}

#[derive(Clone, Default)]
pub(crate) struct PassthroughBuildHasher;

impl BuildHasher for PassthroughBuildHasher {
	type Hasher = PassthroughHasher;

	fn build_hasher(&self) -> Self::Hasher {
		PassthroughHasher::default()
	}
}
