use std::hash::Hash;

/// Intrinsic key for a flyweight. Associates a key type with the shared value
/// it produces.
///
/// Two keys are the same flyweight iff they compare equal by value, so the
/// `Hash` and `Eq` implementations must agree (derive both).
///
/// # Example
///
/// ```
/// use flyweight_cache::FlyweightKey;
///
/// #[derive(Hash, Eq, PartialEq, Clone, Debug)]
/// struct StyleKey {
///     font: String,
///     size: u32,
///     color: String,
/// }
///
/// #[derive(Debug)]
/// struct Style {
///     font: String,
///     size: u32,
///     color: String,
/// }
///
/// impl FlyweightKey for StyleKey {
///     type Value = Style;
/// }
/// ```
pub trait FlyweightKey: Hash + Eq + Clone + Send + Sync + 'static {
	/// The shared, immutable state built for this key.
	type Value: Send + Sync + 'static;
}

/// Trait for borrowed keys that can look up flyweights stored under `K`.
///
/// Lets callers probe the cache with e.g. `&str` attributes against a key that
/// owns `String`s, allocating the owned key only when a flyweight has to be
/// constructed.
///
/// # Hash Consistency Requirement
///
/// The `Hash` implementation MUST feed the hasher exactly what `K`'s does for
/// an equivalent key. A derived `Hash` on a struct with the same fields in the
/// same order (`&str` in place of `String`) satisfies this.
///
/// # Example
///
/// ```
/// use flyweight_cache::{FlyweightKey, KeyLookup};
///
/// #[derive(Hash, Eq, PartialEq, Clone)]
/// struct StyleKey {
///     font: String,
///     size: u32,
/// }
///
/// impl FlyweightKey for StyleKey {
///     type Value = String;
/// }
///
/// #[derive(Hash)]
/// struct StyleKeyRef<'a> {
///     font: &'a str,
///     size: u32,
/// }
///
/// impl KeyLookup<StyleKey> for StyleKeyRef<'_> {
///     fn eq_key(&self, key: &StyleKey) -> bool {
///         self.font == key.font && self.size == key.size
///     }
///
///     fn to_owned_key(&self) -> StyleKey {
///         StyleKey {
///             font: self.font.to_owned(),
///             size: self.size,
///         }
///     }
/// }
/// ```
pub trait KeyLookup<K: FlyweightKey>: Hash {
	/// Returns `true` if this borrowed key is equivalent to the owned key.
	fn eq_key(&self, key: &K) -> bool;

	/// Materialize the owned key. Only called on a miss.
	fn to_owned_key(&self) -> K;
}

/// Every key can look up itself.
impl<K: FlyweightKey> KeyLookup<K> for K {
	fn eq_key(&self, key: &K) -> bool {
		self == key
	}

	fn to_owned_key(&self) -> K {
		self.clone()
	}
}
