use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use flyweight_cache::{ConfigError, FlyweightCache, FlyweightCacheBuilder, FlyweightKey, KeyLookup};

/// Intrinsic state of a rendered character.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct StyleKey {
	font: String,
	size: u32,
	color: String,
}

impl StyleKey {
	fn new(font: &str, size: u32, color: &str) -> Self {
		Self {
			font: font.to_string(),
			size,
			color: color.to_string(),
		}
	}
}

#[derive(Debug, PartialEq)]
struct Style {
	font: String,
	size: u32,
	color: String,
}

impl FlyweightKey for StyleKey {
	type Value = Style;
}

fn make_style(key: &StyleKey) -> Style {
	Style {
		font: key.font.clone(),
		size: key.size,
		color: key.color.clone(),
	}
}

/// Borrowed form of [`StyleKey`]; derives the same `Hash`.
#[derive(Hash)]
struct StyleKeyRef<'a> {
	font: &'a str,
	size: u32,
	color: &'a str,
}

impl KeyLookup<StyleKey> for StyleKeyRef<'_> {
	fn eq_key(&self, key: &StyleKey) -> bool {
		self.font == key.font && self.size == key.size && self.color == key.color
	}

	fn to_owned_key(&self) -> StyleKey {
		StyleKey::new(self.font, self.size, self.color)
	}
}

/// Client record: extrinsic state paired with a shared flyweight.
struct Character {
	glyph: char,
	position: (u32, u32),
	style: Arc<Style>,
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct Id(u64);

impl FlyweightKey for Id {
	type Value = String;
}

#[test]
fn test_text_editor_scenario() {
	let cache = FlyweightCache::new();
	let layout = [
		('a', "Arial", 12, "black", (10, 20)),
		('b', "Arial", 12, "black", (20, 20)),
		('a', "Arial", 12, "black", (30, 20)),
		('c', "Courier", 14, "red", (40, 20)),
		('d', "Courier", 14, "red", (50, 20)),
	];

	let characters: Vec<Character> = layout
		.iter()
		.map(|&(glyph, font, size, color, position)| Character {
			glyph,
			position,
			style: cache.get_or_create(StyleKey::new(font, size, color), make_style),
		})
		.collect();

	assert_eq!(cache.size(), 2);
	assert!(Arc::ptr_eq(&characters[0].style, &characters[1].style));
	assert!(Arc::ptr_eq(&characters[0].style, &characters[2].style));
	assert!(Arc::ptr_eq(&characters[3].style, &characters[4].style));
	assert!(!Arc::ptr_eq(&characters[0].style, &characters[3].style));

	// Extrinsic state stays with each record
	assert_eq!(characters[2].glyph, 'a');
	assert_eq!(characters[2].position, (30, 20));

	assert_eq!(
		cache.list_keys(),
		vec![StyleKey::new("Arial", 12, "black"), StyleKey::new("Courier", 14, "red")]
	);
}

#[test]
fn test_content_independence() {
	let cache = FlyweightCache::new();

	// Distinct key objects, separately allocated strings, equal attributes
	let font = String::from("Arial");
	let k1 = StyleKey::new(&font, 12, "black");
	let k2 = StyleKey {
		font: format!("{}{}", "Ari", "al"),
		size: 12,
		color: "black".to_owned(),
	};
	assert_ne!(k1.font.as_ptr(), k2.font.as_ptr());

	let a = cache.get_or_create(k1, make_style);
	let b = cache.get_or_create(k2, make_style);
	assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_isolation_by_key() {
	let cache = FlyweightCache::new();
	let keys = [
		StyleKey::new("Arial", 12, "black"),
		StyleKey::new("Arial", 12, "red"),
		StyleKey::new("Arial", 14, "black"),
		StyleKey::new("Courier", 12, "black"),
	];

	let styles: Vec<_> = keys.iter().map(|k| cache.get_or_create(k.clone(), make_style)).collect();

	for (i, a) in styles.iter().enumerate() {
		for b in &styles[i + 1..] {
			assert!(!Arc::ptr_eq(a, b));
		}
	}
	assert_eq!(cache.size(), keys.len());
}

#[test]
fn test_constructor_runs_once_per_key() {
	let cache = FlyweightCache::new();
	let calls = AtomicUsize::new(0);

	for _ in 0..10 {
		cache.get_or_create(StyleKey::new("Arial", 12, "black"), |k| {
			calls.fetch_add(1, Ordering::SeqCst);
			make_style(k)
		});
	}

	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_flyweight_holds_only_intrinsic_state() {
	let cache = FlyweightCache::new();
	let style = cache.get_or_create(StyleKey::new("Arial", 12, "black"), make_style);

	// Every stored field is derived from the key
	assert_eq!(
		*style,
		Style {
			font: "Arial".into(),
			size: 12,
			color: "black".into(),
		}
	);
}

#[test]
fn test_handed_out_flyweights_cannot_be_mutated() {
	let cache = FlyweightCache::new();
	let mut style = cache.get_or_create(StyleKey::new("Arial", 12, "black"), make_style);

	// The cache keeps its own reference, so no holder ever gets exclusive access
	assert!(Arc::get_mut(&mut style).is_none());

	// After removal, holders still share with each other
	let other = cache.get(&StyleKey::new("Arial", 12, "black")).expect("cached");
	cache.remove(&StyleKey::new("Arial", 12, "black"));
	assert!(Arc::get_mut(&mut style).is_none());
	drop(other);
}

#[test]
fn test_borrowed_key_lookups() {
	let cache = FlyweightCache::new();
	let borrowed = StyleKeyRef {
		font: "Courier",
		size: 14,
		color: "red",
	};

	assert!(cache.get(&borrowed).is_none());
	assert!(!cache.contains(&borrowed));

	let created = cache.get_or_create_by(&borrowed, make_style);
	assert!(cache.contains(&borrowed));

	let owned = cache.get_or_create(StyleKey::new("Courier", 14, "red"), make_style);
	assert!(Arc::ptr_eq(&created, &owned));

	let fetched = cache.get(&borrowed).expect("cached");
	assert!(Arc::ptr_eq(&created, &fetched));
	assert_eq!(cache.list_keys(), vec![StyleKey::new("Courier", 14, "red")]);
}

#[test]
fn test_try_get_or_create_by_failure() {
	let cache = FlyweightCache::new();
	let borrowed = StyleKeyRef {
		font: "Missing",
		size: 1,
		color: "none",
	};

	let err = cache.try_get_or_create_by(&borrowed, |_| Err::<Style, _>("no such font")).unwrap_err();
	assert_eq!(err, "no such font");
	assert!(cache.is_empty());
}

#[test]
fn test_failure_then_retry_populates_one_entry() {
	let cache = FlyweightCache::new();
	cache.get_or_create(Id(1), |_| "one".into());
	let before = cache.size();

	let failed = cache.try_get_or_create(Id(2), |_| Err::<String, _>(std::io::Error::other("disk")));
	assert!(failed.is_err());
	assert_eq!(cache.size(), before);

	let value = cache.try_get_or_create(Id(2), |_| Ok::<_, std::io::Error>("two".into()));
	assert_eq!(value.expect("retry succeeds").as_str(), "two");
	assert_eq!(cache.size(), before + 1);
}

#[test]
fn test_independent_caches_do_not_share() {
	let first = FlyweightCache::new();
	let second = FlyweightCache::new();

	let a = first.get_or_create(Id(1), |_| "x".into());
	let b = second.get_or_create(Id(1), |_| "x".into());

	assert!(!Arc::ptr_eq(&a, &b));
	assert_eq!(first.size(), 1);
	assert_eq!(second.size(), 1);
}

#[test]
fn test_concurrent_single_flight_many_keys() {
	const THREADS: usize = 8;
	const KEYS: u64 = 16;

	let cache = Arc::new(FlyweightCache::new());
	let constructions = Arc::new(AtomicUsize::new(0));
	let barrier = Arc::new(Barrier::new(THREADS));

	let handles: Vec<_> = (0..THREADS)
		.map(|_| {
			let cache = Arc::clone(&cache);
			let constructions = Arc::clone(&constructions);
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				barrier.wait();
				(0..KEYS)
					.map(|id| {
						cache.get_or_create(Id(id), |k| {
							constructions.fetch_add(1, Ordering::SeqCst);
							thread::sleep(Duration::from_millis(1));
							format!("value-{}", k.0)
						})
					})
					.collect::<Vec<_>>()
			})
		})
		.collect();

	let results: Vec<Vec<Arc<String>>> =
		handles.into_iter().map(|h| h.join().expect("thread should not panic")).collect();

	assert_eq!(constructions.load(Ordering::SeqCst), KEYS as usize);
	assert_eq!(cache.size(), KEYS as usize);
	for per_thread in &results[1..] {
		for (a, b) in per_thread.iter().zip(&results[0]) {
			assert!(Arc::ptr_eq(a, b));
		}
	}
}

#[test]
fn test_slow_construction_does_not_block_other_keys() {
	let cache = Arc::new(FlyweightCacheBuilder::new().shards(1).build::<Id>());
	let started = Arc::new(Barrier::new(2));
	let release = Arc::new(Barrier::new(2));

	let slow = {
		let cache = Arc::clone(&cache);
		let started = Arc::clone(&started);
		let release = Arc::clone(&release);
		thread::spawn(move || {
			cache.get_or_create(Id(1), |_| {
				started.wait();
				release.wait();
				"slow".to_string()
			})
		})
	};

	started.wait();
	// Same shard, different key: completes while Id(1) is still constructing
	let fast = cache.get_or_create(Id(2), |_| "fast".to_string());
	assert_eq!(fast.as_str(), "fast");
	assert_eq!(cache.size(), 1);

	release.wait();
	assert_eq!(slow.join().expect("thread should not panic").as_str(), "slow");
	assert_eq!(cache.size(), 2);
}

#[test]
fn test_bounded_eviction_keeps_references_valid() {
	let cache = FlyweightCache::bounded(3);
	let held: Vec<_> = (0..10).map(|id| cache.get_or_create(Id(id), |k| k.0.to_string())).collect();

	assert_eq!(cache.size(), 3);
	assert_eq!(cache.list_keys(), vec![Id(7), Id(8), Id(9)]);
	for (id, value) in held.iter().enumerate() {
		assert_eq!(value.as_str(), id.to_string());
	}
}

#[test]
fn test_bounded_cache_fills_before_evicting() {
	const CAPACITY: u64 = 128;

	let cache = FlyweightCache::bounded(CAPACITY as usize);
	let constructions = AtomicUsize::new(0);

	for round in 0..3 {
		for id in 0..CAPACITY {
			cache.get_or_create(Id(id), |k| {
				constructions.fetch_add(1, Ordering::SeqCst);
				k.0.to_string()
			});
		}
		assert_eq!(cache.size(), CAPACITY as usize, "round {round}");
	}

	// Every key fits, so each was constructed exactly once
	assert_eq!(constructions.load(Ordering::SeqCst), CAPACITY as usize);

	cache.get_or_create(Id(CAPACITY), |k| k.0.to_string());
	assert_eq!(cache.size(), CAPACITY as usize);
	assert!(!cache.contains(&Id(0)));
}

#[test]
fn test_bounded_in_flight_key_is_not_evicted() {
	let cache = Arc::new(FlyweightCache::bounded(1));
	cache.get_or_create(Id(0), |_| "zero".to_string());

	let started = Arc::new(Barrier::new(2));
	let release = Arc::new(Barrier::new(2));

	let pending = {
		let cache = Arc::clone(&cache);
		let started = Arc::clone(&started);
		let release = Arc::clone(&release);
		thread::spawn(move || {
			cache.get_or_create(Id(1), |_| {
				started.wait();
				release.wait();
				"one".to_string()
			})
		})
	};

	started.wait();
	// Publishing Id(2) evicts a ready entry, never the pending Id(1)
	cache.get_or_create(Id(2), |_| "two".to_string());
	assert_eq!(cache.size(), 1);
	assert!(!cache.contains(&Id(0)));

	release.wait();
	let one = pending.join().expect("thread should not panic");
	assert_eq!(one.as_str(), "one");
	assert_eq!(cache.size(), 1);
	assert!(cache.contains(&Id(1)));

	// Same instance on the next lookup
	let again = cache.get_or_create(Id(1), |_| unreachable!("already cached"));
	assert!(Arc::ptr_eq(&one, &again));
}

#[test]
fn test_clear_allows_fresh_instances() {
	let cache = FlyweightCache::new();
	let before = cache.get_or_create(Id(1), |_| "v".into());
	cache.clear();

	assert!(cache.is_empty());
	let after = cache.get_or_create(Id(1), |_| "v".into());
	assert!(!Arc::ptr_eq(&before, &after));
	assert_eq!(cache.size(), 1);
}

#[test]
fn test_list_keys_is_a_snapshot() {
	let cache = FlyweightCache::new();
	for id in 0..5 {
		cache.get_or_create(Id(id), |k| k.0.to_string());
	}

	let snapshot = cache.list_keys();
	cache.get_or_create(Id(99), |k| k.0.to_string());
	cache.remove(&Id(0));

	assert_eq!(snapshot, (0..5).map(Id).collect::<Vec<_>>());
	let unique: HashSet<_> = cache.list_keys().into_iter().collect();
	assert_eq!(unique.len(), 5);
	assert!(unique.contains(&Id(99)));
}

#[test]
fn test_builder_errors() {
	assert_eq!(
		FlyweightCache::<Id>::builder().capacity(0).try_build::<Id>().unwrap_err(),
		ConfigError::ZeroCapacity
	);
	assert_eq!(
		FlyweightCacheBuilder::new().shards(0).try_build::<Id>().unwrap_err(),
		ConfigError::ZeroShards
	);
}

#[cfg(feature = "metrics")]
#[test]
fn test_metrics_sharing_ratio() {
	let cache = FlyweightCache::new();
	for glyph in "aabbbc".chars() {
		cache.get_or_create(Id(glyph as u64), |k| k.0.to_string());
	}

	let metrics = cache.metrics();
	assert_eq!(metrics.constructions, 3);
	assert_eq!(metrics.hits, 3);
	assert_eq!(metrics.sharing_ratio(), 2.0);
	assert_eq!(metrics.entry_count, 3);
}
