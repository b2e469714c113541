use std::sync::Arc;

use flyweight_cache::{FlyweightCache, FlyweightKey};

/// Example: a text buffer whose characters share style flyweights.
///
/// Each character keeps its own glyph and position (extrinsic state) and
/// points at a shared `Style` (intrinsic state).

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct StyleKey {
	font: String,
	size: u32,
	color: String,
}

#[derive(Debug)]
struct Style {
	font: String,
	size: u32,
	color: String,
}

impl FlyweightKey for StyleKey {
	type Value = Style;
}

struct Character {
	glyph: char,
	position: (u32, u32),
	style: Arc<Style>,
}

impl Character {
	fn new(
		cache: &FlyweightCache<StyleKey>,
		glyph: char,
		font: &str,
		size: u32,
		color: &str,
		position: (u32, u32),
	) -> Self {
		let key = StyleKey {
			font: font.to_string(),
			size,
			color: color.to_string(),
		};
		let style = cache.get_or_create(key, |k| {
			tracing::info!(font = %k.font, size = k.size, color = %k.color, "creating style");
			Style {
				font: k.font.clone(),
				size: k.size,
				color: k.color.clone(),
			}
		});
		Self {
			glyph,
			position,
			style,
		}
	}

	fn render(&self) {
		println!(
			"'{}' at {:?} with font={}, size={}, color={}",
			self.glyph, self.position, self.style.font, self.style.size, self.style.color
		);
	}
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let cache = FlyweightCache::new();

	let characters = [
		Character::new(&cache, 'a', "Arial", 12, "black", (10, 20)),
		Character::new(&cache, 'b', "Arial", 12, "black", (20, 20)),
		Character::new(&cache, 'a', "Arial", 12, "black", (30, 20)),
		Character::new(&cache, 'c', "Courier", 14, "red", (40, 20)),
		Character::new(&cache, 'd', "Courier", 14, "red", (50, 20)),
	];

	for character in &characters {
		character.render();
	}

	println!("\n{} characters share {} styles:", characters.len(), cache.size());
	for key in cache.list_keys() {
		println!("  {key:?}");
	}
}
