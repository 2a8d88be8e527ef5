//! Process-lifetime memoization of settled Entities.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::def::Category;

/// Per-category store of previously resolved Entities, keyed by variant key.
///
/// A monotonically growing memo, not a general cache: entries are written
/// once a loader settles successfully and are never evicted or invalidated.
/// The key space is the small, fixed set of configured variant keys, so
/// unbounded growth is acceptable. Writes are last-write-wins per key.
pub struct VariantCache<C: Category, E> {
	entries: RwLock<FxHashMap<C, FxHashMap<String, Arc<E>>>>,
}

impl<C: Category, E> VariantCache<C, E> {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self {
			entries: RwLock::new(FxHashMap::default()),
		}
	}

	/// Returns the Entity cached for `(category, key)`, if any.
	pub fn get(&self, category: C, key: &str) -> Option<Arc<E>> {
		self.entries.read().get(&category)?.get(key).cloned()
	}

	/// Returns true if an Entity is cached for `(category, key)`.
	pub fn contains(&self, category: C, key: &str) -> bool {
		self.entries
			.read()
			.get(&category)
			.is_some_and(|slot| slot.contains_key(key))
	}

	/// Stores a settled Entity under its effective variant key.
	pub fn insert(&self, category: C, key: impl Into<String>, entity: Arc<E>) {
		self.entries
			.write()
			.entry(category)
			.or_default()
			.insert(key.into(), entity);
	}

	/// Total number of cached Entities across all categories.
	pub fn len(&self) -> usize {
		self.entries.read().values().map(FxHashMap::len).sum()
	}

	/// Returns true if nothing has been cached yet.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<C: Category, E> Default for VariantCache<C, E> {
	fn default() -> Self {
		Self::new()
	}
}
