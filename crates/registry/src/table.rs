//! Immutable category → variant table with eager validation.
//!
//! The table is the source of truth for what can be loaded. It is built
//! once at startup from host configuration and read-only thereafter, so
//! lookups need no synchronization.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::def::{Category, VariantDef, VariantOption};
use crate::error::RegistryError;

/// Per-category variant list plus the optional explicit default key.
struct CategorySlot<E> {
	variants: Vec<VariantDef<E>>,
	default_key: Option<String>,
}

/// Immutable mapping from category to its declared variants.
///
/// Invariants enforced by [`VariantTableBuilder::build`]: every configured
/// category has at least one variant, and keys are unique within a category.
/// An explicit default key that matches no variant is tolerated (resolution
/// falls back to the first declared variant) but logged at build time.
pub struct VariantTable<C: Category, E> {
	categories: FxHashMap<C, CategorySlot<E>>,
}

impl<C: Category, E> VariantTable<C, E> {
	/// Starts building a table.
	pub fn builder() -> VariantTableBuilder<C, E> {
		VariantTableBuilder::new()
	}

	fn slot(&self, category: C) -> Result<&CategorySlot<E>, RegistryError> {
		self.categories
			.get(&category)
			.ok_or_else(|| RegistryError::UnknownCategory(format!("{category:?}")))
	}

	/// Returns true if the category was configured.
	pub fn contains(&self, category: C) -> bool {
		self.categories.contains_key(&category)
	}

	/// Iterates over the configured categories, in no particular order.
	pub fn categories(&self) -> impl Iterator<Item = C> + '_ {
		self.categories.keys().copied()
	}

	/// Returns the category's variants in declared order.
	pub fn variants(&self, category: C) -> Result<&[VariantDef<E>], RegistryError> {
		Ok(&self.slot(category)?.variants)
	}

	/// Returns the effective default variant for a category.
	///
	/// The explicit default if one is configured and matches a declared key,
	/// otherwise the first declared variant.
	pub fn default_variant(&self, category: C) -> Result<&VariantDef<E>, RegistryError> {
		let slot = self.slot(category)?;
		if let Some(key) = &slot.default_key
			&& let Some(def) = slot.variants.iter().find(|v| &v.key == key)
		{
			return Ok(def);
		}
		slot.variants
			.first()
			.ok_or_else(|| RegistryError::EmptyCategory(format!("{category:?}")))
	}

	/// Projects the category's variants into label/value options, in
	/// declared order.
	pub fn options(&self, category: C) -> Result<Vec<VariantOption>, RegistryError> {
		Ok(self.slot(category)?.variants.iter().map(VariantDef::option).collect())
	}

	/// Resolves the variant a request for `requested` should load.
	///
	/// The declared variant if `requested` matches one, otherwise the
	/// category default. The fallback is a documented contract, not an
	/// error: callers asking for an unknown key transparently get the
	/// default variant.
	pub fn effective_variant(&self, category: C, requested: &str) -> Result<&VariantDef<E>, RegistryError> {
		let slot = self.slot(category)?;
		if let Some(def) = slot.variants.iter().find(|v| v.key == requested) {
			return Ok(def);
		}
		debug!(?category, requested, "unknown variant key, falling back to category default");
		self.default_variant(category)
	}
}

impl<C: Category, E> std::fmt::Debug for VariantTable<C, E> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut map = f.debug_map();
		for (category, slot) in &self.categories {
			map.entry(category, &slot.variants.iter().map(|v| &v.key).collect::<Vec<_>>());
		}
		map.finish()
	}
}

/// Builder for [`VariantTable`], consumed by [`build`](Self::build).
pub struct VariantTableBuilder<C: Category, E> {
	categories: Vec<(C, Vec<VariantDef<E>>, Option<String>)>,
}

impl<C: Category, E> VariantTableBuilder<C, E> {
	fn new() -> Self {
		Self {
			categories: Vec::new(),
		}
	}

	/// Declares a category with its ordered variant list; the first variant
	/// becomes the implicit default.
	pub fn category(mut self, key: C, variants: Vec<VariantDef<E>>) -> Self {
		self.categories.push((key, variants, None));
		self
	}

	/// Declares a category with an explicit default key.
	pub fn category_with_default(
		mut self,
		key: C,
		variants: Vec<VariantDef<E>>,
		default_key: impl Into<String>,
	) -> Self {
		self.categories.push((key, variants, Some(default_key.into())));
		self
	}

	/// Validates the declarations and freezes the table.
	///
	/// Fails fast on an empty category or duplicate variant keys. An
	/// explicit default that matches no variant is only warned about, since
	/// resolution falls back to the first declared variant.
	pub fn build(self) -> Result<VariantTable<C, E>, RegistryError> {
		let mut categories: FxHashMap<C, CategorySlot<E>> = FxHashMap::default();
		for (key, variants, default_key) in self.categories {
			if variants.is_empty() {
				return Err(RegistryError::EmptyCategory(format!("{key:?}")));
			}
			for (i, variant) in variants.iter().enumerate() {
				if variants[..i].iter().any(|prior| prior.key == variant.key) {
					return Err(RegistryError::DuplicateVariant {
						category: format!("{key:?}"),
						key: variant.key.clone(),
					});
				}
			}
			if let Some(default) = &default_key
				&& !variants.iter().any(|v| &v.key == default)
			{
				warn!(category = ?key, %default, "explicit default matches no variant, using first declared");
			}
			if categories
				.insert(key, CategorySlot { variants, default_key })
				.is_some()
			{
				warn!(category = ?key, "category declared twice, last declaration wins");
			}
		}
		Ok(VariantTable { categories })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	enum Kind {
		Shape,
		Node,
	}

	#[derive(Debug, PartialEq)]
	struct Entity(&'static str);

	fn def(key: &'static str, label: &'static str) -> VariantDef<Entity> {
		VariantDef::new(key, label, move || async move { Ok(Entity(key)) })
	}

	fn shape_table() -> VariantTable<Kind, Entity> {
		VariantTable::builder()
			.category(Kind::Shape, vec![def("circle", "Circle"), def("square", "Square")])
			.build()
			.unwrap()
	}

	#[test]
	fn test_options_declared_order() {
		let table = shape_table();
		let options = table.options(Kind::Shape).unwrap();
		assert_eq!(
			options,
			vec![
				VariantOption {
					label: "Circle".into(),
					value: "circle".into()
				},
				VariantOption {
					label: "Square".into(),
					value: "square".into()
				},
			]
		);
	}

	#[test]
	fn test_contains_and_categories_reflect_configuration() {
		let table = shape_table();
		assert!(table.contains(Kind::Shape));
		assert!(!table.contains(Kind::Node));
		assert_eq!(table.categories().collect::<Vec<_>>(), vec![Kind::Shape]);
	}

	#[test]
	fn test_implicit_default_is_first_declared() {
		let table = shape_table();
		assert_eq!(table.default_variant(Kind::Shape).unwrap().key, "circle");
	}

	#[test]
	fn test_explicit_default_wins() {
		let table = VariantTable::builder()
			.category_with_default(
				Kind::Shape,
				vec![def("circle", "Circle"), def("square", "Square")],
				"square",
			)
			.build()
			.unwrap();
		assert_eq!(table.default_variant(Kind::Shape).unwrap().key, "square");
	}

	#[test]
	fn test_invalid_explicit_default_falls_back_to_first() {
		let table = VariantTable::builder()
			.category_with_default(
				Kind::Shape,
				vec![def("circle", "Circle"), def("square", "Square")],
				"hexagon",
			)
			.build()
			.unwrap();
		assert_eq!(table.default_variant(Kind::Shape).unwrap().key, "circle");
	}

	#[test]
	fn test_effective_variant_prefers_requested() {
		let table = shape_table();
		assert_eq!(table.effective_variant(Kind::Shape, "square").unwrap().key, "square");
	}

	#[test]
	fn test_effective_variant_unknown_key_falls_back() {
		let table = shape_table();
		assert_eq!(table.effective_variant(Kind::Shape, "triangle").unwrap().key, "circle");
	}

	#[test]
	fn test_unknown_category_errors() {
		let table = shape_table();
		assert!(matches!(
			table.variants(Kind::Node),
			Err(RegistryError::UnknownCategory(_))
		));
		assert!(matches!(
			table.default_variant(Kind::Node),
			Err(RegistryError::UnknownCategory(_))
		));
	}

	#[test]
	fn test_empty_category_rejected_at_build() {
		let result = VariantTable::<Kind, Entity>::builder()
			.category(Kind::Shape, vec![])
			.build();
		assert!(matches!(result, Err(RegistryError::EmptyCategory(_))));
	}

	#[test]
	fn test_duplicate_variant_key_rejected_at_build() {
		let result = VariantTable::builder()
			.category(Kind::Shape, vec![def("circle", "Circle"), def("circle", "Also circle")])
			.build();
		assert!(matches!(
			result,
			Err(RegistryError::DuplicateVariant { ref key, .. }) if key == "circle"
		));
	}
}
