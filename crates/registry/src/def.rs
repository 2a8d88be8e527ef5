//! Descriptor types shared across the registry.
//!
//! A host declares, per category, an ordered list of [`VariantDef`]s. The
//! registry never inspects the Entity type produced by a loader; it only
//! memoizes and hands back whatever the factory settles with.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::LoadError;

/// Marker trait for category keys.
///
/// Categories form a closed set known at compile time; hosts normally use a
/// field-less enum. Blanket-implemented, so any key type with the required
/// bounds works without an explicit impl.
pub trait Category: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static> Category for T {}

/// Future returned by a variant loader.
pub type LoadFuture<E> = Pin<Box<dyn Future<Output = Result<E, LoadError>> + Send>>;

/// Asynchronous factory producing the Entity for one variant.
///
/// Loaders are expected to be idempotent and deterministic; the registry
/// invokes each at most once per settled load and memoizes the result for
/// the life of the process.
pub type LoaderFn<E> = Arc<dyn Fn() -> LoadFuture<E> + Send + Sync>;

/// One selectable variant within a category.
///
/// Keys are unique within the owning category. Declaration order matters
/// only for presentation and for implicit-default selection (the first
/// declared variant is the default when no explicit default is configured).
pub struct VariantDef<E> {
	/// Stable key, unique within the owning category.
	pub key: String,
	/// Human-readable display name.
	pub label: String,
	/// Deferred Entity factory, invoked on first resolution.
	pub loader: LoaderFn<E>,
}

impl<E> VariantDef<E> {
	/// Creates a descriptor from a key, a label, and an async factory.
	pub fn new<F, Fut>(key: impl Into<String>, label: impl Into<String>, loader: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<E, LoadError>> + Send + 'static,
	{
		Self {
			key: key.into(),
			label: label.into(),
			loader: Arc::new(move || Box::pin(loader())),
		}
	}

	/// Projects this descriptor into its presentation form.
	pub fn option(&self) -> VariantOption {
		VariantOption {
			label: self.label.clone(),
			value: self.key.clone(),
		}
	}
}

impl<E> Clone for VariantDef<E> {
	fn clone(&self) -> Self {
		Self {
			key: self.key.clone(),
			label: self.label.clone(),
			loader: self.loader.clone(),
		}
	}
}

impl<E> fmt::Debug for VariantDef<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("VariantDef")
			.field("key", &self.key)
			.field("label", &self.label)
			.finish()
	}
}

/// Label/value projection of a variant, for populating selection UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantOption {
	/// Display name.
	pub label: String,
	/// Variant key.
	pub value: String,
}

/// Lifecycle of one resolution session.
///
/// Scoped to a [`LoadSession`](crate::LoadSession), not to the registry:
/// the flag describes the session's current selection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
	/// No resolution issued yet, or the last one failed.
	#[default]
	Idle,
	/// A loader for the current selection is in flight.
	Loading,
	/// The current selection's Entity is available.
	Settled,
}
