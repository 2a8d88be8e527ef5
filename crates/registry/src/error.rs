use thiserror::Error;

/// Failure of a variant loader.
///
/// Load errors are local to one resolution: they are surfaced to the caller
/// that awaited the load, the loading flag is cleared, and nothing is cached,
/// so the next resolve for the same key re-invokes the loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
	/// The asynchronous factory raised an error; message supplied by the host.
	#[error("loader failed: {0}")]
	Failed(String),
	/// The in-flight load owning this key was cancelled before settling.
	///
	/// Only observed by waiters sharing a deduplicated load whose leader was
	/// dropped mid-flight. Re-issuing the resolve starts a fresh load.
	#[error("load aborted before settling")]
	Aborted,
}

/// Errors surfaced by registry configuration and resolution.
///
/// The configuration variants (`UnknownCategory`, `EmptyCategory`,
/// `DuplicateVariant`) indicate a malformed variant table and are raised
/// eagerly where possible; they are not runtime-recoverable. `Load` wraps a
/// [`LoadError`] and is the only variant a healthy deployment should see.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
	/// Category outside the configured closed set.
	#[error("unknown category: {0}")]
	UnknownCategory(String),
	/// A configured category has zero variants.
	#[error("category {0} has no variants")]
	EmptyCategory(String),
	/// Two variants within one category share a key.
	#[error("duplicate variant key {key:?} in category {category}")]
	DuplicateVariant {
		/// Owning category, Debug-rendered.
		category: String,
		/// The colliding variant key.
		key: String,
	},
	/// A variant loader failed; retry by re-issuing the resolve.
	#[error(transparent)]
	Load(#[from] LoadError),
}
