//! Lazy, cached, asynchronous entity-variant registry.
//!
//! Hosts declare, per category, an ordered list of variants — each a
//! `{key, label, loader}` triple where the loader is an async factory for
//! an expensive-to-construct Entity — plus an optional explicit default
//! key. The registry then:
//!
//! - enumerates the available variants and the effective default per
//!   category ([`Registry::options`], [`Registry::default_variant`]);
//! - loads each variant's Entity at most once and memoizes it for the life
//!   of the process ([`Registry::load`]); concurrent loads of one key
//!   share a single loader invocation;
//! - silently falls back to the category default when a requested key is
//!   unknown (a documented contract, not an error);
//! - exposes a subscribable loading/settled status per consumer selection
//!   ([`LoadSession`]).
//!
//! Categories are host-defined sum types (any `Copy + Eq + Hash + Debug`
//! key works); Entities are opaque to the registry.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Kind { Source, Sink }
//!
//! let table = VariantTable::builder()
//!     .category(Kind::Source, vec![
//!         VariantDef::new("file", "File", || async { fetch_file_meta().await }),
//!         VariantDef::new("kafka", "Kafka", || async { fetch_kafka_meta().await }),
//!     ])
//!     .category_with_default(Kind::Sink, sink_variants(), "console")
//!     .build()?;
//! let registry = Arc::new(Registry::new(table));
//!
//! // Populate a picker.
//! let options = registry.options(Kind::Source)?;
//!
//! // Resolve the user's selection; re-issue `select` on every change.
//! let session = registry.session(Kind::Source);
//! let entity = session.select("kafka").await?;
//! assert!(!session.is_loading());
//! ```

mod cache;
mod def;
mod error;
mod registry;
mod session;
mod table;

pub use cache::VariantCache;
pub use def::{Category, LoadFuture, LoadState, LoaderFn, VariantDef, VariantOption};
pub use error::{LoadError, RegistryError};
pub use registry::Registry;
pub use session::{LoadSession, SessionSnapshot};
pub use table::{VariantTable, VariantTableBuilder};
