//! Lazy resolution core: table lookup, memoization, single-flight loads.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::VariantCache;
use crate::def::{Category, VariantDef, VariantOption};
use crate::error::{LoadError, RegistryError};
use crate::session::LoadSession;
use crate::table::VariantTable;

/// Shared result slot for one deduplicated load.
struct InFlightLoad<E> {
	tx: watch::Sender<Option<Arc<Result<Arc<E>, LoadError>>>>,
	rx: watch::Receiver<Option<Arc<Result<Arc<E>, LoadError>>>>,
}

type InFlightMap<C, E> = Mutex<FxHashMap<(C, String), Arc<InFlightLoad<E>>>>;

/// Lazy, cached, asynchronous entity-variant registry.
///
/// Owns the immutable [`VariantTable`], the process-lifetime
/// [`VariantCache`], and an in-flight map deduplicating concurrent loads of
/// the same effective key. Create it once at application start and share it
/// behind an [`Arc`]; there is no teardown.
///
/// # Concurrency
///
/// - The table is immutable after construction, safe for unsynchronized reads.
/// - The cache is written only by the settle step of a load.
/// - The in-flight map is guarded by a synchronous mutex that is never held
///   across an await; loads for one effective key elect a leader, and
///   overlapping callers wait on the leader's `watch` channel (single-flight,
///   so each loader is invoked at most once per settled load).
///
/// Superseding a request does not cancel its loader; a stale load runs to
/// completion and still warms the cache. A loader that never settles leaves
/// its callers pending indefinitely — the registry imposes no timeouts.
pub struct Registry<C: Category, E> {
	table: VariantTable<C, E>,
	cache: VariantCache<C, E>,
	inflight: InFlightMap<C, E>,
}

impl<C: Category, E> Registry<C, E> {
	/// Creates a registry over a validated variant table.
	pub fn new(table: VariantTable<C, E>) -> Self {
		Self {
			table,
			cache: VariantCache::new(),
			inflight: Mutex::new(FxHashMap::default()),
		}
	}

	/// Returns the underlying variant table.
	pub fn table(&self) -> &VariantTable<C, E> {
		&self.table
	}

	/// Label/value options for a category, in declared order.
	pub fn options(&self, category: C) -> Result<Vec<VariantOption>, RegistryError> {
		self.table.options(category)
	}

	/// Effective default variant for a category.
	pub fn default_variant(&self, category: C) -> Result<&VariantDef<E>, RegistryError> {
		self.table.default_variant(category)
	}

	/// The variant a request for `requested` resolves to (requested key if
	/// declared, else the category default).
	pub fn effective_variant(&self, category: C, requested: &str) -> Result<&VariantDef<E>, RegistryError> {
		self.table.effective_variant(category, requested)
	}

	/// Returns the cached Entity for `(category, key)`, if one has settled.
	pub fn cached(&self, category: C, key: &str) -> Option<Arc<E>> {
		self.cache.get(category, key)
	}

	/// Returns true if an Entity has settled for `(category, key)`.
	pub fn is_cached(&self, category: C, key: &str) -> bool {
		self.cache.contains(category, key)
	}

	/// Creates a per-selection load session for a category.
	///
	/// The registry is shared behind an [`Arc`]; clone the handle when the
	/// registry itself is still needed afterwards.
	pub fn session(self: Arc<Self>, category: C) -> LoadSession<C, E> {
		LoadSession::new(self, category)
	}

	/// Resolves the Entity for `(category, requested)`, loading it on first use.
	///
	/// Resolution steps:
	/// 1. Map `requested` to its effective variant (silent default fallback).
	/// 2. Serve from the cache when the effective key has already settled;
	///    the loader is not re-invoked.
	/// 3. Otherwise invoke the variant's loader, memoize the Entity under the
	///    *effective* key, and return it. Concurrent callers for the same
	///    effective key share one loader invocation.
	///
	/// A loader failure is surfaced to the callers of this flight only and
	/// leaves no cache entry; the next resolve for the key retries.
	pub async fn load(&self, category: C, requested: &str) -> Result<Arc<E>, RegistryError> {
		let def = self.table.effective_variant(category, requested)?;
		let key = def.key.clone();
		let loader = def.loader.clone();

		// Fast path.
		if let Some(entity) = self.cache.get(category, &key) {
			debug!(?category, key = %key, "variant cache hit");
			return Ok(entity);
		}

		// Leader election.
		let (flight, is_leader) = {
			let mut inflight = self.inflight.lock();
			if let Some(f) = inflight.get(&(category, key.clone())) {
				(f.clone(), false)
			} else {
				let (tx, rx) = watch::channel(None);
				let f = Arc::new(InFlightLoad { tx, rx });
				inflight.insert((category, key.clone()), f.clone());
				(f, true)
			}
		};

		if !is_leader {
			// Wait for the leader to publish this flight's result.
			let mut rx = flight.rx.clone();
			loop {
				let published = {
					let borrow = rx.borrow();
					borrow.as_ref().cloned()
				};
				if let Some(result) = published {
					return match result.as_ref() {
						Ok(entity) => Ok(entity.clone()),
						Err(e) => Err(e.clone().into()),
					};
				}
				if rx.changed().await.is_err() {
					return Err(LoadError::Aborted.into());
				}
			}
		}

		let guard = FlightGuard {
			inflight: &self.inflight,
			key: (category, key.clone()),
			flight,
			completed: false,
		};

		// Re-check after election: a previous leader may have settled between
		// our cache miss and the map insert.
		if let Some(entity) = self.cache.get(category, &key) {
			return Ok(guard.complete(Ok(entity))?);
		}

		info!(?category, key = %key, "loading variant entity");
		let result = match loader().await {
			Ok(entity) => {
				let entity = Arc::new(entity);
				self.cache.insert(category, key.clone(), entity.clone());
				Ok(entity)
			}
			Err(e) => {
				warn!(?category, key = %key, error = %e, "variant loader failed");
				Err(e)
			}
		};
		Ok(guard.complete(result)?)
	}
}

/// Unwedges the in-flight map if the leader is dropped before publishing.
struct FlightGuard<'a, C: Category, E> {
	inflight: &'a InFlightMap<C, E>,
	key: (C, String),
	flight: Arc<InFlightLoad<E>>,
	completed: bool,
}

impl<C: Category, E> FlightGuard<'_, C, E> {
	/// Publishes the flight's result to waiters and retires the entry.
	///
	/// The entry is removed before publishing so a failure is never observed
	/// as still in flight: the next resolve elects a fresh leader and
	/// retries the loader. Successes are already in the cache by this point.
	fn complete(mut self, result: Result<Arc<E>, LoadError>) -> Result<Arc<E>, LoadError> {
		self.completed = true;
		self.inflight.lock().remove(&self.key);
		let _ = self.flight.tx.send(Some(Arc::new(result.clone())));
		result
	}
}

impl<C: Category, E> Drop for FlightGuard<'_, C, E> {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		// Leader cancelled mid-load: free the key and fail waiters
		// deterministically instead of leaving them parked forever.
		self.inflight.lock().remove(&self.key);
		let _ = self.flight.tx.send(Some(Arc::new(Err(LoadError::Aborted))));
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;
	use crate::def::VariantDef;

	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	enum Kind {
		Shape,
	}

	#[derive(Debug, PartialEq)]
	struct Entity(&'static str);

	fn counted(
		key: &'static str,
		label: &'static str,
		calls: &Arc<AtomicUsize>,
	) -> VariantDef<Entity> {
		let calls = calls.clone();
		VariantDef::new(key, label, move || {
			calls.fetch_add(1, Ordering::SeqCst);
			async move { Ok(Entity(key)) }
		})
	}

	fn shape_registry(
		circle_calls: &Arc<AtomicUsize>,
		square_calls: &Arc<AtomicUsize>,
	) -> Registry<Kind, Entity> {
		let table = VariantTable::builder()
			.category(
				Kind::Shape,
				vec![
					counted("circle", "Circle", circle_calls),
					counted("square", "Square", square_calls),
				],
			)
			.build()
			.unwrap();
		Registry::new(table)
	}

	#[tokio::test]
	async fn test_load_settles_once_and_serves_from_cache() {
		let circle = Arc::new(AtomicUsize::new(0));
		let square = Arc::new(AtomicUsize::new(0));
		let registry = shape_registry(&circle, &square);

		let first = registry.load(Kind::Shape, "square").await.unwrap();
		let second = registry.load(Kind::Shape, "square").await.unwrap();

		assert_eq!(*first, Entity("square"));
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(square.load(Ordering::SeqCst), 1);
		assert_eq!(circle.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_unknown_key_loads_default_and_caches_effective_key() {
		let circle = Arc::new(AtomicUsize::new(0));
		let square = Arc::new(AtomicUsize::new(0));
		let registry = shape_registry(&circle, &square);

		let via_fallback = registry.load(Kind::Shape, "triangle").await.unwrap();
		assert_eq!(*via_fallback, Entity("circle"));
		assert!(registry.is_cached(Kind::Shape, "circle"));
		assert!(!registry.is_cached(Kind::Shape, "triangle"));

		// A later request for the default key itself is a cache hit.
		let direct = registry.load(Kind::Shape, "circle").await.unwrap();
		assert!(Arc::ptr_eq(&via_fallback, &direct));
		assert_eq!(circle.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_failed_load_is_not_cached_and_retries() {
		let calls = Arc::new(AtomicUsize::new(0));
		let flaky = {
			let calls = calls.clone();
			VariantDef::new("flaky", "Flaky", move || {
				let attempt = calls.fetch_add(1, Ordering::SeqCst);
				async move {
					if attempt == 0 {
						Err(LoadError::Failed("boom".into()))
					} else {
						Ok(Entity("flaky"))
					}
				}
			})
		};
		let table = VariantTable::builder()
			.category(Kind::Shape, vec![flaky])
			.build()
			.unwrap();
		let registry = Registry::new(table);

		let err = registry.load(Kind::Shape, "flaky").await.unwrap_err();
		assert_eq!(err, RegistryError::Load(LoadError::Failed("boom".into())));
		assert!(!registry.is_cached(Kind::Shape, "flaky"));

		let entity = registry.load(Kind::Shape, "flaky").await.unwrap();
		assert_eq!(*entity, Entity("flaky"));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_concurrent_loads_share_one_flight() {
		let calls = Arc::new(AtomicUsize::new(0));
		let slow = {
			let calls = calls.clone();
			VariantDef::new("slow", "Slow", move || {
				calls.fetch_add(1, Ordering::SeqCst);
				async move {
					// Suspend once so the second caller starts before we settle.
					tokio::task::yield_now().await;
					Ok(Entity("slow"))
				}
			})
		};
		let table = VariantTable::builder()
			.category(Kind::Shape, vec![slow])
			.build()
			.unwrap();
		let registry = Registry::new(table);

		let (a, b) = tokio::join!(
			registry.load(Kind::Shape, "slow"),
			registry.load(Kind::Shape, "slow")
		);
		let (a, b) = (a.unwrap(), b.unwrap());

		assert!(Arc::ptr_eq(&a, &b));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_cancelled_leader_fails_waiters_and_frees_the_key() {
		let calls = Arc::new(AtomicUsize::new(0));
		// First invocation never settles; later invocations succeed.
		let stuck_once = {
			let calls = calls.clone();
			VariantDef::new("slow", "Slow", move || {
				let attempt = calls.fetch_add(1, Ordering::SeqCst);
				async move {
					if attempt == 0 {
						std::future::pending::<()>().await;
					}
					Ok(Entity("slow"))
				}
			})
		};
		let table = VariantTable::builder()
			.category(Kind::Shape, vec![stuck_once])
			.build()
			.unwrap();
		let registry = Arc::new(Registry::new(table));

		let leader = tokio::spawn({
			let registry = registry.clone();
			async move { registry.load(Kind::Shape, "slow").await }
		});
		tokio::task::yield_now().await;
		assert_eq!(calls.load(Ordering::SeqCst), 1);

		let waiter = tokio::spawn({
			let registry = registry.clone();
			async move { registry.load(Kind::Shape, "slow").await }
		});
		tokio::task::yield_now().await;

		// Dropping the leader mid-load must fail waiters deterministically
		// instead of leaving them parked on the flight forever.
		leader.abort();
		let err = waiter.await.unwrap().unwrap_err();
		assert_eq!(err, RegistryError::Load(LoadError::Aborted));

		// The key is unwedged: a fresh resolve elects a new leader.
		let entity = registry.load(Kind::Shape, "slow").await.unwrap();
		assert_eq!(*entity, Entity("slow"));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_concurrent_failure_is_shared_then_retried() {
		let calls = Arc::new(AtomicUsize::new(0));
		let failing = {
			let calls = calls.clone();
			VariantDef::new("bad", "Bad", move || {
				calls.fetch_add(1, Ordering::SeqCst);
				async move {
					tokio::task::yield_now().await;
					Err(LoadError::Failed("nope".into()))
				}
			})
		};
		let table = VariantTable::builder()
			.category(Kind::Shape, vec![failing])
			.build()
			.unwrap();
		let registry = Registry::new(table);

		let (a, b): (Result<Arc<Entity>, _>, Result<Arc<Entity>, _>) = tokio::join!(
			registry.load(Kind::Shape, "bad"),
			registry.load(Kind::Shape, "bad")
		);
		assert!(a.is_err());
		assert!(b.is_err());
		// One shared flight, not two invocations.
		assert_eq!(calls.load(Ordering::SeqCst), 1);

		// The failure was not cached; a fresh resolve retries.
		let _ = registry.load(Kind::Shape, "bad").await;
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
