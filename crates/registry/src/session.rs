//! Per-selection load state.
//!
//! The registry deliberately keeps no global loading flag. Each consumer
//! view owns a [`LoadSession`] scoped to one category; the session tracks
//! the lifecycle of that view's *current* selection only, so rapid
//! selection changes in one view cannot flicker another view's indicator.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::def::{Category, LoadState};
use crate::error::RegistryError;
use crate::registry::Registry;

/// Point-in-time view of a session's resolution state.
#[derive(Debug)]
pub struct SessionSnapshot<E> {
	/// Lifecycle of the most recent selection.
	pub state: LoadState,
	/// Entity last surfaced for a current selection, if any.
	///
	/// While a new selection is loading, the previously surfaced Entity
	/// remains visible here; it is replaced only once the new selection
	/// settles while still current.
	pub entity: Option<Arc<E>>,
}

// Manual impl: the Entity is held behind an `Arc` and stays opaque, so a
// derived `E: Clone` bound would be wrong.
impl<E> Clone for SessionSnapshot<E> {
	fn clone(&self) -> Self {
		Self {
			state: self.state,
			entity: self.entity.clone(),
		}
	}
}

impl<E> Default for SessionSnapshot<E> {
	fn default() -> Self {
		Self {
			state: LoadState::Idle,
			entity: None,
		}
	}
}

/// Tracks loading state for one caller's selection stream within a category.
///
/// Re-issue [`select`](Self::select) whenever the requested key changes.
/// Every settled Entity lands in the registry's cache regardless of timing,
/// but a selection superseded before its loader settles is *stale*: its
/// result is not surfaced as the session's current entity.
///
/// Observers either poll [`snapshot`](Self::snapshot) /
/// [`is_loading`](Self::is_loading) or await change notifications from
/// [`subscribe`](Self::subscribe).
pub struct LoadSession<C: Category, E> {
	registry: Arc<Registry<C, E>>,
	category: C,
	generation: AtomicU64,
	state: watch::Sender<SessionSnapshot<E>>,
}

impl<C: Category, E> LoadSession<C, E> {
	pub(crate) fn new(registry: Arc<Registry<C, E>>, category: C) -> Self {
		let (tx, _rx) = watch::channel(SessionSnapshot::default());
		Self {
			registry,
			category,
			generation: AtomicU64::new(0),
			state: tx,
		}
	}

	/// The category this session resolves within.
	pub fn category(&self) -> C {
		self.category
	}

	/// Current state and entity.
	pub fn snapshot(&self) -> SessionSnapshot<E> {
		self.state.borrow().clone()
	}

	/// True while a loader for the current selection is in flight.
	pub fn is_loading(&self) -> bool {
		self.state.borrow().state == LoadState::Loading
	}

	/// The entity surfaced for the current selection, if one has settled.
	pub fn current(&self) -> Option<Arc<E>> {
		self.state.borrow().entity.clone()
	}

	/// Subscribes to snapshot changes.
	pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot<E>> {
		self.state.subscribe()
	}

	/// Resolves the Entity for the requested key and makes it this
	/// session's current selection.
	///
	/// Unknown keys silently fall back to the category default. A cache hit
	/// settles immediately without ever exposing a `Loading` state; a miss
	/// publishes `Loading` (keeping the previous entity visible), awaits the
	/// load, then publishes `Settled` with the new Entity — unless a newer
	/// `select` superseded this one, in which case the result is returned to
	/// the caller and cached but not surfaced.
	///
	/// On loader failure the session returns to `Idle` (previous entity
	/// retained) and the error propagates; re-issue `select` to retry.
	pub async fn select(&self, requested: &str) -> Result<Arc<E>, RegistryError> {
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let key = self
			.registry
			.effective_variant(self.category, requested)?
			.key
			.clone();

		if let Some(entity) = self.registry.cached(self.category, &key) {
			self.publish(generation, LoadState::Settled, Some(entity.clone()));
			return Ok(entity);
		}

		self.publish(generation, LoadState::Loading, None);
		match self.registry.load(self.category, &key).await {
			Ok(entity) => {
				self.publish(generation, LoadState::Settled, Some(entity.clone()));
				Ok(entity)
			}
			Err(e) => {
				self.publish(generation, LoadState::Idle, None);
				Err(e)
			}
		}
	}

	/// Publishes a snapshot change if `generation` is still the current
	/// selection. `None` for the entity keeps the previous one visible.
	///
	/// The currency check runs inside the sender's critical section, so a
	/// stale settle serialized after a newer select's publish can never
	/// overwrite the newer snapshot. Stale publishes notify no one.
	fn publish(&self, generation: u64, state: LoadState, entity: Option<Arc<E>>) {
		self.state.send_if_modified(|snapshot| {
			if self.generation.load(Ordering::SeqCst) != generation {
				return false;
			}
			snapshot.state = state;
			if let Some(entity) = entity {
				snapshot.entity = Some(entity);
			}
			true
		});
	}
}
