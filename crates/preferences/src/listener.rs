//! Change events and the observer registries that deliver them.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::node::PreferenceNode;

/// Handle returned when registering a listener, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A key on a node changed value.
///
/// `old_value` is `None` when the key was newly added, `new_value` is `None`
/// when it was removed.
#[derive(Debug, Clone)]
pub struct PreferenceChangeEvent {
	pub node: PreferenceNode,
	pub key: String,
	pub old_value: Option<String>,
	pub new_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChange {
	Added,
	Removed,
}

/// A child was added to or removed from `parent`.
#[derive(Debug, Clone)]
pub struct NodeChangeEvent {
	pub parent: PreferenceNode,
	pub child: PreferenceNode,
	pub change: NodeChange,
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered listener registry.
///
/// Notification snapshots the current listeners and invokes them with no lock
/// held, so callbacks may freely re-enter the tree or (un)register listeners.
/// A panicking listener is logged and skipped.
pub(crate) struct ListenerList<E> {
	next_id: AtomicU64,
	entries: Mutex<Vec<(ListenerId, Callback<E>)>>,
}

impl<E> Default for ListenerList<E> {
	fn default() -> Self {
		Self {
			next_id: AtomicU64::new(0),
			entries: Mutex::new(Vec::new()),
		}
	}
}

impl<E> ListenerList<E> {
	pub(crate) fn add(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.entries.lock().push((id, Arc::new(callback)));
		id
	}

	pub(crate) fn remove(&self, id: ListenerId) -> bool {
		let mut entries = self.entries.lock();
		let before = entries.len();
		entries.retain(|(existing, _)| *existing != id);
		entries.len() != before
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	pub(crate) fn notify(&self, event: &E) {
		let snapshot: Vec<Callback<E>> = self.entries.lock().iter().map(|(_, cb)| cb.clone()).collect();
		for callback in snapshot {
			if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
				let message = payload
					.downcast_ref::<&str>()
					.map(|s| s.to_string())
					.or_else(|| payload.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "non-string panic payload".to_string());
				tracing::error!(panic = %message, "preference listener panicked");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[test]
	fn panicking_listener_does_not_stop_delivery() {
		let list = ListenerList::<u32>::default();
		let hits = Arc::new(AtomicUsize::new(0));

		list.add(|_| panic!("boom"));
		let counter = hits.clone();
		list.add(move |value| {
			counter.fetch_add(*value as usize, Ordering::SeqCst);
		});

		list.notify(&3);
		assert_eq!(hits.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn remove_by_id() {
		let list = ListenerList::<()>::default();
		let a = list.add(|_| {});
		let b = list.add(|_| {});
		assert!(list.remove(a));
		assert!(!list.remove(a));
		assert!(!list.is_empty());
		assert!(list.remove(b));
		assert!(list.is_empty());
	}

	#[test]
	fn listener_may_reenter_registry() {
		let list = Arc::new(ListenerList::<()>::default());
		let inner = list.clone();
		list.add(move |_| {
			inner.add(|_| {});
		});
		list.notify(&());
		list.notify(&());
		assert_eq!(list.entries.lock().len(), 3);
	}
}
