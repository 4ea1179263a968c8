//! State shared by every node of one preference tree.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arbor_primitives::StringPool;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::node::PreferenceNode;
use crate::scope::Scope;

/// Scope registry and string-sharing schedule for one tree.
///
/// Detached trees (export results, filter output) carry an empty registry and
/// never share strings.
pub(crate) struct TreeContext {
	scopes: RwLock<FxHashMap<String, Arc<dyn Scope>>>,
	sharing: Option<StringSharing>,
}

struct StringSharing {
	interval: Duration,
	last: Mutex<Option<Instant>>,
}

impl TreeContext {
	pub(crate) fn new(sharing_interval: Duration) -> Self {
		Self {
			scopes: RwLock::new(FxHashMap::default()),
			sharing: Some(StringSharing {
				interval: sharing_interval,
				last: Mutex::new(None),
			}),
		}
	}

	pub(crate) fn detached() -> Self {
		Self {
			scopes: RwLock::new(FxHashMap::default()),
			sharing: None,
		}
	}

	pub(crate) fn register_scope(&self, scope: Arc<dyn Scope>) -> Option<Arc<dyn Scope>> {
		let name = scope.name().to_string();
		tracing::debug!(scope = %name, "registered preference scope");
		self.scopes.write().insert(name, scope)
	}

	pub(crate) fn scope(&self, name: &str) -> Option<Arc<dyn Scope>> {
		self.scopes.read().get(name).cloned()
	}

	pub(crate) fn scope_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.scopes.read().keys().cloned().collect();
		names.sort();
		names
	}

	/// Interns every key and value of the tree containing `node` if the
	/// sharing interval has elapsed (or `force` is set).
	///
	/// Returns the number of duplicate strings collapsed, or `None` when the
	/// walk was skipped.
	pub(crate) fn share_strings(&self, node: &PreferenceNode, force: bool) -> Option<usize> {
		let sharing = self.sharing.as_ref()?;
		{
			let mut last = sharing.last.lock();
			if !force && last.is_some_and(|at| at.elapsed() < sharing.interval) {
				return None;
			}
			*last = Some(Instant::now());
		}

		let mut pool = StringPool::new();
		node.root().share_strings(&mut pool);
		let saved = pool.saved_string_count();
		tracing::trace!(saved, pooled = pool.len(), "shared preference strings");
		Some(saved)
	}
}
