//! Scopes backed by an externally supplied store.

use arbor_primitives::{Properties, path};

use super::{LoadTracker, Scope};
use crate::error::Result;
use crate::node::PreferenceNode;

/// Backing store for a scope contributed outside this crate.
///
/// Paths are absolute node paths of load-level nodes (`/scope/qualifier`).
pub trait ScopeStorage: Send + Sync {
	fn children_names(&self, scope_path: &str) -> Result<Vec<String>>;

	fn load(&self, path: &str) -> Result<Option<Properties>>;

	fn save(&self, path: &str, table: &Properties) -> Result<()>;

	fn removed(&self, _path: &str) -> Result<()> {
		Ok(())
	}
}

/// Adapts a [`ScopeStorage`] to the [`Scope`] policy.
pub struct StorageScope<S> {
	name: String,
	storage: S,
	load_level_depth: usize,
	loaded: LoadTracker,
}

impl<S: ScopeStorage> StorageScope<S> {
	pub fn new(name: impl Into<String>, storage: S) -> Self {
		Self {
			name: name.into(),
			storage,
			load_level_depth: super::DEFAULT_LOAD_LEVEL_DEPTH,
			loaded: LoadTracker::default(),
		}
	}

	/// Persists subtrees rooted `depth` segments below the tree root.
	///
	/// # Panics
	///
	/// Panics if `depth` is zero.
	pub fn with_load_level_depth(mut self, depth: usize) -> Self {
		assert!(depth > 0, "load level depth must be at least one");
		self.load_level_depth = depth;
		self
	}

	pub fn storage(&self) -> &S {
		&self.storage
	}
}

impl<S: ScopeStorage> Scope for StorageScope<S> {
	fn name(&self) -> &str {
		&self.name
	}

	fn load_level_depth(&self) -> usize {
		self.load_level_depth
	}

	fn children_names(&self, scope_path: &str) -> Result<Vec<String>> {
		self.storage.children_names(scope_path)
	}

	fn load(&self, node: &PreferenceNode) -> Result<Option<Properties>> {
		let table = self.storage.load(node.absolute_path())?;
		Ok(table.filter(|t| !t.is_empty()))
	}

	fn save(&self, node: &PreferenceNode, table: &Properties) -> Result<()> {
		self.storage.save(node.absolute_path(), table)
	}

	fn removed(&self, node_path: &str) -> Result<()> {
		if path::segment_count(node_path) != self.load_level_depth {
			return Ok(());
		}
		self.loaded.remove(node_path);
		self.storage.removed(node_path)
	}

	fn is_already_loaded(&self, path: &str) -> bool {
		self.loaded.contains(path)
	}

	fn mark_loaded(&self, path: &str) {
		self.loaded.insert(path);
	}
}
