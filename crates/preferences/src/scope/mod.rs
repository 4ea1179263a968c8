//! Scope policies: where a subtree loads from and saves to.
//!
//! Every top-level node of the live tree is governed by one [`Scope`]. The
//! scope decides at which depth a subtree is persisted as one unit (the load
//! level), enumerates qualifiers already present in its backing store, and
//! moves whole load-level tables in and out of that store.

use std::path::PathBuf;

use arbor_primitives::Properties;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::node::PreferenceNode;

mod defaults;
mod file;
mod storage;

pub use defaults::{
	BUNDLE_DEFAULT_SCOPE, BUNDLE_DEFAULTS_FILE, BUNDLE_TRANSLATIONS_FILE, BundleDefaultScope, DEFAULT_SCOPE,
	DefaultLayers, DefaultScope, DefaultValues, PreferenceInitializer, translate,
};
pub use file::{CONFIGURATION_SCOPE, FileScope, INSTANCE_SCOPE, PREFS_DIR, PREFS_EXTENSION};
pub use storage::{ScopeStorage, StorageScope};

/// Load-level depth used by every built-in scope: `/scope/qualifier`.
pub const DEFAULT_LOAD_LEVEL_DEPTH: usize = 2;

/// Persistence policy for one top-level subtree.
pub trait Scope: Send + Sync {
	/// Top-level node name, e.g. `instance`.
	fn name(&self) -> &str;

	/// Segment count of the node that loads and saves its subtree as a unit.
	fn load_level_depth(&self) -> usize {
		DEFAULT_LOAD_LEVEL_DEPTH
	}

	/// Qualifiers present in the backing store below `scope_path`.
	///
	/// Called once when the scope root is created so its children are known
	/// before any of them is realized.
	fn children_names(&self, scope_path: &str) -> Result<Vec<String>>;

	/// Reads the table for the load-level `node`. `Ok(None)` means nothing is
	/// stored yet.
	fn load(&self, node: &PreferenceNode) -> Result<Option<Properties>>;

	/// Replaces the stored table for the load-level `node`.
	fn save(&self, node: &PreferenceNode, table: &Properties) -> Result<()>;

	/// The node at `path` was removed from the tree.
	fn removed(&self, _path: &str) -> Result<()> {
		Ok(())
	}

	fn is_already_loaded(&self, path: &str) -> bool;

	fn mark_loaded(&self, path: &str);

	/// Backing location of the load-level node at `path`, for diagnostics.
	fn location(&self, _path: &str) -> Option<PathBuf> {
		None
	}
}

/// Set of load-level paths that have been read from their backing store.
#[derive(Debug, Default)]
pub struct LoadTracker {
	loaded: Mutex<FxHashSet<String>>,
}

impl LoadTracker {
	pub fn contains(&self, path: &str) -> bool {
		self.loaded.lock().contains(path)
	}

	pub fn insert(&self, path: &str) {
		self.loaded.lock().insert(path.to_string());
	}

	pub fn remove(&self, path: &str) -> bool {
		self.loaded.lock().remove(path)
	}
}
