//! The preference tree.
//!
//! A [`PreferenceNode`] is a cheap handle to one node of a shared tree. Each
//! node owns its children and an immutable [`PersistentMap`] of properties;
//! mutations swap the map under the node lock. Listener callbacks, scope I/O
//! and child loading always run with that lock released.
//!
//! Persistence happens at the *load level*: the ancestor (possibly the node
//! itself) whose segment count equals its scope's load-level depth. That node
//! is loaded once, when first created, and writes its whole subtree as one
//! table on [`flush`](PreferenceNode::flush).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arbor_primitives::path::{self, SEPARATOR};
use arbor_primitives::{PersistentMap, Properties, StringPool};
use parking_lot::{Mutex, ReentrantMutex};

use crate::error::{PreferenceError, Result};
use crate::listener::{
	ListenerId, ListenerList, NodeChange, NodeChangeEvent, PreferenceChangeEvent,
};
use crate::scope::Scope;
use crate::tree::TreeContext;

mod codec;

pub(crate) use codec::{decode_bytes, encode_bytes, parse_bool};

/// Reserved key recording the on-disk table format.
pub const VERSION_KEY: &str = "eclipse.preferences.version";
/// Current on-disk table format.
pub const VERSION_VALUE: &str = "1";

/// Handle to a node of a preference tree. Clones share the node; equality is
/// identity.
///
/// A handle keeps its own subtree alive. Ancestors are owned by the tree root,
/// so a node outlives its parent link only while someone holds the root.
#[derive(Clone)]
pub struct PreferenceNode {
	inner: Arc<NodeInner>,
}

struct NodeInner {
	name: Box<str>,
	path: Box<str>,
	parent: Weak<NodeInner>,
	scope: Option<Arc<dyn Scope>>,
	tree: Arc<TreeContext>,
	state: Mutex<NodeState>,
	/// Serializes child creation and the load that follows it. Reentrant so a
	/// load that navigates back into this node does not deadlock.
	creation: ReentrantMutex<()>,
	dirty: AtomicBool,
	loading: AtomicBool,
	removed: AtomicBool,
	preference_listeners: ListenerList<PreferenceChangeEvent>,
	node_listeners: ListenerList<NodeChangeEvent>,
}

#[derive(Default)]
struct NodeState {
	properties: PersistentMap,
	children: BTreeMap<Box<str>, ChildSlot>,
}

enum ChildSlot {
	/// Known to exist in the backing store, not yet materialized.
	Unrealized,
	Realized(PreferenceNode),
}

impl PreferenceNode {
	/// Root of a tree with no scopes. Such trees never load or save and hold
	/// import results, filter output and merges.
	pub fn detached_root() -> Self {
		Self::new_root(Arc::new(TreeContext::detached()))
	}

	pub(crate) fn new_root(tree: Arc<TreeContext>) -> Self {
		Self::from_inner(NodeInner::new("", SEPARATOR.to_string(), Weak::new(), None, tree))
	}

	pub(crate) fn live_root(sharing_interval: Duration) -> Self {
		Self::new_root(Arc::new(TreeContext::new(sharing_interval)))
	}

	fn from_inner(inner: NodeInner) -> Self {
		Self {
			inner: Arc::new(inner),
		}
	}

	pub(crate) fn tree(&self) -> &Arc<TreeContext> {
		&self.inner.tree
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// `/` for the root, otherwise the parent path joined with the name.
	pub fn absolute_path(&self) -> &str {
		&self.inner.path
	}

	pub fn is_root(&self) -> bool {
		self.inner.parent.upgrade().is_none() && &*self.inner.path == "/"
	}

	pub fn is_dirty(&self) -> bool {
		self.inner.dirty.load(Ordering::Acquire)
	}

	pub fn is_removed(&self) -> bool {
		self.inner.removed.load(Ordering::Acquire)
	}

	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn parent(&self) -> Option<PreferenceNode> {
		self.check_removed();
		self.parent_node()
	}

	fn parent_node(&self) -> Option<PreferenceNode> {
		self.inner.parent.upgrade().map(|inner| PreferenceNode { inner })
	}

	/// Topmost reachable ancestor.
	pub fn root(&self) -> PreferenceNode {
		let mut node = self.clone();
		while let Some(parent) = node.parent_node() {
			node = parent;
		}
		node
	}

	fn check_removed(&self) {
		if self.is_removed() {
			panic!("preference node {} has been removed", self.inner.path);
		}
	}

	/// Navigates to `path`, creating missing nodes.
	///
	/// Relative paths start at this node; absolute paths start at this node's
	/// tree root. Each newly created child fires a node-added event on its
	/// parent.
	///
	/// # Panics
	///
	/// Panics if this node has been removed or `path` has an empty interior
	/// segment (`a//b`).
	pub fn node(&self, path: &str) -> PreferenceNode {
		self.navigate(path, true)
	}

	pub(crate) fn navigate(&self, path: &str, notify: bool) -> PreferenceNode {
		self.check_removed();
		check_path(path);
		match path.strip_prefix(SEPARATOR) {
			Some(rest) => self.root().descend(rest, notify),
			None => self.descend(path, notify),
		}
	}

	fn descend(&self, path: &str, notify: bool) -> PreferenceNode {
		if path.is_empty() {
			return self.clone();
		}
		let (name, rest) = path.split_once(SEPARATOR).unwrap_or((path, ""));
		self.child_or_create(name, notify).descend(rest, notify)
	}

	/// Whether the node at `path` exists. An empty path asks about this node
	/// and is the one query allowed on a removed node.
	///
	/// # Panics
	///
	/// Panics if this node has been removed and `path` is not empty, or if
	/// `path` has an empty interior segment.
	pub fn node_exists(&self, path: &str) -> bool {
		if path.is_empty() {
			return !self.is_removed();
		}
		self.check_removed();
		check_path(path);
		match path.strip_prefix(SEPARATOR) {
			Some(rest) => self.root().has_descendant(rest),
			None => self.has_descendant(path),
		}
	}

	fn has_descendant(&self, path: &str) -> bool {
		match path.split_once(SEPARATOR) {
			None => path.is_empty() || self.has_child(path),
			Some((name, rest)) => self
				.existing_child(name)
				.is_some_and(|child| child.has_descendant(rest)),
		}
	}

	fn has_child(&self, name: &str) -> bool {
		self.inner.state.lock().children.contains_key(name)
	}

	/// Returns the child `name`, realizing a placeholder but never creating.
	fn existing_child(&self, name: &str) -> Option<PreferenceNode> {
		if !self.has_child(name) {
			return None;
		}
		Some(self.child_or_create(name, false))
	}

	fn lookup_slot(&self, name: &str) -> Option<Option<PreferenceNode>> {
		let state = self.inner.state.lock();
		state.children.get(name).map(|slot| match slot {
			ChildSlot::Unrealized => None,
			ChildSlot::Realized(node) => Some(node.clone()),
		})
	}

	/// The child `name` if it has already been materialized.
	pub(crate) fn realized_child(&self, name: &str) -> Option<PreferenceNode> {
		self.lookup_slot(name).flatten()
	}

	fn child_or_create(&self, name: &str, notify: bool) -> PreferenceNode {
		if let Some(Some(node)) = self.lookup_slot(name) {
			if node.inner.loading.load(Ordering::Acquire) {
				// Wait for a load running on another thread.
				let _settled = self.inner.creation.lock();
			}
			return node;
		}

		let creating = self.inner.creation.lock();
		let added = match self.lookup_slot(name) {
			Some(Some(node)) => return node,
			Some(None) => false,
			None => true,
		};
		let child = self.new_child(name);
		self.inner
			.state
			.lock()
			.children
			.insert(name.into(), ChildSlot::Realized(child.clone()));
		child.finish_load();
		drop(creating);

		if added && notify {
			self.inner.node_listeners.notify(&NodeChangeEvent {
				parent: self.clone(),
				child: child.clone(),
				change: NodeChange::Added,
			});
		}
		child
	}

	fn new_child(&self, name: &str) -> PreferenceNode {
		let scope = if self.is_root() {
			self.inner.tree.scope(name)
		} else {
			self.inner.scope.clone()
		};
		let path = if self.is_root() {
			format!("{SEPARATOR}{name}")
		} else {
			format!("{}{SEPARATOR}{name}", self.inner.path)
		};

		let inner = NodeInner::new(name, path, Arc::downgrade(&self.inner), scope, self.inner.tree.clone());
		let child = Self::from_inner(inner);

		if let Some(scope) = &child.inner.scope {
			let count = path::segment_count(&child.inner.path);
			if count == 1 {
				child.populate_from_store(scope.as_ref());
			}
			if count == scope.load_level_depth() && !scope.is_already_loaded(&child.inner.path) {
				child.inner.loading.store(true, Ordering::Release);
			}
		}
		child
	}

	/// Records `name` as a child without creating it.
	pub(crate) fn add_placeholder(&self, name: &str) {
		self.inner
			.state
			.lock()
			.children
			.entry(name.into())
			.or_insert(ChildSlot::Unrealized);
	}

	/// Registers placeholders for qualifiers already present in the store.
	fn populate_from_store(&self, scope: &dyn Scope) {
		match scope.children_names(&self.inner.path) {
			Ok(names) => {
				let mut state = self.inner.state.lock();
				for name in names {
					state
						.children
						.entry(name.into_boxed_str())
						.or_insert(ChildSlot::Unrealized);
				}
			}
			Err(error) => {
				tracing::error!(path = %self.inner.path, %error, "failed to enumerate stored preferences");
			}
		}
	}

	/// Runs the initial load of a freshly created load-level node.
	fn finish_load(&self) {
		if !self.inner.loading.load(Ordering::Acquire) {
			return;
		}
		let Some(scope) = self.inner.scope.clone() else {
			self.inner.loading.store(false, Ordering::Release);
			return;
		};
		let result = self.load_level_table().and_then(|()| {
			scope.mark_loaded(&self.inner.path);
			self.flush_tree()
		});
		if let Err(error) = result {
			let location = scope.location(&self.inner.path);
			tracing::error!(
				path = %self.inner.path,
				location = ?location,
				%error,
				"failed to load preferences"
			);
		}
		self.inner.loading.store(false, Ordering::Release);
	}

	/// The node that loads and saves this node's subtree, if any.
	pub fn load_level(&self) -> Option<PreferenceNode> {
		let scope = self.inner.scope.as_ref()?;
		let depth = scope.load_level_depth();
		let count = path::segment_count(&self.inner.path);
		if count < depth {
			return None;
		}
		let mut node = self.clone();
		for _ in 0..count - depth {
			node = node.parent_node()?;
		}
		Some(node)
	}

	/// Re-reads the load level's table from its backing store and installs it
	/// without firing change events.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn load(&self) -> Result<()> {
		self.check_removed();
		match self.load_level() {
			Some(level) => level.load_level_table(),
			None => Ok(()),
		}
	}

	fn load_level_table(&self) -> Result<()> {
		let Some(scope) = self.inner.scope.clone() else {
			return Ok(());
		};
		let table = scope
			.load(self)
			.map_err(|error| PreferenceError::load_failed(self.inner.path.to_string(), error))?;
		if let Some(table) = table {
			tracing::debug!(path = %self.inner.path, entries = table.len(), "loaded preferences");
			self.install(table, false);
		}
		Ok(())
	}

	/// Child names, including stored qualifiers not yet realized.
	///
	/// A scope root with an empty table asks its scope directly.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn children_names(&self) -> Result<Vec<String>> {
		self.check_removed();
		let names: Vec<String> = self
			.inner
			.state
			.lock()
			.children
			.keys()
			.map(|name| name.to_string())
			.collect();
		if names.is_empty()
			&& let Some(scope) = &self.inner.scope
			&& path::segment_count(&self.inner.path) == 1
		{
			return scope.children_names(&self.inner.path);
		}
		Ok(names)
	}

	/// Children of this node in name order; `realize` materializes stored
	/// placeholders.
	pub(crate) fn children(&self, realize: bool) -> Vec<PreferenceNode> {
		let slots: Vec<(Box<str>, Option<PreferenceNode>)> = {
			let state = self.inner.state.lock();
			state
				.children
				.iter()
				.map(|(name, slot)| match slot {
					ChildSlot::Unrealized => (name.clone(), None),
					ChildSlot::Realized(node) => (name.clone(), Some(node.clone())),
				})
				.collect()
		};
		slots
			.into_iter()
			.filter_map(|(name, node)| match node {
				Some(node) => Some(node),
				None if realize => Some(self.child_or_create(&name, false)),
				None => None,
			})
			.collect()
	}

	/// Property keys on this node.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn keys(&self) -> Vec<String> {
		let state = self.inner.state.lock();
		self.check_removed();
		state.properties.keys().map(str::to_string).collect()
	}

	/// Snapshot of this node's properties.
	pub(crate) fn properties(&self) -> PersistentMap {
		self.inner.state.lock().properties.clone()
	}

	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn get(&self, key: &str) -> Option<String> {
		self.get_shared(key).map(|value| value.to_string())
	}

	pub(crate) fn get_shared(&self, key: &str) -> Option<Arc<str>> {
		let state = self.inner.state.lock();
		self.check_removed();
		state.properties.get_shared(key)
	}

	pub fn get_or(&self, key: &str, default: &str) -> String {
		self.get(key).unwrap_or_else(|| default.to_string())
	}

	/// Sets `key` to `value`.
	///
	/// Writing the value already present is a no-op: nothing is marked dirty
	/// and no event fires. Otherwise this node and every ancestor become
	/// dirty and listeners receive the old and new value.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn put(&self, key: &str, value: &str) {
		let old = self.internal_put(key, value);
		if old.as_deref() == Some(value) {
			return;
		}
		self.make_dirty();
		self.fire_preference_event(key, old, Some(value));
	}

	/// Swaps in `value` and returns the previous one. Marks nothing dirty.
	pub(crate) fn internal_put(&self, key: &str, value: &str) -> Option<Arc<str>> {
		let mut state = self.inner.state.lock();
		self.check_removed();
		let old = state.properties.get_shared(key);
		if old.as_deref() == Some(value) {
			return old;
		}
		state.properties = state.properties.put(key, value);
		old
	}

	/// Removes `key`. Absent keys are a no-op.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn remove(&self, key: &str) {
		let old = {
			let mut state = self.inner.state.lock();
			self.check_removed();
			let Some(old) = state.properties.get_shared(key) else {
				return;
			};
			state.properties = state.properties.remove_key(key);
			old
		};
		self.make_dirty();
		self.fire_preference_event(key, Some(old), None);
	}

	/// Removes every key, notifying once per key, then marks the node dirty.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn clear(&self) {
		for key in self.keys() {
			self.remove(&key);
		}
		self.make_dirty();
	}

	pub(crate) fn make_dirty(&self) {
		let mut node = Some(self.clone());
		while let Some(current) = node {
			if current.is_removed() {
				break;
			}
			current.inner.dirty.store(true, Ordering::Release);
			node = current.parent_node();
		}
	}

	fn fire_preference_event(&self, key: &str, old: Option<Arc<str>>, new: Option<&str>) {
		let listeners = &self.inner.preference_listeners;
		if listeners.is_empty() {
			return;
		}
		listeners.notify(&PreferenceChangeEvent {
			node: self.clone(),
			key: key.to_string(),
			old_value: old.map(|value| value.to_string()),
			new_value: new.map(str::to_string),
		});
	}

	/// Removes this node and its subtree.
	///
	/// Every key is removed with a change event first. The tree root and scope
	/// roots are never detached; only their contents are removed. Every other
	/// node is detached from its parent, which becomes dirty and fires a
	/// node-removed event, and is unusable afterwards. Scope failures (such as
	/// a backing file that cannot be deleted) are reported after the whole
	/// subtree has been processed.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn remove_node(&self) -> Result<()> {
		self.check_removed();
		for key in self.keys() {
			self.remove(&key);
		}

		let children = self.children(true);
		let mut first_error = None;

		let scope_root = self.inner.scope.is_some() && path::segment_count(&self.inner.path) == 1;
		if let Some(parent) = self.parent_node().filter(|_| !scope_root) {
			self.inner.removed.store(true, Ordering::Release);
			if let Err(error) = parent.detach_child(self) {
				first_error.get_or_insert(error);
			}
		}

		for child in children {
			if child.is_removed() {
				continue;
			}
			if let Err(error) = child.remove_node() {
				first_error.get_or_insert(error);
			}
		}
		match first_error {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	fn detach_child(&self, child: &PreferenceNode) -> Result<()> {
		let removed = self.inner.state.lock().children.remove(child.name()).is_some();
		if !removed {
			return Ok(());
		}
		self.make_dirty();
		self.inner.node_listeners.notify(&NodeChangeEvent {
			parent: self.clone(),
			child: child.clone(),
			change: NodeChange::Removed,
		});
		match &self.inner.scope {
			Some(scope) => scope.removed(child.absolute_path()),
			None => Ok(()),
		}
	}

	/// Persists pending changes.
	///
	/// Above the load level the flush fans out to every realized child; every
	/// child is attempted and the first failure is returned. Below it the
	/// flush is routed to the load level. At the load level a dirty subtree
	/// is written as one table: the dirty flags are cleared before writing
	/// and restored on failure.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn flush(&self) -> Result<()> {
		self.check_removed();
		let result = self.flush_tree();
		self.inner.tree.share_strings(self, false);
		result
	}

	fn flush_tree(&self) -> Result<()> {
		match self.load_level() {
			None => self.flush_children(),
			Some(level) if level != *self => level.flush_level(),
			Some(_) => self.flush_level(),
		}
	}

	fn flush_children(&self) -> Result<()> {
		let mut first_error = None;
		for child in self.children(false) {
			if child.is_removed() {
				continue;
			}
			if let Err(error) = child.flush_tree() {
				tracing::warn!(path = %child.absolute_path(), %error, "flush failed");
				first_error.get_or_insert(error);
			}
		}
		match first_error {
			Some(error) => Err(error),
			None => {
				self.inner.dirty.store(false, Ordering::Release);
				Ok(())
			}
		}
	}

	fn flush_level(&self) -> Result<()> {
		if !self.inner.dirty.swap(false, Ordering::AcqRel) {
			return Ok(());
		}
		self.clear_descendant_dirt();

		let Some(scope) = self.inner.scope.clone() else {
			return Ok(());
		};
		let table = self.to_properties();
		if let Err(error) = scope.save(self, &table) {
			self.inner.dirty.store(true, Ordering::Release);
			return Err(PreferenceError::save_failed(self.inner.path.to_string(), error));
		}
		tracing::debug!(path = %self.inner.path, entries = table.len(), "saved preferences");
		Ok(())
	}

	fn clear_descendant_dirt(&self) {
		for child in self.children(false) {
			child.inner.dirty.store(false, Ordering::Release);
			child.clear_descendant_dirt();
		}
	}

	/// Reloads the load level from its backing store, then flushes it.
	///
	/// # Panics
	///
	/// Panics if this node has been removed.
	pub fn sync(&self) -> Result<()> {
		self.check_removed();
		let Some(level) = self.load_level() else {
			tracing::debug!(path = %self.inner.path, "sync on a node without a load level");
			return Ok(());
		};
		level.load_level_table()?;
		level.flush()
	}

	/// Pre-order walk over this subtree, realizing stored placeholders.
	/// Returning `false` from the visitor skips that node's children.
	pub fn accept<F>(&self, visitor: &mut F) -> Result<()>
	where
		F: FnMut(&PreferenceNode) -> Result<bool>,
	{
		if !visitor(self)? {
			return Ok(());
		}
		for child in self.children(true) {
			if !child.is_removed() {
				child.accept(visitor)?;
			}
		}
		Ok(())
	}

	/// Infallible pre-order walk over this subtree.
	fn walk(&self, visitor: &mut impl FnMut(&PreferenceNode)) {
		visitor(self);
		for child in self.children(true) {
			if !child.is_removed() {
				child.walk(visitor);
			}
		}
	}

	/// Replaces every string of this subtree with the pool's canonical copy.
	pub(crate) fn share_strings(&self, pool: &mut StringPool) {
		let snapshot = self.properties();
		let shared = snapshot.share_strings(pool);
		{
			let mut state = self.inner.state.lock();
			if state.properties.ptr_eq(&snapshot) {
				state.properties = shared;
			}
		}
		for child in self.children(false) {
			child.share_strings(pool);
		}
	}

	/// Every node path followed by its `path/key=value` lines.
	pub fn to_deep_debug_string(&self) -> String {
		let mut out = String::new();
		self.walk(&mut |node: &PreferenceNode| {
			out.push_str(node.absolute_path());
			out.push('\n');
			let properties = node.properties();
			let mut entries: Vec<_> = properties.iter().collect();
			entries.sort_unstable();
			for (key, value) in entries {
				let prefix = node.absolute_path().trim_end_matches(SEPARATOR);
				out.push_str(&format!("{prefix}{SEPARATOR}{key}={value}\n"));
			}
		});
		out
	}

	pub fn add_preference_change_listener(
		&self,
		listener: impl Fn(&PreferenceChangeEvent) + Send + Sync + 'static,
	) -> ListenerId {
		self.check_removed();
		self.inner.preference_listeners.add(listener)
	}

	pub fn remove_preference_change_listener(&self, id: ListenerId) -> bool {
		self.check_removed();
		self.inner.preference_listeners.remove(id)
	}

	pub fn add_node_change_listener(&self, listener: impl Fn(&NodeChangeEvent) + Send + Sync + 'static) -> ListenerId {
		self.check_removed();
		self.inner.node_listeners.add(listener)
	}

	pub fn remove_node_change_listener(&self, id: ListenerId) -> bool {
		self.check_removed();
		self.inner.node_listeners.remove(id)
	}

	/// Flattens this subtree into one table keyed by encoded relative paths.
	pub fn to_properties(&self) -> Properties {
		let mut table = Properties::new();
		self.collect_properties(&mut table, "");
		table
	}
}

/// Rejects paths with an empty interior segment.
fn check_path(node_path: &str) {
	assert!(
		!node_path.contains(path::DOUBLE_SEPARATOR),
		"empty segment in preference path {node_path:?}"
	);
}

impl NodeInner {
	fn new(
		name: &str,
		path: String,
		parent: Weak<NodeInner>,
		scope: Option<Arc<dyn Scope>>,
		tree: Arc<TreeContext>,
	) -> Self {
		Self {
			name: name.into(),
			path: path.into_boxed_str(),
			parent,
			scope,
			tree,
			state: Mutex::new(NodeState::default()),
			creation: ReentrantMutex::new(()),
			dirty: AtomicBool::new(false),
			loading: AtomicBool::new(false),
			removed: AtomicBool::new(false),
			preference_listeners: ListenerList::default(),
			node_listeners: ListenerList::default(),
		}
	}
}

impl PartialEq for PreferenceNode {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for PreferenceNode {}

impl fmt::Debug for PreferenceNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PreferenceNode")
			.field("path", &self.inner.path)
			.field("dirty", &self.is_dirty())
			.field("removed", &self.is_removed())
			.finish()
	}
}

impl fmt::Display for PreferenceNode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.inner.path)
	}
}
