//! The preference service: the live tree plus everything that works across
//! scopes.
//!
//! Reads go through [`PreferencesService::get_nodes`], which turns a qualifier
//! and key into an ordered list of nodes, one per scope of the lookup order.
//! Transfers move whole subtrees in and out of the live tree through the
//! export stream format in [`transfer`].

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arbor_primitives::path;
use parking_lot::RwLock;

use crate::config::PreferencesConfig;
use crate::error::Result;
use crate::node::{PreferenceNode, decode_bytes, parse_bool};
use crate::scope::{
	BUNDLE_DEFAULT_SCOPE, BundleDefaultScope, DEFAULT_SCOPE, DefaultLayers, DefaultScope, FileScope,
	PreferenceInitializer, Scope,
};

mod filter;
mod lookup;
pub mod transfer;
mod versions;

#[cfg(test)]
mod tests;

pub use filter::{
	FilterEntry, MatchType, PreferenceFilter, ScopeMapping, copy_from_to, filter_matches, merge_trees, trim_tree,
};
pub use lookup::{DEFAULT_LOOKUP_ORDER, NodeScopeContext, ScopeContext};
pub use transfer::{ExportedPreferences, read_preferences};
pub use versions::{BundleVersions, Severity, VersionIssue, VersionReport, validate_plugin_versions};

use lookup::LookupOrders;

/// Called with the tree about to be applied; returns the tree to apply
/// instead.
pub type PreApplyHook = Arc<dyn Fn(PreferenceNode) -> PreferenceNode + Send + Sync>;

/// Owner of the live preference tree.
pub struct PreferencesService {
	root: PreferenceNode,
	layers: Arc<DefaultLayers>,
	lookup: LookupOrders,
	bundle_versions: RwLock<Arc<dyn BundleVersions>>,
	pre_apply_hooks: RwLock<Vec<PreApplyHook>>,
}

impl PreferencesService {
	/// Builds the live tree with the `bundle_defaults`, `default`, `instance`
	/// and `configuration` scopes registered.
	pub fn new(config: &PreferencesConfig) -> Result<Self> {
		let service = Self::build(config);
		if let Some(order) = &config.default_lookup_order {
			service.lookup.set_fallback(order.clone())?;
		}
		Ok(service)
	}

	/// A service with no backing directories; nothing outlives the process.
	pub fn in_memory() -> Self {
		Self::build(&PreferencesConfig::default())
	}

	fn build(config: &PreferencesConfig) -> Self {
		let layers = Arc::new(DefaultLayers::new(
			config.product_customization.clone(),
			config.command_line_customization.clone(),
		));
		for (qualifier, dir) in &config.bundle_locations {
			layers.set_bundle_location(qualifier, dir.clone());
		}

		let bundle_versions: Arc<dyn BundleVersions> = Arc::new(config.bundle_versions.clone());
		let service = Self {
			root: PreferenceNode::live_root(config.string_sharing_interval()),
			layers: layers.clone(),
			lookup: LookupOrders::new(None),
			bundle_versions: RwLock::new(bundle_versions),
			pre_apply_hooks: RwLock::new(Vec::new()),
		};
		service.register_scope(Arc::new(BundleDefaultScope::new(layers.clone())));
		service.register_scope(Arc::new(DefaultScope::new(layers)));
		service.register_scope(Arc::new(FileScope::instance(config.instance_location.clone())));
		service.register_scope(Arc::new(FileScope::configuration(config.configuration_location.clone())));
		service
	}

	/// Root of the live tree.
	pub fn root(&self) -> &PreferenceNode {
		&self.root
	}

	/// Registers `scope` under its name and returns the scope it replaced.
	///
	/// A scope node that already exists keeps the scope it was created with.
	pub fn register_scope(&self, scope: Arc<dyn Scope>) -> Option<Arc<dyn Scope>> {
		let name = scope.name().to_string();
		let previous = self.root.tree().register_scope(scope);
		self.root.add_placeholder(&name);
		previous
	}

	/// Names of the registered scopes.
	pub fn scopes(&self) -> Vec<String> {
		self.root.tree().scope_names()
	}

	/// Adds programmatic defaults for `qualifier`. Default nodes already
	/// loaded for the qualifier pick the new values up immediately.
	pub fn register_initializer(&self, qualifier: &str, initializer: impl PreferenceInitializer + 'static) {
		self.layers.register_initializer(qualifier, Arc::new(initializer));
		for scope in [BUNDLE_DEFAULT_SCOPE, DEFAULT_SCOPE] {
			let scope_node = self.root.node(scope);
			scope_node.add_placeholder(qualifier);
			if let Some(node) = scope_node.realized_child(qualifier)
				&& let Err(error) = node.load()
			{
				tracing::error!(path = %node.absolute_path(), %error, "failed to refresh defaults");
			}
		}
	}

	pub fn set_bundle_versions(&self, versions: Arc<dyn BundleVersions>) {
		*self.bundle_versions.write() = versions;
	}

	fn bundle_versions(&self) -> Arc<dyn BundleVersions> {
		self.bundle_versions.read().clone()
	}

	pub fn add_pre_apply_hook(&self, hook: impl Fn(PreferenceNode) -> PreferenceNode + Send + Sync + 'static) {
		self.pre_apply_hooks.write().push(Arc::new(hook));
	}

	fn fire_pre_apply(&self, tree: PreferenceNode) -> PreferenceNode {
		let hooks = self.pre_apply_hooks.read().clone();
		hooks.into_iter().fold(tree, |tree, hook| {
			match catch_unwind(AssertUnwindSafe(|| hook(tree.clone()))) {
				Ok(replaced) => replaced,
				Err(_) => {
					tracing::error!(path = %tree.absolute_path(), "pre-apply hook panicked");
					tree
				}
			}
		})
	}

	/// Flushes the whole live tree. Every scope is attempted; the first
	/// failure is returned.
	pub fn shutdown(&self) -> Result<()> {
		let result = self.root.flush();
		if let Err(error) = &result {
			tracing::error!(%error, "failed to flush preferences on shutdown");
		}
		result
	}

	/// Lookup order for `key` of `qualifier`: the key-specific order, else the
	/// qualifier order, else the default order.
	pub fn get_lookup_order(&self, qualifier: &str, key: Option<&str>) -> Vec<String> {
		self.lookup.resolve(qualifier, key)
	}

	/// The order registered for exactly `qualifier` (and `key`), if any.
	pub fn get_default_lookup_order(&self, qualifier: &str, key: Option<&str>) -> Option<Vec<String>> {
		self.lookup.registered(qualifier, key)
	}

	/// Registers an order for `qualifier` (and `key`); `None` removes it.
	pub fn set_default_lookup_order(&self, qualifier: &str, key: Option<&str>, order: Option<Vec<String>>) -> Result<()> {
		self.lookup.set(qualifier, key, order)
	}

	pub fn default_default_lookup_order(&self) -> Vec<String> {
		self.lookup.fallback()
	}

	pub fn set_default_default_lookup_order(&self, order: Vec<String>) -> Result<()> {
		self.lookup.set_fallback(order)
	}

	/// Nodes to search for `key` of `qualifier`, in lookup order.
	///
	/// `key` may carry a relative node path (`sub/key`). A context whose name
	/// matches a scope of the order supplies that scope's node; other scopes
	/// resolve against the live tree. A panicking context is logged and
	/// skipped.
	pub fn get_nodes(&self, qualifier: &str, key: &str, contexts: &[&dyn ScopeContext]) -> Vec<PreferenceNode> {
		let child_path = path::decode_path(key).0.unwrap_or("");
		let mut nodes = Vec::new();
		for scope in self.lookup.resolve(qualifier, Some(key)) {
			let mut found = false;
			for context in contexts.iter().filter(|context| context.name() == scope) {
				match catch_unwind(AssertUnwindSafe(|| context.node(qualifier).map(|node| node.node(child_path)))) {
					Ok(Some(node)) => {
						found = true;
						nodes.push(node);
					}
					Ok(None) => {}
					Err(_) => tracing::error!(scope = %scope, qualifier, "scope context panicked"),
				}
			}
			if !found {
				nodes.push(self.root.node(&scope).node(qualifier).node(child_path));
			}
		}
		nodes
	}

	/// First value of `key` among `nodes`.
	pub fn get(&self, key: &str, nodes: &[PreferenceNode]) -> Option<String> {
		nodes.iter().find_map(|node| node.get(key))
	}

	fn lookup_value(&self, qualifier: &str, key: &str, contexts: &[&dyn ScopeContext]) -> Option<String> {
		let simple_key = path::decode_path(key).1;
		self.get(simple_key, &self.get_nodes(qualifier, key, contexts))
	}

	fn lookup_parsed<T: FromStr>(&self, qualifier: &str, key: &str, default: T, contexts: &[&dyn ScopeContext]) -> T {
		self.lookup_value(qualifier, key, contexts)
			.and_then(|value| value.trim().parse().ok())
			.unwrap_or(default)
	}

	pub fn get_string(&self, qualifier: &str, key: &str, default: &str, contexts: &[&dyn ScopeContext]) -> String {
		self.lookup_value(qualifier, key, contexts)
			.unwrap_or_else(|| default.to_string())
	}

	pub fn get_bool(&self, qualifier: &str, key: &str, default: bool, contexts: &[&dyn ScopeContext]) -> bool {
		self.lookup_value(qualifier, key, contexts)
			.map_or(default, |value| parse_bool(&value))
	}

	pub fn get_int(&self, qualifier: &str, key: &str, default: i32, contexts: &[&dyn ScopeContext]) -> i32 {
		self.lookup_parsed(qualifier, key, default, contexts)
	}

	pub fn get_long(&self, qualifier: &str, key: &str, default: i64, contexts: &[&dyn ScopeContext]) -> i64 {
		self.lookup_parsed(qualifier, key, default, contexts)
	}

	pub fn get_float(&self, qualifier: &str, key: &str, default: f32, contexts: &[&dyn ScopeContext]) -> f32 {
		self.lookup_parsed(qualifier, key, default, contexts)
	}

	pub fn get_double(&self, qualifier: &str, key: &str, default: f64, contexts: &[&dyn ScopeContext]) -> f64 {
		self.lookup_parsed(qualifier, key, default, contexts)
	}

	pub fn get_byte_array(
		&self,
		qualifier: &str,
		key: &str,
		default: &[u8],
		contexts: &[&dyn ScopeContext],
	) -> Vec<u8> {
		self.lookup_value(qualifier, key, contexts)
			.and_then(|value| decode_bytes(&value))
			.unwrap_or_else(|| default.to_vec())
	}

	/// Writes `key` (optionally `sub/key`) of `qualifier` in `scope`. The value
	/// is persisted by the next flush.
	pub fn set(&self, scope: &str, qualifier: &str, key: &str, value: &str) -> PreferenceNode {
		let (child_path, simple_key) = path::decode_path(key);
		let node = self.root.node(scope).node(qualifier).node(child_path.unwrap_or(""));
		node.put(simple_key, value);
		node
	}

	/// Writes the subtree at `node` to `writer`, marking `node` as an export
	/// root. `excludes` are path prefixes relative to `node`.
	pub fn export_preferences(&self, node: &PreferenceNode, excludes: &[String], writer: impl Write) -> Result<()> {
		let table = transfer::convert_to_properties(node, excludes, self.bundle_versions().as_ref())?;
		tracing::debug!(path = %node.absolute_path(), entries = table.len(), "exporting preferences");
		transfer::write_export(table, Some(node), writer)
	}

	/// Writes the union of what `filters` select below `node`. Filtered
	/// exports carry no export roots, so applying them never removes nodes.
	pub fn export_filtered(&self, node: &PreferenceNode, filters: &[PreferenceFilter], writer: impl Write) -> Result<()> {
		if filters.is_empty() {
			return Ok(());
		}
		let merged = self.trim_and_merge(node, filters)?;
		let table = transfer::convert_to_properties(&merged, &[], self.bundle_versions().as_ref())?;
		transfer::write_export(table, None, writer)
	}

	fn trim_and_merge(&self, tree: &PreferenceNode, filters: &[PreferenceFilter]) -> Result<PreferenceNode> {
		let trees = filters
			.iter()
			.map(|filter| trim_tree(tree, filter))
			.collect::<Result<Vec<_>>>()?;
		merge_trees(trees)
	}

	pub fn read_preferences(&self, reader: impl Read) -> Result<ExportedPreferences> {
		read_preferences(reader)
	}

	/// Reads an export stream and applies it. A malformed stream fails before
	/// the live tree is touched.
	pub fn import_preferences(&self, reader: impl Read) -> Result<()> {
		let exported = read_preferences(reader)?;
		self.apply_exported(&exported)
	}

	/// Copies an export into the live tree and flushes it.
	///
	/// Each exported node replaces the keys of its live counterpart: exported
	/// keys are written and live keys missing from the export are removed.
	/// An export root below the tree root is removed from the live tree first,
	/// together with its whole subtree.
	pub fn apply_exported(&self, exported: &ExportedPreferences) -> Result<()> {
		let tree = self.fire_pre_apply(exported.root().clone());
		tracing::debug!(path = %tree.absolute_path(), "applying exported preferences");

		tree.accept(&mut |node: &PreferenceNode| {
			let absolute = node.absolute_path();
			let mut live = if node.is_root() {
				self.root.clone()
			} else {
				self.root.node(absolute)
			};
			if exported.is_export_root(absolute) && !node.is_root() {
				live.remove_node()?;
				live = self.root.node(absolute);
			}

			let incoming = node.properties();
			for (key, value) in incoming.iter() {
				live.put(key, value);
			}
			for key in live.keys() {
				if !incoming.contains_key(&key) {
					live.remove(&key);
				}
			}
			Ok(true)
		})?;

		self.root.node(tree.absolute_path()).flush()?;
		self.force_share_strings();
		Ok(())
	}

	/// Copies what `filters` select from `tree` into the live tree, then
	/// flushes. Live values outside the selection are left alone.
	pub fn apply_preferences(&self, tree: &PreferenceNode, filters: &[PreferenceFilter]) -> Result<()> {
		if filters.is_empty() {
			return Ok(());
		}
		let merged = self.fire_pre_apply(self.trim_and_merge(tree, filters)?);
		merged.accept(&mut |node: &PreferenceNode| {
			let keys = node.keys();
			if !keys.is_empty() {
				copy_from_to(node, &self.root.node(node.absolute_path()), Some(&keys), false)?;
			}
			Ok(true)
		})?;

		self.root.node(tree.absolute_path()).flush()?;
		self.force_share_strings();
		Ok(())
	}

	/// The filters that select any value of `tree`.
	pub fn matches<'a>(&self, tree: &PreferenceNode, filters: &'a [PreferenceFilter]) -> Result<Vec<&'a PreferenceFilter>> {
		let mut matching = Vec::new();
		for filter in filters {
			if filter_matches(tree, filter)? {
				matching.push(filter);
			}
		}
		Ok(matching)
	}

	/// Checks the bundle versions recorded in the export at `file` against the
	/// installed ones. A missing file is fine; an unreadable one is reported
	/// as an error issue.
	pub fn validate_versions(&self, file: &Path) -> VersionReport {
		let mut report = VersionReport::default();
		let reader = match File::open(file) {
			Ok(handle) => BufReader::new(handle),
			Err(error) if error.kind() == io::ErrorKind::NotFound => return report,
			Err(error) => {
				report.push_error(format!("cannot read {}: {error}", file.display()));
				return report;
			}
		};
		match read_preferences(reader) {
			Ok(exported) => versions::check_exported(&exported, self.bundle_versions().as_ref()),
			Err(error) => {
				report.push_error(format!("cannot validate {}: {error}", file.display()));
				report
			}
		}
	}

	/// Interns the strings of the live tree unless that happened within the
	/// sharing interval. Returns the number of duplicates collapsed.
	pub fn share_strings(&self) -> Option<usize> {
		self.root.tree().share_strings(&self.root, false)
	}

	pub fn force_share_strings(&self) -> usize {
		self.root.tree().share_strings(&self.root, true).unwrap_or_default()
	}
}
