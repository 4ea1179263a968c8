//! Default values: the `default` and `bundle_defaults` scopes.
//!
//! Defaults for a qualifier are assembled from four layers, later layers
//! overriding earlier ones key by key:
//!
//! 1. runtime [`PreferenceInitializer`]s registered for the qualifier,
//! 2. the bundle's `preferences.ini`,
//! 3. the product customization file,
//! 4. the command-line customization file.
//!
//! Values of the form `%key` are translated against the layer's translation
//! table before they are stored. The first two layers are computed once per
//! qualifier and shared by both scopes; `bundle_defaults` exposes only them.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arbor_primitives::path::{self, SEPARATOR};
use arbor_primitives::{Properties, safe_file};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use super::{LoadTracker, Scope};
use crate::error::{PreferenceError, Result};
use crate::node::PreferenceNode;

pub const DEFAULT_SCOPE: &str = "default";
pub const BUNDLE_DEFAULT_SCOPE: &str = "bundle_defaults";

/// Bundle-packaged defaults, relative to the bundle directory.
pub const BUNDLE_DEFAULTS_FILE: &str = "preferences.ini";
/// Translations for `%key` values in [`BUNDLE_DEFAULTS_FILE`].
pub const BUNDLE_TRANSLATIONS_FILE: &str = "plugin.properties";

/// Supplies programmatic defaults for one qualifier.
pub trait PreferenceInitializer: Send + Sync {
	fn initialize_defaults(&self, defaults: &mut DefaultValues);
}

impl<F> PreferenceInitializer for F
where
	F: Fn(&mut DefaultValues) + Send + Sync,
{
	fn initialize_defaults(&self, defaults: &mut DefaultValues) {
		self(defaults)
	}
}

/// Default values collected by an initializer, keyed relative to the
/// qualifier node.
#[derive(Debug, Default)]
pub struct DefaultValues {
	table: Properties,
}

impl DefaultValues {
	pub fn put(&mut self, key: &str, value: &str) {
		self.table.insert(key, value);
	}

	/// Sets `key` on the descendant at relative `node_path`.
	pub fn put_at(&mut self, node_path: &str, key: &str, value: &str) {
		let node_path = node_path.trim_matches(SEPARATOR);
		self.table.insert(path::encode_path(node_path, key), value);
	}

	pub fn put_bool(&mut self, key: &str, value: bool) {
		self.put(key, if value { "true" } else { "false" });
	}

	pub fn put_int(&mut self, key: &str, value: i32) {
		self.put(key, &value.to_string());
	}

	pub fn put_long(&mut self, key: &str, value: i64) {
		self.put(key, &value.to_string());
	}

	pub fn put_double(&mut self, key: &str, value: f64) {
		self.put(key, &value.to_string());
	}

	pub fn put_byte_array(&mut self, key: &str, value: &[u8]) {
		self.put(key, &crate::node::encode_bytes(value));
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.table.get(key)
	}

	pub fn into_properties(self) -> Properties {
		self.table
	}
}

/// Resolves `%key` against `translations`.
///
/// `%key rest` falls back to `rest` when the key is unknown; `%key` alone
/// stays verbatim. `%%` escapes a literal percent and is left untouched.
pub fn translate(value: &str, translations: Option<&Properties>) -> String {
	let trimmed = value.trim();
	let Some(translations) = translations else {
		return trimmed.to_string();
	};
	if trimmed.starts_with("%%") {
		return trimmed.to_string();
	}
	let Some(body) = trimmed.strip_prefix('%') else {
		return trimmed.to_string();
	};
	let (key, fallback) = match body.split_once(' ') {
		Some((key, rest)) => (key, rest),
		None => (body, trimmed),
	};
	translations.get(key).unwrap_or(fallback).to_string()
}

/// Shared source of default values for both default scopes.
#[derive(Default)]
pub struct DefaultLayers {
	initializers: RwLock<FxHashMap<String, Vec<Arc<dyn PreferenceInitializer>>>>,
	bundle_locations: RwLock<FxHashMap<String, PathBuf>>,
	product_customization: Option<PathBuf>,
	command_line_customization: Option<PathBuf>,
	bundle_cache: Mutex<FxHashMap<String, Arc<Properties>>>,
	customization_cache: Mutex<FxHashMap<PathBuf, Arc<CustomizationFile>>>,
}

struct CustomizationFile {
	table: Properties,
	translations: Option<Properties>,
}

impl DefaultLayers {
	pub fn new(product_customization: Option<PathBuf>, command_line_customization: Option<PathBuf>) -> Self {
		Self {
			product_customization,
			command_line_customization,
			..Self::default()
		}
	}

	/// Adds a runtime initializer. Defaults already computed for the qualifier
	/// are recomputed on the next load.
	pub fn register_initializer(&self, qualifier: &str, initializer: Arc<dyn PreferenceInitializer>) {
		self.initializers
			.write()
			.entry(qualifier.to_string())
			.or_default()
			.push(initializer);
		self.bundle_cache.lock().remove(qualifier);
	}

	/// Directory holding the qualifier's `preferences.ini` and translations.
	pub fn set_bundle_location(&self, qualifier: &str, dir: PathBuf) {
		self.bundle_locations.write().insert(qualifier.to_string(), dir);
		self.bundle_cache.lock().remove(qualifier);
	}

	/// Qualifiers with an initializer or a bundle location.
	pub fn qualifiers(&self) -> Vec<String> {
		let mut names: Vec<String> = self.initializers.read().keys().cloned().collect();
		names.extend(self.bundle_locations.read().keys().cloned());
		names.sort();
		names.dedup();
		names
	}

	/// Runtime initializer values overlaid with the bundle file.
	pub fn bundle_defaults(&self, qualifier: &str) -> Arc<Properties> {
		if let Some(cached) = self.bundle_cache.lock().get(qualifier) {
			return cached.clone();
		}

		let mut table = self.run_initializers(qualifier);
		let bundle_dir = self.bundle_locations.read().get(qualifier).cloned();
		if let Some(dir) = bundle_dir {
			match read_bundle_file(&dir) {
				Ok(layer) => table.overlay(layer),
				Err(error) => {
					tracing::error!(qualifier, dir = %dir.display(), %error, "failed to read bundle defaults");
				}
			}
		}

		let table = Arc::new(table);
		self.bundle_cache
			.lock()
			.entry(qualifier.to_string())
			.or_insert(table)
			.clone()
	}

	/// All four layers for `qualifier`.
	pub fn defaults(&self, qualifier: &str) -> Properties {
		let mut table = Properties::clone(&self.bundle_defaults(qualifier));
		for file in [&self.product_customization, &self.command_line_customization]
			.into_iter()
			.flatten()
		{
			match self.customization(file) {
				Ok(custom) => table.overlay(custom.layer_for(qualifier)),
				Err(error) => {
					tracing::error!(file = %file.display(), %error, "failed to read preference customization");
				}
			}
		}
		table
	}

	fn run_initializers(&self, qualifier: &str) -> Properties {
		let initializers = self.initializers.read().get(qualifier).cloned().unwrap_or_default();
		let mut values = DefaultValues::default();
		for initializer in initializers {
			if catch_unwind(AssertUnwindSafe(|| initializer.initialize_defaults(&mut values))).is_err() {
				tracing::error!(qualifier, "preference initializer panicked");
			}
		}
		values.into_properties()
	}

	fn customization(&self, file: &Path) -> Result<Arc<CustomizationFile>> {
		if let Some(cached) = self.customization_cache.lock().get(file) {
			return Ok(cached.clone());
		}
		let table = read_table(file)?.unwrap_or_default();
		let translations = read_table(&file.with_extension("properties"))?;
		let loaded = Arc::new(CustomizationFile { table, translations });
		self.customization_cache
			.lock()
			.insert(file.to_path_buf(), loaded.clone());
		Ok(loaded)
	}
}

impl CustomizationFile {
	/// Entries `qualifier/...` with the qualifier prefix removed and values
	/// translated.
	fn layer_for(&self, qualifier: &str) -> Properties {
		let prefix = format!("{qualifier}{SEPARATOR}");
		self.table
			.iter()
			.filter_map(|(key, value)| {
				let relative = key.strip_prefix(&prefix)?;
				Some((relative.to_string(), translate(value, self.translations.as_ref())))
			})
			.collect()
	}
}

fn read_table(file: &Path) -> Result<Option<Properties>> {
	let text = safe_file::read_with_backup(file).map_err(|e| PreferenceError::io(file, e))?;
	text.map(|t| Properties::parse(&t).map_err(PreferenceError::from))
		.transpose()
}

fn read_bundle_file(dir: &Path) -> Result<Properties> {
	let Some(table) = read_table(&dir.join(BUNDLE_DEFAULTS_FILE))? else {
		return Ok(Properties::new());
	};
	let translations = read_table(&dir.join(BUNDLE_TRANSLATIONS_FILE))?;
	Ok(table
		.iter()
		.map(|(key, value)| (key.to_string(), translate(value, translations.as_ref())))
		.collect())
}

/// The `default` scope: all four layers, never persisted.
pub struct DefaultScope {
	layers: Arc<DefaultLayers>,
	loaded: LoadTracker,
}

impl DefaultScope {
	pub fn new(layers: Arc<DefaultLayers>) -> Self {
		Self {
			layers,
			loaded: LoadTracker::default(),
		}
	}
}

impl Scope for DefaultScope {
	fn name(&self) -> &str {
		DEFAULT_SCOPE
	}

	fn children_names(&self, _scope_path: &str) -> Result<Vec<String>> {
		Ok(self.layers.qualifiers())
	}

	fn load(&self, node: &PreferenceNode) -> Result<Option<Properties>> {
		let Some(qualifier) = path::qualifier_of(node.absolute_path()) else {
			return Ok(None);
		};
		Ok(Some(self.layers.defaults(qualifier)))
	}

	fn save(&self, _node: &PreferenceNode, _table: &Properties) -> Result<()> {
		Ok(())
	}

	fn is_already_loaded(&self, path: &str) -> bool {
		self.loaded.contains(path)
	}

	fn mark_loaded(&self, path: &str) {
		self.loaded.insert(path);
	}
}

/// The `bundle_defaults` scope: initializer and bundle-file layers only.
pub struct BundleDefaultScope {
	layers: Arc<DefaultLayers>,
	loaded: LoadTracker,
}

impl BundleDefaultScope {
	pub fn new(layers: Arc<DefaultLayers>) -> Self {
		Self {
			layers,
			loaded: LoadTracker::default(),
		}
	}
}

impl Scope for BundleDefaultScope {
	fn name(&self) -> &str {
		BUNDLE_DEFAULT_SCOPE
	}

	fn children_names(&self, _scope_path: &str) -> Result<Vec<String>> {
		Ok(self.layers.qualifiers())
	}

	fn load(&self, node: &PreferenceNode) -> Result<Option<Properties>> {
		let Some(qualifier) = path::qualifier_of(node.absolute_path()) else {
			return Ok(None);
		};
		Ok(Some(Properties::clone(&self.layers.bundle_defaults(qualifier))))
	}

	fn save(&self, _node: &PreferenceNode, _table: &Properties) -> Result<()> {
		Ok(())
	}

	fn is_already_loaded(&self, path: &str) -> bool {
		self.loaded.contains(path)
	}

	fn mark_loaded(&self, path: &str) {
		self.loaded.insert(path);
	}
}
