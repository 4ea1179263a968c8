//! Export stream format.
//!
//! An export is a `key=value` table whose entries are encoded absolute
//! `path/key` names, plus:
//!
//! * `file_export_version=3.0`, the format marker;
//! * `!<absolute path>=` for every export root, a node that replaces its live
//!   counterpart wholesale when applied;
//! * `@<qualifier>=<version>` recording the version of the bundle that wrote
//!   the instance-scope values of `qualifier`.
//!
//! Streams without the format marker are legacy `qualifier/key=value` exports
//! of the instance scope and are converted on read.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use arbor_primitives::path::{self, SEPARATOR};
use arbor_primitives::Properties;

use super::versions::BundleVersions;
use crate::error::{PreferenceError, Result};
use crate::node::PreferenceNode;
use crate::scope::{BUNDLE_DEFAULT_SCOPE, DEFAULT_SCOPE, INSTANCE_SCOPE};

/// Key of the format marker.
pub const EXPORT_VERSION_KEY: &str = "file_export_version";
/// Format written by this crate.
pub const EXPORT_VERSION: &str = "3.0";
/// Prefix of export-root markers.
pub const EXPORT_ROOT_PREFIX: char = '!';
/// Prefix of bundle-version markers.
pub const BUNDLE_VERSION_PREFIX: char = '@';

/// A parsed export: a detached tree plus its export-root and version markers.
#[derive(Debug, Clone)]
pub struct ExportedPreferences {
	root: PreferenceNode,
	export_roots: BTreeSet<String>,
	versions: BTreeMap<String, String>,
}

impl ExportedPreferences {
	/// Root of the detached tree holding the exported values.
	pub fn root(&self) -> &PreferenceNode {
		&self.root
	}

	pub fn is_export_root(&self, path: &str) -> bool {
		self.export_roots.contains(path)
	}

	pub fn export_roots(&self) -> impl Iterator<Item = &str> + '_ {
		self.export_roots.iter().map(String::as_str)
	}

	/// Version recorded for the node at absolute `path`.
	pub fn version(&self, path: &str) -> Option<&str> {
		self.versions.get(path).map(String::as_str)
	}

	/// Absolute node path to recorded bundle version.
	pub fn versions(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
		self.versions.iter().map(|(path, version)| (path.as_str(), version.as_str()))
	}
}

fn instance_path(qualifier: &str) -> String {
	format!("{SEPARATOR}{INSTANCE_SCOPE}{SEPARATOR}{qualifier}")
}

/// Rewrites a legacy table into the current format.
///
/// `qualifier=version` lines become a bundle-version marker plus an export
/// root for `/instance/qualifier`; `qualifier/key=value` lines move below
/// `/instance`.
pub fn convert_from_legacy(table: Properties) -> Properties {
	let mut converted = Properties::new();
	for (key, value) in table {
		match key.split_once(SEPARATOR) {
			None => {
				converted.insert(format!("{BUNDLE_VERSION_PREFIX}{key}"), value);
				converted.insert(format!("{EXPORT_ROOT_PREFIX}{}", instance_path(&key)), "");
			}
			Some((qualifier, rest)) => {
				converted.insert(path::encode_path(&instance_path(qualifier), rest), value);
			}
		}
	}
	converted
}

/// Builds the detached tree described by a current-format table (format
/// marker already removed).
///
/// Fails with [`PreferenceError::InvalidFormat`] when an entry names a node
/// path with an empty segment.
pub fn convert_from_properties(table: Properties) -> Result<ExportedPreferences> {
	let root = PreferenceNode::detached_root();
	let mut export_roots = BTreeSet::new();
	let mut versions = BTreeMap::new();

	for (key, value) in table {
		if let Some(node_path) = key.strip_prefix(EXPORT_ROOT_PREFIX) {
			let node = root.node(checked_path(&key, node_path)?);
			export_roots.insert(node.absolute_path().to_string());
		} else if let Some(qualifier) = key.strip_prefix(BUNDLE_VERSION_PREFIX) {
			let node = root.node(checked_path(&key, &instance_path(qualifier))?);
			versions.insert(node.absolute_path().to_string(), value);
		} else {
			let (node_path, name) = path::decode_path(&key);
			root.node(checked_path(&key, node_path.unwrap_or(""))?).put(name, &value);
		}
	}

	Ok(ExportedPreferences {
		root,
		export_roots,
		versions,
	})
}

fn checked_path<'a>(entry: &str, node_path: &'a str) -> Result<&'a str> {
	if node_path.contains(path::DOUBLE_SEPARATOR) {
		return Err(PreferenceError::InvalidFormat(format!(
			"entry {entry:?} names a node path with an empty segment"
		)));
	}
	Ok(node_path)
}

/// Parses an export stream, converting legacy input.
///
/// Nothing is applied here, so a malformed stream never touches a live tree.
pub fn read_preferences(reader: impl Read) -> Result<ExportedPreferences> {
	let mut table = Properties::read_from(reader)?;
	if table.is_empty() {
		return Err(PreferenceError::InvalidFormat("preference stream is empty".to_string()));
	}
	if table.remove(EXPORT_VERSION_KEY).is_none() {
		tracing::debug!(entries = table.len(), "converting legacy preference export");
		table = convert_from_legacy(table);
	}
	convert_from_properties(table)
}

/// Flattens the subtree at `node` into export entries.
///
/// The computed `default` and `bundle_defaults` scopes are never exported. `excludes` are path prefixes
/// relative to `node`; a node whose relative path starts with one is pruned
/// with its subtree, and a single entry whose encoded relative name starts
/// with one is skipped. The first exported instance-scope value of a
/// qualifier records its installed version.
pub fn convert_to_properties(
	node: &PreferenceNode,
	excludes: &[String],
	versions: &dyn BundleVersions,
) -> Result<Properties> {
	let base_len = node.absolute_path().len();
	let excludes: Vec<&str> = excludes.iter().map(|exclude| path::make_relative(exclude)).collect();
	let mut table = Properties::new();

	node.accept(&mut |current: &PreferenceNode| {
		let absolute = current.absolute_path();
		let scope = path::scope_of(absolute);
		if scope == DEFAULT_SCOPE || scope == BUNDLE_DEFAULT_SCOPE {
			return Ok(false);
		}
		let relative = if absolute.len() <= base_len {
			""
		} else {
			path::make_relative(&absolute[base_len..])
		};
		if excludes.iter().any(|exclude| relative.starts_with(exclude)) {
			return Ok(false);
		}

		let mut needs_version = scope == INSTANCE_SCOPE;
		let properties = current.properties();
		let mut entries: Vec<(&str, &str)> = properties.iter().collect();
		entries.sort_unstable();
		for (key, value) in entries {
			let encoded = path::encode_path(relative, key);
			if excludes.iter().any(|exclude| encoded.starts_with(exclude)) {
				continue;
			}
			if needs_version {
				if let Some(bundle) = path::qualifier_of(absolute)
					&& let Some(version) = versions.version(bundle)
				{
					table.insert(format!("{BUNDLE_VERSION_PREFIX}{bundle}"), version);
				}
				needs_version = false;
			}
			table.insert(path::encode_path(absolute, key), value);
		}
		Ok(true)
	})?;
	Ok(table)
}

/// Writes `table` as an export of `export_root`. An empty table writes
/// nothing.
pub(crate) fn write_export(
	mut table: Properties,
	export_root: Option<&PreferenceNode>,
	writer: impl Write,
) -> Result<()> {
	if table.is_empty() {
		return Ok(());
	}
	table.insert(EXPORT_VERSION_KEY, EXPORT_VERSION);
	if let Some(root) = export_root {
		table.insert(format!("{EXPORT_ROOT_PREFIX}{}", root.absolute_path()), "");
	}
	table.write_to(writer)?;
	Ok(())
}
