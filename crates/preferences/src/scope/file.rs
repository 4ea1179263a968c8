//! File-backed scopes: one `<base>/.settings/<qualifier>.prefs` per qualifier.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use arbor_primitives::{Properties, path, safe_file};

use super::{LoadTracker, Scope};
use crate::error::{PreferenceError, Result};
use crate::node::{PreferenceNode, VERSION_KEY, VERSION_VALUE};

pub const INSTANCE_SCOPE: &str = "instance";
pub const CONFIGURATION_SCOPE: &str = "configuration";
/// Directory below a scope base holding the preference files.
pub const PREFS_DIR: &str = ".settings";
pub const PREFS_EXTENSION: &str = "prefs";

/// Scope persisted as one properties file per qualifier.
///
/// Without a base directory the scope is memory-only: nothing is read and
/// flushes are dropped.
#[derive(Debug)]
pub struct FileScope {
	name: String,
	base: Option<PathBuf>,
	loaded: LoadTracker,
}

impl FileScope {
	pub fn new(name: impl Into<String>, base: Option<PathBuf>) -> Self {
		Self {
			name: name.into(),
			base,
			loaded: LoadTracker::default(),
		}
	}

	/// Per-workspace preferences.
	pub fn instance(base: Option<PathBuf>) -> Self {
		Self::new(INSTANCE_SCOPE, base)
	}

	/// Per-installation preferences.
	pub fn configuration(base: Option<PathBuf>) -> Self {
		Self::new(CONFIGURATION_SCOPE, base)
	}

	pub fn base(&self) -> Option<&Path> {
		self.base.as_deref()
	}

	/// File holding `qualifier`'s table.
	pub fn location_for(&self, qualifier: &str) -> Option<PathBuf> {
		let base = self.base.as_ref()?;
		Some(base.join(PREFS_DIR).join(format!("{qualifier}.{PREFS_EXTENSION}")))
	}

	fn node_location(&self, node_path: &str) -> Option<PathBuf> {
		path::qualifier_of(node_path).and_then(|q| self.location_for(q))
	}
}

impl Scope for FileScope {
	fn name(&self) -> &str {
		&self.name
	}

	fn children_names(&self, _scope_path: &str) -> Result<Vec<String>> {
		let Some(base) = &self.base else {
			return Ok(Vec::new());
		};
		let dir = base.join(PREFS_DIR);
		let entries = match fs::read_dir(&dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(PreferenceError::io(dir, e)),
		};

		let primary = format!(".{PREFS_EXTENSION}");
		let backup = format!(".{PREFS_EXTENSION}.bak");
		let mut names = Vec::new();
		for entry in entries {
			let entry = entry.map_err(|e| PreferenceError::io(&dir, e))?;
			if !entry.file_type().map_err(|e| PreferenceError::io(entry.path(), e))?.is_file() {
				continue;
			}
			let file_name = entry.file_name();
			let Some(file_name) = file_name.to_str() else {
				continue;
			};
			let stem = file_name
				.strip_suffix(&primary)
				.or_else(|| file_name.strip_suffix(&backup));
			if let Some(stem) = stem.filter(|s| !s.is_empty()) {
				names.push(stem.to_string());
			}
		}
		names.sort();
		names.dedup();
		Ok(names)
	}

	fn load(&self, node: &PreferenceNode) -> Result<Option<Properties>> {
		let Some(location) = self.node_location(node.absolute_path()) else {
			tracing::trace!(path = %node.absolute_path(), "no preference file location");
			return Ok(None);
		};
		let Some(text) = safe_file::read_with_backup(&location).map_err(|e| PreferenceError::io(&location, e))?
		else {
			tracing::trace!(location = %location.display(), "preference file does not exist");
			return Ok(None);
		};
		Ok(Some(Properties::parse(&text)?))
	}

	fn save(&self, node: &PreferenceNode, table: &Properties) -> Result<()> {
		let Some(location) = self.node_location(node.absolute_path()) else {
			return Ok(());
		};
		if table.is_empty() {
			if let Err(error) = safe_file::remove_with_backup(&location) {
				tracing::warn!(location = %location.display(), %error, "failed to delete empty preference file");
			}
			return Ok(());
		}

		let mut table = table.clone();
		table.insert(VERSION_KEY, VERSION_VALUE);
		safe_file::write_atomic(&location, table.to_text().as_bytes()).map_err(|e| PreferenceError::io(&location, e))
	}

	fn removed(&self, node_path: &str) -> Result<()> {
		if path::segment_count(node_path) != self.load_level_depth() {
			return Ok(());
		}
		self.loaded.remove(node_path);
		let Some(location) = self.node_location(node_path) else {
			return Ok(());
		};
		safe_file::remove_with_backup(&location).map_err(|error| PreferenceError::DeleteFailed {
			path: location.clone(),
			error,
		})?;
		tracing::debug!(location = %location.display(), "deleted preference file");
		Ok(())
	}

	fn is_already_loaded(&self, path: &str) -> bool {
		self.loaded.contains(path)
	}

	fn mark_loaded(&self, path: &str) {
		self.loaded.insert(path);
	}

	fn location(&self, path: &str) -> Option<PathBuf> {
		self.node_location(path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn location_layout() {
		let scope = FileScope::instance(Some(PathBuf::from("/ws")));
		assert_eq!(
			scope.location_for("org.example"),
			Some(PathBuf::from("/ws/.settings/org.example.prefs"))
		);
		assert_eq!(FileScope::configuration(None).location_for("q"), None);
	}

	#[test]
	fn enumerates_prefs_files_only() {
		let dir = tempfile::tempdir().unwrap();
		let settings = dir.path().join(PREFS_DIR);
		fs::create_dir_all(&settings).unwrap();
		fs::write(settings.join("a.prefs"), "").unwrap();
		fs::write(settings.join("b.prefs.bak"), "").unwrap();
		fs::write(settings.join("notes.txt"), "").unwrap();
		fs::create_dir(settings.join("dir.prefs")).unwrap();

		let scope = FileScope::instance(Some(dir.path().to_path_buf()));
		assert_eq!(scope.children_names("/instance").unwrap(), vec!["a", "b"]);
	}

	#[test]
	fn missing_settings_dir_has_no_children() {
		let dir = tempfile::tempdir().unwrap();
		let scope = FileScope::instance(Some(dir.path().join("absent")));
		assert!(scope.children_names("/instance").unwrap().is_empty());
	}
}
