//! Crash-tolerant file replacement.
//!
//! Writers stage new content in a temporary sibling and rename it over the
//! target. While the rename is pending the previous content is kept as
//! `<name>.bak`; readers fall back to that backup when the primary file is
//! missing, so an interrupted write never loses both copies.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Backup path for `path`: the same name with `.bak` appended.
pub fn backup_path(path: &Path) -> PathBuf {
	let mut name = path.file_name().map(OsString::from).unwrap_or_default();
	name.push(".bak");
	path.with_file_name(name)
}

/// Atomically replaces `path` with `contents`, creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
	let dir = path
		.parent()
		.filter(|p| !p.as_os_str().is_empty())
		.unwrap_or_else(|| Path::new("."));
	fs::create_dir_all(dir)?;

	let mut staged = NamedTempFile::new_in(dir)?;
	staged.write_all(contents)?;
	staged.as_file().sync_all()?;

	let backup = backup_path(path);
	let had_previous = match fs::copy(path, &backup) {
		Ok(_) => true,
		Err(e) if e.kind() == io::ErrorKind::NotFound => false,
		Err(e) => return Err(e),
	};

	staged.persist(path).map_err(|e| e.error)?;

	if had_previous && let Err(error) = fs::remove_file(&backup) {
		tracing::warn!(path = %backup.display(), %error, "failed to remove preference backup");
	}
	Ok(())
}

/// Reads `path`, falling back to its backup when the primary is missing.
///
/// Returns `Ok(None)` when neither file exists.
pub fn read_with_backup(path: &Path) -> io::Result<Option<String>> {
	match fs::read_to_string(path) {
		Ok(text) => return Ok(Some(text)),
		Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
		Err(_) => {}
	}
	match fs::read_to_string(backup_path(path)) {
		Ok(text) => {
			tracing::debug!(path = %path.display(), "read preferences from backup");
			Ok(Some(text))
		}
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e),
	}
}

/// Deletes `path` and its backup. Missing files are not an error.
pub fn remove_with_backup(path: &Path) -> io::Result<()> {
	for target in [path.to_path_buf(), backup_path(path)] {
		match fs::remove_file(&target) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(e),
		}
	}
	Ok(())
}
