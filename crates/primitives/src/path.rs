//! Preference path encoding.
//!
//! A persisted entry is `path/key`. When the key itself contains the
//! separator the boundary is marked with a doubled separator instead:
//! `path//some/key`.

/// Path separator.
pub const SEPARATOR: char = '/';

pub const DOUBLE_SEPARATOR: &str = "//";

/// Joins `path` and `key` into one encoded entry name.
pub fn encode_path(path: &str, key: &str) -> String {
	match (path.is_empty(), key.contains(SEPARATOR)) {
		(true, false) => key.to_string(),
		(false, false) => format!("{path}{SEPARATOR}{key}"),
		(true, true) => format!("{DOUBLE_SEPARATOR}{key}"),
		(false, true) => format!("{path}{DOUBLE_SEPARATOR}{key}"),
	}
}

/// Splits an encoded entry name into its relative path and key.
///
/// The path is `None` when the entry names a key on the node itself.
pub fn decode_path(full: &str) -> (Option<&str>, &str) {
	let (path, key) = match full.find(DOUBLE_SEPARATOR) {
		Some(idx) => (Some(&full[..idx]), &full[idx + 2..]),
		None => match full.rfind(SEPARATOR) {
			Some(idx) => (Some(&full[..idx]), &full[idx + 1..]),
			None => (None, full),
		},
	};
	let path = path
		.map(|p| p.strip_prefix(SEPARATOR).unwrap_or(p))
		.filter(|p| !p.is_empty());
	(path, key)
}

/// Returns the zero-based `index`th segment of `path`.
pub fn segment(path: &str, index: usize) -> Option<&str> {
	path.split(SEPARATOR).filter(|s| !s.is_empty()).nth(index)
}

/// Number of non-empty segments in `path`. The root `/` has none.
pub fn segment_count(path: &str) -> usize {
	path.split(SEPARATOR).filter(|s| !s.is_empty()).count()
}

/// Strips one leading separator.
pub fn make_relative(path: &str) -> &str {
	path.strip_prefix(SEPARATOR).unwrap_or(path)
}

/// Scope name of an absolute path: its first segment, or `""` for the root.
pub fn scope_of(path: &str) -> &str {
	segment(path, 0).unwrap_or("")
}

/// Qualifier of an absolute path: its second segment.
pub fn qualifier_of(path: &str) -> Option<&str> {
	if !path.starts_with(SEPARATOR) {
		return None;
	}
	segment(path, 1)
}
