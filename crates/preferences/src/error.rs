//! Error types for the preference store.

use std::path::PathBuf;

use arbor_primitives::PropertiesError;
use thiserror::Error;

/// Errors raised by preference nodes, scopes and the service.
#[derive(Debug, Error)]
pub enum PreferenceError {
	/// Reading a node's backing store failed. The node stays usable and empty.
	#[error("failed to load preferences for {path}: {source}")]
	LoadFailed {
		/// Absolute node path, or file path for file-backed scopes.
		path: String,
		#[source]
		source: Box<PreferenceError>,
	},

	/// Writing a node's backing store failed. The node is left dirty.
	#[error("failed to save preferences for {path}: {source}")]
	SaveFailed {
		/// Absolute node path, or file path for file-backed scopes.
		path: String,
		#[source]
		source: Box<PreferenceError>,
	},

	/// A stale backing file could not be deleted.
	#[error("failed to delete {}: {error}", path.display())]
	DeleteFailed {
		path: PathBuf,
		#[source]
		error: std::io::Error,
	},

	/// An import stream was empty or could not be parsed.
	#[error("invalid preference file format: {0}")]
	InvalidFormat(String),

	/// A caller supplied an argument the API cannot accept.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// An external storage adapter reported a failure.
	#[error("storage error at {path}: {message}")]
	Storage {
		path: String,
		message: String,
	},

	/// File I/O error with the file that caused it.
	#[error("I/O error on {}: {error}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		error: std::io::Error,
	},

	/// Stream I/O error without a file path (import/export streams).
	#[error("stream I/O error: {0}")]
	Stream(#[from] std::io::Error),

	#[error(transparent)]
	Properties(#[from] PropertiesError),

	#[error(transparent)]
	Config(#[from] crate::config::ConfigError),
}

impl PreferenceError {
	pub(crate) fn load_failed(path: impl Into<String>, source: PreferenceError) -> Self {
		Self::LoadFailed {
			path: path.into(),
			source: Box::new(source),
		}
	}

	pub(crate) fn save_failed(path: impl Into<String>, source: PreferenceError) -> Self {
		Self::SaveFailed {
			path: path.into(),
			source: Box::new(source),
		}
	}

	pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
		Self::Io {
			path: path.into(),
			error,
		}
	}
}

/// Result type for preference operations.
pub type Result<T> = std::result::Result<T, PreferenceError>;
