//! Service configuration, read from TOML.
//!
//! ```toml
//! instance_location = "/home/me/workspace"
//! configuration_location = "/opt/app/configuration"
//! product_customization = "/opt/app/plugin_customization.ini"
//! default_lookup_order = ["instance", "configuration", "default"]
//! string_sharing_interval_secs = 300
//!
//! [bundle_locations]
//! "org.example.editor" = "/opt/app/plugins/org.example.editor"
//!
//! [bundle_versions]
//! "org.example.editor" = "3.2.0"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seconds between two string-sharing walks of the tree.
pub const DEFAULT_STRING_SHARING_INTERVAL_SECS: u64 = 300;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {}: {error}", path.display())]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or an unknown field.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A lookup order names an empty scope.
	#[error("empty scope name in default_lookup_order")]
	EmptyScopeName,
}

/// Everything the preference service needs to locate its stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreferencesConfig {
	/// Base directory of the `instance` scope. Memory-only when unset.
	pub instance_location: Option<PathBuf>,
	/// Base directory of the `configuration` scope. Memory-only when unset.
	pub configuration_location: Option<PathBuf>,
	/// Qualifier to bundle directory holding `preferences.ini`.
	pub bundle_locations: BTreeMap<String, PathBuf>,
	pub product_customization: Option<PathBuf>,
	pub command_line_customization: Option<PathBuf>,
	/// Installed version per qualifier, used when exporting and validating.
	pub bundle_versions: BTreeMap<String, String>,
	/// Lookup order used when no per-qualifier order is registered.
	pub default_lookup_order: Option<Vec<String>>,
	pub string_sharing_interval_secs: u64,
}

impl Default for PreferencesConfig {
	fn default() -> Self {
		Self {
			instance_location: None,
			configuration_location: None,
			bundle_locations: BTreeMap::new(),
			product_customization: None,
			command_line_customization: None,
			bundle_versions: BTreeMap::new(),
			default_lookup_order: None,
			string_sharing_interval_secs: DEFAULT_STRING_SHARING_INTERVAL_SECS,
		}
	}
}

impl PreferencesConfig {
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&text)
	}

	pub fn string_sharing_interval(&self) -> Duration {
		Duration::from_secs(self.string_sharing_interval_secs)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if let Some(order) = &self.default_lookup_order
			&& order.iter().any(|scope| scope.trim().is_empty())
		{
			return Err(ConfigError::EmptyScopeName);
		}
		Ok(())
	}
}
