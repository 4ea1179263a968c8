//! Hierarchical preference store.
//!
//! Preferences live in a tree of named nodes. The first path segment names a
//! *scope* that decides how its subtree is persisted:
//!
//! - **`instance`** and **`configuration`**: one `key=value` file per
//!   qualifier under `<base>/.settings/<qualifier>.prefs`
//! - **`default`**: computed from runtime initializers, bundle files and
//!   customization files; never written
//! - **`bundle_defaults`**: the initializer and bundle-file layers alone
//! - externally supplied scopes through [`ScopeStorage`]
//!
//! The second segment is the *qualifier* of the component that owns the
//! values. Nodes at that depth load lazily on first access and save their
//! whole subtree as one table on flush.
//!
//! ```no_run
//! use arbor_preferences::{PreferencesConfig, PreferencesService, INSTANCE_SCOPE};
//!
//! # fn main() -> arbor_preferences::Result<()> {
//! let service = PreferencesService::new(&PreferencesConfig::default())?;
//! service.set(INSTANCE_SCOPE, "org.example.editor", "tab.width", "4");
//! let width = service.get_int("org.example.editor", "tab.width", 8, &[]);
//! assert_eq!(width, 4);
//! service.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod node;
pub mod scope;
pub mod service;
mod tree;

pub use config::{ConfigError, PreferencesConfig};
pub use error::{PreferenceError, Result};
pub use listener::{ListenerId, NodeChange, NodeChangeEvent, PreferenceChangeEvent};
pub use node::{PreferenceNode, VERSION_KEY, VERSION_VALUE};
pub use scope::{
	BUNDLE_DEFAULT_SCOPE, CONFIGURATION_SCOPE, DEFAULT_SCOPE, DefaultValues, INSTANCE_SCOPE, PreferenceInitializer,
	Scope, ScopeStorage, StorageScope,
};
pub use service::{
	ExportedPreferences, FilterEntry, MatchType, NodeScopeContext, PreferenceFilter, PreferencesService, ScopeContext,
	Severity, VersionIssue, VersionReport,
};
