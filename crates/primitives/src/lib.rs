//! Building blocks for the preference store: immutable property maps,
//! string pooling, path and properties codecs, versions and safe file I/O.

/// Immutable open-addressed string table.
pub mod pmap;
/// Preference path encoding and segment helpers.
pub mod path;
/// Canonical string instances.
pub mod pool;
/// `key=value` table codec.
pub mod properties;
/// Atomic file replacement with backup fallback.
pub mod safe_file;
/// Bundle version identifiers.
pub mod version;

pub use pmap::PersistentMap;
pub use pool::StringPool;
pub use properties::{Properties, PropertiesError};
pub use version::{Version, VersionError};
