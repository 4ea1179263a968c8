//! Compatibility of exported values with the installed bundles.

use std::collections::BTreeMap;
use std::fmt;

use arbor_primitives::Version;
use arbor_primitives::path;

use super::transfer::ExportedPreferences;

/// Installed bundle versions, keyed by qualifier.
pub trait BundleVersions: Send + Sync {
	fn version(&self, bundle: &str) -> Option<String>;
}

impl BundleVersions for BTreeMap<String, String> {
	fn version(&self, bundle: &str) -> Option<String> {
		self.get(bundle).cloned()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
	Warning,
	Error,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Warning => "warning",
			Self::Error => "error",
		})
	}
}

/// One finding of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionIssue {
	pub severity: Severity,
	/// Qualifier of the bundle, empty for failures not tied to one.
	pub bundle: String,
	pub message: String,
}

impl fmt::Display for VersionIssue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.severity, self.message)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionReport {
	pub issues: Vec<VersionIssue>,
}

impl VersionReport {
	pub fn is_ok(&self) -> bool {
		self.issues.is_empty()
	}

	pub fn has_errors(&self) -> bool {
		self.issues.iter().any(|issue| issue.severity == Severity::Error)
	}

	pub(crate) fn push_error(&mut self, message: String) {
		self.issues.push(VersionIssue {
			severity: Severity::Error,
			bundle: String::new(),
			message,
		});
	}
}

/// Compares the version a bundle had when values were exported with the
/// installed one.
///
/// Equal major and minor components are compatible. An installed major older
/// than the exported one is an error; every other difference is a warning.
pub fn validate_plugin_versions(bundle: &str, exported: &Version, installed: &Version) -> Option<VersionIssue> {
	if installed.major == exported.major && installed.minor == exported.minor {
		return None;
	}
	let severity = if installed.major < exported.major {
		Severity::Error
	} else {
		Severity::Warning
	};
	Some(VersionIssue {
		severity,
		bundle: bundle.to_string(),
		message: format!(
			"preferences exported by {bundle} {exported} may not be compatible with installed version {installed}"
		),
	})
}

/// Checks every version marker of `exported`. Markers or installed versions
/// that do not parse are ignored.
pub(crate) fn check_exported(exported: &ExportedPreferences, installed: &dyn BundleVersions) -> VersionReport {
	let mut report = VersionReport::default();
	for (node_path, recorded) in exported.versions() {
		let Ok(recorded) = recorded.parse::<Version>() else {
			continue;
		};
		let Some(bundle) = path::qualifier_of(node_path) else {
			continue;
		};
		let Some(current) = installed.version(bundle).and_then(|v| v.parse::<Version>().ok()) else {
			continue;
		};
		if let Some(issue) = validate_plugin_versions(bundle, &recorded, &current) {
			report.issues.push(issue);
		}
	}
	report
}
