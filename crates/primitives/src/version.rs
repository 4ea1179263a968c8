//! Bundle version identifiers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A `major.minor.micro[.qualifier]` version.
///
/// Missing numeric components are zero. The qualifier is free-form and does
/// not take part in compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
	pub major: u32,
	pub minor: u32,
	pub micro: u32,
	pub qualifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
	#[error("empty version string")]
	Empty,
	#[error("invalid version component {component:?} in {input:?}")]
	InvalidComponent { input: String, component: String },
	#[error("too many components in {0:?}")]
	TooManyComponents(String),
}

impl Version {
	pub fn new(major: u32, minor: u32, micro: u32) -> Self {
		Self {
			major,
			minor,
			micro,
			qualifier: String::new(),
		}
	}
}

impl FromStr for Version {
	type Err = VersionError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let input = s.trim();
		if input.is_empty() {
			return Err(VersionError::Empty);
		}

		let mut parts = input.splitn(4, '.');
		let mut numeric = [0u32; 3];
		for slot in &mut numeric {
			let Some(part) = parts.next() else { break };
			*slot = part.parse().map_err(|_| VersionError::InvalidComponent {
				input: input.to_string(),
				component: part.to_string(),
			})?;
		}
		let qualifier = parts.next().unwrap_or_default().to_string();
		if qualifier.contains('.') {
			return Err(VersionError::TooManyComponents(input.to_string()));
		}

		let [major, minor, micro] = numeric;
		Ok(Self {
			major,
			minor,
			micro,
			qualifier,
		})
	}
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
		if !self.qualifier.is_empty() {
			write!(f, ".{}", self.qualifier)?;
		}
		Ok(())
	}
}
