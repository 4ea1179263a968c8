//! String deduplication.

use std::sync::Arc;

use rustc_hash::FxHashSet;

/// Table of canonical string instances.
///
/// Feeding equal strings through [`StringPool::add`] yields one shared
/// allocation, so long-lived trees holding many repeated keys and values
/// keep a single copy of each.
#[derive(Debug, Default)]
pub struct StringPool {
	strings: FxHashSet<Arc<str>>,
	saved: usize,
}

impl StringPool {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the canonical instance equal to `s`, registering `s` if none exists.
	pub fn add(&mut self, s: &Arc<str>) -> Arc<str> {
		if let Some(existing) = self.strings.get(&**s) {
			if !Arc::ptr_eq(existing, s) {
				self.saved += 1;
			}
			return existing.clone();
		}
		self.strings.insert(s.clone());
		s.clone()
	}

	/// Number of `add` calls that replaced a duplicate allocation.
	pub fn saved_string_count(&self) -> usize {
		self.saved
	}

	pub fn len(&self) -> usize {
		self.strings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.strings.is_empty()
	}
}
