//! Immutable string table with open addressing.
//!
//! [`PersistentMap`] is the property store of every preference node. Each
//! mutation returns a new map and leaves the receiver untouched, so a map
//! handed out under a lock can be read afterwards without one.
//!
//! The table is a power-of-two slot array probed linearly. It grows once
//! occupancy passes [`LOAD_FACTOR_PERCENT`] of the capacity. Removal rebuilds
//! a compact table instead of leaving tombstones, trading O(n) deletes for
//! tables that never degrade.

use std::fmt;
use std::hash::BuildHasher;
use std::sync::{Arc, LazyLock};

use rustc_hash::FxBuildHasher;

use crate::pool::StringPool;


/// Smallest non-empty slot count.
const MIN_CAPACITY: usize = 8;

/// Maximum occupancy, in percent of the slot count.
pub const LOAD_FACTOR_PERCENT: usize = 45;

type Entry = (Arc<str>, Arc<str>);

struct Table {
	slots: Box<[Option<Entry>]>,
	len: usize,
}

static EMPTY: LazyLock<Arc<Table>> = LazyLock::new(|| {
	Arc::new(Table {
		slots: Box::new([]),
		len: 0,
	})
});

/// Immutable `string -> string` hash table.
///
/// Cloning is a reference-count bump. `put` and `remove_key` never modify
/// `self`; they return a fresh map sharing the unchanged strings.
#[derive(Clone)]
pub struct PersistentMap {
	table: Arc<Table>,
}

impl Default for PersistentMap {
	fn default() -> Self {
		Self::empty()
	}
}

impl PersistentMap {
	/// Returns the shared empty map.
	pub fn empty() -> Self {
		Self {
			table: EMPTY.clone(),
		}
	}

	/// Returns `true` if this map is the process-wide empty instance.
	pub fn is_shared_empty(&self) -> bool {
		Arc::ptr_eq(&self.table, &EMPTY)
	}

	pub fn len(&self) -> usize {
		self.table.len
	}

	pub fn is_empty(&self) -> bool {
		self.table.len == 0
	}

	/// Number of slots in the backing table.
	pub fn capacity(&self) -> usize {
		self.table.slots.len()
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		let idx = find(&self.table.slots, key).ok()?;
		self.table.slots[idx].as_ref().map(|(_, v)| &**v)
	}

	/// Returns the stored value as a shared string.
	pub fn get_shared(&self, key: &str) -> Option<Arc<str>> {
		let idx = find(&self.table.slots, key).ok()?;
		self.table.slots[idx].as_ref().map(|(_, v)| v.clone())
	}

	pub fn contains_key(&self, key: &str) -> bool {
		find(&self.table.slots, key).is_ok()
	}

	/// Returns a map with `key` bound to `value`.
	///
	/// When `key` is already bound to an equal value the receiver is returned
	/// as-is; callers still compare old and new values before reporting a
	/// change.
	pub fn put(&self, key: impl Into<Arc<str>>, value: impl Into<Arc<str>>) -> Self {
		let key = key.into();
		let value = value.into();
		let slots = &self.table.slots;

		let existing = find(slots, &key).ok();
		if let Some(idx) = existing
			&& let Some((_, current)) = &slots[idx]
			&& **current == *value
		{
			return self.clone();
		}

		let len = if existing.is_some() { self.table.len } else { self.table.len + 1 };
		let capacity = capacity_for(len).max(slots.len());

		let mut next = if capacity == slots.len() {
			slots.clone()
		} else {
			rehash(slots, capacity)
		};
		match find(&next, &key) {
			Ok(idx) | Err(idx) => next[idx] = Some((key, value)),
		}

		Self {
			table: Arc::new(Table { slots: next, len }),
		}
	}

	/// Returns a map without `key`.
	///
	/// The receiver is returned unchanged if `key` is absent, and the shared
	/// empty map if nothing is left.
	pub fn remove_key(&self, key: &str) -> Self {
		if !self.contains_key(key) {
			return self.clone();
		}
		let len = self.table.len - 1;
		if len == 0 {
			return Self::empty();
		}

		let mut next = vec![None; capacity_for(len)].into_boxed_slice();
		for (k, v) in self.table.slots.iter().flatten() {
			if **k == *key {
				continue;
			}
			if let Err(idx) = find(&next, k) {
				next[idx] = Some((k.clone(), v.clone()));
			}
		}

		Self {
			table: Arc::new(Table { slots: next, len }),
		}
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
		self.table.slots.iter().flatten().map(|(k, _)| &**k)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
		self.table.slots.iter().flatten().map(|(k, v)| (&**k, &**v))
	}

	/// Iterates the stored `Arc` handles without cloning them.
	pub fn entries(&self) -> impl Iterator<Item = (&Arc<str>, &Arc<str>)> + '_ {
		self.table.slots.iter().flatten().map(|(k, v)| (k, v))
	}

	/// Returns an equal map whose keys and values are the canonical
	/// instances held by `pool`.
	pub fn share_strings(&self, pool: &mut StringPool) -> Self {
		if self.is_empty() {
			return self.clone();
		}
		let slots = self
			.table
			.slots
			.iter()
			.map(|slot| slot.as_ref().map(|(k, v)| (pool.add(k), pool.add(v))))
			.collect();
		Self {
			table: Arc::new(Table {
				slots,
				len: self.table.len,
			}),
		}
	}

	/// Returns `true` when both handles point at the same table.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.table, &other.table)
	}
}

impl PartialEq for PersistentMap {
	fn eq(&self, other: &Self) -> bool {
		self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
	}
}

impl Eq for PersistentMap {}

impl fmt::Debug for PersistentMap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map().entries(self.iter()).finish()
	}
}

impl<K, V> FromIterator<(K, V)> for PersistentMap
where
	K: Into<Arc<str>>,
	V: Into<Arc<str>>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		iter.into_iter()
			.fold(Self::empty(), |map, (k, v)| map.put(k, v))
	}
}

/// Smallest power-of-two capacity that holds `len` entries under the load factor.
fn capacity_for(len: usize) -> usize {
	let mut capacity = MIN_CAPACITY;
	while len * 100 > capacity * LOAD_FACTOR_PERCENT {
		capacity *= 2;
	}
	capacity
}

/// Probes for `key`. `Ok` is the slot holding it, `Err` the free slot where it
/// would go. An empty slot array reports `Err(0)`.
fn find(slots: &[Option<Entry>], key: &str) -> Result<usize, usize> {
	if slots.is_empty() {
		return Err(0);
	}
	let mask = slots.len() - 1;
	let mut idx = (FxBuildHasher.hash_one(key) as usize) & mask;
	loop {
		match &slots[idx] {
			None => return Err(idx),
			Some((k, _)) if **k == *key => return Ok(idx),
			Some(_) => idx = (idx + 1) & mask,
		}
	}
}

fn rehash(slots: &[Option<Entry>], capacity: usize) -> Box<[Option<Entry>]> {
	let mut next = vec![None; capacity].into_boxed_slice();
	for (k, v) in slots.iter().flatten() {
		if let Err(idx) = find(&next, k) {
			next[idx] = Some((k.clone(), v.clone()));
		}
	}
	next
}
