//! Preference filters and the tree algorithms driven by them.
//!
//! A filter maps scope names to either "everything in the scope" or an
//! explicit set of subtree paths (relative to the scope root), each carrying
//! an optional list of key entries. Trimming a tree with a filter copies the
//! matching parts into a fresh detached tree; merging unions several trimmed
//! trees into one.

use std::collections::BTreeMap;

use arbor_primitives::path::{self, SEPARATOR};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::node::PreferenceNode;

/// How a [`FilterEntry`] key is compared with node keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
	/// The entry key is a prefix of the node key.
	Prefix,
}

/// One key selector inside a filter mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEntry {
	pub key: String,
	/// `None` selects exactly `key`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub match_type: Option<MatchType>,
}

impl FilterEntry {
	pub fn exact(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			match_type: None,
		}
	}

	pub fn prefix(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			match_type: Some(MatchType::Prefix),
		}
	}

	/// Keys of `keys` selected by this entry. Exact entries select their key
	/// whether or not it is present.
	fn select(&self, keys: &[String], out: &mut Vec<String>) {
		match self.match_type {
			None => out.push(self.key.clone()),
			Some(MatchType::Prefix) => out.extend(keys.iter().filter(|k| k.starts_with(&self.key)).cloned()),
		}
	}

	fn matches_any(&self, node: &PreferenceNode) -> bool {
		match self.match_type {
			None => node.get(&self.key).is_some(),
			Some(MatchType::Prefix) => node.keys().iter().any(|k| k.starts_with(&self.key)),
		}
	}
}

/// Node path (relative to the scope root) to its key entries; `None`
/// selects the whole subtree.
pub type ScopeMapping = BTreeMap<String, Option<Vec<FilterEntry>>>;

/// Selects parts of a preference tree by scope, path and key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceFilter {
	scopes: BTreeMap<String, Option<ScopeMapping>>,
}

impl PreferenceFilter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Selects everything in `scope`.
	pub fn whole_scope(mut self, scope: impl Into<String>) -> Self {
		self.scopes.insert(scope.into(), None);
		self
	}

	/// Selects the subtree at `node_path` in `scope`, restricted to `entries`
	/// when given.
	pub fn subtree(mut self, scope: impl Into<String>, node_path: impl Into<String>, entries: Option<Vec<FilterEntry>>) -> Self {
		let mapping = self
			.scopes
			.entry(scope.into())
			.or_insert_with(|| Some(ScopeMapping::new()));
		if let Some(mapping) = mapping {
			mapping.insert(node_path.into(), entries);
		}
		self
	}

	pub fn scopes(&self) -> impl Iterator<Item = &str> + '_ {
		self.scopes.keys().map(String::as_str)
	}

	/// `None` when the whole scope is selected.
	pub fn mapping(&self, scope: &str) -> Option<&ScopeMapping> {
		self.scopes.get(scope).and_then(Option::as_ref)
	}

	/// Declared subtrees of `mapping` lying below `tree`, as paths relative
	/// to `tree`.
	fn relative_targets<'a>(
		scope: &'a str,
		mapping: &'a ScopeMapping,
		tree: &'a PreferenceNode,
	) -> impl Iterator<Item = (String, &'a Option<Vec<FilterEntry>>)> + 'a {
		let tree_path = tree.absolute_path();
		mapping.iter().filter_map(move |(node_path, entries)| {
			let full = format!("{SEPARATOR}{scope}{SEPARATOR}{node_path}");
			let rest = full.strip_prefix(tree_path)?;
			if !tree.is_root() && !rest.is_empty() && !rest.starts_with(SEPARATOR) {
				return None;
			}
			Some((path::make_relative(rest).to_string(), entries))
		})
	}
}

/// Copies values from `source` to `destination`.
///
/// `keys` restricts the copy to the named keys. With `deep` set the whole
/// subtree is copied, creating missing destination nodes.
pub fn copy_from_to(
	source: &PreferenceNode,
	destination: &PreferenceNode,
	keys: Option<&[String]>,
	deep: bool,
) -> Result<()> {
	let all_keys;
	let selected = match keys {
		Some(keys) => keys,
		None => {
			all_keys = source.keys();
			&all_keys
		}
	};
	for key in selected {
		if let Some(value) = source.get(key) {
			destination.put(key, &value);
		}
	}
	if !deep {
		return Ok(());
	}
	for child in source.children_names()? {
		copy_from_to(&source.node(&child), &destination.node(&child), keys, deep)?;
	}
	Ok(())
}

/// Whether `tree` lies inside `scope`. The root lies in none.
fn scope_matches(scope: &str, tree: &PreferenceNode) -> bool {
	!tree.is_root() && path::scope_of(tree.absolute_path()) == scope
}

fn contains_keys(tree: &PreferenceNode) -> Result<bool> {
	let mut found = false;
	tree.accept(&mut |node: &PreferenceNode| {
		if !node.keys().is_empty() {
			found = true;
		}
		Ok(!found)
	})?;
	Ok(found)
}

/// Copies the parts of `tree` selected by `filter` into a new detached tree,
/// at the same absolute paths, and returns that tree's root.
pub fn trim_tree(tree: &PreferenceNode, filter: &PreferenceFilter) -> Result<PreferenceNode> {
	let trimmed = PreferenceNode::detached_root();
	let result = trimmed.node(tree.absolute_path());
	for scope in filter.scopes() {
		let Some(mapping) = filter.mapping(scope) else {
			if tree.is_root() && tree.node_exists(scope) {
				copy_from_to(&tree.node(scope), &result.node(scope), None, true)?;
			} else if scope_matches(scope, tree) {
				copy_from_to(tree, &result, None, true)?;
			}
			continue;
		};

		for (child_path, entries) in PreferenceFilter::relative_targets(scope, mapping, tree) {
			if !tree.node_exists(&child_path) {
				continue;
			}
			let child = tree.node(&child_path);
			match entries {
				None => copy_from_to(&child, &result.node(&child_path), None, true)?,
				Some(entries) => {
					let present = child.keys();
					let mut selected = Vec::new();
					for entry in entries {
						entry.select(&present, &mut selected);
					}
					copy_from_to(&child, &result.node(&child_path), Some(&selected), false)?;
				}
			}
		}
	}
	Ok(trimmed)
}

/// Unions `trees` into one detached tree; later trees win on conflicting
/// keys. A single tree is returned as is.
pub fn merge_trees(trees: Vec<PreferenceNode>) -> Result<PreferenceNode> {
	if trees.len() == 1 {
		return Ok(trees.into_iter().next().unwrap_or_else(PreferenceNode::detached_root));
	}
	let result = PreferenceNode::detached_root();
	for tree in &trees {
		tree.accept(&mut |node: &PreferenceNode| {
			let destination = result.node(node.absolute_path());
			copy_from_to(node, &destination, None, false)?;
			Ok(true)
		})?;
	}
	Ok(result)
}

/// Whether `tree` holds any data selected by `filter`.
pub fn filter_matches(tree: &PreferenceNode, filter: &PreferenceFilter) -> Result<bool> {
	for scope in filter.scopes() {
		let Some(mapping) = filter.mapping(scope) else {
			if tree.is_root() && tree.node_exists(scope) && contains_keys(&tree.node(scope))? {
				return Ok(true);
			}
			if scope_matches(scope, tree) && contains_keys(tree)? {
				return Ok(true);
			}
			continue;
		};

		for (child_path, entries) in PreferenceFilter::relative_targets(scope, mapping, tree) {
			if !tree.node_exists(&child_path) {
				continue;
			}
			let child = tree.node(&child_path);
			let hit = match entries {
				None => !child.keys().is_empty() || !child.children_names()?.is_empty(),
				Some(entries) => entries.iter().any(|entry| entry.matches_any(&child)),
			};
			if hit {
				return Ok(true);
			}
		}
	}
	Ok(false)
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn sample() -> PreferenceNode {
		let root = PreferenceNode::detached_root();
		let q = root.node("instance/q");
		q.put("a", "1");
		q.put("ab", "2");
		q.put("b", "3");
		q.node("child").put("deep", "4");
		root.node("instance/other").put("x", "5");
		root.node("configuration/q").put("c", "6");
		root
	}

	#[test]
	fn whole_scope_from_root() {
		let root = sample();
		let trimmed = trim_tree(&root, &PreferenceFilter::new().whole_scope("configuration")).unwrap();
		assert!(trimmed.is_root());
		assert_eq!(trimmed.node("configuration/q").get("c").as_deref(), Some("6"));
		assert!(!trimmed.node_exists("instance"));
	}

	#[test]
	fn whole_scope_of_subtree_keeps_only_that_subtree() {
		let root = sample();
		let q = root.node("/instance/q");
		let trimmed = trim_tree(&q, &PreferenceFilter::new().whole_scope("instance")).unwrap();

		assert!(trimmed.is_root());
		assert_eq!(trimmed.node("instance/q").get("a").as_deref(), Some("1"));
		assert_eq!(trimmed.node("instance/q/child").get("deep").as_deref(), Some("4"));
		assert!(!trimmed.node_exists("instance/other"));
	}

	#[test]
	fn prefix_and_exact_entries() {
		let root = sample();
		let filter = PreferenceFilter::new().subtree("instance", "q", Some(vec![FilterEntry::prefix("a"), FilterEntry::exact("missing")]));
		let trimmed = trim_tree(&root, &filter).unwrap();
		let q = trimmed.node("instance/q");

		let mut keys = q.keys();
		keys.sort();
		assert_eq!(keys, vec!["a", "ab"]);
		assert!(!q.node_exists("child"));
	}

	#[test]
	fn null_entries_copy_subtree() {
		let root = sample();
		let filter = PreferenceFilter::new().subtree("instance", "q", None);
		let trimmed = trim_tree(&root, &filter).unwrap();
		assert_eq!(trimmed.node("instance/q/child").get("deep").as_deref(), Some("4"));
		assert!(!trimmed.node_exists("instance/other"));
	}

	#[test]
	fn merge_unions_with_later_winning() {
		let first = PreferenceNode::detached_root();
		first.node("instance/q").put("k", "first");
		first.node("instance/q").put("only_first", "1");
		let second = PreferenceNode::detached_root();
		second.node("instance/q").put("k", "second");

		let merged = merge_trees(vec![first, second]).unwrap();
		let q = merged.node("instance/q");
		assert_eq!(q.get("k").as_deref(), Some("second"));
		assert_eq!(q.get("only_first").as_deref(), Some("1"));
	}

	#[test]
	fn matches_reports_selecting_filters() {
		let root = sample();
		assert!(filter_matches(&root, &PreferenceFilter::new().whole_scope("instance")).unwrap());
		assert!(!filter_matches(&root, &PreferenceFilter::new().whole_scope("default")).unwrap());
		assert!(
			filter_matches(&root, &PreferenceFilter::new().subtree("instance", "q", Some(vec![FilterEntry::prefix("a")]))).unwrap()
		);
		assert!(
			!filter_matches(&root, &PreferenceFilter::new().subtree("instance", "q", Some(vec![FilterEntry::exact("zzz")]))).unwrap()
		);
	}

	#[test]
	fn filter_serializes_match_type_lowercase() {
		let entry = FilterEntry::prefix("editor.");
		let text = toml::to_string(&entry).unwrap();
		assert!(text.contains("match_type = \"prefix\""));
	}
}
