//! Scoped lookup: which scopes are searched, in which order.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashMap;

use crate::error::{PreferenceError, Result};
use crate::node::PreferenceNode;
use crate::scope::{CONFIGURATION_SCOPE, DEFAULT_SCOPE, INSTANCE_SCOPE};

/// Order used when nothing more specific is registered.
pub const DEFAULT_LOOKUP_ORDER: [&str; 3] = [INSTANCE_SCOPE, CONFIGURATION_SCOPE, DEFAULT_SCOPE];

/// A named source of nodes that overrides the live tree for one scope during
/// a lookup.
pub trait ScopeContext {
	/// Scope this context stands in for.
	fn name(&self) -> &str;

	/// Node holding `qualifier`'s values, if the context provides one.
	fn node(&self, qualifier: &str) -> Option<PreferenceNode>;
}

/// Context resolving qualifiers below a fixed base node.
#[derive(Debug, Clone)]
pub struct NodeScopeContext {
	name: String,
	base: PreferenceNode,
}

impl NodeScopeContext {
	pub fn new(name: impl Into<String>, base: PreferenceNode) -> Self {
		Self {
			name: name.into(),
			base,
		}
	}
}

impl ScopeContext for NodeScopeContext {
	fn name(&self) -> &str {
		&self.name
	}

	fn node(&self, qualifier: &str) -> Option<PreferenceNode> {
		Some(self.base.node(qualifier))
	}
}

type OrderTable = FxHashMap<String, Arc<[String]>>;

/// Registered lookup orders keyed by `qualifier` or `qualifier/key`.
///
/// Readers load a snapshot without locking; writers publish a new table.
pub(crate) struct LookupOrders {
	overrides: ArcSwap<OrderTable>,
	fallback: ArcSwap<Vec<String>>,
}

fn registry_key(qualifier: &str, key: Option<&str>) -> String {
	match key {
		Some(key) => format!("{qualifier}/{key}"),
		None => qualifier.to_string(),
	}
}

fn validate(order: &[String]) -> Result<()> {
	if order.iter().any(|scope| scope.is_empty()) {
		return Err(PreferenceError::InvalidArgument(
			"lookup order contains an empty scope name".to_string(),
		));
	}
	Ok(())
}

impl LookupOrders {
	pub(crate) fn new(fallback: Option<Vec<String>>) -> Self {
		let fallback = fallback.unwrap_or_else(|| DEFAULT_LOOKUP_ORDER.iter().map(|s| s.to_string()).collect());
		Self {
			overrides: ArcSwap::from_pointee(OrderTable::default()),
			fallback: ArcSwap::from_pointee(fallback),
		}
	}

	pub(crate) fn set(&self, qualifier: &str, key: Option<&str>, order: Option<Vec<String>>) -> Result<()> {
		if let Some(order) = &order {
			validate(order)?;
		}
		let registry_key = registry_key(qualifier, key);
		let order: Option<Arc<[String]>> = order.map(Into::into);
		self.overrides.rcu(|current| {
			let mut next = OrderTable::clone(current);
			match &order {
				Some(order) => {
					next.insert(registry_key.clone(), order.clone());
				}
				None => {
					next.remove(&registry_key);
				}
			}
			next
		});
		Ok(())
	}

	pub(crate) fn registered(&self, qualifier: &str, key: Option<&str>) -> Option<Vec<String>> {
		self.overrides
			.load()
			.get(&registry_key(qualifier, key))
			.map(|order| order.to_vec())
	}

	/// Key-specific order, else qualifier order, else the fallback.
	pub(crate) fn resolve(&self, qualifier: &str, key: Option<&str>) -> Vec<String> {
		let table = self.overrides.load();
		let specific = key.and_then(|key| table.get(&registry_key(qualifier, Some(key))));
		match specific.or_else(|| table.get(qualifier)) {
			Some(order) => order.to_vec(),
			None => Vec::clone(&self.fallback.load()),
		}
	}

	pub(crate) fn fallback(&self) -> Vec<String> {
		Vec::clone(&self.fallback.load())
	}

	pub(crate) fn set_fallback(&self, order: Vec<String>) -> Result<()> {
		validate(&order)?;
		self.fallback.store(Arc::new(order));
		Ok(())
	}
}
