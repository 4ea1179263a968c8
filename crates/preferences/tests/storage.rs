//! Integration tests for scopes contributed through [`ScopeStorage`].

#![allow(unused_crate_dependencies)]

use std::collections::BTreeMap;
use std::sync::Arc;

use arbor_preferences::{
	INSTANCE_SCOPE, NodeScopeContext, PreferencesService, Result, ScopeContext, ScopeStorage, StorageScope,
};
use arbor_primitives::Properties;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

/// Per-project tables keyed by `/project/<name>/<qualifier>`.
#[derive(Clone, Default)]
struct ProjectStore {
	tables: Arc<Mutex<BTreeMap<String, Properties>>>,
	removed: Arc<Mutex<Vec<String>>>,
}

impl ScopeStorage for ProjectStore {
	fn children_names(&self, scope_path: &str) -> Result<Vec<String>> {
		let prefix = format!("{scope_path}/");
		let mut names: Vec<String> = self
			.tables
			.lock()
			.keys()
			.filter_map(|path| path.strip_prefix(&prefix)?.split('/').next().map(str::to_string))
			.collect();
		names.dedup();
		Ok(names)
	}

	fn load(&self, path: &str) -> Result<Option<Properties>> {
		Ok(self.tables.lock().get(path).cloned())
	}

	fn save(&self, path: &str, table: &Properties) -> Result<()> {
		let mut tables = self.tables.lock();
		if table.is_empty() {
			tables.remove(path);
		} else {
			tables.insert(path.to_string(), table.clone());
		}
		Ok(())
	}

	fn removed(&self, path: &str) -> Result<()> {
		self.tables.lock().remove(path);
		self.removed.lock().push(path.to_string());
		Ok(())
	}
}

fn project_service(store: &ProjectStore) -> PreferencesService {
	let service = PreferencesService::in_memory();
	service.register_scope(Arc::new(StorageScope::new("project", store.clone()).with_load_level_depth(3)));
	service
}

#[test]
fn stored_tables_load_at_the_third_level() {
	let store = ProjectStore::default();
	store
		.tables
		.lock()
		.insert("/project/p1/org.a".to_string(), [("k", "stored"), ("sub/x", "1")].into_iter().collect());
	let service = project_service(&store);

	assert_eq!(service.root().node("project").children_names().unwrap(), vec!["p1"]);
	let node = service.root().node("project/p1/org.a");
	assert_eq!(node.get("k").as_deref(), Some("stored"));
	assert_eq!(node.node("sub").get("x").as_deref(), Some("1"));
	assert_eq!(node.load_level().unwrap().absolute_path(), "/project/p1/org.a");
	assert!(service.root().node("project/p1").load_level().is_none());
}

#[test]
fn flush_hands_the_subtree_to_the_store() {
	let store = ProjectStore::default();
	let service = project_service(&store);

	let node = service.root().node("project/p1/org.a");
	node.put("k", "v");
	node.node("deep").put("d", "2");
	service.shutdown().unwrap();

	let tables = store.tables.lock();
	let table = tables.get("/project/p1/org.a").unwrap();
	assert_eq!(table.get("k"), Some("v"));
	assert_eq!(table.get("deep/d"), Some("2"));
}

#[test]
fn removing_a_project_qualifier_informs_the_store() {
	let store = ProjectStore::default();
	let service = project_service(&store);
	let node = service.root().node("project/p1/org.a");
	node.put("k", "v");
	node.flush().unwrap();

	node.remove_node().unwrap();
	assert_eq!(*store.removed.lock(), vec!["/project/p1/org.a"]);
	assert!(store.tables.lock().is_empty());
}

#[test]
fn recreated_project_qualifier_loads_again() {
	let store = ProjectStore::default();
	let service = project_service(&store);
	let node = service.root().node("project/p1/org.a");
	node.put("k", "v");
	node.flush().unwrap();
	node.remove_node().unwrap();

	store
		.tables
		.lock()
		.insert("/project/p1/org.a".to_string(), [("k", "restored")].into_iter().collect());
	let node = service.root().node("project/p1/org.a");
	assert_eq!(node.get("k").as_deref(), Some("restored"));
}

#[test]
fn project_context_takes_precedence_in_lookup() {
	let store = ProjectStore::default();
	let service = project_service(&store);
	service
		.set_default_lookup_order("org.a", None, Some(vec!["project".into(), INSTANCE_SCOPE.into()]))
		.unwrap();
	service.set(INSTANCE_SCOPE, "org.a", "k", "instance");
	service.set(INSTANCE_SCOPE, "org.a", "only.instance", "yes");
	service.root().node("project/p1/org.a").put("k", "project");

	let context = NodeScopeContext::new("project", service.root().node("project/p1"));
	let contexts: [&dyn ScopeContext; 1] = [&context];
	assert_eq!(service.get_string("org.a", "k", "", &contexts), "project");
	assert_eq!(service.get_string("org.a", "only.instance", "", &contexts), "yes");
	assert_eq!(service.get_string("org.a", "k", "", &[]), "instance");
}
