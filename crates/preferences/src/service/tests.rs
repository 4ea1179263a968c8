use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::*;
use crate::error::PreferenceError;
use crate::scope::{CONFIGURATION_SCOPE, INSTANCE_SCOPE};

fn order(scopes: &[&str]) -> Vec<String> {
	scopes.iter().map(|s| s.to_string()).collect()
}

#[test]
fn first_defining_scope_wins() {
	let service = PreferencesService::in_memory();
	service.set(DEFAULT_SCOPE, "q", "k", "default");
	assert_eq!(service.get_string("q", "k", "none", &[]), "default");

	service.set(CONFIGURATION_SCOPE, "q", "k", "configuration");
	assert_eq!(service.get_string("q", "k", "none", &[]), "configuration");

	service.set(INSTANCE_SCOPE, "q", "k", "instance");
	assert_eq!(service.get_string("q", "k", "none", &[]), "instance");
	assert_eq!(service.get_string("q", "missing", "none", &[]), "none");
}

#[test]
fn registered_orders_steer_lookup() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "k", "instance");
	service.set(DEFAULT_SCOPE, "q", "k", "default");

	service
		.set_default_lookup_order("q", Some("k"), Some(order(&[DEFAULT_SCOPE, INSTANCE_SCOPE])))
		.unwrap();
	assert_eq!(service.get_string("q", "k", "", &[]), "default");
	assert_eq!(service.get_default_lookup_order("q", None), None);
	assert_eq!(service.get_lookup_order("q", Some("other")), order(&DEFAULT_LOOKUP_ORDER));

	service.set_default_lookup_order("q", Some("k"), None).unwrap();
	assert_eq!(service.get_string("q", "k", "", &[]), "instance");
}

#[test]
fn lookup_orders_reject_empty_scope_names() {
	let service = PreferencesService::in_memory();
	assert!(matches!(
		service.set_default_default_lookup_order(order(&[""])),
		Err(PreferenceError::InvalidArgument(_))
	));

	let config = PreferencesConfig {
		default_lookup_order: Some(order(&[DEFAULT_SCOPE, ""])),
		..PreferencesConfig::default()
	};
	assert!(PreferencesService::new(&config).is_err());
}

#[test]
fn keys_with_node_paths_resolve_below_the_qualifier() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "editor/tab.width", "4");

	let node = service.root().node("instance/q/editor");
	assert_eq!(node.get("tab.width").as_deref(), Some("4"));
	assert_eq!(service.get_int("q", "editor/tab.width", 8, &[]), 4);

	let nodes = service.get_nodes("q", "editor/tab.width", &[]);
	let paths: Vec<&str> = nodes.iter().map(PreferenceNode::absolute_path).collect();
	assert_eq!(paths, vec!["/instance/q/editor", "/configuration/q/editor", "/default/q/editor"]);
}

#[test]
fn contexts_replace_scope_nodes() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "k", "live");

	let projects = PreferenceNode::detached_root();
	let project = projects.node("project/p");
	project.node("q").put("k", "project");
	let context = NodeScopeContext::new(INSTANCE_SCOPE, project);

	assert_eq!(service.get_string("q", "k", "", &[&context]), "project");
	assert_eq!(service.get_string("q", "k", "", &[]), "live");
}

struct Exploding;

impl ScopeContext for Exploding {
	fn name(&self) -> &str {
		INSTANCE_SCOPE
	}

	fn node(&self, _qualifier: &str) -> Option<PreferenceNode> {
		panic!("context failure")
	}
}

#[test]
fn panicking_context_falls_back_to_live_tree() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "k", "live");
	assert_eq!(service.get_string("q", "k", "", &[&Exploding]), "live");
}

#[test]
fn typed_lookups_fall_back_on_garbage() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "flag", "TRUE");
	service.set(INSTANCE_SCOPE, "q", "count", "x");
	service.set(INSTANCE_SCOPE, "q", "ratio", "0.25");
	service.root().node("instance/q").put_byte_array("blob", b"\x00\x01");

	assert!(service.get_bool("q", "flag", false, &[]));
	assert_eq!(service.get_int("q", "count", 7, &[]), 7);
	assert_eq!(service.get_long("q", "count", 7, &[]), 7);
	assert_eq!(service.get_double("q", "ratio", 0.0, &[]), 0.25);
	assert_eq!(service.get_float("q", "ratio", 0.0, &[]), 0.25);
	assert_eq!(service.get_byte_array("q", "blob", b"", &[]), vec![0, 1]);
	assert_eq!(service.get_byte_array("q", "count", b"d", &[]), b"d".to_vec());
}

#[test]
fn initializers_reach_loaded_default_nodes() {
	let service = PreferencesService::in_memory();
	assert_eq!(service.get_string("q", "k", "none", &[]), "none");

	service.register_initializer("q", |defaults: &mut crate::scope::DefaultValues| defaults.put("k", "init"));
	assert_eq!(service.get_string("q", "k", "none", &[]), "init");
	assert_eq!(
		service.root().node("bundle_defaults/q").get("k").as_deref(),
		Some("init")
	);
}

#[test]
fn apply_exported_replaces_node_contents() {
	let service = PreferencesService::in_memory();
	let q = service.set(INSTANCE_SCOPE, "q", "stale", "1");
	q.put("kept", "old");

	let stream = "file_export_version=3.0\n/instance/q/kept=new\n/instance/q/added=2\n";
	service.import_preferences(stream.as_bytes()).unwrap();

	let mut keys = q.keys();
	keys.sort();
	assert_eq!(keys, vec!["added", "kept"]);
	assert_eq!(q.get("kept").as_deref(), Some("new"));
	assert!(!q.is_dirty());
}

#[test]
fn export_roots_drop_live_subtrees() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "sub/k", "1");
	let stream = "file_export_version=3.0\n\\!/instance/q=\n/instance/q/k=v\n";
	service.import_preferences(stream.as_bytes()).unwrap();

	let q = service.root().node("instance/q");
	assert_eq!(q.get("k").as_deref(), Some("v"));
	assert!(!q.node_exists("sub"));
}

#[test]
fn malformed_stream_leaves_tree_untouched() {
	let service = PreferencesService::in_memory();
	let q = service.set(INSTANCE_SCOPE, "q", "k", "v");
	assert!(service.import_preferences("\n".as_bytes()).is_err());
	assert!(matches!(
		service.import_preferences("bad=\\uZZZZ\n".as_bytes()),
		Err(PreferenceError::Properties(_))
	));
	assert_eq!(q.get("k").as_deref(), Some("v"));
}

#[test]
fn export_then_import_round_trips() {
	let source = PreferencesService::in_memory();
	source.set(INSTANCE_SCOPE, "q", "a", "1");
	source.set(INSTANCE_SCOPE, "q", "nested/b", "2");
	source.set(DEFAULT_SCOPE, "q", "d", "ignored");

	let mut out = Vec::new();
	source.export_preferences(source.root(), &[], &mut out).unwrap();

	let target = PreferencesService::in_memory();
	target.import_preferences(out.as_slice()).unwrap();
	assert_eq!(target.get_string("q", "a", "", &[]), "1");
	assert_eq!(target.get_string("q", "nested/b", "", &[]), "2");
	assert_eq!(target.root().node("default/q").get("d"), None);
}

#[test]
fn filtered_apply_copies_only_the_selection() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "untouched", "live");

	let incoming = PreferenceNode::detached_root();
	incoming.node("instance/q").put("font.size", "12");
	incoming.node("instance/q").put("font.name", "mono");
	incoming.node("instance/q").put("color", "red");

	let filter = PreferenceFilter::new().subtree(INSTANCE_SCOPE, "q", Some(vec![FilterEntry::prefix("font.")]));
	service.apply_preferences(&incoming, &[filter]).unwrap();

	let q = service.root().node("instance/q");
	assert_eq!(q.get("font.size").as_deref(), Some("12"));
	assert_eq!(q.get("font.name").as_deref(), Some("mono"));
	assert_eq!(q.get("color"), None);
	assert_eq!(q.get("untouched").as_deref(), Some("live"));
}

#[test]
fn apply_without_filters_is_a_no_op() {
	let service = PreferencesService::in_memory();
	let incoming = PreferenceNode::detached_root();
	incoming.node("instance/q").put("k", "v");
	service.apply_preferences(&incoming, &[]).unwrap();
	assert!(!service.root().node_exists("instance/q"));
}

#[test]
fn filtered_export_contains_only_the_subtree() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "q", "a", "1");
	service.set(INSTANCE_SCOPE, "q", "child/b", "2");
	service.set(INSTANCE_SCOPE, "sibling", "c", "3");

	let node = service.root().node("instance/q");
	let mut out = Vec::new();
	service
		.export_filtered(&node, &[PreferenceFilter::new().whole_scope(INSTANCE_SCOPE)], &mut out)
		.unwrap();

	let exported = read_preferences(out.as_slice()).unwrap();
	assert_eq!(exported.export_roots().count(), 0);
	let root = exported.root();
	assert_eq!(root.node("instance/q").get("a").as_deref(), Some("1"));
	assert_eq!(root.node("instance/q/child").get("b").as_deref(), Some("2"));
	assert!(!root.node_exists("instance/sibling"));
}

#[test]
fn matches_returns_selecting_filters() {
	let service = PreferencesService::in_memory();
	let tree = PreferenceNode::detached_root();
	tree.node("instance/q").put("k", "v");

	let filters = vec![
		PreferenceFilter::new().whole_scope(CONFIGURATION_SCOPE),
		PreferenceFilter::new().whole_scope(INSTANCE_SCOPE),
	];
	let matching = service.matches(&tree, &filters).unwrap();
	assert_eq!(matching, vec![&filters[1]]);
}

#[test]
fn pre_apply_hooks_can_rewrite_the_tree() {
	let service = PreferencesService::in_memory();
	let calls = Arc::new(AtomicUsize::new(0));
	let seen = calls.clone();
	service.add_pre_apply_hook(move |tree| {
		seen.fetch_add(1, Ordering::SeqCst);
		tree.node("instance/q").put("injected", "yes");
		tree
	});
	service.add_pre_apply_hook(|_| panic!("hook failure"));

	service
		.import_preferences("file_export_version=3.0\n/instance/q/k=v\n".as_bytes())
		.unwrap();

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	let q = service.root().node("instance/q");
	assert_eq!(q.get("injected").as_deref(), Some("yes"));
	assert_eq!(q.get("k").as_deref(), Some("v"));
}

#[test]
fn version_validation_reads_markers() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("export.epf");
	std::fs::write(&file, "file_export_version=3.0\n@old=3.0.0\n@new=1.1.0\n@same=1.0.5\n@bad=x.y\n/instance/old/k=v\n").unwrap();

	let service = PreferencesService::in_memory();
	let installed: BTreeMap<String, String> = [("old", "2.0.0"), ("new", "1.2.0"), ("same", "1.0.0"), ("bad", "1.0.0")]
		.into_iter()
		.map(|(q, v)| (q.to_string(), v.to_string()))
		.collect();
	service.set_bundle_versions(Arc::new(installed));

	let report = service.validate_versions(&file);
	let mut found: Vec<(String, Severity)> = report
		.issues
		.iter()
		.map(|issue| (issue.bundle.clone(), issue.severity))
		.collect();
	found.sort();
	assert_eq!(
		found,
		vec![("new".to_string(), Severity::Warning), ("old".to_string(), Severity::Error)]
	);
	assert!(report.has_errors());

	assert!(service.validate_versions(&dir.path().join("missing.epf")).is_ok());
}

#[test]
fn unreadable_export_is_reported() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("empty.epf");
	std::fs::write(&file, "").unwrap();

	let report = PreferencesService::in_memory().validate_versions(&file);
	assert!(report.has_errors());
}

#[test]
fn forced_sharing_collapses_duplicates() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "a", "k", "same-value");
	service.set(INSTANCE_SCOPE, "b", "k", "same-value");

	assert!(service.force_share_strings() >= 2);
	assert_eq!(service.share_strings(), None);
}
