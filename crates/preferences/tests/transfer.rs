//! Integration tests for importing and exporting preference streams.

#![allow(unused_crate_dependencies)]

use std::fs;

use arbor_preferences::{
	CONFIGURATION_SCOPE, FilterEntry, INSTANCE_SCOPE, PreferenceError, PreferenceFilter, PreferencesConfig,
	PreferencesService,
};
use pretty_assertions::assert_eq;

fn export_instance(service: &PreferencesService) -> String {
	let mut out = Vec::new();
	service
		.export_preferences(&service.root().node(INSTANCE_SCOPE), &[], &mut out)
		.unwrap();
	String::from_utf8(out).unwrap()
}

#[test]
fn legacy_import_matches_current_format_import() {
	let legacy = "org.a/k=1\norg.a/sub/x=2\norg.b/flag=true\n";
	let current = "file_export_version=3.0\n/instance/org.a/k=1\n/instance/org.a//sub/x=2\n/instance/org.b/flag=true\n";

	let from_legacy = PreferencesService::in_memory();
	from_legacy.import_preferences(legacy.as_bytes()).unwrap();
	let from_current = PreferencesService::in_memory();
	from_current.import_preferences(current.as_bytes()).unwrap();

	assert_eq!(export_instance(&from_legacy), export_instance(&from_current));
	let node = from_legacy.root().node("instance/org.a");
	assert_eq!(node.get("sub/x").as_deref(), Some("2"));
	assert!(!node.node_exists("sub"));
	assert!(from_legacy.get_bool("org.b", "flag", false, &[]));
}

#[test]
fn legacy_version_line_replaces_the_qualifier() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "org.a", "stale", "x");
	service.root().node("instance/org.a/child").put("deep", "y");

	service.import_preferences("org.a=1.0.0\norg.a/k=1\n".as_bytes()).unwrap();

	let node = service.root().node("instance/org.a");
	assert_eq!(node.keys(), vec!["k"]);
	assert!(!node.node_exists("child"));
}

#[test]
fn export_then_import_into_fresh_workspace() {
	let source_dir = tempfile::tempdir().unwrap();
	let target_dir = tempfile::tempdir().unwrap();
	let export_file = source_dir.path().join("settings.epf");

	let source = PreferencesService::new(&PreferencesConfig {
		instance_location: Some(source_dir.path().to_path_buf()),
		..PreferencesConfig::default()
	})
	.unwrap();
	source.set(INSTANCE_SCOPE, "org.a", "k", "v");
	source.root().node("instance/org.a/nested").put("n", "1");
	source.set(CONFIGURATION_SCOPE, "org.c", "c", "3");
	source
		.export_preferences(source.root(), &[], fs::File::create(&export_file).unwrap())
		.unwrap();

	let target = PreferencesService::new(&PreferencesConfig {
		instance_location: Some(target_dir.path().to_path_buf()),
		..PreferencesConfig::default()
	})
	.unwrap();
	target.import_preferences(fs::File::open(&export_file).unwrap()).unwrap();

	assert_eq!(target.get_string("org.a", "nested/n", "", &[]), "1");
	assert_eq!(target.get_string("org.c", "c", "", &[]), "3");
	let written = fs::read_to_string(target_dir.path().join(".settings/org.a.prefs")).unwrap();
	assert!(written.contains("k=v"));
	assert!(written.contains("nested/n=1"));
}

#[test]
fn excludes_prune_relative_paths() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "org.a", "k", "v");
	service.set(INSTANCE_SCOPE, "org.secret", "token", "t");

	let mut out = Vec::new();
	service
		.export_preferences(&service.root().node(INSTANCE_SCOPE), &["org.secret".to_string()], &mut out)
		.unwrap();
	let text = String::from_utf8(out).unwrap();

	assert!(text.contains("/instance/org.a/k=v"));
	assert!(!text.contains("org.secret"));
	assert!(text.contains("\\!/instance="));
}

#[test]
fn filtered_export_leaves_out_siblings() {
	let service = PreferencesService::in_memory();
	service.set(INSTANCE_SCOPE, "org.a", "keep.one", "1");
	service.set(INSTANCE_SCOPE, "org.a", "keep.two", "2");
	service.set(INSTANCE_SCOPE, "org.a", "drop", "3");
	service.set(INSTANCE_SCOPE, "org.b", "other", "4");

	let filter = PreferenceFilter::new().subtree(INSTANCE_SCOPE, "org.a", Some(vec![FilterEntry::prefix("keep.")]));
	let mut out = Vec::new();
	service.export_filtered(service.root(), &[filter], &mut out).unwrap();
	let text = String::from_utf8(out).unwrap();

	assert!(text.contains("/instance/org.a/keep.one=1"));
	assert!(text.contains("/instance/org.a/keep.two=2"));
	assert!(!text.contains("drop"));
	assert!(!text.contains("org.b"));
	assert!(!text.contains('!'));

	let target = PreferencesService::in_memory();
	target.set(INSTANCE_SCOPE, "org.z", "local", "kept");
	target.import_preferences(text.as_bytes()).unwrap();
	assert_eq!(target.get_string("org.a", "keep.one", "", &[]), "1");
	assert_eq!(target.get_string("org.z", "local", "", &[]), "kept");
}

#[test]
fn empty_stream_is_rejected() {
	let service = PreferencesService::in_memory();
	let err = service.import_preferences("# only a comment\n".as_bytes()).unwrap_err();
	assert!(matches!(err, PreferenceError::InvalidFormat(_)));
}

#[test]
fn bundle_versions_travel_with_instance_values() {
	let mut config = PreferencesConfig::default();
	config.bundle_versions.insert("org.a".to_string(), "2.4.0".to_string());
	let service = PreferencesService::new(&config).unwrap();
	service.set(INSTANCE_SCOPE, "org.a", "k", "v");

	let text = export_instance(&service);
	assert!(text.contains("@org.a=2.4.0"));

	let exported = service.read_preferences(text.as_bytes()).unwrap();
	assert_eq!(exported.version("/instance/org.a"), Some("2.4.0"));
	assert!(exported.is_export_root("/instance"));
}
