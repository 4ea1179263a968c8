//! Subcommand implementations against a running service.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use anyhow::{Context, bail};
use arbor_preferences::{PreferenceNode, PreferencesService};
use arbor_primitives::path::{self, DOUBLE_SEPARATOR};

use crate::cli::Command;

/// How a command that did not error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Done,
	/// The command ran but found problems worth a failing exit status.
	Failed,
}

/// Runs `command`, writing its report to `out`.
pub fn run(command: Command, service: &PreferencesService, out: &mut impl Write) -> anyhow::Result<Outcome> {
	match command {
		Command::Get { qualifier, key, scopes } => {
			let value = if scopes.is_empty() {
				node_path(&qualifier)?;
				service.get(&key, &service.get_nodes(&qualifier, &key, &[]))
			} else {
				let mut found = None;
				for scope in &scopes {
					found = scoped_node(service, scope, &qualifier, &key)?.get(leaf(&key));
					if found.is_some() {
						break;
					}
				}
				found
			};
			match value {
				Some(value) => writeln!(out, "{value}")?,
				None => bail!("{qualifier}: {key} is not set"),
			}
		}
		Command::Set {
			scope,
			qualifier,
			key,
			value,
		} => {
			let node = scoped_node(service, &scope, &qualifier, &key)?;
			node.put(leaf(&key), &value);
			node.flush()
				.with_context(|| format!("failed to save {}", node.absolute_path()))?;
		}
		Command::Remove { scope, qualifier, key } => {
			let node = scoped_node(service, &scope, &qualifier, &key)?;
			node.remove(leaf(&key));
			node.flush()
				.with_context(|| format!("failed to save {}", node.absolute_path()))?;
		}
		Command::Tree { path } => {
			out.write_all(service.root().node(node_path(&path)?).to_deep_debug_string().as_bytes())?;
		}
		Command::Order { qualifier, key } => {
			writeln!(out, "{}", service.get_lookup_order(&qualifier, key.as_deref()).join(" > "))?;
		}
		Command::Export { path, excludes, output } => {
			let node = service.root().node(node_path(&path)?);
			match output {
				Some(file) => {
					let writer = File::create(&file).with_context(|| format!("cannot create {}", file.display()))?;
					service.export_preferences(&node, &excludes, BufWriter::new(writer))?;
					tracing::info!(path = %node.absolute_path(), file = %file.display(), "exported preferences");
				}
				None => service.export_preferences(&node, &excludes, &mut *out)?,
			}
		}
		Command::Import { file } => {
			let reader = File::open(&file).with_context(|| format!("cannot open {}", file.display()))?;
			service
				.import_preferences(BufReader::new(reader))
				.with_context(|| format!("failed to import {}", file.display()))?;
			tracing::info!(file = %file.display(), "imported preferences");
		}
		Command::Validate { file } => {
			let report = service.validate_versions(&file);
			for issue in &report.issues {
				writeln!(out, "{issue}")?;
			}
			if report.has_errors() {
				return Ok(Outcome::Failed);
			}
			if report.is_ok() {
				writeln!(out, "{}: ok", file.display())?;
			}
		}
	}
	Ok(Outcome::Done)
}

/// Key without its relative node path; `sub//a/b` names key `a/b`.
fn leaf(key: &str) -> &str {
	path::decode_path(key).1
}

/// Rejects user-supplied node paths with an empty segment.
fn node_path(raw: &str) -> anyhow::Result<&str> {
	if raw.contains(DOUBLE_SEPARATOR) {
		bail!("{raw:?} has an empty path segment");
	}
	Ok(raw)
}

/// Node holding `key` of `qualifier` in `scope`; a `sub/key` or `sub//a/b`
/// form selects a descendant of the qualifier node.
fn scoped_node(
	service: &PreferencesService,
	scope: &str,
	qualifier: &str,
	key: &str,
) -> anyhow::Result<PreferenceNode> {
	let sub = path::decode_path(key).0.unwrap_or("");
	Ok(service
		.root()
		.node(node_path(scope)?)
		.node(node_path(qualifier)?)
		.node(node_path(sub)?))
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn run_to_string(service: &PreferencesService, command: Command) -> (Outcome, String) {
		let mut out = Vec::new();
		let code = run(command, service, &mut out).unwrap();
		(code, String::from_utf8(out).unwrap())
	}

	#[test]
	fn set_then_get_nested_key() {
		let service = PreferencesService::in_memory();
		run_to_string(
			&service,
			Command::Set {
				scope: "instance".into(),
				qualifier: "org.a".into(),
				key: "colors/fg".into(),
				value: "black".into(),
			},
		);

		let (_, text) = run_to_string(
			&service,
			Command::Get {
				qualifier: "org.a".into(),
				key: "colors/fg".into(),
				scopes: Vec::new(),
			},
		);
		assert_eq!(text, "black\n");
		assert_eq!(service.root().node("instance/org.a/colors").get("fg").as_deref(), Some("black"));
	}

	#[test]
	fn keys_containing_the_separator_stay_whole() {
		let service = PreferencesService::in_memory();
		run_to_string(
			&service,
			Command::Set {
				scope: "instance".into(),
				qualifier: "org.a".into(),
				key: "sub//a/b".into(),
				value: "v".into(),
			},
		);

		assert_eq!(service.get_string("org.a", "sub//a/b", "<unset>", &[]), "v");
		assert_eq!(service.root().node("instance/org.a/sub").keys(), vec!["a/b"]);
		assert!(!service.root().node_exists("a"));

		for scopes in [Vec::new(), vec!["instance".to_string()]] {
			let (_, text) = run_to_string(
				&service,
				Command::Get {
					qualifier: "org.a".into(),
					key: "sub//a/b".into(),
					scopes,
				},
			);
			assert_eq!(text, "v\n");
		}
	}

	#[test]
	fn empty_path_segments_are_reported() {
		let service = PreferencesService::in_memory();
		let mut out = Vec::new();
		let err = run(Command::Tree { path: "/instance//q".into() }, &service, &mut out).unwrap_err();
		assert!(err.to_string().contains("empty path segment"));
		assert!(!service.root().node_exists("q"));
	}

	#[test]
	fn get_with_scopes_skips_other_scopes() {
		let service = PreferencesService::in_memory();
		service.set("instance", "org.a", "k", "v");

		let mut out = Vec::new();
		let err = run(
			Command::Get {
				qualifier: "org.a".into(),
				key: "k".into(),
				scopes: vec!["configuration".into()],
			},
			&service,
			&mut out,
		)
		.unwrap_err();
		assert!(err.to_string().contains("not set"));
	}

	#[test]
	fn export_then_import_through_files() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("out.epf");
		let source = PreferencesService::in_memory();
		source.set("instance", "org.a", "k", "v");
		run_to_string(
			&source,
			Command::Export {
				path: "/instance".into(),
				excludes: Vec::new(),
				output: Some(file.clone()),
			},
		);

		let target = PreferencesService::in_memory();
		run_to_string(&target, Command::Import { file });
		assert_eq!(target.get_string("org.a", "k", "", &[]), "v");
	}

	#[test]
	fn validate_fails_on_major_mismatch() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("old.epf");
		std::fs::write(&file, "file_export_version=3.0\n@org.a=3.0.0\n/instance/org.a/k=v\n").unwrap();

		let service = PreferencesService::in_memory();
		service.set_bundle_versions(std::sync::Arc::new(std::collections::BTreeMap::from([(
			"org.a".to_string(),
			"2.0.0".to_string(),
		)])));
		let (code, text) = run_to_string(&service, Command::Validate { file });
		assert_eq!(code, Outcome::Failed);
		assert!(text.contains("org.a"));
	}

	#[test]
	fn validate_missing_file_is_ok() {
		let dir = tempfile::tempdir().unwrap();
		let service = PreferencesService::in_memory();
		let (code, text) = run_to_string(
			&service,
			Command::Validate {
				file: dir.path().join("absent.epf"),
			},
		);
		assert_eq!(code, Outcome::Done);
		assert!(text.ends_with(": ok\n"));
	}

	#[test]
	fn order_joins_scopes() {
		let service = PreferencesService::in_memory();
		let (_, text) = run_to_string(
			&service,
			Command::Order {
				qualifier: "org.a".into(),
				key: None,
			},
		);
		assert_eq!(text, "instance > configuration > default\n");
	}
}
