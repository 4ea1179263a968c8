//! Typed accessors and the node ⇄ table conversion.

use std::str::FromStr;

use arbor_primitives::Properties;
use arbor_primitives::path::{self, SEPARATOR};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::{PreferenceNode, VERSION_KEY};

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
	value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub(crate) fn parse_bool(value: &str) -> bool {
	value.eq_ignore_ascii_case("true")
}

pub(crate) fn encode_bytes(value: &[u8]) -> String {
	STANDARD.encode(value)
}

pub(crate) fn decode_bytes(value: &str) -> Option<Vec<u8>> {
	STANDARD.decode(value.trim()).ok()
}

impl PreferenceNode {
	/// `true` only for a case-insensitive `"true"`; absent keys yield `default`.
	pub fn get_bool(&self, key: &str, default: bool) -> bool {
		self.get(key).map_or(default, |v| parse_bool(&v))
	}

	pub fn get_int(&self, key: &str, default: i32) -> i32 {
		parse_or(self.get(key), default)
	}

	pub fn get_long(&self, key: &str, default: i64) -> i64 {
		parse_or(self.get(key), default)
	}

	pub fn get_float(&self, key: &str, default: f32) -> f32 {
		parse_or(self.get(key), default)
	}

	pub fn get_double(&self, key: &str, default: f64) -> f64 {
		parse_or(self.get(key), default)
	}

	/// Base64-decoded value; undecodable values yield `default`.
	pub fn get_byte_array(&self, key: &str, default: &[u8]) -> Vec<u8> {
		self.get(key)
			.and_then(|v| decode_bytes(&v))
			.unwrap_or_else(|| default.to_vec())
	}

	pub fn put_bool(&self, key: &str, value: bool) {
		self.put(key, if value { "true" } else { "false" });
	}

	pub fn put_int(&self, key: &str, value: i32) {
		self.put(key, &value.to_string());
	}

	pub fn put_long(&self, key: &str, value: i64) {
		self.put(key, &value.to_string());
	}

	pub fn put_float(&self, key: &str, value: f32) {
		self.put(key, &value.to_string());
	}

	pub fn put_double(&self, key: &str, value: f64) {
		self.put(key, &value.to_string());
	}

	pub fn put_byte_array(&self, key: &str, value: &[u8]) {
		self.put(key, &encode_bytes(value));
	}

	/// Writes every entry of `table` (encoded `path/key` names relative to this
	/// node) into the subtree. The format marker is skipped. With `notify`
	/// unset no events fire and nothing is marked dirty.
	pub(crate) fn install(&self, mut table: Properties, notify: bool) {
		table.remove(VERSION_KEY);
		for (full_key, value) in table {
			let (relative, key) = path::decode_path(&full_key);
			let target = self.navigate(relative.unwrap_or(""), notify);
			if notify {
				target.put(key, &value);
			} else {
				target.internal_put(key, &value);
			}
		}
		self.tree().share_strings(self, false);
	}

	pub(super) fn collect_properties(&self, table: &mut Properties, prefix: &str) {
		for (key, value) in self.properties().iter() {
			table.insert(path::encode_path(prefix, key), value);
		}
		for child in self.children(true) {
			let child_prefix = if prefix.is_empty() {
				child.name().to_string()
			} else {
				format!("{prefix}{SEPARATOR}{}", child.name())
			};
			child.collect_properties(table, &child_prefix);
		}
	}
}
