//! Line-oriented `key=value` tables.
//!
//! The format is the classic properties syntax: `#` and `!` start comment
//! lines, keys end at the first unescaped `=`, `:` or whitespace, a line
//! ending in an odd number of backslashes continues on the next line, and
//! `\t \n \r \f \uXXXX` escapes are recognised. Output is sorted by key,
//! UTF-8, one entry per line and carries no timestamp comment, so writing
//! the same table twice produces identical bytes.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::io::{self, Read, Write};

use thiserror::Error;

/// Errors produced while reading a properties table.
#[derive(Debug, Error)]
pub enum PropertiesError {
	/// A `\u` escape was not followed by four hex digits or named no valid character.
	#[error("malformed \\uXXXX escape on line {line}")]
	MalformedEscape {
		/// One-based physical line where the entry started.
		line: usize,
	},

	/// The underlying reader failed or produced invalid UTF-8.
	#[error("failed to read properties: {0}")]
	Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PropertiesError>;

const WHITESPACE: [char; 3] = [' ', '\t', '\x0c'];

/// Sorted `key=value` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
	entries: BTreeMap<String, String>,
}

impl Properties {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.entries.get(key).map(String::as_str)
	}

	/// Inserts an entry and returns the previous value.
	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
		self.entries.insert(key.into(), value.into())
	}

	pub fn remove(&mut self, key: &str) -> Option<String> {
		self.entries.remove(key)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.entries.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
		self.entries.keys().map(String::as_str)
	}

	/// Copies every entry of `other` over this table; `other` wins on conflicts.
	pub fn overlay(&mut self, other: Properties) {
		self.entries.extend(other.entries);
	}

	/// Parses a table from text.
	pub fn parse(text: &str) -> Result<Self> {
		let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
		let mut lines = normalized.split('\n');
		let mut entries = BTreeMap::new();
		let mut line_no = 0;

		while let Some(raw) = lines.next() {
			line_no += 1;
			let start_line = line_no;
			let trimmed = raw.trim_start_matches(WHITESPACE);
			if trimmed.is_empty() || trimmed.starts_with(['#', '!']) {
				continue;
			}

			let mut logical = trimmed.to_string();
			while ends_with_odd_backslashes(&logical) {
				logical.pop();
				match lines.next() {
					Some(next) => {
						line_no += 1;
						logical.push_str(next.trim_start_matches(WHITESPACE));
					}
					None => break,
				}
			}

			let (key, value) = split_entry(&logical);
			entries.insert(unescape(key, start_line)?, unescape(value, start_line)?);
		}

		Ok(Self { entries })
	}

	/// Reads and parses a whole table.
	pub fn read_from(mut reader: impl Read) -> Result<Self> {
		let mut text = String::new();
		reader.read_to_string(&mut text)?;
		Self::parse(&text)
	}

	/// Renders the table, one sorted entry per line.
	pub fn to_text(&self) -> String {
		let mut out = String::new();
		for (key, value) in &self.entries {
			escape_into(&mut out, key, true);
			out.push('=');
			escape_into(&mut out, value, false);
			out.push('\n');
		}
		out
	}

	pub fn write_to(&self, mut writer: impl Write) -> io::Result<()> {
		writer.write_all(self.to_text().as_bytes())?;
		writer.flush()
	}
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
		}
	}
}

impl IntoIterator for Properties {
	type Item = (String, String);
	type IntoIter = btree_map::IntoIter<String, String>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}

fn ends_with_odd_backslashes(line: &str) -> bool {
	line.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

/// Splits a logical line into its raw (still escaped) key and value.
fn split_entry(line: &str) -> (&str, &str) {
	let bytes = line.as_bytes();
	let mut escaped = false;
	let mut key_end = bytes.len();
	let mut has_separator = false;

	for (idx, &b) in bytes.iter().enumerate() {
		if escaped {
			escaped = false;
			continue;
		}
		match b {
			b'\\' => escaped = true,
			b'=' | b':' => {
				key_end = idx;
				has_separator = true;
				break;
			}
			b' ' | b'\t' | 0x0c => {
				key_end = idx;
				break;
			}
			_ => {}
		}
	}

	let mut value_start = key_end;
	if has_separator {
		value_start += 1;
	} else {
		while value_start < bytes.len() && matches!(bytes[value_start], b' ' | b'\t' | 0x0c) {
			value_start += 1;
		}
		if value_start < bytes.len() && matches!(bytes[value_start], b'=' | b':') {
			value_start += 1;
		}
	}
	while value_start < bytes.len() && matches!(bytes[value_start], b' ' | b'\t' | 0x0c) {
		value_start += 1;
	}

	(&line[..key_end], &line[value_start..])
}

fn unescape(raw: &str, line: usize) -> Result<String> {
	let mut out = String::with_capacity(raw.len());
	let mut chars = raw.chars();

	while let Some(c) = chars.next() {
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some('t') => out.push('\t'),
			Some('n') => out.push('\n'),
			Some('r') => out.push('\r'),
			Some('f') => out.push('\x0c'),
			Some('u') => {
				let unit = read_hex4(&mut chars).ok_or(PropertiesError::MalformedEscape { line })?;
				let decoded = if (0xD800..0xDC00).contains(&unit) {
					let rest = chars.as_str();
					let low = rest
						.strip_prefix("\\u")
						.and_then(|tail| u16::from_str_radix(tail.get(..4)?, 16).ok())
						.filter(|low| (0xDC00..0xE000).contains(low))
						.ok_or(PropertiesError::MalformedEscape { line })?;
					chars = rest[6..].chars();
					char::decode_utf16([unit, low]).next().and_then(|r| r.ok())
				} else {
					char::from_u32(u32::from(unit))
				};
				out.push(decoded.ok_or(PropertiesError::MalformedEscape { line })?);
			}
			Some(other) => out.push(other),
			None => {}
		}
	}
	Ok(out)
}

fn read_hex4(chars: &mut std::str::Chars<'_>) -> Option<u16> {
	let digits: String = chars.by_ref().take(4).collect();
	if digits.len() != 4 {
		return None;
	}
	u16::from_str_radix(&digits, 16).ok()
}

fn escape_into(out: &mut String, s: &str, is_key: bool) {
	for (idx, c) in s.chars().enumerate() {
		match c {
			' ' if is_key || idx == 0 => out.push_str("\\ "),
			'\t' => out.push_str("\\t"),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			'\x0c' => out.push_str("\\f"),
			'\\' => out.push_str("\\\\"),
			'=' | ':' | '#' | '!' => {
				out.push('\\');
				out.push(c);
			}
			c if c.is_control() => {
				let mut buf = [0u16; 2];
				for unit in c.encode_utf16(&mut buf) {
					out.push_str(&format!("\\u{unit:04X}"));
				}
			}
			c => out.push(c),
		}
	}
}
