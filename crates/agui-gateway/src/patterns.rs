// Endpoint pattern matching
//
// Resolves an endpoint identifier (a remote tool server URL) against a map of
// patterns. An exact key match always wins. Otherwise glob keys (`*` matches any
// run of characters, `?` a single character) are tried in declaration order and
// the first match wins.

use std::collections::HashMap;

use indexmap::IndexMap;
use regex::Regex;

/// Per-request header routing: URL pattern to extra headers
pub type HeaderRouting = PatternMap<HashMap<String, String>>;

#[derive(Debug, Clone)]
struct GlobPattern {
	pattern: String,
	regex: Regex,
}

/// An ordered pattern map compiled for repeated lookups
#[derive(Debug, Clone)]
pub struct PatternMap<T> {
	entries: IndexMap<String, T>,
	globs: Vec<GlobPattern>,
}

impl<T> Default for PatternMap<T> {
	fn default() -> Self {
		Self {
			entries: IndexMap::new(),
			globs: Vec::new(),
		}
	}
}

impl<T> PatternMap<T> {
	pub fn new(entries: IndexMap<String, T>) -> Self {
		let globs = entries
			.keys()
			.filter(|k| is_glob(k))
			.filter_map(|k| match glob_to_regex(k) {
				Ok(regex) => Some(GlobPattern {
					pattern: k.clone(),
					regex,
				}),
				Err(e) => {
					tracing::warn!(target: "remote_tools", pattern = %k, error = %e, "invalid glob pattern, using exact match only");
					None
				},
			})
			.collect();
		Self { entries, globs }
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> &IndexMap<String, T> {
		&self.entries
	}

	/// Resolve `id` to the value of the best matching pattern
	pub fn resolve(&self, id: &str) -> Option<&T> {
		if let Some(v) = self.entries.get(id) {
			return Some(v);
		}
		self
			.globs
			.iter()
			.find(|g| g.regex.is_match(id))
			.and_then(|g| self.entries.get(&g.pattern))
	}
}

impl<T> From<IndexMap<String, T>> for PatternMap<T> {
	fn from(entries: IndexMap<String, T>) -> Self {
		Self::new(entries)
	}
}

fn is_glob(pattern: &str) -> bool {
	pattern.contains(['*', '?'])
}

fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
	let mut re = String::with_capacity(pattern.len() + 8);
	re.push('^');
	let mut literal = String::new();
	for c in pattern.chars() {
		match c {
			'*' | '?' => {
				re.push_str(&regex::escape(&literal));
				literal.clear();
				re.push_str(if c == '*' { ".*" } else { "." });
			},
			c => literal.push(c),
		}
	}
	re.push_str(&regex::escape(&literal));
	re.push('$');
	Regex::new(&re)
}
