//! Web-extension match patterns.
//!
//! A match pattern has the form `<scheme>://<host><path>[?<query>]` where the
//! scheme is one of `http`, `https`, `ws`, `wss`, `ftp`, `data`, `file` or
//! `*` (meaning `http` or `https`), the host is `*`, `*.<domain>` or a literal
//! name, and the path and query may contain `*` wildcards. Only `file` URLs
//! may have an empty host. The `<all_urls>` sentinel is not supported.
//!
//! Patterns compile to an anchored [`Regex`]. Characters outside a small
//! whitelist are emitted as hex escapes so that nothing in the pattern is
//! interpreted as regex syntax.

use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static EXTRACTOR: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?i)^(http|https|ws|wss|ftp|data|file|\*)://((?:(?:\*|[A-Za-z0-9\-]+)(?:\.[A-Za-z0-9\-]+)*)?)(/[^?]*)(\?.*)?$",
	)
	.expect("match pattern extractor is a valid regex")
});

const WILDCARD_HOST: &str = r"[A-Za-z0-9_\x2d\x2e]+";
const WILDCARD_PATH: &str = r"[^\?]*";
const WILDCARD_QUERY: &str = ".*";
const SCHEME_SEPARATOR: &str = r"\x3a\x2f\x2f";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid match pattern: {0}")]
pub struct PatternError(String);

struct Parts<'a> {
	scheme: String,
	host: &'a str,
	path: &'a str,
	query: Option<&'a str>,
}

fn split(pattern: &str) -> Option<Parts<'_>> {
	let captures = EXTRACTOR.captures(pattern)?;
	let scheme = captures.get(1)?.as_str().to_ascii_lowercase();
	let host = captures.get(2).map_or("", |m| m.as_str());
	if host.is_empty() && scheme != "file" {
		return None;
	}
	Some(Parts {
		scheme,
		host,
		path: captures.get(3)?.as_str(),
		query: captures.get(4).map(|m| m.as_str()),
	})
}

/// Returns `true` if `pattern` is a well-formed match pattern.
pub fn validate(pattern: &str) -> bool {
	split(pattern).is_some()
}

/// Converts a match pattern into the source of an anchored regular expression.
pub fn convert(pattern: &str) -> Result<String, PatternError> {
	let parts = split(pattern).ok_or_else(|| PatternError(pattern.to_string()))?;
	let mut out = String::from("^");

	if parts.scheme == "*" {
		out.push_str("(http|https)");
	} else {
		out.push_str(&parts.scheme);
	}
	out.push_str(SCHEME_SEPARATOR);

	if parts.host == "*" {
		out.push_str(WILDCARD_HOST);
	} else if let Some(domain) = parts.host.strip_prefix("*.") {
		out.push_str(WILDCARD_HOST);
		out.push_str(r"\x2e");
		push_literal(domain, &mut out);
	} else {
		push_literal(parts.host, &mut out);
	}

	push_wildcard(parts.path, WILDCARD_PATH, &mut out);
	if let Some(query) = parts.query {
		push_wildcard(query, WILDCARD_QUERY, &mut out);
	}
	out.push('$');
	Ok(out)
}

fn push_literal(literal: &str, out: &mut String) {
	for ch in literal.chars() {
		push_escaped(ch, out);
	}
}

fn push_wildcard(wildcard: &str, subst: &str, out: &mut String) {
	for ch in wildcard.chars() {
		if ch == '*' {
			out.push_str(subst);
		} else {
			push_escaped(ch, out);
		}
	}
}

fn push_escaped(ch: char, out: &mut String) {
	let code = u32::from(ch);
	// writing to a String cannot fail
	let _ = match code {
		_ if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '#' | '&' | '%' | '@') => {
			out.push(ch);
			Ok(())
		}
		0..=0xff => write!(out, r"\x{code:02x}"),
		0x100..=0xffff => write!(out, r"\u{code:04x}"),
		_ => write!(out, r"\x{{{code:x}}}"),
	};
}

/// A validated, compiled match pattern.
#[derive(Debug, Clone)]
pub struct MatchPattern {
	source: String,
	regex: Regex,
}

impl MatchPattern {
	pub fn parse(pattern: &str) -> Result<Self, PatternError> {
		let source = convert(pattern)?;
		let regex = Regex::new(&source).map_err(|_| PatternError(pattern.to_string()))?;
		Ok(Self {
			source: pattern.to_string(),
			regex,
		})
	}

	pub fn is_match(&self, url: &str) -> bool {
		self.regex.is_match(url)
	}

	pub fn as_str(&self) -> &str {
		&self.source
	}

	/// The compiled expression.
	pub fn regex(&self) -> &Regex {
		&self.regex
	}
}

impl PartialEq for MatchPattern {
	fn eq(&self, other: &Self) -> bool {
		self.source == other.source
	}
}

impl Eq for MatchPattern {}

impl FromStr for MatchPattern {
	type Err = PatternError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl fmt::Display for MatchPattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.source)
	}
}
