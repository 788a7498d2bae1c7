//! `match` line grammar.
//!
//! ```text
//! match ssh m|^SSH-([\d.]+)-OpenSSH_([\w.]+)| p/OpenSSH/ v/$2/ i/protocol $1/ cpe:/a:openbsd:openssh:$2/
//! ```
//!
//! The pattern is kept as text; compiling it is the matcher's job, so a
//! pattern the regex engine rejects costs one matcher, not the whole table.

use serde::{Deserialize, Serialize};
use tracing::warn;

use dhvani_common::{DhvaniError, DhvaniResult};

/// Version-info keys the grammar defines besides `cpe:`.
const INFO_KEYS: &str = "pvihod";

/// One matcher as stored in the probe table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherSpec {
    /// 1-based position inside the corpus block it came from.
    pub index: usize,
    pub service: String,
    pub pattern: String,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub dot_all: bool,
    /// Invert the match result.
    #[serde(default)]
    pub reverse: bool,
    /// Ordered version-info attributes, e.g. `("p", "OpenSSH")`.
    #[serde(default)]
    pub flags: Vec<(String, String)>,
}

impl MatcherSpec {
    pub fn new(index: usize, service: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            index,
            service: service.into(),
            pattern: pattern.into(),
            case_insensitive: false,
            dot_all: false,
            reverse: false,
            flags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Pattern with the line's `i`/`s` options folded in as inline flags.
    pub fn regex_source(&self) -> String {
        let mut inline = String::new();
        if self.case_insensitive {
            inline.push('i');
        }
        if self.dot_all {
            inline.push('s');
        }
        if inline.is_empty() {
            self.pattern.clone()
        } else {
            format!("(?{inline}){}", self.pattern)
        }
    }
}

/// Parse one `match` line. `index` is its 1-based position in the block.
pub fn parse_match_line(line: &str, index: usize) -> DhvaniResult<MatcherSpec> {
    let line = line.trim();
    let rest = line
        .strip_prefix("match")
        .filter(|r| r.starts_with(char::is_whitespace))
        .ok_or_else(|| malformed(line, "missing match keyword"))?
        .trim_start();

    let (service, rest) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| malformed(line, "missing pattern"))?;

    let body = rest
        .trim_start()
        .strip_prefix('m')
        .ok_or_else(|| malformed(line, "pattern must start with m"))?;
    let delim = body
        .chars()
        .next()
        .ok_or_else(|| malformed(line, "missing pattern delimiter"))?;
    let body = &body[delim.len_utf8()..];
    let end = body
        .find(delim)
        .ok_or_else(|| malformed(line, "unterminated pattern"))?;

    let mut spec = MatcherSpec::new(index, service, &body[..end]);

    let after = &body[end + delim.len_utf8()..];
    let opts_end = after.find(char::is_whitespace).unwrap_or(after.len());
    for opt in after[..opts_end].chars() {
        match opt {
            'i' => spec.case_insensitive = true,
            's' => spec.dot_all = true,
            other => warn!(option = %other, service = %spec.service, "ignoring pattern option"),
        }
    }

    spec.flags = parse_version_info(&after[opts_end..], line);
    Ok(spec)
}

fn parse_version_info(mut s: &str, line: &str) -> Vec<(String, String)> {
    let mut flags = Vec::new();

    loop {
        s = s.trim_start();
        let Some(first) = s.chars().next() else { break };

        let (key, body) = if let Some(body) = s.strip_prefix("cpe:") {
            ("cpe", body)
        } else if INFO_KEYS.contains(first) {
            (&s[..first.len_utf8()], &s[first.len_utf8()..])
        } else {
            s = skip_token(s);
            continue;
        };

        let Some(delim) = body.chars().next() else { break };
        let inner = &body[delim.len_utf8()..];
        let Some(end) = inner.find(delim) else {
            warn!(key, line, "unterminated version field");
            break;
        };
        flags.push((key.to_string(), inner[..end].to_string()));

        // drops trailing field options such as cpe's `a`
        s = skip_token(&inner[end + delim.len_utf8()..]);
    }

    flags
}

fn skip_token(s: &str) -> &str {
    s.find(char::is_whitespace).map_or("", |p| &s[p..])
}

fn malformed(line: &str, reason: &str) -> DhvaniError {
    DhvaniError::MalformedMatcher(format!("{reason}: {line}"))
}
