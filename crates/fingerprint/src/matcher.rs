//! Ordered regex matching of captured responses.
//!
//! Matchers are tried in table order and the first hit wins. Each keeps the
//! index it was given by the compiler, so skipping a pattern that fails to
//! compile never shifts the indices reported for the ones after it.

use regex::{Captures, Regex, RegexBuilder};
use tracing::{debug, warn};

use dhvani_common::ServiceMatch;
use dhvani_probe_db::MatcherSpec;

/// A matcher with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    spec: MatcherSpec,
    regex: Regex,
}

impl CompiledMatcher {
    pub fn new(spec: MatcherSpec) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&spec.regex_source())
            .octal(true)
            .build()?;
        Ok(Self { spec, regex })
    }

    pub fn index(&self) -> usize {
        self.spec.index
    }

    pub fn service(&self) -> &str {
        &self.spec.service
    }

    /// Classify `text`, honoring the matcher's `reverse` flag.
    pub fn classify(&self, text: &str) -> Option<ServiceMatch> {
        let caps = self.regex.captures(text);
        if caps.is_some() == self.spec.reverse {
            return None;
        }
        Some(self.service_match(caps.as_ref()))
    }

    fn service_match(&self, caps: Option<&Captures<'_>>) -> ServiceMatch {
        let mut found = ServiceMatch::new(self.spec.service.as_str()).with_matcher_index(self.spec.index);

        for (key, template) in &self.spec.flags {
            let value = substitute(template, caps);
            match key.as_str() {
                "p" => found.product = Some(value.clone()),
                "v" => found.version = Some(value.clone()),
                "i" => found.info = Some(value.clone()),
                "cpe" => found.cpe.push(value.clone()),
                _ => {}
            }
            found.flags.push((key.clone(), value));
        }
        found
    }
}

/// The compiled matchers for one port, in table order.
#[derive(Debug, Clone, Default)]
pub struct MatcherSet {
    matchers: Vec<CompiledMatcher>,
}

impl MatcherSet {
    /// Compile every matcher; patterns the regex engine rejects are logged and
    /// left out.
    pub fn compile(specs: &[MatcherSpec]) -> Self {
        let matchers = specs
            .iter()
            .filter_map(|spec| match CompiledMatcher::new(spec.clone()) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(index = spec.index, service = %spec.service, error = %e, "skipping matcher");
                    None
                }
            })
            .collect();
        Self { matchers }
    }

    /// First matcher that classifies `response`.
    pub fn match_regex(&self, response: &[u8]) -> Option<ServiceMatch> {
        let text = String::from_utf8_lossy(response);
        let hit = self.matchers.iter().find_map(|m| m.classify(&text));
        if let Some(found) = &hit {
            debug!(index = found.matcher_index, service = %found.service, "matcher hit");
        }
        hit
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// One-shot form of [`MatcherSet::match_regex`].
pub fn match_regex(response: &[u8], matchers: &[MatcherSpec]) -> Option<ServiceMatch> {
    MatcherSet::compile(matchers).match_regex(response)
}

/// Replace `$1`..`$9` with the matching capture group; unset groups vanish.
fn substitute(template: &str, caps: Option<&Captures<'_>>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if let Some(group) = chars.peek().and_then(|d| d.to_digit(10)).filter(|g| *g > 0) {
                chars.next();
                if let Some(m) = caps.and_then(|c| c.get(group as usize)) {
                    out.push_str(m.as_str());
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssh_http() -> Vec<MatcherSpec> {
        vec![
            MatcherSpec::new(1, "ssh", "^SSH-"),
            MatcherSpec::new(2, "http", "^HTTP/1\\.[01]"),
        ]
    }

    #[test]
    fn first_matching_index_wins() {
        let found = match_regex(b"HTTP/1.1 200 OK", &ssh_http()).unwrap();
        assert_eq!(found.service, "http");
        assert_eq!(found.matcher_index, 2);
    }

    #[test]
    fn earlier_matcher_shadows_later() {
        let specs = vec![
            MatcherSpec::new(1, "ssh", "^SSH-"),
            MatcherSpec::new(2, "ssh-openssh", "^SSH-2\\.0-OpenSSH"),
        ];
        let found = match_regex(b"SSH-2.0-OpenSSH_9.6\r\n", &specs).unwrap();
        assert_eq!(found.matcher_index, 1);
    }

    #[test]
    fn no_match_is_none() {
        assert!(match_regex(b"+OK POP3 ready", &ssh_http()).is_none());
        assert!(match_regex(b"", &[]).is_none());
    }

    #[test]
    fn invalid_pattern_keeps_later_indices() {
        let specs = vec![
            MatcherSpec::new(1, "broken", "(unclosed"),
            MatcherSpec::new(3, "ftp", "^220 "),
        ];
        let set = MatcherSet::compile(&specs);
        assert_eq!(set.len(), 1);
        let found = set.match_regex(b"220 ProFTPD ready").unwrap();
        assert_eq!(found.matcher_index, 3);
    }

    #[test]
    fn captures_fill_version_info() {
        let spec = MatcherSpec::new(1, "ssh", r"^SSH-([\d.]+)-OpenSSH_([\w.]+)")
            .with_flag("p", "OpenSSH")
            .with_flag("v", "$2")
            .with_flag("i", "protocol $1")
            .with_flag("cpe", "a:openbsd:openssh:$2");
        let found = match_regex(b"SSH-2.0-OpenSSH_8.9p1 Ubuntu\r\n", &[spec]).unwrap();
        assert_eq!(found.product.as_deref(), Some("OpenSSH"));
        assert_eq!(found.version.as_deref(), Some("8.9p1"));
        assert_eq!(found.info.as_deref(), Some("protocol 2.0"));
        assert_eq!(found.cpe, vec!["a:openbsd:openssh:8.9p1".to_string()]);
    }

    #[test]
    fn reverse_matcher_fires_on_miss() {
        let spec = MatcherSpec::new(4, "not-http", "^HTTP").reversed();
        assert!(match_regex(b"HTTP/1.0 200 OK", std::slice::from_ref(&spec)).is_none());
        let found = match_regex(b"\x00\x01binary", &[spec]).unwrap();
        assert_eq!(found.matcher_index, 4);
    }

    #[test]
    fn octal_style_null_escape_compiles() {
        let spec = MatcherSpec::new(1, "domain", r"^\0\0");
        assert!(match_regex(b"\x00\x00\x90\x04", &[spec]).is_some());
    }

    #[test]
    fn substitute_handles_missing_groups() {
        assert_eq!(substitute("v$1-$9$", None), "v-$");
        assert_eq!(substitute("cost $0", None), "cost $0");
    }
}
