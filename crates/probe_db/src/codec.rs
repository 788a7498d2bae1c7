//! Probe codec: textual `Probe` definitions to wire bytes.
//!
//! A probe line looks like `Probe TCP GetRequest q|GET / HTTP/1.0\r\n\r\n|`.
//! The pipe form is preferred; the slash form `q/…/` is accepted as a
//! fallback and carries one marker character ahead of the payload.

use dhvani_common::{DhvaniError, DhvaniResult, ProbeEntry, Transport};
use tracing::warn;

const PIPE_OPEN: &str = "q|";
const SLASH_OPEN: &str = "q/";

/// Decode a single probe line.
pub fn decode_probe(line: &str) -> DhvaniResult<ProbeEntry> {
    let line = line.trim();

    let (head, body) = if let Some(pos) = line.find(PIPE_OPEN) {
        let rest = &line[pos + PIPE_OPEN.len()..];
        let end = rest
            .rfind('|')
            .ok_or_else(|| malformed(line, "unterminated q|...| payload"))?;
        (&line[..pos], &rest[..end])
    } else if let Some(pos) = line.find(SLASH_OPEN) {
        let rest = &line[pos + SLASH_OPEN.len()..];
        let end = rest
            .rfind('/')
            .ok_or_else(|| malformed(line, "unterminated q/.../ payload"))?;
        let inner = &rest[..end];
        let skip = inner.chars().next().map_or(0, char::len_utf8);
        (&line[..pos], &inner[skip..])
    } else {
        return Err(malformed(line, "no q|...| or q/.../ payload"));
    };

    let mut fields = head.split_whitespace();
    if fields.next() != Some("Probe") {
        return Err(malformed(line, "missing Probe keyword"));
    }
    let transport: Transport = fields
        .next()
        .ok_or_else(|| malformed(line, "missing transport"))?
        .parse()?;
    let name = fields
        .next()
        .ok_or_else(|| malformed(line, "missing probe name"))?
        .to_string();

    Ok(ProbeEntry {
        transport,
        name,
        payload: decode_escapes(body),
    })
}

/// Decode every probe, in order. Malformed entries are logged and skipped.
pub fn extract_tcp_probes<S: AsRef<str>>(probes: &[S]) -> Vec<ProbeEntry> {
    probes
        .iter()
        .filter_map(|p| decode_or_skip(p.as_ref()))
        .collect()
}

/// Like [`extract_tcp_probes`] but keeps only `UDP` probes.
pub fn extract_udp_probes<S: AsRef<str>>(probes: &[S]) -> Vec<ProbeEntry> {
    probes
        .iter()
        .filter_map(|p| decode_or_skip(p.as_ref()))
        .filter(|p| p.transport == Transport::UDP)
        .collect()
}

fn decode_or_skip(line: &str) -> Option<ProbeEntry> {
    match decode_probe(line) {
        Ok(probe) => Some(probe),
        Err(e) => {
            warn!(error = %e, "skipping probe");
            None
        }
    }
}

/// Decode the escape sequences the probe grammar allows.
///
/// `\r \n \t \0 \a \f \v` and `\xHH` become their byte values; any other
/// escaped character stands for itself. Raw control bytes pass through.
pub fn decode_escapes(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' || i + 1 >= bytes.len() {
            out.push(b);
            i += 1;
            continue;
        }

        let (decoded, used) = match bytes[i + 1] {
            b'r' => (b'\r', 2),
            b'n' => (b'\n', 2),
            b't' => (b'\t', 2),
            b'0' => (0x00, 2),
            b'a' => (0x07, 2),
            b'f' => (0x0c, 2),
            b'v' => (0x0b, 2),
            b'x' => match bytes.get(i + 2..i + 4).and_then(hex_pair) {
                Some(v) => (v, 4),
                None => (b'\\', 1),
            },
            other => (other, 2),
        };
        out.push(decoded);
        i += used;
    }

    out
}

fn hex_pair(pair: &[u8]) -> Option<u8> {
    if !pair.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let s = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(s, 16).ok()
}

fn malformed(line: &str, reason: &str) -> DhvaniError {
    DhvaniError::MalformedProbe(format!("{reason}: {line}"))
}
