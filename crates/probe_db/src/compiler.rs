//! Corpus compiler: probe file lines to a [`ProbeTable`].
//!
//! Each `ports` line binds the closest `Probe` line above it and the `match`
//! lines below it (up to the next separator) to every port it lists.

use std::path::Path;
use tracing::{debug, info};

use dhvani_common::{DhvaniError, DhvaniResult};

use crate::codec::decode_probe;
use crate::signature::{parse_match_line, MatcherSpec};
use crate::table::ProbeTable;

/// Lines starting with this end a probe's matcher block.
pub const SEPARATOR: &str = "##############################";

/// Compile corpus lines into a probe table.
///
/// Any malformed probe, matcher or port token is fatal: a half-parsed
/// database would quietly weaken every later fingerprint.
pub fn compile<S: AsRef<str>>(lines: &[S]) -> DhvaniResult<ProbeTable> {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref().trim()).collect();
    let mut table = ProbeTable::new();

    for (i, line) in lines.iter().enumerate() {
        if !line.starts_with("port") {
            continue;
        }

        let (probe_at, probe) = owning_probe(&lines, i)
            .ok_or_else(|| DhvaniError::corpus(i + 1, "ports line without a preceding Probe"))?;
        decode_probe(probe).map_err(|e| DhvaniError::corpus(probe_at + 1, e.to_string()))?;

        let matches = matcher_block(&lines, i)?;

        let list = line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| DhvaniError::corpus(i + 1, "ports line without a port list"))?;

        for token in list.split(',') {
            let ports =
                expand_ports(token).map_err(|e| DhvaniError::corpus(i + 1, e.to_string()))?;
            for port in ports {
                table.insert_block(port, probe, &matches);
            }
        }
        debug!(line = i + 1, probe, matchers = matches.len(), "bound ports");
    }

    table.validate()?;
    info!(ports = table.len(), "compiled probe corpus");
    Ok(table)
}

/// Read and compile a corpus file.
pub fn compile_file(path: impl AsRef<Path>) -> DhvaniResult<ProbeTable> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let lines: Vec<&str> = raw.lines().collect();
    compile(&lines)
}

/// Expand a single port token: `80` or an inclusive range `80-82`.
///
/// Ranges are order-independent, `82-80` expands like `80-82`.
pub fn expand_ports(token: &str) -> DhvaniResult<Vec<u16>> {
    let token = token.trim();
    match token.split_once('-') {
        None => Ok(vec![parse_port(token)?]),
        Some((a, b)) => {
            let a = parse_port(a)?;
            let b = parse_port(b)?;
            Ok((a.min(b)..=a.max(b)).collect())
        }
    }
}

fn parse_port(s: &str) -> DhvaniResult<u16> {
    s.trim()
        .parse()
        .map_err(|_| DhvaniError::InvalidPort(format!("'{s}' is not a port number")))
}

fn owning_probe<'a>(lines: &[&'a str], from: usize) -> Option<(usize, &'a str)> {
    lines[..=from]
        .iter()
        .enumerate()
        .rev()
        .find(|(_, l)| l.starts_with("Probe"))
        .map(|(i, l)| (i, *l))
}

fn matcher_block(lines: &[&str], from: usize) -> DhvaniResult<Vec<MatcherSpec>> {
    let mut block = Vec::new();
    for (j, line) in lines.iter().enumerate().skip(from) {
        if line.starts_with("match") {
            let spec = parse_match_line(line, block.len() + 1)
                .map_err(|e| DhvaniError::corpus(j + 1, e.to_string()))?;
            block.push(spec);
        } else if line.starts_with(SEPARATOR) {
            break;
        }
    }
    Ok(block)
}
