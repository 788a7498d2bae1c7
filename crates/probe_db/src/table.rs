//! Port-indexed probe table.
//!
//! Built once, then shared read-only (usually behind an `Arc`) by every
//! worker. The JSON form is the interchange format written by the compiler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use dhvani_common::{DhvaniError, DhvaniResult};

use crate::signature::MatcherSpec;

static EMPTY_ENTRY: PortEntry = PortEntry {
    probes: Vec::new(),
    matches: Vec::new(),
};

/// Probes and matchers registered for one port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Raw `Probe` lines, in table order.
    pub probes: Vec<String>,
    /// Matchers, in corpus order.
    pub matches: Vec<MatcherSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTable {
    ports: BTreeMap<u16, PortEntry>,
}

impl ProbeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one declaration block for `port`.
    ///
    /// Probes accumulate across blocks while matchers are replaced by the
    /// latest block; later declarations of a port lose earlier matchers.
    pub fn insert_block(&mut self, port: u16, probe: &str, matches: &[MatcherSpec]) {
        let entry = self.ports.entry(port).or_default();
        entry.probes.push(probe.to_string());
        entry.matches = matches.to_vec();
    }

    pub fn get(&self, port: u16) -> Option<&PortEntry> {
        self.ports.get(&port)
    }

    /// Probes and matchers for `port`; an empty entry when the port is unknown.
    pub fn port_to_probes_and_matches(&self, port: u16) -> &PortEntry {
        self.ports.get(&port).unwrap_or(&EMPTY_ENTRY)
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Every port must carry at least one probe.
    pub fn validate(&self) -> DhvaniResult<()> {
        match self.ports.iter().find(|(_, e)| e.probes.is_empty()) {
            Some((port, _)) => Err(DhvaniError::Config(format!(
                "probe table entry for port {port} has no probes"
            ))),
            None => Ok(()),
        }
    }

    pub fn to_json(&self) -> DhvaniResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> DhvaniResult<Self> {
        let table: ProbeTable = serde_json::from_str(raw)?;
        table.validate()?;
        Ok(table)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> DhvaniResult<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        info!(path = %path.as_ref().display(), ports = self.len(), "wrote probe table");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> DhvaniResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let table = Self::from_json(&raw)?;
        info!(path = %path.as_ref().display(), ports = table.len(), "loaded probe table");
        Ok(table)
    }
}
