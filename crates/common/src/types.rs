//! Core data types shared by the probe database, matcher and drivers.
//!
//! Everything here is produced fresh per attempt and handed back to the
//! caller; nothing is cached inside the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DhvaniError;

/// Transport a probe is sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    TCP,
    UDP,
}

impl Transport {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Transport::TCP => "tcp",
            Transport::UDP => "udp",
        }
    }
}

impl FromStr for Transport {
    type Err = DhvaniError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" | "tcp" => Ok(Transport::TCP),
            "UDP" | "udp" => Ok(Transport::UDP),
            other => Err(DhvaniError::UnsupportedTransport(other.to_string())),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded probe, ready to be written to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEntry {
    pub transport: Transport,
    /// Informational only.
    pub name: String,
    pub payload: Vec<u8>,
}

/// Service identified by a matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMatch {
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub info: Option<String>,
    pub cpe: Vec<String>,
    /// 1-based position of the matcher inside its corpus block.
    pub matcher_index: usize,
    /// Version-info attributes with capture references already substituted.
    pub flags: Vec<(String, String)>,
}

impl ServiceMatch {
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(service: S) -> Self {
        Self {
            service: service.into(),
            product: None,
            version: None,
            info: None,
            cpe: Vec::new(),
            matcher_index: 0,
            flags: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_product(mut self, product: String) -> Self {
        self.product = Some(product);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: String) -> Self {
        self.version = Some(version);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_info(mut self, info: String) -> Self {
        self.info = Some(info);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_matcher_index(mut self, index: usize) -> Self {
        self.matcher_index = index;
        self
    }
}

impl fmt::Display for ServiceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service)?;
        if let Some(product) = &self.product {
            write!(f, " {product}")?;
        }
        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }
        if let Some(info) = &self.info {
            write!(f, " ({info})")?;
        }
        Ok(())
    }
}

/// Outcome of a version scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fingerprint {
    /// A matcher classified one of the responses.
    Matched(ServiceMatch),
    /// The service announced itself on the null probe but nothing matched.
    Banner(String),
}

impl Fingerprint {
    #[must_use]
    pub fn service(&self) -> Option<&ServiceMatch> {
        match self {
            Fingerprint::Matched(m) => Some(m),
            Fingerprint::Banner(_) => None,
        }
    }
}

/// Outcome of a single TCP transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub peer: SocketAddr,
    /// Guess from the well-known port table.
    pub service: Option<String>,
    pub ssl: bool,
    /// Possibly empty.
    pub response: Vec<u8>,
    /// Time taken to establish the connection.
    pub round_trip: Option<Duration>,
}

impl ConnectionResult {
    #[inline]
    #[must_use]
    pub fn new(peer: SocketAddr, ssl: bool) -> Self {
        Self {
            peer,
            service: None,
            ssl,
            response: Vec::new(),
            round_trip: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_service(mut self, service: Option<String>) -> Self {
        self.service = service;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_response(mut self, response: Vec<u8>) -> Self {
        self.response = response;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_round_trip(mut self, rtt: Duration) -> Self {
        self.round_trip = Some(rtt);
        self
    }

    /// Response decoded as text, invalid sequences replaced.
    #[must_use]
    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response).into_owned()
    }
}

/// Measured ICMP echo round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoReply {
    pub host: String,
    pub response_time: Duration,
    /// Always false, kept so echo results line up with TCP results.
    pub ssl: bool,
}

impl EchoReply {
    #[must_use]
    pub fn new(host: impl Into<String>, response_time: Duration) -> Self {
        Self {
            host: host.into(),
            response_time,
            ssl: false,
        }
    }
}
