//! Version scan: a port's custom probes in table order, then a null probe.
//!
//! ```text
//! Init ──► CustomProbing ──► Matched ──► Done
//!   │            │
//!   └────────────┴─────► NullProbing ──► Done
//! ```
//!
//! A reset or broken pipe while custom probing reopens the connection once
//! and repeats the same probe; a second failure ends custom probing.

use std::io::{self, ErrorKind};
use tracing::{debug, info, instrument};

use dhvani_common::{ConnectionResult, Fingerprint, ProbeEntry, ScanConfig, ServiceMatch};
use dhvani_fingerprint::MatcherSet;
use dhvani_probe_db::{extract_tcp_probes, ProbeTable};

use crate::banner::BannerGrabber;
use crate::connector::{Connection, Connector};

enum ScanState {
    Init,
    CustomProbing { conn: Connection, next: usize },
    Matched(ServiceMatch),
    NullProbing,
    Done(Option<Fingerprint>),
}

enum Exchange {
    Reply(Vec<u8>),
    /// Timed out or closed without data.
    Silent,
    /// Reset, aborted or broken pipe.
    Broken(io::Error),
    Failed(io::Error),
}

impl From<io::Result<Vec<u8>>> for Exchange {
    fn from(result: io::Result<Vec<u8>>) -> Self {
        match result {
            Ok(bytes) if bytes.is_empty() => Exchange::Silent,
            Ok(bytes) => Exchange::Reply(bytes),
            Err(e) => match e.kind() {
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => Exchange::Broken(e),
                ErrorKind::TimedOut => Exchange::Silent,
                _ => Exchange::Failed(e),
            },
        }
    }
}

pub struct VersionScanner {
    connector: Connector,
    config: ScanConfig,
}

impl VersionScanner {
    pub fn new(connector: Connector, config: ScanConfig) -> Self {
        Self { connector, config }
    }

    /// Fingerprint the service behind `target` with the probes and matchers
    /// the table holds for its port.
    #[instrument(skip(self, target, table), fields(peer = %target.peer))]
    pub async fn scan(&self, target: &ConnectionResult, table: &ProbeTable) -> Option<Fingerprint> {
        let entry = table.port_to_probes_and_matches(target.peer.port());
        let probes = extract_tcp_probes(&entry.probes);
        let matchers = MatcherSet::compile(&entry.matches);
        let grabber = BannerGrabber::new(self.config.version_scan_timeout(), self.config.max_response_bytes);

        let mut state = ScanState::Init;
        loop {
            state = match state {
                ScanState::Init if probes.is_empty() => ScanState::NullProbing,
                ScanState::Init => match self.open(target).await {
                    Some(conn) => ScanState::CustomProbing { conn, next: 0 },
                    None => ScanState::NullProbing,
                },
                ScanState::CustomProbing { mut conn, next } => {
                    match self
                        .custom_probe(target, &probes, &matchers, &grabber, &mut conn, next)
                        .await
                    {
                        Some(Step::Next(next)) => ScanState::CustomProbing { conn, next },
                        Some(Step::Matched(found)) => ScanState::Matched(found),
                        None => ScanState::NullProbing,
                    }
                }
                ScanState::Matched(found) => {
                    info!(service = %found, "service identified");
                    ScanState::Done(Some(Fingerprint::Matched(found)))
                }
                ScanState::NullProbing => {
                    ScanState::Done(self.null_probe(target, &matchers, &grabber).await)
                }
                ScanState::Done(result) => return result,
            };
        }
    }

    /// Send probe `next` and decide where to go. `None` aborts custom probing.
    async fn custom_probe(
        &self,
        target: &ConnectionResult,
        probes: &[ProbeEntry],
        matchers: &MatcherSet,
        grabber: &BannerGrabber,
        conn: &mut Connection,
        next: usize,
    ) -> Option<Step> {
        let probe = probes.get(next)?;
        debug!(probe = %probe.name, index = next, "sending probe");

        let reply = match Exchange::from(grabber.probe(&mut conn.stream, &probe.payload).await) {
            Exchange::Reply(bytes) => bytes,
            Exchange::Silent => Vec::new(),
            Exchange::Broken(e) => {
                debug!(probe = %probe.name, error = %e, "connection broken, reconnecting once");
                let mut fresh = self.open(target).await?;
                let bytes = match Exchange::from(grabber.probe(&mut fresh.stream, &probe.payload).await) {
                    Exchange::Reply(bytes) => bytes,
                    Exchange::Silent => Vec::new(),
                    Exchange::Broken(e) | Exchange::Failed(e) => {
                        debug!(probe = %probe.name, error = %e, "retry failed, giving up on custom probes");
                        return None;
                    }
                };
                *conn = fresh;
                bytes
            }
            Exchange::Failed(e) => {
                debug!(probe = %probe.name, error = %e, "probe exchange failed, moving on");
                Vec::new()
            }
        };

        if reply.is_empty() {
            return Some(Step::Next(next + 1));
        }
        Some(match matchers.match_regex(&reply) {
            Some(found) => Step::Matched(found),
            None => Step::Next(next + 1),
        })
    }

    async fn null_probe(
        &self,
        target: &ConnectionResult,
        matchers: &MatcherSet,
        grabber: &BannerGrabber,
    ) -> Option<Fingerprint> {
        let mut conn = self.open(target).await?;
        let banner = grabber.probe(&mut conn.stream, b"").await.ok()?;
        if banner.is_empty() {
            return None;
        }

        match matchers.match_regex(&banner) {
            Some(found) => {
                info!(service = %found, "service identified from banner");
                Some(Fingerprint::Matched(found))
            }
            None => Some(Fingerprint::Banner(String::from_utf8_lossy(&banner).into_owned())),
        }
    }

    /// Fresh connection, TLS only when the first contact negotiated it.
    async fn open(&self, target: &ConnectionResult) -> Option<Connection> {
        let host = target.peer.ip().to_string();
        match self
            .connector
            .open(target.peer, &host, self.config.version_scan_timeout(), target.ssl)
            .await
        {
            Ok(conn) => Some(conn),
            Err(e) => {
                debug!(peer = %target.peer, error = %e, "connect failed");
                None
            }
        }
    }
}

/// Outcome of one custom probe.
enum Step {
    Next(usize),
    Matched(ServiceMatch),
}
