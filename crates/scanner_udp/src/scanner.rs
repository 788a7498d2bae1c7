use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use dhvani_common::{
    resolve, DhvaniResult, ProbeEntry, ScanConfig, ServiceMatch, Transport, TransportFactory,
};
use dhvani_fingerprint::{service_for_port, MatcherSet};
use dhvani_probe_db::{extract_udp_probes, ProbeTable};

/// Largest datagram we will read.
pub const MAX_DATAGRAM: usize = 65_535;

/// A probe that drew a datagram back.
///
/// Every probe shares one socket, so a reply that arrives after its probe's
/// timeout is credited to whichever probe is waiting at that moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpProbeReply {
    pub probe: String,
    pub response: Vec<u8>,
    pub service: Option<ServiceMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpScanReport {
    pub peer: SocketAddr,
    /// Guess from the well-known port table.
    pub service: Option<String>,
    pub replies: Vec<UdpProbeReply>,
}

impl UdpScanReport {
    /// Whether any probe elicited any reply.
    pub fn responsive(&self) -> bool {
        !self.replies.is_empty()
    }

    /// First classified reply, in probe order.
    pub fn classification(&self) -> Option<&ServiceMatch> {
        self.replies.iter().find_map(|r| r.service.as_ref())
    }
}

pub struct UdpScanner {
    factory: Arc<dyn TransportFactory>,
    config: ScanConfig,
}

impl UdpScanner {
    pub fn new(factory: Arc<dyn TransportFactory>, config: ScanConfig) -> Self {
        Self { factory, config }
    }

    /// Send every UDP probe the table holds for `port`, waiting up to the UDP
    /// timeout for one reply after each.
    #[instrument(skip(self, table))]
    pub async fn scan(&self, host: &str, port: u16, table: &ProbeTable) -> DhvaniResult<UdpScanReport> {
        let peer = resolve(host, port).await?;
        let entry = table.port_to_probes_and_matches(port);
        let probes = extract_udp_probes(&entry.probes);
        let matchers = MatcherSet::compile(&entry.matches);

        let mut report = UdpScanReport {
            peer,
            service: service_for_port(port, Transport::UDP).map(String::from),
            replies: Vec::new(),
        };
        if probes.is_empty() {
            debug!(%peer, "no udp probes for port");
            return Ok(report);
        }

        let socket = match self.factory.bind_udp(peer).await {
            Ok(socket) => socket,
            Err(e) => {
                debug!(%peer, error = %e, "udp bind failed");
                return Ok(report);
            }
        };
        if let Err(e) = socket.connect(peer).await {
            debug!(%peer, error = %e, "udp connect failed");
            return Ok(report);
        }

        for probe in &probes {
            let Some(response) = self.exchange(&socket, probe).await else {
                continue;
            };
            debug!(%peer, probe = %probe.name, bytes = response.len(), "udp reply");
            report.replies.push(UdpProbeReply {
                probe: probe.name.clone(),
                service: matchers.match_regex(&response),
                response,
            });
        }

        if report.responsive() {
            info!(%peer, replies = report.replies.len(), "udp service responded");
        }
        Ok(report)
    }

    /// One send and one bounded receive. Errors count as silence.
    async fn exchange(&self, socket: &UdpSocket, probe: &ProbeEntry) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while let Ok(n) = socket.try_recv(&mut buf) {
            debug!(probe = %probe.name, bytes = n, "discarding datagram left from an earlier probe");
        }

        if let Err(e) = socket.send(&probe.payload).await {
            debug!(probe = %probe.name, error = %e, "udp send failed");
            return None;
        }

        match timeout(self.config.udp_timeout(), socket.recv(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => {
                buf.truncate(n);
                Some(buf)
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                debug!(probe = %probe.name, error = %e, "udp receive failed");
                None
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dhvani_common::DirectTransport;
    use dhvani_probe_db::MatcherSpec;
    use std::io;
    use std::time::Duration;
    use tokio::net::TcpStream;

    fn scanner() -> UdpScanner {
        let config = ScanConfig {
            udp_timeout_ms: 200,
            ..ScanConfig::default()
        };
        UdpScanner::new(Arc::new(DirectTransport), config)
    }

    fn table(port: u16) -> ProbeTable {
        let mut table = ProbeTable::new();
        let matchers = vec![MatcherSpec::new(1, "echo", "^PING")];
        table.insert_block(port, "Probe TCP NotSent q|tcp only|", &[]);
        table.insert_block(port, r"Probe UDP Ping q|PING\r\n|", &matchers);
        table.insert_block(port, r"Probe UDP Quiet q|QUIET|", &matchers);
        table
    }

    #[tokio::test]
    async fn reports_replying_probes() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((n, from)) = server.recv_from(&mut buf).await else { break };
                if buf[..n].starts_with(b"PING") {
                    let _ = server.send_to(&buf[..n], from).await;
                }
            }
        });

        let report = scanner().scan("127.0.0.1", port, &table(port)).await.unwrap();
        assert!(report.responsive());
        assert_eq!(report.replies.len(), 1);
        assert_eq!(report.replies[0].probe, "Ping");
        assert_eq!(report.replies[0].response, b"PING\r\n");
        assert_eq!(report.classification().map(|m| m.service.as_str()), Some("echo"));
    }

    #[tokio::test]
    async fn silent_port_is_unresponsive() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let report = scanner().scan("127.0.0.1", port, &table(port)).await.unwrap();
        assert!(!report.responsive());
        drop(server);
    }

    #[tokio::test]
    async fn extra_datagrams_are_discarded_before_next_send() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((n, from)) = server.recv_from(&mut buf).await else { break };
                if buf[..n].starts_with(b"PING") {
                    let _ = server.send_to(b"PING back", from).await;
                    let _ = server.send_to(b"PING again", from).await;
                }
            }
        });

        let report = scanner().scan("127.0.0.1", port, &table(port)).await.unwrap();
        assert_eq!(report.replies.len(), 1);
        assert_eq!(report.replies[0].probe, "Ping");
        assert_eq!(report.replies[0].response, b"PING back");
    }

    struct NoSockets;

    #[async_trait]
    impl TransportFactory for NoSockets {
        async fn connect_tcp(&self, _addr: SocketAddr, _limit: Duration) -> io::Result<TcpStream> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "no sockets"))
        }

        async fn bind_udp(&self, _peer: SocketAddr) -> io::Result<UdpSocket> {
            Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no sockets"))
        }
    }

    #[tokio::test]
    async fn bind_failure_reads_as_silence() {
        let config = ScanConfig {
            udp_timeout_ms: 200,
            ..ScanConfig::default()
        };
        let scanner = UdpScanner::new(Arc::new(NoSockets), config);
        let report = scanner.scan("127.0.0.1", 53, &table(53)).await.unwrap();
        assert!(!report.responsive());
        assert_eq!(report.service.as_deref(), Some("domain"));
    }

    #[tokio::test]
    async fn port_without_udp_probes() {
        let report = scanner().scan("127.0.0.1", 9, &ProbeTable::new()).await.unwrap();
        assert!(!report.responsive());
        assert_eq!(report.service, None);
    }
}
