// crates/scanner_tcp/src/scanner.rs
//! TCP connect probes

use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, instrument};

use dhvani_common::{
    resolve, ConnectionResult, DhvaniError, DhvaniResult, ScanConfig, Transport, TransportFactory,
};
use dhvani_fingerprint::service_for_port;

use crate::banner::BannerGrabber;
use crate::connector::{Connection, Connector};

/// Payload for connect-send-receive: `ABC\0\r\n\r\n\r\n` ten times.
pub const TCP_PROBE: &[u8] = b"ABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\nABC\x00\r\n\r\n\r\n";

/// TCP connect scanner.
pub struct TcpScanner {
    connector: Connector,
    config: ScanConfig,
}

impl TcpScanner {
    pub fn new(factory: Arc<dyn TransportFactory>, config: ScanConfig) -> Self {
        Self {
            connector: Connector::new(factory),
            config,
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Connect and report the peer. A refused connection is `None`.
    #[instrument(skip(self))]
    pub async fn connect_only(&self, host: &str, port: u16) -> DhvaniResult<Option<ConnectionResult>> {
        Ok(self.open(host, port).await?.map(|conn| connection_result(&conn)))
    }

    /// Connect, send [`TCP_PROBE`] and capture one response.
    ///
    /// Send or receive failures leave the response empty; a silent service
    /// is still an open port.
    #[instrument(skip(self))]
    pub async fn connect_send_and_receive(
        &self,
        host: &str,
        port: u16,
    ) -> DhvaniResult<Option<ConnectionResult>> {
        let Some(mut conn) = self.open(host, port).await? else {
            return Ok(None);
        };

        let grabber = BannerGrabber::new(self.config.connect_timeout(), self.config.max_response_bytes);
        let response = match grabber.probe(&mut conn.stream, TCP_PROBE).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(peer = %conn.peer, error = %e, "no response");
                Vec::new()
            }
        };
        Ok(Some(connection_result(&conn).with_response(response)))
    }

    async fn open(&self, host: &str, port: u16) -> DhvaniResult<Option<Connection>> {
        let addr = resolve(host, port).await?;
        match self
            .connector
            .open(addr, host, self.config.connect_timeout(), self.config.opportunistic_tls)
            .await
        {
            Ok(conn) => Ok(Some(conn)),
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!(%addr, "connection refused");
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                Err(DhvaniError::Timeout(format!("connect to {addr}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn connection_result(conn: &Connection) -> ConnectionResult {
    ConnectionResult::new(conn.peer, conn.tls)
        .with_service(service_for_port(conn.peer.port(), Transport::TCP).map(String::from))
        .with_round_trip(conn.setup_time)
}
