//! Connection setup with opportunistic TLS.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::{ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::{Certificate, ClientConfig, ServerName};
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

use dhvani_common::TransportFactory;

/// Fingerprinting talks to whatever answers; certificates are not checked.
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

/// A plain or TLS-wrapped TCP stream.
pub enum ProbeStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for ProbeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ProbeStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ProbeStream::Tls(s) => Pin::new(&mut **s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ProbeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ProbeStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ProbeStream::Tls(s) => Pin::new(&mut **s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ProbeStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ProbeStream::Tls(s) => Pin::new(&mut **s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ProbeStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ProbeStream::Tls(s) => Pin::new(&mut **s).poll_shutdown(cx),
        }
    }
}

/// An open connection to the target.
pub struct Connection {
    pub stream: ProbeStream,
    pub peer: SocketAddr,
    pub tls: bool,
    /// Time until the connection (and handshake, if any) was usable.
    pub setup_time: Duration,
}

/// Opens connections through a [`TransportFactory`].
#[derive(Clone)]
pub struct Connector {
    factory: Arc<dyn TransportFactory>,
    tls: TlsConnector,
}

impl Connector {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        Self {
            factory,
            tls: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Connect to `addr`. With `try_tls` a handshake is attempted first; when
    /// it fails the connection is reopened in plain text, since the failed
    /// handshake may already have consumed part of the service's greeting.
    ///
    /// Every attempt is bounded by `limit`.
    #[instrument(skip(self), level = "debug")]
    pub async fn open(
        &self,
        addr: SocketAddr,
        host: &str,
        limit: Duration,
        try_tls: bool,
    ) -> io::Result<Connection> {
        let start = Instant::now();
        let stream = self.factory.connect_tcp(addr, limit).await?;

        if try_tls {
            let name = ServerName::try_from(host).unwrap_or(ServerName::IpAddress(addr.ip()));
            match timeout(limit, self.tls.connect(name, stream)).await {
                Ok(Ok(tls)) => {
                    debug!(%addr, "tls established");
                    return Ok(Connection {
                        stream: ProbeStream::Tls(Box::new(tls)),
                        peer: addr,
                        tls: true,
                        setup_time: start.elapsed(),
                    });
                }
                Ok(Err(e)) => debug!(%addr, error = %e, "tls handshake failed, reconnecting plain"),
                Err(_) => debug!(%addr, "tls handshake timed out, reconnecting plain"),
            }
            let stream = self.factory.connect_tcp(addr, limit).await?;
            return Ok(Connection {
                stream: ProbeStream::Plain(stream),
                peer: addr,
                tls: false,
                setup_time: start.elapsed(),
            });
        }

        Ok(Connection {
            stream: ProbeStream::Plain(stream),
            peer: addr,
            tls: false,
            setup_time: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhvani_common::DirectTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn plain_connection_without_tls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            s.write_all(b"hello").await.unwrap();
        });

        let connector = Connector::new(Arc::new(DirectTransport));
        let mut conn = connector
            .open(addr, "127.0.0.1", Duration::from_secs(2), false)
            .await
            .unwrap();
        assert!(!conn.tls);
        let mut buf = [0u8; 5];
        conn.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn failed_handshake_falls_back_to_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut s, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let _ = s.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
                    let mut sink = [0u8; 512];
                    while let Ok(n) = s.read(&mut sink).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });

        let connector = Connector::new(Arc::new(DirectTransport));
        let mut conn = connector
            .open(addr, "localhost", Duration::from_secs(2), true)
            .await
            .unwrap();
        assert!(!conn.tls);
        let mut buf = [0u8; 8];
        conn.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"SSH-2.0-");
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = Connector::new(Arc::new(DirectTransport));
        let err = connector
            .open(addr, "127.0.0.1", Duration::from_secs(2), false)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
