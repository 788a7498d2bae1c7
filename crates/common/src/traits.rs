//! Seams between the drivers and the sockets they use.
//!
//! Drivers never create sockets directly; they ask a [`TransportFactory`].
//! Proxying or instrumenting connections means handing the drivers a
//! different factory.

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

/// Opens the sockets a driver needs. One call, one fresh socket.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a TCP connection to `addr`, bounded by `limit`.
    async fn connect_tcp(&self, addr: SocketAddr, limit: Duration) -> io::Result<TcpStream>;

    /// Bind a datagram socket suitable for talking to `peer`.
    async fn bind_udp(&self, peer: SocketAddr) -> io::Result<UdpSocket>;
}

/// Plain sockets straight from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectTransport;

#[async_trait]
impl TransportFactory for DirectTransport {
    async fn connect_tcp(&self, addr: SocketAddr, limit: Duration) -> io::Result<TcpStream> {
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            )),
        }
    }

    async fn bind_udp(&self, peer: SocketAddr) -> io::Result<UdpSocket> {
        let local = match peer.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        UdpSocket::bind(local).await
    }
}
