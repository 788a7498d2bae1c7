//! Raw-socket echo with round-trip timing.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::future::Future;
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::unix::AsyncFd;
use tokio::time::timeout;
use tracing::{debug, instrument};

use dhvani_common::{resolve, EchoReply};

use crate::error::IcmpError;
use crate::packet::{build_echo_request, parse_echo_reply};

const RECV_BUFFER: usize = 1024;

/// Sends one echo request per call over a fresh raw socket.
#[derive(Debug, Clone, Copy)]
pub struct IcmpPinger {
    timeout: Duration,
    identifier: u16,
}

impl IcmpPinger {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            identifier: (std::process::id() & 0xFFFF) as u16,
        }
    }

    #[must_use]
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    /// Whether this process may open raw ICMP sockets.
    pub fn is_available() -> bool {
        open_raw_socket().is_ok()
    }

    /// Ping `host` once. `Ok(None)` when no reply arrives within the timeout.
    #[instrument(skip(self))]
    pub async fn ping(&self, host: &str) -> Result<Option<EchoReply>, IcmpError> {
        let addr = resolve(host, 0)
            .await
            .map_err(|e| IcmpError::InvalidTarget(e.to_string()))?;
        if !addr.ip().is_ipv4() {
            return Err(IcmpError::InvalidTarget(format!("{host}: only IPv4 echo is supported")));
        }

        let socket = AsyncFd::new(open_raw_socket()?)?;
        let packet = build_echo_request(self.identifier, SystemTime::now());
        send_to(&socket, &packet, addr.ip()).await?;

        let socket = &socket;
        let next_packet = move || async move {
            let mut buf = [0u8; RECV_BUFFER];
            let n = recv(socket, &mut buf).await?;
            Ok::<_, io::Error>(buf[..n].to_vec())
        };
        match await_reply(self.timeout, self.identifier, next_packet).await? {
            Some(sent) => {
                let received = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
                let rtt = received.saturating_sub(sent);
                debug!(%host, ?rtt, "echo reply");
                Ok(Some(EchoReply::new(host, rtt)))
            }
            None => {
                debug!(%host, "no echo reply");
                Ok(None)
            }
        }
    }
}

/// Read packets until an echo reply for `identifier` shows up or `budget`
/// runs out. Other traffic on the raw socket is dropped without extending
/// the wait. Returns the send time carried by the reply.
async fn await_reply<F, Fut>(budget: Duration, identifier: u16, mut next_packet: F) -> io::Result<Option<Duration>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<Vec<u8>>>,
{
    let mut remaining = budget;
    loop {
        let waited = Instant::now();
        let packet = match timeout(remaining, next_packet()).await {
            Ok(read) => read?,
            Err(_) => return Ok(None),
        };

        if let Some(sent) = parse_echo_reply(&packet, identifier) {
            return Ok(Some(sent));
        }

        remaining = remaining.saturating_sub(waited.elapsed());
        if remaining.is_zero() {
            return Ok(None);
        }
    }
}

fn open_raw_socket() -> Result<Socket, IcmpError> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            IcmpError::NotPermitted
        } else {
            IcmpError::Io(e)
        }
    })?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

async fn send_to(socket: &AsyncFd<Socket>, packet: &[u8], ip: IpAddr) -> io::Result<()> {
    let dest = SockAddr::from(SocketAddr::new(ip, 0));
    loop {
        let mut guard = socket.writable().await?;
        match guard.try_io(|inner| inner.get_ref().send_to(packet, &dest)) {
            Ok(sent) => return sent.map(|_| ()),
            Err(_would_block) => continue,
        }
    }
}

async fn recv(socket: &AsyncFd<Socket>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = socket.readable().await?;
        match guard.try_io(|inner| {
            let mut sock: &Socket = inner.get_ref();
            sock.read(buf)
        }) {
            Ok(read) => return read,
            Err(_would_block) => continue,
        }
    }
}
