//! Single-shot probe exchange on an open stream.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Writes a payload and reads one response, each step bounded by `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct BannerGrabber {
    timeout: Duration,
    max_bytes: usize,
}

impl BannerGrabber {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        Self { timeout, max_bytes }
    }

    /// Send `payload` (possibly empty) and read a single response.
    #[instrument(skip(self, stream, payload), fields(len = payload.len()), level = "trace")]
    pub async fn probe<S>(&self, stream: &mut S, payload: &[u8]) -> io::Result<Vec<u8>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !payload.is_empty() {
            self.bounded(stream.write_all(payload)).await?;
            self.bounded(stream.flush()).await?;
        }
        self.grab(stream).await
    }

    /// One read of at most `max_bytes`. An empty vector means the peer closed.
    pub async fn grab<S>(&self, stream: &mut S) -> io::Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = Vec::with_capacity(self.max_bytes);
        let n = self.bounded(stream.read_buf(&mut buf)).await?;
        debug!(bytes = n, "read response");
        Ok(buf)
    }

    async fn bounded<T>(&self, op: impl std::future::Future<Output = io::Result<T>>) -> io::Result<T> {
        match timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "probe exchange timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn probe_writes_then_reads() {
        let (mut client, mut server) = duplex(1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 4];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"PING");
            server.write_all(b"PONG").await.unwrap();
        });

        let grabber = BannerGrabber::new(Duration::from_secs(1), 64);
        let reply = grabber.probe(&mut client, b"PING").await.unwrap();
        assert_eq!(reply, b"PONG");
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (mut client, _server) = duplex(64);
        let grabber = BannerGrabber::new(Duration::from_millis(50), 64);
        let err = grabber.probe(&mut client, b"").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn read_is_capped() {
        let (mut client, mut server) = duplex(1024);
        server.write_all(&[b'x'; 100]).await.unwrap();
        let grabber = BannerGrabber::new(Duration::from_secs(1), 16);
        let reply = grabber.grab(&mut client).await.unwrap();
        assert_eq!(reply.len(), 16);
    }
}
