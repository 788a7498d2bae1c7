//! Host resolution shared by the drivers.

use std::net::{IpAddr, SocketAddr};
use tokio::net::lookup_host;
use tracing::debug;

use crate::error::{DhvaniError, DhvaniResult};

/// Resolve `host` (literal address or name) to a socket address, preferring IPv4.
pub async fn resolve(host: &str, port: u16) -> DhvaniResult<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| DhvaniError::InvalidTarget(format!("{host}: {e}")))?
        .collect();

    let chosen = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| DhvaniError::InvalidTarget(format!("{host}: no addresses")))?;

    debug!(%host, addr = %chosen, "resolved host");
    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn literal_address_skips_lookup() {
        let addr = resolve("10.1.2.3", 443).await.unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), 443));
    }

    #[tokio::test]
    async fn localhost_resolves() {
        let addr = resolve("localhost", 80).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 80);
    }
}
