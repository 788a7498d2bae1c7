//! Engine tuning knobs.
//!
//! Fields stay `pub` so drivers read them directly. Timeouts are kept in
//! milliseconds to keep the JSON form readable.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{DhvaniError, DhvaniResult};

/// Upper bound for a single read from a probed service.
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Connect and plain read/write timeout.
    pub connect_timeout_ms: u64,
    /// Per-operation timeout used while version scanning.
    pub version_scan_timeout_ms: u64,
    pub udp_timeout_ms: u64,
    pub icmp_timeout_ms: u64,
    pub max_response_bytes: usize,
    /// Try a TLS handshake on every fresh TCP connection.
    pub opportunistic_tls: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            version_scan_timeout_ms: 5_000,
            udp_timeout_ms: 3_000,
            icmp_timeout_ms: 3_000,
            max_response_bytes: MAX_RESPONSE_BYTES,
            opportunistic_tls: true,
        }
    }
}

impl ScanConfig {
    /// Fast preset: short timeouts, no TLS attempt.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            connect_timeout_ms: 800,
            version_scan_timeout_ms: 1_500,
            udp_timeout_ms: 1_000,
            icmp_timeout_ms: 1_000,
            max_response_bytes: MAX_RESPONSE_BYTES,
            opportunistic_tls: false,
        }
    }

    /// Accurate preset: generous timeouts for slow services.
    #[must_use]
    pub fn accurate() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            version_scan_timeout_ms: 10_000,
            udp_timeout_ms: 5_000,
            icmp_timeout_ms: 5_000,
            max_response_bytes: MAX_RESPONSE_BYTES,
            opportunistic_tls: true,
        }
    }

    /// Pick a preset by name ("fast", "balanced", "accurate").
    pub fn preset(name: &str) -> DhvaniResult<Self> {
        match name {
            "fast" => Ok(Self::fast()),
            "balanced" => Ok(Self::default()),
            "accurate" => Ok(Self::accurate()),
            other => Err(DhvaniError::Config(format!("unknown preset '{other}'"))),
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> DhvaniResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ScanConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DHVANI_*` environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> DhvaniResult<Self> {
        if let Some(ms) = env_millis("DHVANI_CONNECT_TIMEOUT_MS")? {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_millis("DHVANI_VERSION_SCAN_TIMEOUT_MS")? {
            self.version_scan_timeout_ms = ms;
        }
        if std::env::var("DHVANI_DISABLE_TLS").map(|v| v == "1").unwrap_or(false) {
            self.opportunistic_tls = false;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> DhvaniResult<()> {
        if self.connect_timeout_ms == 0
            || self.version_scan_timeout_ms == 0
            || self.udp_timeout_ms == 0
            || self.icmp_timeout_ms == 0
        {
            return Err(DhvaniError::Config("timeouts must be non-zero".to_string()));
        }
        if self.max_response_bytes == 0 {
            return Err(DhvaniError::Config(
                "max_response_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn version_scan_timeout(&self) -> Duration {
        Duration::from_millis(self.version_scan_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn udp_timeout(&self) -> Duration {
        Duration::from_millis(self.udp_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn icmp_timeout(&self) -> Duration {
        Duration::from_millis(self.icmp_timeout_ms)
    }
}

fn env_millis(key: &str) -> DhvaniResult<Option<u64>> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DhvaniError::Config(format!("{key} is not a number of milliseconds"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert!(!ScanConfig::fast().opportunistic_tls);
        assert_eq!(ScanConfig::preset("balanced").unwrap(), ScanConfig::default());
        assert!(ScanConfig::preset("reckless").is_err());
        assert_eq!(ScanConfig::default().max_response_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: ScanConfig =
            serde_json::from_str(r#"{"version_scan_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.version_scan_timeout(), Duration::from_millis(250));
        assert_eq!(config.connect_timeout_ms, ScanConfig::default().connect_timeout_ms);
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = ScanConfig {
            udp_timeout_ms: 0,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
