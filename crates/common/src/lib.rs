//! Dhvani Common - Shared types and traits
//!
//! This crate provides the types, traits, configuration and error handling
//! used across the Dhvani fingerprinting engine.

pub mod config;
pub mod error;
pub mod net;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{ScanConfig, MAX_RESPONSE_BYTES};
pub use error::{DhvaniError, DhvaniResult};
pub use net::resolve;
pub use traits::{DirectTransport, TransportFactory};
pub use types::{
    ConnectionResult, EchoReply, Fingerprint, ProbeEntry, ServiceMatch, Transport,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
