//! TCP transport driver
//!
//! Connect-only and connect-send-receive probes with opportunistic TLS, and
//! the version scan that walks a port's probes until one is classified.

mod banner;
mod connector;
mod scanner;
mod version;

pub use banner::BannerGrabber;
pub use connector::{Connection, Connector, ProbeStream};
pub use scanner::{TcpScanner, TCP_PROBE};
pub use version::VersionScanner;
