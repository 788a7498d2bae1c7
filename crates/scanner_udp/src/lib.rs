//! UDP transport driver
//!
//! Sends a port's UDP probes over one socket and reports which of them drew
//! a reply. A closed or filtered port looks the same as a dropped probe, so
//! the report only ever says "reply seen" or "nothing seen".

mod scanner;

pub use scanner::{UdpProbeReply, UdpScanReport, UdpScanner, MAX_DATAGRAM};
