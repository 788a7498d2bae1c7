//! Probe database - corpus compiler, port table and probe codec
//!
//! The corpus is the line-oriented `Probe` / `ports` / `match` format used by
//! nmap's service probe file. Compiling it yields a [`ProbeTable`] keyed by
//! port; the [`codec`] turns the table's textual probes into wire bytes.

pub mod codec;
pub mod compiler;
pub mod signature;
pub mod table;

pub use codec::{decode_escapes, decode_probe, extract_tcp_probes, extract_udp_probes};
pub use compiler::{compile, compile_file, expand_ports};
pub use signature::{parse_match_line, MatcherSpec};
pub use table::{PortEntry, ProbeTable};
