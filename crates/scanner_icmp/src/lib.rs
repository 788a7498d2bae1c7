//! Raw ICMP echo driver
//!
//! Builds an RFC 792 echo request by hand, sends it over a raw socket and
//! times the matching echo reply. Raw sockets need root or CAP_NET_RAW.

pub mod error;
pub mod packet;
pub mod ping;

pub use error::IcmpError;
pub use packet::{build_echo_request, checksum, parse_echo_reply, ECHO_PAYLOAD_LEN, PACKET_LEN};
pub use ping::IcmpPinger;
