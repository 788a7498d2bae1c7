//! ICMP echo packet building and parsing
//!
//! Request layout (64 bytes):
//!
//! ```text
//! 0      1      2             4             6             8
//! | type | code |  checksum   | identifier  |  sequence   |
//! | send time: unix seconds (u64)  | send time: micros (u64) |
//! | padding (40 bytes)                                      |
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const HEADER_LEN: usize = 8;
pub const ECHO_PAYLOAD_LEN: usize = 56;
pub const PACKET_LEN: usize = HEADER_LEN + ECHO_PAYLOAD_LEN;

const SEQUENCE: u16 = 1;
const PAD: u8 = b'Q';

/// Internet checksum over `data`, byte-swapped.
///
/// Big-endian 16-bit words are summed (an odd trailing byte counts as the
/// high byte), carries folded back in and the result complemented. The
/// swapped value is written with `to_le_bytes`, which puts the checksum on
/// the wire in network order.
#[inline]
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    let mut words = data.chunks_exact(2);

    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    (!sum as u16).swap_bytes()
}

/// Build a 64-byte echo request stamped with `sent_at`.
pub fn build_echo_request(identifier: u16, sent_at: SystemTime) -> [u8; PACKET_LEN] {
    let mut buf = [PAD; PACKET_LEN];
    buf[0] = ICMP_ECHO_REQUEST;
    buf[1] = 0;
    buf[2..4].copy_from_slice(&[0, 0]); // checksum placeholder
    buf[4..6].copy_from_slice(&identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&SEQUENCE.to_be_bytes());

    let since_epoch = sent_at.duration_since(UNIX_EPOCH).unwrap_or_default();
    buf[8..16].copy_from_slice(&since_epoch.as_secs().to_be_bytes());
    buf[16..24].copy_from_slice(&u64::from(since_epoch.subsec_micros()).to_be_bytes());

    let sum = checksum(&buf);
    buf[2..4].copy_from_slice(&sum.to_le_bytes());
    buf
}

/// Parse a datagram read from a raw IPv4 ICMP socket (IP header included).
///
/// Returns the send time embedded in the payload when the packet is an echo
/// reply carrying `identifier`.
pub fn parse_echo_reply(packet: &[u8], identifier: u16) -> Option<Duration> {
    let version = packet.first()? >> 4;
    if version != 4 {
        return None;
    }
    let ihl = (packet[0] & 0x0f) as usize * 4;
    let icmp = packet.get(ihl..)?;
    if icmp.len() < HEADER_LEN + 16 {
        return None;
    }

    if icmp[0] != ICMP_ECHO_REPLY || icmp[1] != 0 {
        return None;
    }
    if u16::from_be_bytes([icmp[4], icmp[5]]) != identifier {
        return None;
    }

    let secs = u64::from_be_bytes(icmp[8..16].try_into().ok()?);
    let micros = u64::from_be_bytes(icmp[16..24].try_into().ok()?);
    Some(Duration::from_secs(secs) + Duration::from_micros(micros))
}
