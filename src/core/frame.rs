//! Datagram framing codec.
//!
//! Four datagram kinds are distinguished by the first byte. Data datagrams
//! carry a fixed 8-byte header:
//!
//! ```text
//! [0]     0x03 (type)
//! [1]     0x00 (flags, reserved)
//! [2..4]  u16 length, big-endian  = payload length + 4
//! [4..8]  u32 serial, big-endian
//! [8..]   payload
//! ```
//!
//! The length field counts the four serial bytes plus the payload, so a
//! datagram is accepted iff its total size is at least 8 and
//! `total − 4 >= length`. Trailing bytes past `4 + length` are ignored.

/// Size of the data-frame header and of the pre-space senders must reserve.
pub const HEADER_LEN: usize = 8;

/// Inbound datagrams shorter than this are dropped by the dispatcher
/// (reset is recognised earlier and is exempt).
pub const MIN_DATAGRAM_LEN: usize = 4;

/// The single-byte reset datagram.
pub const RESET_DATAGRAM: [u8; 1] = [PacketKind::Reset as u8];

/// Datagram type codes carried in the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Opaque negotiation body, forwarded to the negotiator.
    Negotiation = 0x01,
    /// Opaque keep-alive body, forwarded to the keep-alive handler.
    KeepAlive = 0x02,
    /// Framed application payload.
    Data = 0x03,
    /// Single-byte teardown signal.
    Reset = 0xFF,
}

impl PacketKind {
    /// Wire code for this packet kind.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Recognise a packet kind from the leading byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(PacketKind::Negotiation),
            0x02 => Some(PacketKind::KeepAlive),
            0x03 => Some(PacketKind::Data),
            0xFF => Some(PacketKind::Reset),
            _ => None,
        }
    }
}

/// Parsed view of a data datagram: the remote serial and the payload slice.
///
/// Returns `None` for anything that is not a well-formed data frame; the
/// dispatcher treats that as a silent drop.
pub fn parse_data(datagram: &[u8]) -> Option<(u32, &[u8])> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    if datagram[0] != PacketKind::Data.code() {
        return None;
    }

    let length = u16::from_be_bytes([datagram[2], datagram[3]]) as usize;
    // length counts the serial bytes, so anything below 4 cannot be valid
    if length < 4 || datagram.len() - 4 < length {
        return None;
    }

    let serial = u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
    Some((serial, &datagram[HEADER_LEN..4 + length]))
}

/// Populate the 8 header bytes at the front of `pre`, leaving everything
/// past them untouched. `pre` must hold at least [`HEADER_LEN`] bytes and
/// `payload_len + 4` must fit the u16 length field; both are caller
/// contracts enforced upstream.
pub fn write_data_header(pre: &mut [u8], payload_len: usize, serial: u32) {
    debug_assert!(pre.len() >= HEADER_LEN);
    debug_assert!(payload_len + 4 <= u16::MAX as usize);

    let length = (payload_len + 4) as u16;
    pre[0] = PacketKind::Data.code();
    pre[1] = 0x00;
    pre[2..4].copy_from_slice(&length.to_be_bytes());
    pre[4..8].copy_from_slice(&serial.to_be_bytes());
}
