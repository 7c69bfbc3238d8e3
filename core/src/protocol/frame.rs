//! Frame classification for inbound BLE notifications
//!
//! The valve pushes three kinds of notification: two single-byte control
//! frames (flow-control ACK and keep-alive probe) and multi-byte data
//! fragments carrying a chunk of a larger JSON telemetry message. A data
//! fragment is laid out as `[header | payload... | trailer(2)]`; the two
//! trailer bytes are presumed to be a CRC16 and are stripped without
//! validation.

use crate::protocol::profile::DeviceProfile;

/// Header bit marking the first fragment of a message.
pub const HEADER_FIRST_FRAGMENT: u8 = 0x80;

/// Header bit marking the last fragment of a message. This bit, not the
/// first-fragment bit, is the authoritative end-of-message marker.
pub const HEADER_LAST_FRAGMENT: u8 = 0x40;

/// Minimum length of a data fragment: header byte plus two trailer bytes.
const MIN_DATA_LEN: usize = 3;

/// The leading byte of a data fragment. Bits other than 0x80/0x40 are
/// reserved by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader(pub u8);

impl FragmentHeader {
    /// Whether this fragment opens a new message.
    pub fn is_first(self) -> bool {
        self.0 & HEADER_FIRST_FRAGMENT != 0
    }

    /// Whether this fragment closes the in-flight message.
    pub fn is_last(self) -> bool {
        self.0 & HEADER_LAST_FRAGMENT != 0
    }
}

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Liveness probe; the engine must answer with the reply byte.
    KeepAlive,
    /// Flow-control acknowledgement of a prior engine-to-device write.
    Ack,
    /// Too short to carry data; dropped silently.
    Malformed,
    /// A chunk of a telemetry message, trailer already stripped.
    Data {
        header: FragmentHeader,
        payload: Vec<u8>,
    },
}

impl Frame {
    /// Classify one raw notification against a device profile.
    ///
    /// Rules, in order: a single keep-alive byte, a single ACK byte,
    /// anything shorter than three bytes is malformed, everything else is a
    /// data fragment.
    pub fn classify(raw: &[u8], profile: &DeviceProfile) -> Self {
        match raw {
            [b] if *b == profile.keepalive_probe => Frame::KeepAlive,
            [b] if *b == profile.ack => Frame::Ack,
            _ if raw.len() < MIN_DATA_LEN => Frame::Malformed,
            _ => Frame::Data {
                header: FragmentHeader(raw[0]),
                payload: raw[1..raw.len() - 2].to_vec(),
            },
        }
    }
}
