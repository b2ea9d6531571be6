//! Board frame encoder/decoder.
//!
//! Every exchange with a board is one fixed-layout binary frame carried in a
//! single link-layer frame, so frames arrive already delimited; the decoder
//! consumes a complete buffer rather than scanning a stream.
//!
//! # Frame format
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! offset 0..2   signal id   u16   (acknowledgement = request id | 0x8000)
//! offset 2      channel     u8    (0xFF = all channels on this board)
//! offset 3      flags       u8    (bit 0: reset flag in probe acks)
//! offset 4..6   status      u16   (acks only; zero in requests)
//! offset 6..    payload           (verb-specific)
//! ```

use bytes::{BufMut, BytesMut};

use acqlib_core::{Error, Result};

/// Fixed frame header length in bytes.
pub const HEADER_LEN: usize = 6;

/// Flags-byte bit set in a probe acknowledgement when the board has reset
/// since the last probe cycle.
pub const FLAG_RESET: u8 = 0x01;

/// Signal id constants for every board request/acknowledgement pair.
///
/// An acknowledgement carries the request's id with [`signal::ACK`] set.
/// The two unsolicited signals a board may emit at any time live in the
/// `0x4000` range and have no request counterpart.
pub mod signal {
    /// Bit set in every acknowledgement signal id.
    pub const ACK: u16 = 0x8000;

    // Liveness and board-level queries.
    /// Liveness probe; ack carries the reset flag and loaded image slot.
    pub const PROBE: u16 = 0x0001;
    /// Hard reset; the board re-enters its boot sequence.
    pub const RESET: u16 = 0x0002;
    /// Firmware version query.
    pub const VERSION: u16 = 0x0003;
    /// Raw hardware status query.
    pub const STATUS: u16 = 0x0004;
    /// Buffer memory size query.
    pub const SIZE: u16 = 0x0005;
    /// Over-temperature shutdown limit.
    pub const TEMP_LIMIT: u16 = 0x0006;

    // Channel operations.
    /// Allocate channels.
    pub const ALLOCATE: u16 = 0x0010;
    /// Free channels. Also used with the wildcard channel by the setup
    /// pipeline's free-all step.
    pub const FREE: u16 = 0x0011;
    /// Start recording.
    pub const RECORD: u16 = 0x0012;
    /// Stop recording.
    pub const STOP: u16 = 0x0013;
    /// Read buffered pages.
    pub const READ_DATA: u16 = 0x0014;
    /// Configure trigger detection.
    pub const TRIGGER_SETUP: u16 = 0x0015;
    /// Configure data streaming (checksummed header).
    pub const STREAM_SETUP: u16 = 0x0016;

    // Flash operations.
    /// Disable flash write protection.
    pub const FLASH_UNPROTECT: u16 = 0x0020;
    /// Erase one sector.
    pub const FLASH_ERASE: u16 = 0x0021;
    /// Write one block.
    pub const FLASH_WRITE: u16 = 0x0022;
    /// Read one block back (verify).
    pub const FLASH_READ: u16 = 0x0023;
    /// Re-enable flash write protection.
    pub const FLASH_PROTECT: u16 = 0x0024;
    /// Read image metadata for a slot.
    pub const IMAGE_INFO: u16 = 0x0025;

    // Setup pipeline steps.
    /// Clear firmware registers.
    pub const CLEAR_FIRMWARE: u16 = 0x0030;
    /// Reconfigure the active firmware image.
    pub const LOAD_IMAGE: u16 = 0x0031;
    /// Enable the on-board watchdog.
    pub const WATCHDOG_ENABLE: u16 = 0x0032;
    /// Enable link-level address resolution.
    pub const ARP_ENABLE: u16 = 0x0033;

    // Unsolicited board-to-driver signals.
    /// Trigger condition detected on an input.
    pub const TRIGGER_EVENT: u16 = 0x4001;
    /// Spontaneous board error report.
    pub const BOARD_ERROR: u16 = 0x4002;

    /// The acknowledgement id for a request id.
    pub fn ack_of(request: u16) -> u16 {
        request | ACK
    }

    /// The request id an acknowledgement answers.
    pub fn request_of(ack: u16) -> u16 {
        ack & !ACK
    }

    /// `true` if the signal id is an acknowledgement.
    pub fn is_ack(id: u16) -> bool {
        id & ACK != 0
    }

    /// `true` if the signal id is one of the unsolicited board signals.
    pub fn is_unsolicited(id: u16) -> bool {
        id == TRIGGER_EVENT || id == BOARD_ERROR
    }
}

/// A parsed board frame.
///
/// This is the protocol-level representation of a single board message,
/// whether it is a request from the driver, an acknowledgement from the
/// board, or an unsolicited board signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Signal id.
    pub signal: u16,
    /// Board-local channel (input) number, or [`WILDCARD_CHANNEL`]
    /// (`0xFF`) for "all channels on this board". Zero for board-level
    /// signals.
    ///
    /// [`WILDCARD_CHANNEL`]: acqlib_core::WILDCARD_CHANNEL
    pub channel: u8,
    /// Flags byte. Only [`FLAG_RESET`] is currently defined.
    pub flags: u8,
    /// Status word. Zero in requests; the board's raw status in acks.
    pub status: u16,
    /// Verb-specific payload (may be empty).
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a request frame (flags and status zero).
    pub fn request(signal: u16, channel: u8, payload: Vec<u8>) -> Frame {
        Frame {
            signal,
            channel,
            flags: 0,
            status: 0,
            payload,
        }
    }

    /// Build an acknowledgement frame for a request id.
    pub fn ack(request_signal: u16, channel: u8, status: u16, payload: Vec<u8>) -> Frame {
        Frame {
            signal: signal::ack_of(request_signal),
            channel,
            flags: 0,
            status,
            payload,
        }
    }

    /// `true` if this frame is an acknowledgement.
    pub fn is_ack(&self) -> bool {
        signal::is_ack(self.signal)
    }

    /// `true` if this frame acknowledges the given request id.
    pub fn acknowledges(&self, request_signal: u16) -> bool {
        self.is_ack() && signal::request_of(self.signal) == request_signal
    }

    /// Encode this frame into raw bytes ready for transmission.
    ///
    /// # Example
    ///
    /// ```
    /// use acqlib_wire::frame::{signal, Frame};
    ///
    /// // Version query to a board.
    /// let bytes = Frame::request(signal::VERSION, 0, vec![]).encode();
    /// assert_eq!(bytes, vec![0x00, 0x03, 0x00, 0x00, 0x00, 0x00]);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u16(self.signal);
        buf.put_u8(self.channel);
        buf.put_u8(self.flags);
        buf.put_u16(self.status);
        buf.put_slice(&self.payload);
        buf.to_vec()
    }

    /// Decode one complete board frame.
    ///
    /// Link-layer framing delivers whole frames, so `buf` must contain
    /// exactly one frame: at least [`HEADER_LEN`] bytes, with everything
    /// past the header taken as payload.
    ///
    /// # Example
    ///
    /// ```
    /// use acqlib_wire::frame::{signal, Frame};
    ///
    /// let bytes = vec![0x80, 0x03, 0x00, 0x00, 0x00, 0x00, 0xAB, 0xCD];
    /// let frame = Frame::decode(&bytes).unwrap();
    /// assert!(frame.acknowledges(signal::VERSION));
    /// assert_eq!(frame.payload, vec![0xAB, 0xCD]);
    /// ```
    pub fn decode(buf: &[u8]) -> Result<Frame> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "board frame too short: {} bytes, need at least {HEADER_LEN}",
                buf.len()
            )));
        }
        let sig = u16::from_be_bytes([buf[0], buf[1]]);
        let channel = buf[2];
        let flags = buf[3];
        let status = u16::from_be_bytes([buf[4], buf[5]]);
        Ok(Frame {
            signal: sig,
            channel,
            flags,
            status,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}
