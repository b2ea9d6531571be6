//! Per-target status bit-flag catalog.
//!
//! Every client reply carries one [`Status`] per targeted board or channel.
//! A status is either the success sentinel (all bits clear) or an
//! OR-combination of the documented error flags -- never uninitialized.
//! Boards report a raw 16-bit status word in every acknowledgement; the
//! driver decodes it into this catalog and merges in locally-detected
//! conditions (no-board, timeout, selection errors).

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A per-target status word.
///
/// Flags accumulate with bitwise OR as a command iterates its targets, so a
/// single status can carry several failure reasons at once (e.g. a board
/// that timed out once and then reported a flash error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status(u16);

impl Status {
    /// Success sentinel -- no error bits set.
    pub const SUCCESS: Status = Status(0);

    /// The targeted board is absent or not yet set up.
    pub const NO_BOARD: Status = Status(0x0001);

    /// Communication with the board failed (send error, link down).
    pub const COMM_ERROR: Status = Status(0x0002);

    /// The board did not acknowledge within the deadline.
    pub const TIMEOUT: Status = Status(0x0004);

    /// Board-level selection error (board not in the required state).
    pub const SELECT_ERROR_BOARD: Status = Status(0x0008);

    /// Channel-level selection error (channel not in the required state).
    pub const SELECT_ERROR_CHANNEL: Status = Status(0x0010);

    /// A flash erase/write/verify step failed.
    pub const FLASH_ERROR: Status = Status(0x0020);

    /// The channel was not recording when a recording-dependent verb ran.
    pub const NOT_RECORDING: Status = Status(0x0040);

    /// The supplied password did not authorize the operation.
    pub const BAD_PASSWORD: Status = Status(0x0080);

    /// Mask of all defined flags. Bits outside this mask in a board ack are
    /// discarded by [`from_wire`](Status::from_wire).
    const DEFINED: u16 = 0x00FF;

    /// Build a status from a raw board acknowledgement status word.
    ///
    /// Undefined bits are dropped so a buggy or newer firmware cannot
    /// inject flags the catalog does not document.
    pub fn from_wire(raw: u16) -> Status {
        Status(raw & Self::DEFINED)
    }

    /// Raw bit representation, as carried in client replies and board acks.
    pub fn bits(&self) -> u16 {
        self.0
    }

    /// `true` if no error bits are set.
    pub fn is_success(&self) -> bool {
        self.0 == 0
    }

    /// `true` if every flag in `other` is also set in `self`.
    pub fn contains(&self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// Merge another status into this one (bitwise OR).
    pub fn merge(&mut self, other: Status) {
        self.0 |= other.0;
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        Status(self.0 | rhs.0)
    }
}

impl BitOrAssign for Status {
    fn bitor_assign(&mut self, rhs: Status) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return write!(f, "success");
        }
        let names: [(Status, &str); 8] = [
            (Status::NO_BOARD, "no-board"),
            (Status::COMM_ERROR, "comm-error"),
            (Status::TIMEOUT, "timeout"),
            (Status::SELECT_ERROR_BOARD, "select-error-board"),
            (Status::SELECT_ERROR_CHANNEL, "select-error-channel"),
            (Status::FLASH_ERROR, "flash-error"),
            (Status::NOT_RECORDING, "not-recording"),
            (Status::BAD_PASSWORD, "bad-password"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}
