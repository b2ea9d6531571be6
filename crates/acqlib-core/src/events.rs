//! Asynchronous driver event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel when
//! hardware state changes outside a request/reply exchange: a board detects
//! a trigger, a board reports an error spontaneously, or the liveness
//! monitor observes a change in the present-board set.
//!
//! Subscribed clients receive these on a best-effort basis through a bounded
//! broadcast channel; slow consumers may miss events under load.

use crate::types::{BoardId, BoardMask, ChannelId};

/// An event delivered to subscribed clients outside normal request/ack pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// A board detected a trigger condition on one of its inputs.
    TriggerDetected {
        /// The logical channel the trigger fired on.
        channel: ChannelId,
    },

    /// A board emitted an unsolicited error signal.
    BoardFault {
        /// The board reporting the fault.
        board: BoardId,
        /// Board-defined fault code, passed through undecoded.
        code: u16,
    },

    /// The set of present boards changed (board appeared or went silent).
    BoardSetChanged {
        /// Boards now considered present.
        present: BoardMask,
    },

    /// A board finished its setup pipeline and accepts commands.
    BoardReady {
        /// The board that became ready.
        board: BoardId,
    },
}
