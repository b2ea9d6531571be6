//! acqlib-core: Core types, status catalog, and trait definitions for acqlib.
//!
//! This crate defines the board-agnostic abstractions shared by the wire
//! codec and the driver engine. Client applications depend on these types
//! without pulling in the protocol state machines.
//!
//! # Key types
//!
//! - [`BoardLink`] -- frame-level link to one physical board
//! - [`SharedBoardState`] -- the per-board / per-channel status table
//! - [`ClientRequest`] / [`ClientReply`] -- the client-facing command surface
//! - [`Status`] -- the per-target status bit-flag catalog
//! - [`DriverEvent`] -- asynchronous notifications for subscribed clients
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod link;
pub mod request;
pub mod state;
pub mod status;
pub mod types;

// Re-export key types at crate root for ergonomic `use acqlib_core::*`.
pub use error::{Error, Result};
pub use events::DriverEvent;
pub use link::BoardLink;
pub use request::{ClientId, ClientReply, ClientRequest, ReplyData, RequestParams, Verb};
pub use state::{BoardEntry, ChannelEntry, SharedBoardState};
pub use status::Status;
pub use types::*;
