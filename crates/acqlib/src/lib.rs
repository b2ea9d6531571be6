//! acqlib: Driver for a fixed bank of radio-receiver acquisition boards.
//!
//! Facade crate re-exporting the public API of the acqlib workspace.
//!
//! | Crate                  | Contents                                          |
//! |------------------------|---------------------------------------------------|
//! | `acqlib-core`          | Types, status catalog, shared state, `BoardLink`  |
//! | `acqlib-wire`          | Board frame codec, checksum, flash geometry       |
//! | `acqlib-driver`        | Driver loop, Operations, queue, liveness monitor  |
//! | `acqlib-test-harness`  | `MockLink` for testing without hardware           |
//!
//! # Overview
//!
//! The driver manages up to [`NUM_BOARDS`] acquisition/buffer boards, each
//! with [`CHANNELS_PER_BOARD`] inputs, over a raw link-layer transport.
//! Clients submit [`ClientRequest`]s (allocate, record, stop, read-out,
//! flash-image writes, board queries); the driver translates each into a
//! sequence of board exchanges and answers with one aggregated
//! [`ClientReply`]. A periodic liveness probe discovers boards and walks
//! new or reset boards through their setup pipeline; subscribed clients
//! receive [`DriverEvent`]s for triggers, faults, and bank changes.
//!
//! # Example
//!
//! ```no_run
//! use acqlib::{Driver, DriverConfig, Input, ClientRequest, ClientId, Verb};
//! use acqlib::{BoardLink, BoardMask, ChannelMask, RequestParams};
//!
//! async fn start(links: Vec<Box<dyn BoardLink>>) {
//!     let driver = Driver::new(links, DriverConfig::default());
//!     let input = driver.input();
//!     tokio::spawn(driver.run());
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     input.send(Input::ClientConnected { client: ClientId(1), tx }).unwrap();
//!     input.send(Input::Request {
//!         client: ClientId(1),
//!         request: ClientRequest {
//!             verb: Verb::Version,
//!             board_mask: BoardMask::ALL,
//!             channel_mask: ChannelMask::EMPTY,
//!             params: RequestParams::None,
//!         },
//!     }).unwrap();
//!     let reply = rx.recv().await;
//!     println!("{reply:?}");
//! }
//! ```

pub use acqlib_core::{
    BoardEntry, BoardId, BoardLink, BoardLiveness, BoardMask, ChannelEntry, ChannelId,
    ChannelMask, ChannelMode, ClientId, ClientReply, ClientRequest, DriverEvent, Error, ImageMeta,
    ReplyData, RequestParams, Result, SharedBoardState, Status, TriggerConfig, TriggerMode, Verb,
    CHANNELS_PER_BOARD, NUM_BOARDS, NUM_CHANNELS, WILDCARD_CHANNEL,
};

pub use acqlib_driver::{ClientMessage, Driver, DriverConfig, Input};

pub use acqlib_wire::frame::{Frame, FLAG_RESET, HEADER_LEN};

/// Wire-level modules for clients that build or inspect raw frames.
pub mod wire {
    pub use acqlib_wire::checksum;
    pub use acqlib_wire::flash;
    pub use acqlib_wire::frame;
}
