//! Link trait for board communication.
//!
//! The [`BoardLink`] trait abstracts the raw link-layer endpoint to one
//! physical board. Frames are addressed by hardware address, not by a
//! socket path; an external demultiplexer converts inbound link data into
//! typed signals before the driver sees them, so the link itself only needs
//! to send.
//!
//! The driver engine operates on `BoardLink` rather than directly on a raw
//! socket, enabling both real hardware control and deterministic unit
//! testing with `MockLink` from the `acqlib-test-harness` crate.

use async_trait::async_trait;

use crate::error::Result;

/// Frame-level link to one physical board.
///
/// Implementations handle link-layer framing and addressing. Protocol-level
/// concerns (signal ids, payload layout) are handled by the wire codec and
/// the driver engine that consume this trait.
#[async_trait]
pub trait BoardLink: Send + Sync {
    /// Send one complete wire frame to the board.
    ///
    /// Implementations should return only after the frame has been handed
    /// to the link layer.
    async fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Close the link.
    ///
    /// After `close()`, subsequent `send()` calls should return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the link is currently usable.
    fn is_connected(&self) -> bool;

    /// The hardware address frames on this link are sent to.
    fn hw_addr(&self) -> [u8; 6];
}
