//! Mock board link for deterministic testing of the driver engine.
//!
//! [`MockLink`] implements the [`BoardLink`] trait, recording every frame
//! sent to it. Because inbound board traffic reaches the driver through its
//! event channel (the external demultiplexer's job), the mock only needs to
//! capture the outbound direction; tests assert on the recorded frames and
//! inject acknowledgements themselves.
//!
//! # Example
//!
//! ```
//! use acqlib_test_harness::MockLink;
//!
//! let (link, handle) = MockLink::new(0);
//! // hand `link` to the driver, keep `handle` for assertions
//! assert_eq!(handle.sent_count(), 0);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use acqlib_core::error::{Error, Result};
use acqlib_core::link::BoardLink;

/// Shared inner state between a [`MockLink`] and its [`MockLinkHandle`].
#[derive(Debug, Default)]
struct Inner {
    sent: Mutex<Vec<Vec<u8>>>,
    connected: AtomicBool,
}

/// A mock [`BoardLink`] recording all outbound frames.
#[derive(Debug)]
pub struct MockLink {
    hw_addr: [u8; 6],
    inner: Arc<Inner>,
}

/// Test-side handle to a [`MockLink`].
///
/// Lets the test inspect sent frames and toggle connectivity after the link
/// itself has been moved into the driver.
#[derive(Debug, Clone)]
pub struct MockLinkHandle {
    inner: Arc<Inner>,
}

impl MockLink {
    /// Create a connected mock link for board slot `board_index`.
    ///
    /// The hardware address is derived from the slot index so frames from
    /// different mock boards are distinguishable.
    pub fn new(board_index: u8) -> (MockLink, MockLinkHandle) {
        let inner = Arc::new(Inner {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        });
        let link = MockLink {
            hw_addr: [0x02, 0x00, 0x00, 0x00, 0x00, board_index],
            inner: Arc::clone(&inner),
        };
        (link, MockLinkHandle { inner })
    }
}

impl MockLinkHandle {
    /// All frames sent through the link so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Number of frames sent so far.
    pub fn sent_count(&self) -> usize {
        self.inner.sent.lock().unwrap().len()
    }

    /// The most recently sent frame, if any.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.inner.sent.lock().unwrap().last().cloned()
    }

    /// Forget all recorded frames.
    pub fn clear(&self) {
        self.inner.sent.lock().unwrap().clear();
    }

    /// Toggle the link's connected state.
    ///
    /// When disconnected, `send()` returns
    /// [`Error::NotConnected`](acqlib_core::Error::NotConnected).
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl BoardLink for MockLink {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.inner.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn hw_addr(&self) -> [u8; 6] {
        self.hw_addr
    }
}
