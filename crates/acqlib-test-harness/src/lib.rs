//! acqlib-test-harness: Mock board links and test utilities for acqlib.
//!
//! This crate provides [`MockLink`] for deterministic unit testing of the
//! driver engine without real acquisition hardware. Outbound frames are
//! recorded for inspection; inbound acknowledgements are synthesized by the
//! test and fed to the driver as events, mirroring the external frame
//! demultiplexer.

pub mod mock_link;

pub use mock_link::{MockLink, MockLinkHandle};
