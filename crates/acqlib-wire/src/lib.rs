//! acqlib-wire: Fixed-layout binary board protocol codec.
//!
//! Boards speak a custom request/acknowledgement protocol framed directly on
//! link-layer frames. This crate handles the pure byte-level encoding and
//! decoding of those frames, the one's-complement stream-header checksum,
//! and the flash geometry used to address on-board persistent memory.
//!
//! All functions are pure -- they produce or consume byte buffers without
//! performing any I/O. The driver engine is responsible for sending frames
//! over a [`BoardLink`](acqlib_core::BoardLink) and feeding received frames
//! back into the decoder.

pub mod checksum;
pub mod flash;
pub mod frame;

pub use checksum::{fold_checksum, verify_checksum};
pub use frame::{signal, Frame, HEADER_LEN};
