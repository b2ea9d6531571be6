//! acqlib-driver: The protocol engine for the acquisition-board bank.
//!
//! This crate holds the stateful core: the top-level [`Driver`] dispatch
//! loop, the per-verb Operation state machines, the command queue, the
//! board-liveness monitor, and the per-board setup pipeline.
//!
//! # Architecture
//!
//! The driver runs as a single task consuming [`Input`] events: client
//! requests, inbound board frames, and timer deadlines. A client request is
//! promoted to an [`ops::Operation`] — a small state machine alternating
//! produce-request / consume-ack over its target boards or channels with at
//! most one exchange in flight. While an Operation is active, further
//! requests queue (stop jumps the queue); when the bank is quiet, a
//! periodic probe cycle detects boards appearing, resetting, or going
//! silent, and walks new boards through the setup pipeline before they
//! accept commands.

pub mod driver;
pub mod ops;

mod handler;
mod monitor;
mod queue;
mod setup;

pub use driver::{ClientMessage, Driver, DriverConfig, Input};
