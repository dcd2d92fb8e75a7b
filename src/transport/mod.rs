//! Transport module - the boundary with the framing layer.
//!
//! The engine never sees raw bytes. A transport hands over complete frames
//! and accepts complete frames; start-of-frame markers, length and checksum
//! are its business. Implementations wrap a serial port or socket with
//! their own framing.
//!
//! [`MemoryTransport`] is an in-process pair used for tests and loopback.

mod memory;

use std::future::Future;

use crate::error::TransportError;
use crate::protocol::Frame;

pub use memory::{MemoryReader, MemoryTransport, MemoryWriter, Peer};

/// Read half of a frame transport.
pub trait FrameReader: Send + 'static {
    /// Wait for the next complete inbound frame.
    ///
    /// [`TransportError::Closed`] ends the session; any other error is
    /// reported and reading continues.
    fn read_frame(&mut self) -> impl Future<Output = Result<Frame, TransportError>> + Send;
}

/// Write half of a frame transport.
pub trait FrameWriter: Send + 'static {
    /// Write one complete frame.
    fn write_frame(&mut self, frame: &Frame)
        -> impl Future<Output = Result<(), TransportError>> + Send;
}
