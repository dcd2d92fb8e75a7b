//! In-memory frame transport.
//!
//! # Example
//!
//! ```
//! use znp_client::protocol::{CommandType, Frame, Subsystem};
//! use znp_client::transport::{FrameReader, FrameWriter, MemoryTransport};
//!
//! # tokio_test_block_on(async {
//! let (mut reader, mut writer, mut peer) = MemoryTransport::pair();
//!
//! let ping = Frame::new(CommandType::Sreq, Subsystem::Sys, 0x01, Vec::new());
//! writer.write_frame(&ping).await.unwrap();
//! assert_eq!(peer.recv().await.unwrap(), ping);
//!
//! let reply = Frame::new(CommandType::Srsp, Subsystem::Sys, 0x01, vec![0x79, 0x01]);
//! peer.send(reply.clone());
//! assert_eq!(reader.read_frame().await.unwrap(), reply);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{FrameReader, FrameWriter};
use crate::error::TransportError;
use crate::protocol::Frame;

/// Constructor for connected in-memory transport halves.
pub struct MemoryTransport;

impl MemoryTransport {
    /// Create a reader/writer pair for the engine and the [`Peer`] that
    /// plays the coprocessor.
    pub fn pair() -> (MemoryReader, MemoryWriter, Peer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));

        (
            MemoryReader { rx: inbound_rx },
            MemoryWriter {
                tx: outbound_tx,
                fail_writes: fail_writes.clone(),
            },
            Peer {
                tx: Some(inbound_tx),
                rx: outbound_rx,
                fail_writes,
            },
        )
    }
}

/// Engine side: frames sent by the peer.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }
}

/// Engine side: frames delivered to the peer.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<Frame>,
    fail_writes: Arc<AtomicBool>,
}

impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write failure injected",
            )));
        }
        self.tx
            .send(frame.clone())
            .map_err(|_| TransportError::Closed)
    }
}

/// The far end of a [`MemoryTransport`].
#[derive(Debug)]
pub struct Peer {
    tx: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    rx: mpsc::UnboundedReceiver<Frame>,
    fail_writes: Arc<AtomicBool>,
}

impl Peer {
    /// Next frame written by the engine, or `None` once the writer is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Frame already written by the engine, if any.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Deliver a frame to the engine's reader.
    pub fn send(&self, frame: Frame) {
        self.push(Ok(frame));
    }

    /// Make the engine's next read fail with `error`.
    pub fn send_error(&self, error: TransportError) {
        self.push(Err(error));
    }

    /// Make subsequent engine writes fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Close the inbound direction; the engine's reader sees `Closed`.
    pub fn close(&mut self) {
        self.tx = None;
    }

    fn push(&self, item: Result<Frame, TransportError>) {
        let delivered = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok());
        if !delivered {
            tracing::debug!("memory transport reader is gone; dropping inbound item");
        }
    }
}
