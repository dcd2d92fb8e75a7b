//! # znp-client
//!
//! Host-side protocol engine for a ZNP radio coprocessor.
//!
//! This crate turns typed request records into frames, correlates
//! synchronous responses back to their callers, enforces request deadlines
//! and routes unsolicited frames to typed notifications.
//!
//! ## Architecture
//!
//! - **Codec** ([`codec`]): records describe their wire layout with
//!   annotated field lists; bit-packed fields, per-field byte order and
//!   length-bound sequences included
//! - **Engine**: a single dispatch actor owns every in-flight request, fed
//!   by a reader task over a [`transport`] that delivers whole frames
//!
//! Framing and checksums belong to the transport and are not handled here.
//!
//! ## Example
//!
//! ```
//! use znp_client::protocol::{CommandType, Frame, Subsystem};
//! use znp_client::transport::MemoryTransport;
//! use znp_client::Client;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> znp_client::Result<()> {
//!     let (reader, writer, mut peer) = MemoryTransport::pair();
//!     let (client, _events) = Client::builder().start(reader, writer).await?;
//!
//!     // Play the coprocessor: answer the LED request.
//!     tokio::spawn(async move {
//!         while let Some(request) = peer.recv().await {
//!             let reply = Frame::new(CommandType::Srsp, request.subsystem, request.command, vec![0x00]);
//!             peer.send(reply);
//!         }
//!     });
//!
//!     let response = client.led_control(1, 0).await?;
//!     assert_eq!(response.status, 0);
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod commands;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod transport;

mod client;
mod engine;

pub use client::{Client, ClientBuilder, Events};
pub use engine::{EngineConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_EVENT_CAPACITY, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ConfigError, PayloadError, Result, TransportError, ZnpError};
pub use registry::Notification;
