//! Client builder and facade.
//!
//! The [`ClientBuilder`] collects async message types and engine settings.
//! [`ClientBuilder::start`] spawns the engine over a transport and returns:
//! - a [`Client`], cheaply cloneable, for submitting requests
//! - [`Events`], the receivers for unsolicited notifications and
//!   out-of-band errors
//!
//! # Example
//!
//! ```no_run
//! use znp_client::protocol::Subsystem;
//! use znp_client::transport::MemoryTransport;
//! use znp_client::Client;
//!
//! # async fn run() -> znp_client::Result<()> {
//! let (reader, writer, _peer) = MemoryTransport::pair();
//! let (client, mut events) = Client::builder()
//!     .with_system_notifications()
//!     .start(reader, writer)
//!     .await?;
//!
//! let version = client.version().await?;
//! println!("product {}", version.product);
//!
//! while let Some(notification) = events.notifications.recv().await {
//!     println!("{}", notification.render());
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::codec::{Payload, PayloadCodec};
use crate::engine::{self, EngineConfig, EngineHandle};
use crate::error::{ConfigError, PayloadError, Result, ZnpError};
use crate::protocol::{CommandType, Frame, Subsystem};
use crate::registry::{AsyncRegistry, Notification};
use crate::transport::{FrameReader, FrameWriter};

/// Builder for configuring and starting a client.
pub struct ClientBuilder {
    registry: AsyncRegistry,
    config: EngineConfig,
    /// First failed registration, reported by `start()`.
    registration_error: Option<ConfigError>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            registry: AsyncRegistry::new(),
            config: EngineConfig::default(),
            registration_error: None,
        }
    }

    /// Register `T` as the unsolicited message sent on `(subsystem, command)`.
    ///
    /// An invalid schema for `T` is reported when the client starts.
    pub fn register_async<T: Payload + fmt::Debug>(mut self, subsystem: Subsystem, command: u8) -> Self {
        if let Err(err) = self.registry.register::<T>(subsystem, command) {
            self.registration_error.get_or_insert(err);
        }
        self
    }

    /// Time a synchronous request waits for its response (default: 5s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Capacity of the submission and inbound queues (default: 64).
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Capacity of the notification and error streams (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Replace the whole engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the engine over a transport.
    ///
    /// # Errors
    ///
    /// Returns the first registration error, if any async type had an
    /// invalid schema.
    pub async fn start<R, W>(self, reader: R, writer: W) -> Result<(Client, Events)>
    where
        R: FrameReader,
        W: FrameWriter,
    {
        if let Some(err) = self.registration_error {
            return Err(PayloadError::Config(err).into());
        }
        let (engine, receivers) = engine::spawn(reader, writer, self.registry, self.config);
        Ok((
            Client { engine },
            Events {
                notifications: receivers.notifications,
                errors: receivers.errors,
            },
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Receivers for what the engine reports outside of request results.
///
/// Both streams are bounded; events are dropped if a receiver falls behind.
pub struct Events {
    /// Decoded unsolicited messages.
    pub notifications: mpsc::Receiver<Notification>,
    /// Transport failures, unknown responses and unknown async commands.
    pub errors: mpsc::Receiver<ZnpError>,
}

/// Handle for submitting requests to a running engine.
///
/// Clones share the engine. The engine stops when [`Client::shutdown`] is
/// called or the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Client {
    engine: EngineHandle,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Send a synchronous request and decode the response.
    ///
    /// Dropping the returned future abandons the request and frees its key
    /// for the next caller.
    ///
    /// # Errors
    ///
    /// - [`ZnpError::Timeout`] if no response arrived in time
    /// - [`ZnpError::Protocol`] if the coprocessor rejected the request
    /// - [`ZnpError::Payload`] if encoding or decoding failed
    /// - [`ZnpError::Transport`] if the frame could not be written
    pub async fn request<Req, Rsp>(&self, subsystem: Subsystem, command: u8, request: &Req) -> Result<Rsp>
    where
        Req: Payload,
        Rsp: Payload,
    {
        let mut response = Rsp::default();
        self.request_into(subsystem, command, request, &mut response)
            .await?;
        Ok(response)
    }

    /// Send a synchronous request and decode the response into `response`.
    pub async fn request_into<Req, Rsp>(
        &self,
        subsystem: Subsystem,
        command: u8,
        request: &Req,
        response: &mut Rsp,
    ) -> Result<()>
    where
        Req: Payload,
        Rsp: Payload,
    {
        let payload = PayloadCodec::encode(request)?;
        // Fail before anything is written if the response type is broken.
        PayloadCodec::plan::<Rsp>().map_err(PayloadError::from)?;
        let frame = self.request_frame(subsystem, command, payload).await?;
        PayloadCodec::decode_into(&frame.payload, response)?;
        Ok(())
    }

    /// Send a synchronous request with a raw payload; returns the raw response.
    pub async fn request_frame(
        &self,
        subsystem: Subsystem,
        command: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Frame> {
        let frame = Frame::new(CommandType::Sreq, subsystem, command, payload);
        self.engine.request(frame).await
    }

    /// Send an asynchronous request. Completes once the frame is written.
    pub async fn send_async<Req: Payload>(
        &self,
        subsystem: Subsystem,
        command: u8,
        request: &Req,
    ) -> Result<()> {
        let payload = PayloadCodec::encode(request)?;
        let frame = Frame::new(CommandType::Areq, subsystem, command, payload);
        self.engine.send(frame).await
    }

    /// Submit a frame by command type.
    ///
    /// SREQ waits for and returns the response; AREQ returns `None` once
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`ZnpError::UnsupportedCommandType`] for POLL and SRSP.
    pub async fn process_request(
        &self,
        command_type: CommandType,
        subsystem: Subsystem,
        command: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Option<Frame>> {
        let frame = Frame::new(command_type, subsystem, command, payload);
        match command_type {
            CommandType::Sreq => self.engine.request(frame).await.map(Some),
            CommandType::Areq => self.engine.send(frame).await.map(|()| None),
            CommandType::Poll | CommandType::Srsp => {
                Err(ZnpError::UnsupportedCommandType(command_type))
            }
        }
    }

    /// Stop the engine. Outstanding requests fail with [`ZnpError::Closed`].
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }

    /// Wait until the engine has stopped, for whatever reason.
    pub async fn closed(&self) {
        self.engine.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FieldSpec, Schema};
    use crate::lens;
    use crate::transport::MemoryTransport;

    #[derive(Debug, Default)]
    struct Broken {
        value: u8,
    }

    impl Payload for Broken {
        fn schema() -> Schema<Self> {
            Schema::new().field(FieldSpec::uint(lens!(Broken, value)).bitmask("nope"))
        }
    }

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .request_timeout(Duration::from_millis(250))
            .channel_capacity(8)
            .event_capacity(16);

        assert_eq!(builder.config.request_timeout, Duration::from_millis(250));
        assert_eq!(builder.config.channel_capacity, 8);
        assert_eq!(builder.config.event_capacity, 16);
    }

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.config, EngineConfig::default());
        assert!(builder.registry.is_empty());
    }

    #[tokio::test]
    async fn test_start_reports_registration_error() {
        let (reader, writer, _peer) = MemoryTransport::pair();
        let result = Client::builder()
            .register_async::<Broken>(Subsystem::Sys, 0x80)
            .start(reader, writer)
            .await;

        match result {
            Err(ZnpError::Payload(PayloadError::Config(err))) => {
                assert_eq!(err.record, "Broken");
                assert_eq!(err.field, "value");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a registration error"),
        }
    }

    #[tokio::test]
    async fn test_process_request_rejects_response_types() {
        let (reader, writer, _peer) = MemoryTransport::pair();
        let (client, _events) = Client::builder().start(reader, writer).await.unwrap();

        for command_type in [CommandType::Poll, CommandType::Srsp] {
            assert!(matches!(
                client
                    .process_request(command_type, Subsystem::Sys, 0x01, Bytes::new())
                    .await,
                Err(ZnpError::UnsupportedCommandType(t)) if t == command_type
            ));
        }
    }

    #[tokio::test]
    async fn test_process_request_async_returns_none() {
        let (reader, writer, mut peer) = MemoryTransport::pair();
        let (client, _events) = Client::builder().start(reader, writer).await.unwrap();

        let written = client
            .process_request(CommandType::Areq, Subsystem::Sys, 0x00, vec![0x01])
            .await
            .unwrap();
        assert!(written.is_none());

        let frame = peer.recv().await.unwrap();
        assert_eq!(frame.command_type, CommandType::Areq);
        assert_eq!(frame.cmd0(), 0x41);
    }

    #[tokio::test]
    async fn test_drop_last_client_stops_engine() {
        let (reader, writer, mut peer) = MemoryTransport::pair();
        let (client, _events) = Client::builder().start(reader, writer).await.unwrap();
        drop(client);
        // The writer half goes away with the engine.
        assert!(peer.recv().await.is_none());
    }
}
