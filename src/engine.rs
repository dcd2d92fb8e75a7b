//! Dispatch engine: one actor that owns all request bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! Client 1 ─┐                                        ┌─► FrameWriter
//! Client 2 ─┼─► mpsc<Command> ─► Dispatch actor ─────┤
//! Client N ─┘                        ▲    │          ├─► notifications
//!                                    │    │          └─► errors
//! FrameReader ─► Reader task ─► mpsc<Inbound>
//! ```
//!
//! The actor owns the [`PendingRegistry`] and the [`AsyncRegistry`]; nothing
//! else touches them, so they take no locks. It selects over submissions,
//! inbound frames and the earliest pending deadline.
//!
//! Same-key synchronous requests are serialized: while a key is registered,
//! further submissions on it are queued and written one at a time as the
//! registered request resolves. Deadlines are armed once the frame has been
//! written.
//!
//! Event delivery never stalls the actor. When a listener falls behind and
//! its channel is full, the event is dropped with a warning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::{Result, TransportError, ZnpError};
use crate::protocol::{CommandType, CorrelationKey, Frame};
use crate::registry::{AsyncRegistry, Notification, PendingRegistry, Queued, Reply, RequestId};
use crate::transport::{FrameReader, FrameWriter};

/// Default time a synchronous request waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the submission and inbound queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default capacity of the notification and error streams.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for the dispatch engine.
///
/// Serializes with the timeout in milliseconds:
///
/// ```
/// use znp_client::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{"request_timeout_ms": 2500}"#).unwrap();
/// assert_eq!(config.request_timeout.as_millis(), 2500);
/// assert_eq!(config.channel_capacity, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a synchronous request waits after its frame is written.
    #[serde(rename = "request_timeout_ms", with = "duration_millis")]
    pub request_timeout: Duration,
    /// Capacity of the submission and inbound queues.
    pub channel_capacity: usize,
    /// Capacity of the notification and error streams.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Messages from callers to the dispatch actor.
#[derive(Debug)]
pub(crate) enum Command {
    /// Write a frame and wait for its response.
    Sync {
        id: RequestId,
        frame: Frame,
        reply: Reply,
    },
    /// Write a frame; report only the write outcome.
    Async {
        frame: Frame,
        done: oneshot::Sender<Result<()>>,
    },
    /// The caller of a synchronous request stopped waiting.
    Cancel(RequestId),
    Shutdown,
}

/// Messages from the reader task to the dispatch actor.
#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    /// A read failed but the link is still up.
    Failed(TransportError),
}

/// Cloneable handle for submitting work to a running engine.
#[derive(Debug, Clone)]
pub(crate) struct EngineHandle {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
}

impl EngineHandle {
    /// Write `frame` and wait for the matching response.
    pub async fn request(&self, frame: Frame) -> Result<Frame> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Sync { id, frame, reply })
            .await
            .map_err(|_| ZnpError::Closed)?;

        let guard = CancelGuard {
            id,
            commands: &self.commands,
            armed: true,
        };
        let outcome = outcome.await.map_err(|_| ZnpError::Closed);
        guard.disarm();
        outcome?
    }

    /// Write `frame` without waiting for a response.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        let (done, written) = oneshot::channel();
        self.commands
            .send(Command::Async { frame, done })
            .await
            .map_err(|_| ZnpError::Closed)?;
        written.await.map_err(|_| ZnpError::Closed)?
    }

    /// Ask the actor to stop and wait until it has.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        self.commands.closed().await;
    }

    /// Wait until the actor has stopped.
    pub async fn closed(&self) {
        self.commands.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Tells the actor when a synchronous caller stops waiting early.
struct CancelGuard<'a> {
    id: RequestId,
    commands: &'a mpsc::Sender<Command>,
    armed: bool,
}

impl CancelGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Best effort: a full queue leaves the entry to its deadline.
        if self.commands.try_send(Command::Cancel(self.id)).is_err() {
            tracing::debug!(id = self.id, "could not deliver cancellation");
        }
    }
}

/// Receivers for the engine's outbound event streams.
pub(crate) struct EventReceivers {
    pub notifications: mpsc::Receiver<Notification>,
    pub errors: mpsc::Receiver<ZnpError>,
}

/// Start the reader task and the dispatch actor.
///
/// The engine runs until [`EngineHandle::shutdown`] is called, every handle
/// is dropped, or the transport reports [`TransportError::Closed`].
pub(crate) fn spawn<R, W>(
    reader: R,
    writer: W,
    prototypes: AsyncRegistry,
    config: EngineConfig,
) -> (EngineHandle, EventReceivers)
where
    R: FrameReader,
    W: FrameWriter,
{
    let channel_capacity = config.channel_capacity.max(1);
    let event_capacity = config.event_capacity.max(1);

    let (commands_tx, commands_rx) = mpsc::channel(channel_capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel(channel_capacity);
    let (notifications_tx, notifications_rx) = mpsc::channel(event_capacity);
    let (errors_tx, errors_rx) = mpsc::channel(event_capacity);

    tracing::debug!(
        async_types = prototypes.len(),
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        "starting dispatch engine"
    );

    let reader_task = tokio::spawn(read_loop(reader, inbound_tx));
    let dispatcher = Dispatcher {
        writer,
        pending: PendingRegistry::new(),
        prototypes,
        request_timeout: config.request_timeout,
        notifications: notifications_tx,
        errors: errors_tx,
    };
    tokio::spawn(dispatcher.run(commands_rx, inbound_rx, reader_task));

    (
        EngineHandle {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        },
        EventReceivers {
            notifications: notifications_rx,
            errors: errors_rx,
        },
    )
}

/// Reader loop - drains the transport into the actor's inbound queue.
///
/// Read failures other than `Closed` are passed on and reading continues.
async fn read_loop<R: FrameReader>(mut reader: R, inbound: mpsc::Sender<Inbound>) {
    loop {
        let item = match reader.read_frame().await {
            Ok(frame) => {
                tracing::trace!(%frame, "frame received");
                Inbound::Frame(frame)
            }
            Err(TransportError::Closed) => {
                tracing::debug!("transport closed; reader stopping");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "transport read failed");
                Inbound::Failed(err)
            }
        };
        if inbound.send(item).await.is_err() {
            return;
        }
    }
}

/// The dispatch actor's state.
struct Dispatcher<W> {
    writer: W,
    pending: PendingRegistry,
    prototypes: AsyncRegistry,
    request_timeout: Duration,
    notifications: mpsc::Sender<Notification>,
    errors: mpsc::Sender<ZnpError>,
}

impl<W: FrameWriter> Dispatcher<W> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<Inbound>,
        reader_task: JoinHandle<()>,
    ) {
        loop {
            let deadline = self.pending.next_deadline();
            tokio::select! {
                biased;

                // Due deadlines are served before any new work.
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire().await;
                }

                command = commands.recv() => match command {
                    Some(Command::Shutdown) => {
                        tracing::debug!("shutdown requested");
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::debug!("all client handles dropped");
                        break;
                    }
                },

                item = inbound.recv() => match item {
                    Some(Inbound::Frame(frame)) => self.handle_frame(frame).await,
                    Some(Inbound::Failed(err)) => self.report(ZnpError::Transport(err)),
                    None => {
                        tracing::info!("transport closed");
                        self.report(ZnpError::Transport(TransportError::Closed));
                        break;
                    }
                },
            }
        }

        reader_task.abort();
        self.pending.drain();
        // Stop accepting work; late submissions see `Closed`.
        commands.close();
        while let Ok(command) = commands.try_recv() {
            reject(command);
        }
        tracing::debug!("dispatch engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Sync { id, frame, reply } => {
                if reply.is_closed() {
                    return;
                }
                let key = frame.key();
                if self.pending.is_busy(&key) {
                    self.pending.enqueue(key, Queued { id, frame, reply });
                } else {
                    self.dispatch_sync(id, frame, reply).await;
                }
            }
            Command::Async { frame, done } => {
                let written = self.write(&frame).await.map_err(ZnpError::from);
                let _ = done.send(written);
            }
            Command::Cancel(id) => {
                if let Some(key) = self.pending.cancel(id) {
                    self.advance(key).await;
                }
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    /// Write a synchronous request and register it.
    ///
    /// Returns `false` if the write failed and the key stayed free.
    async fn dispatch_sync(&mut self, id: RequestId, frame: Frame, reply: Reply) -> bool {
        let key = frame.key();
        match self.write(&frame).await {
            Ok(()) => {
                let deadline = Instant::now() + self.request_timeout;
                self.pending.register(key, id, reply, deadline);
                true
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "request write failed");
                let _ = reply.send(Err(ZnpError::Transport(err)));
                false
            }
        }
    }

    /// Move the queue of a freed key along.
    async fn advance(&mut self, key: CorrelationKey) {
        while let Some(Queued { id, frame, reply }) = self.pending.dequeue(&key) {
            if self.dispatch_sync(id, frame, reply).await {
                break;
            }
        }
    }

    async fn write(&mut self, frame: &Frame) -> std::result::Result<(), TransportError> {
        tracing::trace!(%frame, "frame sent");
        self.writer.write_frame(frame).await
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame.command_type {
            CommandType::Srsp => self.handle_response(frame).await,
            CommandType::Areq => self.handle_notification(frame),
            CommandType::Sreq | CommandType::Poll => {
                tracing::warn!(%frame, "unexpected inbound frame type");
                self.report(ZnpError::UnexpectedFrame(frame));
            }
        }
    }

    async fn handle_response(&mut self, frame: Frame) {
        if let Some(err) = frame.protocol_error() {
            // Echoed cmd0/cmd1 name the rejected request; without them the
            // oldest outstanding request is the best match.
            let target = match frame.rejected_key() {
                Some(key) => Some(key).filter(|key| self.pending.is_busy(key)),
                None => self.pending.oldest(),
            };
            match target {
                Some(key) => {
                    tracing::debug!(%key, error = %err, "request rejected by coprocessor");
                    self.pending.resolve(&key, Err(err));
                    self.advance(key).await;
                }
                None => {
                    tracing::warn!(error = %err, "protocol error with no matching request");
                    self.report(err);
                }
            }
            return;
        }

        let key = frame.key();
        match self.pending.resolve(&key, Ok(frame.clone())) {
            true => {
                tracing::debug!(%key, pending = self.pending.len(), "request resolved");
                self.advance(key).await;
            }
            false => {
                tracing::warn!(%key, "response matches no pending request");
                self.report(ZnpError::UnknownResponse(frame));
            }
        }
    }

    fn handle_notification(&mut self, frame: Frame) {
        let key = frame.key();
        match self.prototypes.decode(&frame) {
            None => {
                tracing::warn!(%key, "unknown async command");
                self.report(ZnpError::UnknownAsyncCommand(frame));
            }
            Some(Err(source)) => {
                tracing::warn!(%key, error = %source, "async command failed to decode");
                self.report(ZnpError::AsyncDecode { key, source });
            }
            Some(Ok(notification)) => {
                tracing::debug!(%key, name = notification.name, "async command received");
                match self.notifications.try_send(notification) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(notification)) => {
                        tracing::warn!(
                            key = %notification.key,
                            "notification listener is behind; dropping notification"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::trace!(%key, "no notification listener");
                    }
                }
            }
        }
    }

    async fn expire(&mut self) {
        let expired = self.pending.expire(Instant::now());
        for key in expired {
            tracing::debug!(%key, pending = self.pending.len(), "request deadline passed");
            self.advance(key).await;
        }
    }

    /// Deliver an error to the error stream.
    fn report(&self, err: ZnpError) {
        match self.errors.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(err)) => {
                tracing::warn!(error = %err, "error listener is behind; dropping error");
            }
            Err(mpsc::error::TrySendError::Closed(err)) => {
                tracing::debug!(error = %err, "no error listener");
            }
        }
    }
}

/// Fail a submission that arrived after the actor stopped.
fn reject(command: Command) {
    match command {
        Command::Sync { reply, .. } => {
            let _ = reply.send(Err(ZnpError::Closed));
        }
        Command::Async { done, .. } => {
            let _ = done.send(Err(ZnpError::Closed));
        }
        Command::Cancel(_) | Command::Shutdown => {}
    }
}
