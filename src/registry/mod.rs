//! Registry module - bookkeeping owned by the dispatch actor.
//!
//! Provides:
//! - [`AsyncRegistry`] - maps correlation keys to unsolicited message types
//! - [`PendingRegistry`] - tracks in-flight synchronous requests and their deadlines

mod async_registry;
mod pending;

pub use async_registry::{AsyncRegistry, Message, Notification};
pub use pending::{PendingRegistry, Queued, Reply, RequestId};
