//! Registry of unsolicited message types by correlation key.
//!
//! Each registered key maps to a typed decoder. On dispatch the decoder
//! starts from `T::default()`, so every notification owns fresh storage and
//! nothing is shared between two frames of the same kind.
//!
//! # Example
//!
//! ```
//! use znp_client::codec::{FieldSpec, Payload, Schema};
//! use znp_client::lens;
//! use znp_client::protocol::{CommandType, Frame, Subsystem};
//! use znp_client::registry::AsyncRegistry;
//!
//! #[derive(Debug, Default)]
//! struct StateChange {
//!     state: u8,
//! }
//!
//! impl Payload for StateChange {
//!     fn schema() -> Schema<Self> {
//!         Schema::new().field(FieldSpec::uint(lens!(StateChange, state)))
//!     }
//! }
//!
//! let mut registry = AsyncRegistry::new();
//! registry.register::<StateChange>(Subsystem::Zdo, 0xC0).unwrap();
//!
//! let frame = Frame::new(CommandType::Areq, Subsystem::Zdo, 0xC0, vec![0x09]);
//! let notification = registry.decode(&frame).unwrap().unwrap();
//! assert_eq!(notification.downcast_ref::<StateChange>().unwrap().state, 9);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::codec::{Payload, PayloadCodec};
use crate::error::{ConfigError, PayloadError};
use crate::protocol::{CorrelationKey, Frame, Subsystem};

/// A decoded unsolicited message of any registered type.
pub trait Message: Any + Send + fmt::Debug {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    /// One-line diagnostic rendering.
    fn render(&self) -> String;
}

impl<T: Payload + fmt::Debug> Message for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn render(&self) -> String {
        PayloadCodec::render(self)
    }
}

/// An unsolicited frame decoded into its registered type.
pub struct Notification {
    pub key: CorrelationKey,
    /// Record type name of the message.
    pub name: &'static str,
    message: Box<dyn Message>,
}

impl Notification {
    /// Check if the message is a `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.message.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.message.as_any().downcast_ref::<T>()
    }

    /// Take the message out as a `T`.
    pub fn downcast<T: Message>(self) -> Option<T> {
        self.message.into_any().downcast::<T>().ok().map(|message| *message)
    }

    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    pub fn render(&self) -> String {
        self.message.render()
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("message", &self.message)
            .finish()
    }
}

/// Decodes a payload into a boxed message.
trait Decoder: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn decode(&self, payload: &[u8]) -> Result<Box<dyn Message>, PayloadError>;
}

/// Decoder for a concrete record type.
struct TypedDecoder<T> {
    name: &'static str,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Payload + fmt::Debug> Decoder for TypedDecoder<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn decode(&self, payload: &[u8]) -> Result<Box<dyn Message>, PayloadError> {
        let message: T = PayloadCodec::decode(payload)?;
        Ok(Box::new(message))
    }
}

/// Mapping from correlation key to unsolicited message type.
#[derive(Default)]
pub struct AsyncRegistry {
    decoders: HashMap<CorrelationKey, Box<dyn Decoder>>,
}

impl AsyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as the message sent unsolicited on `(subsystem, command)`.
    ///
    /// The type's schema is resolved here, so a broken definition fails at
    /// registration rather than on the first frame. Registering a key again
    /// replaces the earlier type.
    pub fn register<T: Payload + fmt::Debug>(
        &mut self,
        subsystem: Subsystem,
        command: u8,
    ) -> Result<(), ConfigError> {
        let plan = PayloadCodec::plan::<T>()?;
        let key = CorrelationKey::new(subsystem, command);
        let decoder = TypedDecoder::<T> {
            name: plan.name(),
            _phantom: PhantomData,
        };
        if self.decoders.insert(key, Box::new(decoder)).is_some() {
            tracing::debug!(%key, "replaced async message type");
        }
        Ok(())
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.decoders.contains_key(key)
    }

    /// Record type name registered for `key`.
    pub fn name(&self, key: &CorrelationKey) -> Option<&'static str> {
        self.decoders.get(key).map(|decoder| decoder.name())
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode an unsolicited frame.
    ///
    /// Returns `None` if its key is not registered.
    pub fn decode(&self, frame: &Frame) -> Option<Result<Notification, PayloadError>> {
        let key = frame.key();
        let decoder = self.decoders.get(&key)?;
        Some(decoder.decode(&frame.payload).map(|message| Notification {
            key,
            name: decoder.name(),
            message,
        }))
    }
}

impl fmt::Debug for AsyncRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.decoders
                    .iter()
                    .map(|(key, decoder)| (key.to_string(), decoder.name())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FieldSpec, Schema};
    use crate::error::ConfigErrorKind;
    use crate::lens;
    use crate::protocol::CommandType;

    #[derive(Debug, Default, PartialEq)]
    struct Indication {
        reason: u8,
        version: u16,
    }

    impl Payload for Indication {
        fn schema() -> Schema<Self> {
            Schema::new()
                .field(FieldSpec::uint(lens!(Indication, reason)))
                .field(FieldSpec::uint(lens!(Indication, version)).hex())
        }
    }

    #[derive(Debug, Default)]
    struct Other {
        value: u8,
    }

    impl Payload for Other {
        fn schema() -> Schema<Self> {
            Schema::new().field(FieldSpec::uint(lens!(Other, value)))
        }
    }

    #[derive(Debug, Default)]
    struct Invalid {
        value: u8,
    }

    impl Payload for Invalid {
        fn schema() -> Schema<Self> {
            Schema::new().field(FieldSpec::uint(lens!(Invalid, value)).size(5))
        }
    }

    #[derive(Debug, Default)]
    struct BadFlags {
        value: u8,
    }

    impl Payload for BadFlags {
        fn schema() -> Schema<Self> {
            Schema::new().field(FieldSpec::uint(lens!(BadFlags, value)).bitmask("zz"))
        }
    }

    #[derive(Debug, Default)]
    struct Wrapper {
        inner: BadFlags,
    }

    impl Payload for Wrapper {
        fn schema() -> Schema<Self> {
            Schema::new().field(FieldSpec::record(lens!(Wrapper, inner)))
        }
    }

    fn areq(command: u8, payload: Vec<u8>) -> Frame {
        Frame::new(CommandType::Areq, Subsystem::Sys, command, payload)
    }

    #[test]
    fn test_register_and_decode() {
        let mut registry = AsyncRegistry::new();
        registry.register::<Indication>(Subsystem::Sys, 0x80).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.name(&CorrelationKey::new(Subsystem::Sys, 0x80)),
            Some("Indication")
        );

        let notification = registry
            .decode(&areq(0x80, vec![0x02, 0x34, 0x12]))
            .unwrap()
            .unwrap();
        assert_eq!(notification.name, "Indication");
        assert!(notification.is::<Indication>());
        assert!(!notification.is::<Other>());
        assert_eq!(
            notification.render(),
            "Indication { reason: 2, version: 0x1234 }"
        );
        assert_eq!(
            notification.downcast::<Indication>().unwrap(),
            Indication {
                reason: 2,
                version: 0x1234
            }
        );
    }

    #[test]
    fn test_each_decode_gets_fresh_value() {
        let mut registry = AsyncRegistry::new();
        registry.register::<Indication>(Subsystem::Sys, 0x80).unwrap();

        let first = registry.decode(&areq(0x80, vec![1, 0, 0])).unwrap().unwrap();
        let second = registry.decode(&areq(0x80, vec![2, 0, 0])).unwrap().unwrap();

        assert_eq!(first.downcast_ref::<Indication>().unwrap().reason, 1);
        assert_eq!(second.downcast_ref::<Indication>().unwrap().reason, 2);
    }

    #[test]
    fn test_unregistered_key() {
        let mut registry = AsyncRegistry::new();
        registry.register::<Indication>(Subsystem::Sys, 0x80).unwrap();
        assert!(registry.decode(&areq(0x81, vec![])).is_none());
    }

    #[test]
    fn test_decode_failure() {
        let mut registry = AsyncRegistry::new();
        registry.register::<Indication>(Subsystem::Sys, 0x80).unwrap();
        let result = registry.decode(&areq(0x80, vec![0x01])).unwrap();
        assert!(matches!(result, Err(PayloadError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_downcast_wrong_type() {
        let mut registry = AsyncRegistry::new();
        registry.register::<Other>(Subsystem::Sys, 0x80).unwrap();
        let notification = registry.decode(&areq(0x80, vec![7])).unwrap().unwrap();

        assert!(notification.downcast_ref::<Indication>().is_none());
        assert_eq!(notification.downcast_ref::<Other>().unwrap().value, 7);
        assert!(notification.downcast::<Indication>().is_none());
    }

    #[test]
    fn test_invalid_schema_rejected_at_registration() {
        let mut registry = AsyncRegistry::new();
        let err = registry.register::<Invalid>(Subsystem::Sys, 0x80).unwrap_err();
        assert_eq!(err.field, "value");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_nested_invalid_schema_rejected_at_registration() {
        let mut registry = AsyncRegistry::new();
        let err = registry.register::<Wrapper>(Subsystem::Sys, 0x80).unwrap_err();
        assert_eq!(err.record, "BadFlags");
        assert_eq!(err.field, "value");
        assert_eq!(err.kind, ConfigErrorKind::MalformedMask("zz".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = AsyncRegistry::new();
        registry.register::<Indication>(Subsystem::Sys, 0x80).unwrap();
        registry.register::<Other>(Subsystem::Sys, 0x80).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.name(&CorrelationKey::new(Subsystem::Sys, 0x80)),
            Some("Other")
        );
    }
}
