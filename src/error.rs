//! Error types for znp-client.
//!
//! Each layer has its own enum:
//! - [`ConfigError`] - a record's field annotations cannot be resolved into a plan
//! - [`PayloadError`] - encoding/decoding a payload failed
//! - [`TransportError`] - the frame transport failed
//! - [`ZnpError`] - everything a caller of the client can observe

use std::fmt;

use thiserror::Error;

use crate::protocol::{CommandType, CorrelationKey, Frame, Subsystem};

/// A record definition that cannot be turned into a codec plan.
///
/// This is a programmer error in the record's schema, never a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid payload definition {record}.{field}: {kind}")]
pub struct ConfigError {
    /// Record type name.
    pub record: &'static str,
    /// Field name within the record.
    pub field: &'static str,
    /// What is wrong with the field.
    pub kind: ConfigErrorKind,
}

/// Reason a field annotation was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// Bitmask literal without `0x`/`0b` prefix or with invalid digits.
    MalformedMask(String),
    /// Bitmask selecting no bits.
    ZeroMask,
    /// Bitmask has bits outside the storage width.
    MaskTooWide { mask: u64, width: usize },
    /// `bits` is zero or larger than the storage width.
    InvalidBits(usize),
    /// `bits` disagrees with the number of bits selected by the mask.
    BitsMismatch { bits: usize, mask: u64 },
    /// `size` is not one of 1, 2, 4 or 8.
    UnsupportedSize(usize),
    /// `bound` names a field that does not exist.
    UnknownBound(String),
    /// `bound` names a field declared after the sequence.
    BoundNotBefore(String),
    /// `bound` names a field that is not an unsigned integer.
    BoundNotInteger(String),
    /// Sequence without a `bound` annotation.
    MissingBound,
    /// Annotation that this field kind cannot carry.
    UnsupportedTag(&'static str),
    /// Two fields share a name.
    DuplicateField,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMask(literal) => write!(f, "malformed bitmask literal {literal:?}"),
            Self::ZeroMask => f.write_str("bitmask selects no bits"),
            Self::MaskTooWide { mask, width } => {
                write!(f, "bitmask {mask:#x} does not fit in {width} byte(s)")
            }
            Self::InvalidBits(bits) => write!(f, "invalid bit width {bits}"),
            Self::BitsMismatch { bits, mask } => {
                write!(f, "bit width {bits} does not match bitmask {mask:#x}")
            }
            Self::UnsupportedSize(size) => write!(f, "unsupported size {size}"),
            Self::UnknownBound(name) => write!(f, "bound field {name:?} does not exist"),
            Self::BoundNotBefore(name) => {
                write!(f, "bound field {name:?} must be declared before the sequence")
            }
            Self::BoundNotInteger(name) => {
                write!(f, "bound field {name:?} is not an unsigned integer")
            }
            Self::MissingBound => f.write_str("sequence has no bound field"),
            Self::UnsupportedTag(tag) => write!(f, "{tag:?} is not supported on this field"),
            Self::DuplicateField => f.write_str("duplicate field name"),
        }
    }
}

/// Payload encoding/decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The record definition is broken.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The buffer ended before the record was complete.
    #[error("unexpected end of payload: needed {needed} byte(s), {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
}

/// Failures reported by a frame transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error on the underlying link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link delivered bytes that do not form a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The link is gone; no further frames will be read or written.
    #[error("transport closed")]
    Closed,
}

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ZnpError {
    /// Payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No response arrived before the request deadline.
    #[error("timed out while waiting response for command: {command:#04x} sent to subsystem: {subsystem}")]
    Timeout { subsystem: Subsystem, command: u8 },

    /// The coprocessor rejected the request with a generic error frame.
    #[error("{message} (error code {code:#04x})")]
    Protocol { code: u8, message: &'static str },

    /// A synchronous response matched no pending request.
    #[error("unknown response received: {0}")]
    UnknownResponse(Frame),

    /// An unsolicited frame whose key is not registered.
    #[error("unknown async command received: {0}")]
    UnknownAsyncCommand(Frame),

    /// A registered unsolicited frame whose payload failed to decode.
    #[error("failed to decode async command {key}: {source}")]
    AsyncDecode {
        key: CorrelationKey,
        #[source]
        source: PayloadError,
    },

    /// An inbound frame of a type the host never receives.
    #[error("unexpected frame received: {0}")]
    UnexpectedFrame(Frame),

    /// Frame header fields that do not map onto the protocol.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Request submitted with a command type the host cannot send.
    #[error("unsupported command type: {0}")]
    UnsupportedCommandType(CommandType),

    /// The engine has shut down.
    #[error("client closed")]
    Closed,
}

/// Result type alias using ZnpError.
pub type Result<T> = std::result::Result<T, ZnpError>;
