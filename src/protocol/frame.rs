//! Frame struct with typed accessors.
//!
//! A frame is what the transport hands over: command type, subsystem,
//! command id and the raw payload. Uses `bytes::Bytes` so a payload can be
//! shared between the engine and a waiting caller without copying.
//!
//! # Example
//!
//! ```
//! use znp_client::protocol::{CommandType, Frame, Subsystem};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(CommandType::Sreq, Subsystem::Sys, 0x02, Bytes::new());
//! assert_eq!(frame.cmd0(), 0x21);
//! assert_eq!(frame.key().command, 0x02);
//! ```

use std::fmt;

use bytes::Bytes;

use super::wire_format::{
    decode_cmd0, encode_cmd0, error_message, CommandType, Subsystem, GENERIC_ERROR_COMMAND,
    GENERIC_ERROR_SUBSYSTEM,
};
use crate::error::ZnpError;

/// Key that matches a synchronous response to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub subsystem: Subsystem,
    pub command: u8,
}

impl CorrelationKey {
    pub fn new(subsystem: Subsystem, command: u8) -> Self {
        Self { subsystem, command }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:#04x}", self.subsystem, self.command)
    }
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command_type: CommandType,
    pub subsystem: Subsystem,
    pub command: u8,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        command_type: CommandType,
        subsystem: Subsystem,
        command: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            command_type,
            subsystem,
            command,
            payload: payload.into(),
        }
    }

    /// Create a frame from the two wire command bytes.
    pub fn from_cmd0(cmd0: u8, cmd1: u8, payload: impl Into<Bytes>) -> Result<Self, ZnpError> {
        let (command_type, subsystem) = decode_cmd0(cmd0)?;
        Ok(Self::new(command_type, subsystem, cmd1, payload))
    }

    /// First command byte as it appears on the wire.
    #[inline]
    pub fn cmd0(&self) -> u8 {
        encode_cmd0(self.command_type, self.subsystem)
    }

    /// Second command byte as it appears on the wire.
    #[inline]
    pub fn cmd1(&self) -> u8 {
        self.command
    }

    #[inline]
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(self.subsystem, self.command)
    }

    /// Check if this is the generic error response.
    #[inline]
    pub fn is_generic_error(&self) -> bool {
        self.command_type == CommandType::Srsp
            && self.subsystem == GENERIC_ERROR_SUBSYSTEM
            && self.command == GENERIC_ERROR_COMMAND
    }

    /// Translate a generic error response into an error.
    ///
    /// Returns `None` if this is not a generic error frame.
    pub fn protocol_error(&self) -> Option<ZnpError> {
        if !self.is_generic_error() {
            return None;
        }
        let code = self.payload.first().copied().unwrap_or(0);
        Some(ZnpError::Protocol {
            code,
            message: error_message(code),
        })
    }

    /// Key of the request a generic error response rejects.
    ///
    /// The coprocessor echoes the rejected `cmd0`/`cmd1` after the error code;
    /// returns `None` when they are absent or unparseable.
    pub fn rejected_key(&self) -> Option<CorrelationKey> {
        if !self.is_generic_error() || self.payload.len() < 3 {
            return None;
        }
        let (_, subsystem) = decode_cmd0(self.payload[1]).ok()?;
        Some(CorrelationKey::new(subsystem, self.payload[2]))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:#04x} [",
            self.command_type, self.subsystem, self.command
        )?;
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(
            CommandType::Srsp,
            Subsystem::Util,
            0x0A,
            Bytes::from_static(&[0x00]),
        );

        assert_eq!(frame.cmd0(), 0x67);
        assert_eq!(frame.cmd1(), 0x0A);
        assert_eq!(frame.key(), CorrelationKey::new(Subsystem::Util, 0x0A));
        assert_eq!(&frame.payload[..], &[0x00]);
    }

    #[test]
    fn test_frame_from_cmd0() {
        let frame = Frame::from_cmd0(0x41, 0x80, vec![0x00, 0x02]).unwrap();
        assert_eq!(frame.command_type, CommandType::Areq);
        assert_eq!(frame.subsystem, Subsystem::Sys);
        assert_eq!(frame.command, 0x80);
        assert_eq!(frame.payload.len(), 2);

        assert!(Frame::from_cmd0(0x3F, 0x00, Bytes::new()).is_err());
    }

    #[test]
    fn test_generic_error_detection() {
        let err = Frame::new(CommandType::Srsp, Subsystem::Res0, 0x00, vec![0x03]);
        assert!(err.is_generic_error());

        // Same key but not a response.
        let areq = Frame::new(CommandType::Areq, Subsystem::Res0, 0x00, vec![0x03]);
        assert!(!areq.is_generic_error());

        let normal = Frame::new(CommandType::Srsp, Subsystem::Sys, 0x00, vec![0x03]);
        assert!(!normal.is_generic_error());
        assert!(normal.protocol_error().is_none());
    }

    #[test]
    fn test_protocol_error_mapping() {
        let frame = Frame::new(CommandType::Srsp, Subsystem::Res0, 0x00, vec![0x03]);
        match frame.protocol_error() {
            Some(ZnpError::Protocol { code, message }) => {
                assert_eq!(code, 3);
                assert_eq!(message, "Invalid parameter");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let empty = Frame::new(CommandType::Srsp, Subsystem::Res0, 0x00, Bytes::new());
        match empty.protocol_error() {
            Some(ZnpError::Protocol { message, .. }) => assert_eq!(message, "Unknown error"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_rejected_key() {
        let frame = Frame::new(
            CommandType::Srsp,
            Subsystem::Res0,
            0x00,
            vec![0x02, 0x21, 0x55],
        );
        assert_eq!(
            frame.rejected_key(),
            Some(CorrelationKey::new(Subsystem::Sys, 0x55))
        );

        let short = Frame::new(CommandType::Srsp, Subsystem::Res0, 0x00, vec![0x02]);
        assert_eq!(short.rejected_key(), None);
    }

    #[test]
    fn test_display() {
        let frame = Frame::new(CommandType::Sreq, Subsystem::Sys, 0x02, vec![0xAB, 0x01]);
        assert_eq!(frame.to_string(), "SREQ SYS 0x02 [ab 01]");
        assert_eq!(frame.key().to_string(), "SYS/0x02");
    }
}
