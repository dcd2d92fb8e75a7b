//! Wire-level identifiers of the monitor-and-test command set.
//!
//! Every frame carries two command bytes:
//! ```text
//! ┌──────────────────────┬──────────┐
//! │ cmd0                 │ cmd1     │
//! │ type:3 | subsystem:5 │ command  │
//! └──────────────────────┴──────────┘
//! ```
//!
//! These values are a fixed contract with the coprocessor firmware.

use std::fmt;

use crate::error::ZnpError;

/// Bits of `cmd0` holding the subsystem.
pub const SUBSYSTEM_MASK: u8 = 0x1F;

/// Shift of the command type within `cmd0`.
pub const COMMAND_TYPE_SHIFT: u8 = 5;

/// Subsystem of the generic error response.
pub const GENERIC_ERROR_SUBSYSTEM: Subsystem = Subsystem::Res0;

/// Command id of the generic error response.
pub const GENERIC_ERROR_COMMAND: u8 = 0x00;

/// Error codes carried by the generic error response.
pub mod error_code {
    pub const INVALID_SUBSYSTEM: u8 = 0x01;
    pub const INVALID_COMMAND_ID: u8 = 0x02;
    pub const INVALID_PARAMETER: u8 = 0x03;
    pub const INVALID_LENGTH: u8 = 0x04;
}

/// Map a generic error code to its message.
pub fn error_message(code: u8) -> &'static str {
    match code {
        error_code::INVALID_SUBSYSTEM => "Invalid subsystem",
        error_code::INVALID_COMMAND_ID => "Invalid command ID",
        error_code::INVALID_PARAMETER => "Invalid parameter",
        error_code::INVALID_LENGTH => "Invalid length",
        _ => "Unknown error",
    }
}

/// Frame direction/type (top 3 bits of `cmd0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandType {
    Poll = 0,
    /// Synchronous request.
    Sreq = 1,
    /// Asynchronous request, or an unsolicited notification from the device.
    Areq = 2,
    /// Synchronous response.
    Srsp = 3,
}

impl TryFrom<u8> for CommandType {
    type Error = ZnpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Poll),
            1 => Ok(Self::Sreq),
            2 => Ok(Self::Areq),
            3 => Ok(Self::Srsp),
            other => Err(ZnpError::InvalidFrame(format!("unknown command type {other}"))),
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Poll => "POLL",
            Self::Sreq => "SREQ",
            Self::Areq => "AREQ",
            Self::Srsp => "SRSP",
        })
    }
}

/// Functional grouping of commands (low 5 bits of `cmd0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Subsystem {
    Res0 = 0,
    Sys = 1,
    Mac = 2,
    Nwk = 3,
    Af = 4,
    Zdo = 5,
    Sapi = 6,
    Util = 7,
    Debug = 8,
    App = 9,
    AppCnf = 15,
    GreenPower = 21,
}

impl TryFrom<u8> for Subsystem {
    type Error = ZnpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Res0,
            1 => Self::Sys,
            2 => Self::Mac,
            3 => Self::Nwk,
            4 => Self::Af,
            5 => Self::Zdo,
            6 => Self::Sapi,
            7 => Self::Util,
            8 => Self::Debug,
            9 => Self::App,
            15 => Self::AppCnf,
            21 => Self::GreenPower,
            other => {
                return Err(ZnpError::InvalidFrame(format!("unknown subsystem {other}")));
            }
        })
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Res0 => "RES0",
            Self::Sys => "SYS",
            Self::Mac => "MAC",
            Self::Nwk => "NWK",
            Self::Af => "AF",
            Self::Zdo => "ZDO",
            Self::Sapi => "SAPI",
            Self::Util => "UTIL",
            Self::Debug => "DEBUG",
            Self::App => "APP",
            Self::AppCnf => "APP_CNF",
            Self::GreenPower => "GREENPOWER",
        })
    }
}

/// Pack a command type and subsystem into `cmd0`.
#[inline]
pub fn encode_cmd0(command_type: CommandType, subsystem: Subsystem) -> u8 {
    ((command_type as u8) << COMMAND_TYPE_SHIFT) | (subsystem as u8 & SUBSYSTEM_MASK)
}

/// Split `cmd0` into command type and subsystem.
pub fn decode_cmd0(cmd0: u8) -> Result<(CommandType, Subsystem), ZnpError> {
    let command_type = CommandType::try_from(cmd0 >> COMMAND_TYPE_SHIFT)?;
    let subsystem = Subsystem::try_from(cmd0 & SUBSYSTEM_MASK)?;
    Ok((command_type, subsystem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd0_packing() {
        assert_eq!(encode_cmd0(CommandType::Sreq, Subsystem::Sys), 0x21);
        assert_eq!(encode_cmd0(CommandType::Areq, Subsystem::Sys), 0x41);
        assert_eq!(encode_cmd0(CommandType::Srsp, Subsystem::Util), 0x67);
        assert_eq!(encode_cmd0(CommandType::Srsp, Subsystem::Res0), 0x60);
    }

    #[test]
    fn test_cmd0_unpacking() {
        assert_eq!(
            decode_cmd0(0x61).unwrap(),
            (CommandType::Srsp, Subsystem::Sys)
        );
        assert_eq!(
            decode_cmd0(0x45).unwrap(),
            (CommandType::Areq, Subsystem::Zdo)
        );
    }

    #[test]
    fn test_cmd0_unknown_values() {
        // Type 4 does not exist.
        assert!(decode_cmd0(0x81).is_err());
        // Subsystem 10 does not exist.
        assert!(decode_cmd0(0x2A).is_err());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(error_message(1), "Invalid subsystem");
        assert_eq!(error_message(2), "Invalid command ID");
        assert_eq!(error_message(3), "Invalid parameter");
        assert_eq!(error_message(4), "Invalid length");
        assert_eq!(error_message(0), "Unknown error");
        assert_eq!(error_message(0xFF), "Unknown error");
    }

    #[test]
    fn test_display() {
        assert_eq!(Subsystem::Util.to_string(), "UTIL");
        assert_eq!(CommandType::Srsp.to_string(), "SRSP");
    }
}
