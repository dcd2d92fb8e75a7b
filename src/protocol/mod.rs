//! Protocol module - frame model and wire identifiers.
//!
//! This module describes frames at the boundary with the transport:
//! - command type and subsystem enumerations, `cmd0` packing
//! - the generic error response and its code table
//! - the correlation key used to match responses to requests

mod frame;
mod wire_format;

pub use frame::{CorrelationKey, Frame};
pub use wire_format::{
    decode_cmd0, encode_cmd0, error_code, error_message, CommandType, Subsystem,
    COMMAND_TYPE_SHIFT, GENERIC_ERROR_COMMAND, GENERIC_ERROR_SUBSYSTEM, SUBSYSTEM_MASK,
};
