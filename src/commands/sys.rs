//! SYS subsystem: reset, ping, version and the reset indication.

use crate::client::{Client, ClientBuilder};
use crate::codec::{FieldSpec, Payload, Schema};
use crate::error::Result;
use crate::lens;
use crate::protocol::Subsystem;

/// `SYS_RESET_REQ` (AREQ).
pub const RESET_REQ: u8 = 0x00;
/// `SYS_PING` (SREQ).
pub const PING: u8 = 0x01;
/// `SYS_VERSION` (SREQ).
pub const VERSION: u8 = 0x02;
/// `SYS_RESET_IND` (AREQ from the coprocessor).
pub const RESET_IND: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetType {
    Hard = 0,
    Soft = 1,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    pub reset_type: u8,
}

impl Payload for ResetRequest {
    fn schema() -> Schema<Self> {
        Schema::new().field(FieldSpec::uint(lens!(ResetRequest, reset_type)))
    }
}

/// Subsystems the coprocessor firmware was built with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub sys: bool,
    pub mac: bool,
    pub nwk: bool,
    pub af: bool,
    pub zdo: bool,
    pub sapi: bool,
    pub util: bool,
    pub debug: bool,
    pub app: bool,
    pub zoad: bool,
}

impl Payload for Capabilities {
    fn schema() -> Schema<Self> {
        // One little-endian u16 bitfield.
        let flag = |spec: FieldSpec<Self>, mask| spec.size(2).bitmask(mask);
        Schema::new()
            .field(flag(FieldSpec::uint(lens!(Capabilities, sys)), "0x0001"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, mac)), "0x0002"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, nwk)), "0x0004"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, af)), "0x0008"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, zdo)), "0x0010"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, sapi)), "0x0020"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, util)), "0x0040"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, debug)), "0x0080"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, app)), "0x0100"))
            .field(flag(FieldSpec::uint(lens!(Capabilities, zoad)), "0x1000"))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PingResponse {
    pub capabilities: Capabilities,
}

impl Payload for PingResponse {
    fn schema() -> Schema<Self> {
        Schema::new().field(FieldSpec::record(lens!(PingResponse, capabilities)))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VersionResponse {
    pub transport_rev: u8,
    pub product: u8,
    pub major_rel: u8,
    pub minor_rel: u8,
    pub maint_rel: u8,
}

impl Payload for VersionResponse {
    fn schema() -> Schema<Self> {
        Schema::new()
            .field(FieldSpec::uint(lens!(VersionResponse, transport_rev)))
            .field(FieldSpec::uint(lens!(VersionResponse, product)))
            .field(FieldSpec::uint(lens!(VersionResponse, major_rel)))
            .field(FieldSpec::uint(lens!(VersionResponse, minor_rel)))
            .field(FieldSpec::uint(lens!(VersionResponse, maint_rel)))
    }
}

/// Sent by the coprocessor after it has reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResetIndication {
    pub reason: u8,
    pub transport_rev: u8,
    pub product_id: u8,
    pub major_rel: u8,
    pub minor_rel: u8,
    pub hw_rev: u8,
}

impl Payload for ResetIndication {
    fn schema() -> Schema<Self> {
        Schema::new()
            .field(FieldSpec::uint(lens!(ResetIndication, reason)).hex())
            .field(FieldSpec::uint(lens!(ResetIndication, transport_rev)))
            .field(FieldSpec::uint(lens!(ResetIndication, product_id)))
            .field(FieldSpec::uint(lens!(ResetIndication, major_rel)))
            .field(FieldSpec::uint(lens!(ResetIndication, minor_rel)))
            .field(FieldSpec::uint(lens!(ResetIndication, hw_rev)))
    }
}

impl ClientBuilder {
    /// Register the SYS unsolicited messages ([`ResetIndication`]).
    pub fn with_system_notifications(self) -> Self {
        self.register_async::<ResetIndication>(Subsystem::Sys, RESET_IND)
    }
}

impl Client {
    /// Reset the coprocessor. No response; watch for [`ResetIndication`].
    pub async fn reset(&self, reset_type: ResetType) -> Result<()> {
        let request = ResetRequest {
            reset_type: reset_type as u8,
        };
        self.send_async(Subsystem::Sys, RESET_REQ, &request).await
    }

    /// Check the coprocessor is alive and list its capabilities.
    pub async fn ping(&self) -> Result<PingResponse> {
        self.request(Subsystem::Sys, PING, &()).await
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        self.request(Subsystem::Sys, VERSION, &()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PayloadCodec;

    #[test]
    fn test_capabilities_bitfield() {
        let decoded: PingResponse = PayloadCodec::decode(&[0x79, 0x01]).unwrap();
        let caps = decoded.capabilities;
        assert!(caps.sys && caps.af && caps.zdo && caps.sapi && caps.util && caps.app);
        assert!(!caps.mac && !caps.nwk && !caps.debug && !caps.zoad);

        let encoded = PayloadCodec::encode(&decoded).unwrap();
        assert_eq!(&encoded[..], &[0x79, 0x01]);
    }

    #[test]
    fn test_zoad_flag_in_high_byte() {
        let caps = Capabilities {
            zoad: true,
            ..Default::default()
        };
        assert_eq!(&PayloadCodec::encode(&caps).unwrap()[..], &[0x00, 0x10]);
    }

    #[test]
    fn test_reset_indication_render() {
        let indication: ResetIndication = PayloadCodec::decode(&[0x02, 2, 1, 2, 7, 0]).unwrap();
        assert_eq!(indication.reason, 2);
        assert_eq!(indication.product_id, 1);
        assert_eq!(
            PayloadCodec::render(&indication),
            "ResetIndication { reason: 0x02, transport_rev: 2, product_id: 1, \
             major_rel: 2, minor_rel: 7, hw_rev: 0 }"
        );
    }

    #[test]
    fn test_reset_request_encoding() {
        let request = ResetRequest {
            reset_type: ResetType::Soft as u8,
        };
        assert_eq!(&PayloadCodec::encode(&request).unwrap()[..], &[0x01]);
    }
}
