//! UTIL subsystem.

use crate::client::Client;
use crate::codec::{FieldSpec, Payload, Schema};
use crate::error::Result;
use crate::lens;
use crate::protocol::Subsystem;

/// `UTIL_LED_CONTROL` (SREQ).
pub const LED_CONTROL: u8 = 0x0A;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedControlRequest {
    pub led_id: u8,
    pub mode: u8,
}

impl Payload for LedControlRequest {
    fn schema() -> Schema<Self> {
        Schema::new()
            .field(FieldSpec::uint(lens!(LedControlRequest, led_id)))
            .field(FieldSpec::uint(lens!(LedControlRequest, mode)))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LedControlResponse {
    /// 0 on success.
    pub status: u8,
}

impl Payload for LedControlResponse {
    fn schema() -> Schema<Self> {
        Schema::new().field(FieldSpec::uint(lens!(LedControlResponse, status)).hex())
    }
}

impl Client {
    /// Switch an LED on the coprocessor board.
    pub async fn led_control(&self, led_id: u8, mode: u8) -> Result<LedControlResponse> {
        let request = LedControlRequest { led_id, mode };
        self.request(Subsystem::Util, LED_CONTROL, &request).await
    }
}
