//! Codec module - tag-driven binary payload encoding/decoding.
//!
//! Records describe their layout with a [`Schema`]: fields in wire order,
//! each carrying optional annotations (see [`tags`]). A schema is resolved
//! once per type into a [`Plan`], then reused for every encode and decode.
//!
//! # Design
//!
//! The codec is a marker struct with static methods rather than a trait
//! object. Plans are cached process-wide, keyed by `TypeId`; the cache is
//! read-mostly so lookups take a shared lock.
//!
//! # Example
//!
//! ```
//! use znp_client::codec::{FieldSpec, Payload, PayloadCodec, Schema};
//! use znp_client::lens;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Led {
//!     led_id: u8,
//!     mode: u8,
//! }
//!
//! impl Payload for Led {
//!     fn schema() -> Schema<Self> {
//!         Schema::new()
//!             .field(FieldSpec::uint(lens!(Led, led_id)))
//!             .field(FieldSpec::uint(lens!(Led, mode)))
//!     }
//! }
//!
//! let encoded = PayloadCodec::encode(&Led { led_id: 1, mode: 0 }).unwrap();
//! assert_eq!(&encoded[..], &[1, 0]);
//!
//! let decoded: Led = PayloadCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, Led { led_id: 1, mode: 0 });
//! assert_eq!(PayloadCodec::render(&decoded), "Led { led_id: 1, mode: 0 }");
//! ```

mod plan;
mod schema;
pub mod tags;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use bytes::Bytes;

use crate::error::{ConfigError, PayloadError};

pub use plan::Plan;
pub use schema::{FieldSpec, Lens, Payload, Schema, Uint};
pub use tags::{ByteOrder, Tags};

type PlanCache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn cache() -> &'static PlanCache {
    static CACHE: OnceLock<PlanCache> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Codec for [`Payload`] records.
pub struct PayloadCodec;

impl PayloadCodec {
    /// Resolved plan for `T`, built on first use.
    ///
    /// # Errors
    ///
    /// Returns the configuration error if `T`'s schema is invalid. Invalid
    /// schemas are not cached, so every use reports the same error.
    pub fn plan<T: Payload>() -> Result<Arc<Plan<T>>, ConfigError> {
        let id = TypeId::of::<T>();
        let cached = cache()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        if let Some(plan) = cached.and_then(|any| any.downcast::<Plan<T>>().ok()) {
            return Ok(plan);
        }

        let plan = Arc::new(Plan::resolve(T::schema())?);
        let mut cache = cache().write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race; keep the first plan.
        let entry = cache
            .entry(id)
            .or_insert_with(|| plan.clone() as Arc<dyn Any + Send + Sync>)
            .clone();
        Ok(entry.downcast::<Plan<T>>().unwrap_or(plan))
    }

    /// Encode a record to bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the record's schema (or a nested one) is invalid.
    pub fn encode<T: Payload>(record: &T) -> Result<Bytes, PayloadError> {
        let mut out = Vec::new();
        Self::encode_into(record, &mut out)?;
        Ok(Bytes::from(out))
    }

    /// Append the encoding of a record to `out`.
    pub fn encode_into<T: Payload>(record: &T, out: &mut Vec<u8>) -> Result<(), PayloadError> {
        Self::plan::<T>()?.encode_into(record, out)
    }

    /// Decode a record from the start of `buf`. Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the schema is invalid or `buf` is too short.
    pub fn decode<T: Payload>(buf: &[u8]) -> Result<T, PayloadError> {
        let mut record = T::default();
        Self::decode_into(buf, &mut record)?;
        Ok(record)
    }

    /// Decode into an existing record, returning the bytes consumed.
    pub fn decode_into<T: Payload>(buf: &[u8], record: &mut T) -> Result<usize, PayloadError> {
        Self::plan::<T>()?.decode_into(buf, record)
    }

    /// One-line diagnostic rendering of a record.
    ///
    /// Falls back to the bare type name if the schema is invalid.
    pub fn render<T: Payload>(record: &T) -> String {
        match Self::plan::<T>() {
            Ok(plan) => plan.render(record),
            Err(err) => format!("<{}: {}>", err.record, err.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigErrorKind;
    use crate::lens;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Endpoint {
        id: u8,
        profile: u16,
    }

    impl Payload for Endpoint {
        fn schema() -> Schema<Self> {
            Schema::new()
                .field(FieldSpec::uint(lens!(Endpoint, id)))
                .field(FieldSpec::uint(lens!(Endpoint, profile)).hex())
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Device {
        ieee: [u8; 8],
        primary: Endpoint,
        count: u8,
        endpoints: Vec<Endpoint>,
        extra: Option<Endpoint>,
    }

    impl Payload for Device {
        fn schema() -> Schema<Self> {
            Schema::new()
                .field(FieldSpec::bytes(lens!(Device, ieee)).hex())
                .field(FieldSpec::record(lens!(Device, primary)))
                .field(FieldSpec::uint(lens!(Device, count)))
                .field(FieldSpec::records(lens!(Device, endpoints)).bound("count"))
                .field(FieldSpec::optional(lens!(Device, extra)))
        }
    }

    #[derive(Debug, Default)]
    struct Broken {
        flags: u8,
    }

    impl Payload for Broken {
        fn schema() -> Schema<Self> {
            Schema::new().field(FieldSpec::uint(lens!(Broken, flags)).bitmask("0x00"))
        }
    }

    #[derive(Debug, Default)]
    struct Holder {
        inner: Option<Broken>,
    }

    impl Payload for Holder {
        fn schema() -> Schema<Self> {
            Schema::new().field(FieldSpec::optional(lens!(Holder, inner)))
        }
    }

    #[derive(Debug, Default)]
    struct Marker;

    impl Payload for Marker {
        fn schema() -> Schema<Self> {
            Schema::new()
        }
    }

    #[derive(Debug, Default)]
    struct Markers {
        count: u32,
        items: Vec<Marker>,
    }

    impl Payload for Markers {
        fn schema() -> Schema<Self> {
            Schema::new()
                .field(FieldSpec::uint(lens!(Markers, count)))
                .field(FieldSpec::records(lens!(Markers, items)).bound("count"))
        }
    }

    fn device() -> Device {
        Device {
            ieee: [1, 2, 3, 4, 5, 6, 7, 8],
            primary: Endpoint {
                id: 1,
                profile: 0x0104,
            },
            count: 2,
            endpoints: vec![
                Endpoint {
                    id: 2,
                    profile: 0xC05E,
                },
                Endpoint {
                    id: 3,
                    profile: 0x0104,
                },
            ],
            extra: None,
        }
    }

    #[test]
    fn test_nested_records() {
        let original = device();
        let encoded = PayloadCodec::encode(&original).unwrap();
        assert_eq!(encoded.len(), 8 + 3 + 1 + 6);
        assert_eq!(&encoded[8..11], &[0x01, 0x04, 0x01]);

        let decoded: Device = PayloadCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_optional_present_when_bytes_remain() {
        let mut original = device();
        original.extra = Some(Endpoint {
            id: 9,
            profile: 0x0001,
        });
        let encoded = PayloadCodec::encode(&original).unwrap();
        assert_eq!(&encoded[encoded.len() - 3..], &[9, 0x01, 0x00]);

        let decoded: Device = PayloadCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.extra, original.extra);
    }

    #[test]
    fn test_decode_into_reports_consumed() {
        let encoded = PayloadCodec::encode(&Endpoint {
            id: 7,
            profile: 0x0203,
        })
        .unwrap();
        let mut buf = encoded.to_vec();
        buf.extend_from_slice(&[0xFF, 0xFF]);

        let mut record = Endpoint::default();
        let consumed = PayloadCodec::decode_into(&buf, &mut record).unwrap();
        assert_eq!(consumed, 3);
        assert_eq!(record.profile, 0x0203);
    }

    #[test]
    fn test_short_buffer() {
        let err = PayloadCodec::decode::<Endpoint>(&[0x01, 0x02]).unwrap_err();
        assert_eq!(
            err,
            PayloadError::UnexpectedEof {
                needed: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn test_plan_is_cached() {
        let first = PayloadCodec::plan::<Endpoint>().unwrap();
        let second = PayloadCodec::plan::<Endpoint>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_config_error_surfaces() {
        match PayloadCodec::encode(&Broken::default()) {
            Err(PayloadError::Config(err)) => assert_eq!(err.kind, ConfigErrorKind::ZeroMask),
            other => panic!("unexpected: {other:?}"),
        }
        // Still reported on the second use.
        assert!(PayloadCodec::decode::<Broken>(&[0]).is_err());
        assert!(PayloadCodec::render(&Broken::default()).starts_with("<Broken"));
    }

    #[test]
    fn test_nested_config_error_found_on_resolve() {
        // None never reaches the nested codec, but the plan still fails.
        match PayloadCodec::plan::<Holder>() {
            Err(err) => {
                assert_eq!(err.record, "Broken");
                assert_eq!(err.kind, ConfigErrorKind::ZeroMask);
            }
            Ok(_) => panic!("nested schema error went unnoticed"),
        }
        assert!(PayloadCodec::encode(&Holder::default()).is_err());
    }

    #[test]
    fn test_zero_width_elements_stop_huge_count() {
        let err = PayloadCodec::decode::<Markers>(&[0xFF; 4]).unwrap_err();
        assert_eq!(
            err,
            PayloadError::UnexpectedEof {
                needed: 1,
                remaining: 0
            }
        );
    }

    #[test]
    fn test_zero_count_of_zero_width_elements() {
        let decoded: Markers = PayloadCodec::decode(&[0, 0, 0, 0]).unwrap();
        assert!(decoded.items.is_empty());
    }

    #[test]
    fn test_render_nested() {
        let rendered = PayloadCodec::render(&device());
        assert_eq!(
            rendered,
            "Device { ieee: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08], \
             primary: Endpoint { id: 1, profile: 0x0104 }, count: 2, \
             endpoints: [Endpoint { id: 2, profile: 0xc05e }, Endpoint { id: 3, profile: 0x0104 }], \
             extra: None }"
        );
    }

    #[test]
    fn test_empty_payload() {
        let encoded = PayloadCodec::encode(&()).unwrap();
        assert!(encoded.is_empty());
        PayloadCodec::decode::<()>(&[]).unwrap();
        assert_eq!(PayloadCodec::render(&()), "() {}");
    }
}
