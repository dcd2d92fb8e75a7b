//! Record schemas: typed field descriptors with annotations.
//!
//! A record describes its wire layout by listing its fields in wire order.
//! Each field is reached through a [`Lens`] (a pair of accessor functions)
//! so the codec never inspects types at runtime.
//!
//! # Example
//!
//! ```
//! use znp_client::codec::{FieldSpec, Payload, PayloadCodec, Schema};
//! use znp_client::lens;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Status {
//!     pan_id: u16,
//!     low: u8,
//!     high: u8,
//! }
//!
//! impl Payload for Status {
//!     fn schema() -> Schema<Self> {
//!         Schema::new()
//!             .field(FieldSpec::uint(lens!(Status, pan_id)).endianness("be").hex())
//!             .field(FieldSpec::uint(lens!(Status, low)).bitmask("0x0F"))
//!             .field(FieldSpec::uint(lens!(Status, high)).bitmask("0xF0"))
//!     }
//! }
//!
//! let status = Status { pan_id: 0x1A62, low: 5, high: 10 };
//! let bytes = PayloadCodec::encode(&status).unwrap();
//! assert_eq!(&bytes[..], &[0x1A, 0x62, 0xA5]);
//! ```

use std::marker::PhantomData;

use super::tags::Tags;
use super::PayloadCodec;
use crate::error::{ConfigError, PayloadError};

/// A record type with a wire layout.
///
/// `Default` supplies the zero value decoding starts from.
pub trait Payload: Default + Send + Sync + 'static {
    /// Fields in wire order.
    fn schema() -> Schema<Self>;
}

/// Empty payload.
impl Payload for () {
    fn schema() -> Schema<Self> {
        Schema::named("()")
    }
}

/// Unsigned integer types a field can hold.
pub trait Uint: Copy + Default + Send + Sync + 'static {
    /// Natural width in bytes.
    const WIDTH: usize;

    fn to_u64(self) -> u64;

    /// Convert back, truncating to the natural width.
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_uint {
    ($($ty:ty),*) => {
        $(
            impl Uint for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn to_u64(self) -> u64 {
                    self as u64
                }

                #[inline]
                fn from_u64(value: u64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_uint!(u8, u16, u32, u64);

impl Uint for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn to_u64(self) -> u64 {
        u64::from(self)
    }

    #[inline]
    fn from_u64(value: u64) -> Self {
        value != 0
    }
}

/// Accessors for one field of `T` holding a `V`.
///
/// Usually built with the [`lens!`](crate::lens) macro.
pub struct Lens<T, V> {
    name: &'static str,
    get: fn(&T) -> &V,
    get_mut: fn(&mut T) -> &mut V,
}

impl<T, V> Lens<T, V> {
    pub fn new(name: &'static str, get: fn(&T) -> &V, get_mut: fn(&mut T) -> &mut V) -> Self {
        Self { name, get, get_mut }
    }
}

/// Build a [`Lens`] for `record.field`.
#[macro_export]
macro_rules! lens {
    ($record:ty, $field:ident) => {
        $crate::codec::Lens::<$record, _>::new(
            stringify!($field),
            |record: &$record| &record.$field,
            |record: &mut $record| &mut record.$field,
        )
    };
}

pub(crate) type GetFn<T> = Box<dyn Fn(&T) -> u64 + Send + Sync>;
pub(crate) type SetFn<T> = Box<dyn Fn(&mut T, u64) + Send + Sync>;
pub(crate) type EncodeFn<T> = Box<dyn Fn(&T, &mut Vec<u8>) -> Result<(), PayloadError> + Send + Sync>;
pub(crate) type DecodeFn<T> = Box<dyn Fn(&mut T, &[u8]) -> Result<usize, PayloadError> + Send + Sync>;
pub(crate) type DecodeCountFn<T> =
    Box<dyn Fn(&mut T, &[u8], usize) -> Result<usize, PayloadError> + Send + Sync>;
pub(crate) type ShowFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;
pub(crate) type ValidateFn = fn() -> Result<(), ConfigError>;

/// Resolve (and cache) the plan of a nested record type.
fn validate<R: Payload>() -> Result<(), ConfigError> {
    PayloadCodec::plan::<R>().map(|_| ())
}

/// Type-erased access to a field, by kind.
pub(crate) enum Access<T> {
    Uint {
        natural: usize,
        get: GetFn<T>,
        set: SetFn<T>,
    },
    Bytes {
        len: usize,
        get: Box<dyn Fn(&T) -> Vec<u8> + Send + Sync>,
        set: Box<dyn Fn(&mut T, &[u8]) + Send + Sync>,
    },
    UintSeq {
        natural: usize,
        get: Box<dyn Fn(&T) -> Vec<u64> + Send + Sync>,
        set: Box<dyn Fn(&mut T, Vec<u64>) + Send + Sync>,
    },
    Record {
        validate: ValidateFn,
        encode: EncodeFn<T>,
        decode: DecodeFn<T>,
        show: ShowFn<T>,
    },
    Optional {
        validate: ValidateFn,
        encode: EncodeFn<T>,
        decode: DecodeFn<T>,
        show: ShowFn<T>,
    },
    RecordSeq {
        validate: ValidateFn,
        encode: EncodeFn<T>,
        decode: DecodeCountFn<T>,
        show: ShowFn<T>,
    },
}

/// One field of a record, with its annotations.
pub struct FieldSpec<T> {
    pub(crate) name: &'static str,
    pub(crate) tags: Tags,
    pub(crate) access: Access<T>,
}

impl<T: 'static> FieldSpec<T> {
    fn with_access(name: &'static str, access: Access<T>) -> Self {
        Self {
            name,
            tags: Tags::default(),
            access,
        }
    }

    /// Unsigned integer (or `bool`) field.
    pub fn uint<V: Uint>(lens: Lens<T, V>) -> Self {
        let Lens { name, get, get_mut } = lens;
        Self::with_access(
            name,
            Access::Uint {
                natural: V::WIDTH,
                get: Box::new(move |record: &T| get(record).to_u64()),
                set: Box::new(move |record: &mut T, value: u64| {
                    *get_mut(record) = V::from_u64(value);
                }),
            },
        )
    }

    /// Fixed-length byte array.
    pub fn bytes<const N: usize>(lens: Lens<T, [u8; N]>) -> Self {
        let Lens { name, get, get_mut } = lens;
        Self::with_access(
            name,
            Access::Bytes {
                len: N,
                get: Box::new(move |record: &T| get(record).to_vec()),
                set: Box::new(move |record: &mut T, src: &[u8]| {
                    get_mut(record).copy_from_slice(src);
                }),
            },
        )
    }

    /// Sequence of unsigned integers; needs a `bound`.
    pub fn seq<V: Uint>(lens: Lens<T, Vec<V>>) -> Self {
        let Lens { name, get, get_mut } = lens;
        Self::with_access(
            name,
            Access::UintSeq {
                natural: V::WIDTH,
                get: Box::new(move |record: &T| get(record).iter().map(|v| v.to_u64()).collect()),
                set: Box::new(move |record: &mut T, values: Vec<u64>| {
                    *get_mut(record) = values.into_iter().map(V::from_u64).collect();
                }),
            },
        )
    }

    /// Nested record.
    pub fn record<R: Payload>(lens: Lens<T, R>) -> Self {
        let Lens { name, get, get_mut } = lens;
        Self::with_access(
            name,
            Access::Record {
                validate: validate::<R>,
                encode: Box::new(move |record: &T, out: &mut Vec<u8>| {
                    PayloadCodec::encode_into(get(record), out)
                }),
                decode: Box::new(move |record: &mut T, buf: &[u8]| {
                    PayloadCodec::decode_into(buf, get_mut(record))
                }),
                show: Box::new(move |record: &T| PayloadCodec::render(get(record))),
            },
        )
    }

    /// Optional nested record.
    ///
    /// `None` takes no bytes. On decode it stays `None` only when the buffer
    /// is already exhausted.
    pub fn optional<R: Payload>(lens: Lens<T, Option<R>>) -> Self {
        let Lens { name, get, get_mut } = lens;
        Self::with_access(
            name,
            Access::Optional {
                validate: validate::<R>,
                encode: Box::new(move |record: &T, out: &mut Vec<u8>| match get(record) {
                    Some(inner) => PayloadCodec::encode_into(inner, out),
                    None => Ok(()),
                }),
                decode: Box::new(move |record: &mut T, buf: &[u8]| {
                    if buf.is_empty() {
                        *get_mut(record) = None;
                        return Ok(0);
                    }
                    let mut inner = R::default();
                    let consumed = PayloadCodec::decode_into(buf, &mut inner)?;
                    *get_mut(record) = Some(inner);
                    Ok(consumed)
                }),
                show: Box::new(move |record: &T| match get(record) {
                    Some(inner) => format!("Some({})", PayloadCodec::render(inner)),
                    None => "None".to_string(),
                }),
            },
        )
    }

    /// Sequence of nested records; needs a `bound`.
    ///
    /// Every element must occupy at least one byte on the wire; an element
    /// that decodes from nothing fails with [`PayloadError::UnexpectedEof`].
    pub fn records<R: Payload>(lens: Lens<T, Vec<R>>) -> Self {
        let Lens { name, get, get_mut } = lens;
        Self::with_access(
            name,
            Access::RecordSeq {
                validate: validate::<R>,
                encode: Box::new(move |record: &T, out: &mut Vec<u8>| {
                    get(record)
                        .iter()
                        .try_for_each(|item| PayloadCodec::encode_into(item, out))
                }),
                decode: Box::new(move |record: &mut T, buf: &[u8], count: usize| {
                    let mut items = Vec::with_capacity(count.min(buf.len()));
                    let mut consumed = 0;
                    for _ in 0..count {
                        let mut item = R::default();
                        let taken = PayloadCodec::decode_into(&buf[consumed..], &mut item)?;
                        // The count comes off the wire; an element that takes
                        // no bytes cannot make progress towards it.
                        if taken == 0 {
                            return Err(PayloadError::UnexpectedEof {
                                needed: 1,
                                remaining: buf.len() - consumed,
                            });
                        }
                        consumed += taken;
                        items.push(item);
                    }
                    *get_mut(record) = items;
                    Ok(consumed)
                }),
                show: Box::new(move |record: &T| {
                    let items: Vec<String> = get(record).iter().map(PayloadCodec::render).collect();
                    format!("[{}]", items.join(", "))
                }),
            },
        )
    }

    /// Byte order annotation; `"be"` selects big endian.
    pub fn endianness(mut self, tag: &'static str) -> Self {
        self.tags.endianness = Some(tag);
        self
    }

    /// Wire width in bytes, overriding the natural width.
    pub fn size(mut self, size: usize) -> Self {
        self.tags.size = Some(size);
        self
    }

    /// Bitmask literal (`0x…` or `0b…`) within packed storage.
    pub fn bitmask(mut self, literal: &'static str) -> Self {
        self.tags.bitmask = Some(literal);
        self
    }

    /// Number of bits occupied within packed storage.
    pub fn bits(mut self, bits: usize) -> Self {
        self.tags.bits = Some(bits);
        self
    }

    /// Earlier sibling field holding this sequence's element count.
    pub fn bound(mut self, field: &'static str) -> Self {
        self.tags.bound = Some(field);
        self
    }

    /// Render as hexadecimal in diagnostics.
    pub fn hex(mut self) -> Self {
        self.tags.hex = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }
}

/// Ordered field list of a record type.
pub struct Schema<T> {
    pub(crate) name: &'static str,
    pub(crate) fields: Vec<FieldSpec<T>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: 'static> Schema<T> {
    /// Empty schema named after `T`.
    pub fn new() -> Self {
        let full = std::any::type_name::<T>();
        Self::named(full.rsplit("::").next().unwrap_or(full))
    }

    /// Empty schema with an explicit record name.
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            _record: PhantomData,
        }
    }

    /// Append the next field in wire order.
    pub fn field(mut self, field: FieldSpec<T>) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldSpec<T>] {
        &self.fields
    }
}

impl<T: 'static> Default for Schema<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Sample {
        a: u16,
        flag: bool,
    }

    #[test]
    fn test_uint_widths() {
        assert_eq!(<u8 as Uint>::WIDTH, 1);
        assert_eq!(<u16 as Uint>::WIDTH, 2);
        assert_eq!(<u32 as Uint>::WIDTH, 4);
        assert_eq!(<u64 as Uint>::WIDTH, 8);
        assert_eq!(<bool as Uint>::WIDTH, 1);
    }

    #[test]
    fn test_uint_truncation() {
        assert_eq!(u8::from_u64(0x1FF), 0xFF);
        assert_eq!(u16::from_u64(0x1_0002), 0x0002);
        assert!(bool::from_u64(2));
        assert!(!bool::from_u64(0));
    }

    #[test]
    fn test_lens_access() {
        let spec = FieldSpec::uint(lens!(Sample, a));
        let mut sample = Sample::default();
        match &spec.access {
            Access::Uint { natural, get, set } => {
                assert_eq!(*natural, 2);
                set(&mut sample, 0xBEEF);
                assert_eq!(get(&sample), 0xBEEF);
            }
            _ => panic!("expected integer access"),
        }
        assert_eq!(sample.a, 0xBEEF);
        assert_eq!(spec.name(), "a");
    }

    #[test]
    fn test_builder_tags() {
        let spec = FieldSpec::uint(lens!(Sample, flag))
            .bitmask("0x01")
            .bits(1)
            .hex();
        assert_eq!(spec.tags().bitmask, Some("0x01"));
        assert_eq!(spec.tags().bits, Some(1));
        assert!(spec.tags().hex);
    }

    #[test]
    fn test_schema_name() {
        let schema: Schema<Sample> = Schema::new();
        assert_eq!(schema.name(), "Sample");
        assert!(schema.fields().is_empty());

        let unit = <() as Payload>::schema();
        assert_eq!(unit.name(), "()");
    }
}
