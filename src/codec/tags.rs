//! Field annotations and their parsing.
//!
//! | annotation   | meaning                                              |
//! |--------------|------------------------------------------------------|
//! | `endianness` | `"be"` selects big endian, anything else little      |
//! | `size`       | byte width on the wire, overriding the natural width |
//! | `bitmask`    | `0x…`/`0b…` mask within shared packed storage        |
//! | `bits`       | number of bits occupied within packed storage        |
//! | `bound`      | earlier sibling field holding a sequence's length    |
//! | `hex`        | render as hexadecimal in diagnostics                 |

use crate::error::ConfigErrorKind;

/// Byte order of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ByteOrder {
    /// Interpret an `endianness` annotation.
    pub fn from_tag(tag: &str) -> Self {
        if tag == "be" {
            Self::Big
        } else {
            Self::Little
        }
    }

    /// Append the low `width` bytes of `value`.
    pub(crate) fn write(self, out: &mut Vec<u8>, value: u64, width: usize) {
        let bytes = value.to_le_bytes();
        match self {
            Self::Little => out.extend_from_slice(&bytes[..width]),
            Self::Big => out.extend(bytes[..width].iter().rev()),
        }
    }

    /// Read an unsigned integer spanning all of `bytes`.
    pub(crate) fn read(self, bytes: &[u8]) -> u64 {
        let accumulate = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
        match self {
            Self::Little => bytes.iter().rev().fold(0, accumulate),
            Self::Big => bytes.iter().fold(0, accumulate),
        }
    }
}

/// Annotations attached to one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub hex: bool,
    pub endianness: Option<&'static str>,
    pub size: Option<usize>,
    pub bitmask: Option<&'static str>,
    pub bits: Option<usize>,
    pub bound: Option<&'static str>,
}

impl Tags {
    /// Resolved byte order.
    pub fn order(&self) -> ByteOrder {
        ByteOrder::from_tag(self.endianness.unwrap_or_default())
    }

    /// Check if the field takes part in bit packing.
    pub fn is_packed(&self) -> bool {
        self.bitmask.is_some() || self.bits.is_some()
    }

    /// Fail on the first wire annotation not in `allowed`.
    ///
    /// `hex` is cosmetic and accepted everywhere.
    pub(crate) fn allow_only(&self, allowed: &[&'static str]) -> Result<(), ConfigErrorKind> {
        let present = [
            ("endianness", self.endianness.is_some()),
            ("size", self.size.is_some()),
            ("bitmask", self.bitmask.is_some()),
            ("bits", self.bits.is_some()),
            ("bound", self.bound.is_some()),
        ];
        match present
            .iter()
            .find(|(tag, set)| *set && !allowed.contains(tag))
        {
            Some((tag, _)) => Err(ConfigErrorKind::UnsupportedTag(*tag)),
            None => Ok(()),
        }
    }

    /// Wire width: the `size` override, or the natural width.
    pub(crate) fn width(&self, natural: usize) -> Result<usize, ConfigErrorKind> {
        match self.size {
            None => Ok(natural),
            Some(size @ (1 | 2 | 4 | 8)) => Ok(size),
            Some(size) => Err(ConfigErrorKind::UnsupportedSize(size)),
        }
    }
}

/// Parse a `0x…` or `0b…` mask literal. Underscores are ignored.
pub fn parse_bitmask(literal: &str) -> Result<u64, ConfigErrorKind> {
    let malformed = || ConfigErrorKind::MalformedMask(literal.to_string());
    let (radix, digits) = if let Some(rest) = literal.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = literal.strip_prefix("0b") {
        (2, rest)
    } else {
        return Err(malformed());
    };
    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    if digits.is_empty() {
        return Err(malformed());
    }
    u64::from_str_radix(&digits, radix).map_err(|_| malformed())
}

/// Position of the lowest set bit (log2 of the lowest set bit's value).
#[inline]
pub fn first_bit_position(mask: u64) -> u32 {
    mask.trailing_zeros()
}
