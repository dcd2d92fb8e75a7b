//! Codec plans: a record schema resolved into wire steps.
//!
//! Resolution validates every annotation once, nested record types
//! included, and groups bit-packed fields that share storage. Encoding and
//! decoding then just walk the steps.
//!
//! Packed groups are formed from consecutive masked (or `bits`) fields with
//! the same storage width and byte order. A group closes when a field does
//! not take part in packing, differs in width/order, or claims a bit that
//! is already taken.

use super::schema::{Access, FieldSpec, Payload, Schema};
use super::tags::{first_bit_position, parse_bitmask, ByteOrder, Tags};
use crate::error::{ConfigError, ConfigErrorKind, PayloadError};

/// One field's slice of shared packed storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Member {
    pub field: usize,
    pub mask: u64,
    pub shift: u32,
}

/// One unit of wire work. `field` and `bound` index the schema's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Scalar {
        field: usize,
        width: usize,
        order: ByteOrder,
    },
    Packed {
        width: usize,
        order: ByteOrder,
        members: Vec<Member>,
    },
    Bytes {
        field: usize,
        len: usize,
    },
    Seq {
        field: usize,
        width: usize,
        order: ByteOrder,
        bound: usize,
    },
    Record {
        field: usize,
    },
    Optional {
        field: usize,
    },
    Records {
        field: usize,
        bound: usize,
    },
}

/// Resolved wire layout of a record type.
pub struct Plan<T> {
    name: &'static str,
    fields: Vec<FieldSpec<T>>,
    steps: Vec<Step>,
}

/// Packed group under construction.
struct Group {
    width: usize,
    order: ByteOrder,
    claimed: u64,
    members: Vec<Member>,
}

#[derive(Default)]
struct Resolver {
    steps: Vec<Step>,
    group: Option<Group>,
}

impl Resolver {
    fn close_group(&mut self) {
        if let Some(group) = self.group.take() {
            self.steps.push(Step::Packed {
                width: group.width,
                order: group.order,
                members: group.members,
            });
        }
    }

    fn push(&mut self, step: Step) {
        self.close_group();
        self.steps.push(step);
    }

    fn pack(
        &mut self,
        field: usize,
        tags: &Tags,
        width: usize,
        order: ByteOrder,
    ) -> Result<(), ConfigErrorKind> {
        let storage_bits = width * 8;
        let capacity = low_bits(storage_bits);

        if let Some(bits) = tags.bits {
            if bits == 0 || bits > storage_bits {
                return Err(ConfigErrorKind::InvalidBits(bits));
            }
        }

        let compatible = |group: &Group| group.width == width && group.order == order;

        let mask = match (tags.bitmask, tags.bits) {
            (Some(literal), bits) => {
                let mask = parse_bitmask(literal)?;
                if mask == 0 {
                    return Err(ConfigErrorKind::ZeroMask);
                }
                if mask & !capacity != 0 {
                    return Err(ConfigErrorKind::MaskTooWide { mask, width });
                }
                if let Some(bits) = bits {
                    if mask.count_ones() as usize != bits {
                        return Err(ConfigErrorKind::BitsMismatch { bits, mask });
                    }
                }
                mask
            }
            (None, Some(bits)) => {
                // Next free bits above everything claimed so far.
                let shift = self
                    .group
                    .as_ref()
                    .filter(|group| compatible(group))
                    .map(|group| 64 - group.claimed.leading_zeros() as usize)
                    .unwrap_or(0);
                let shift = if shift + bits > storage_bits { 0 } else { shift };
                low_bits(bits) << shift
            }
            (None, None) => return Err(ConfigErrorKind::InvalidBits(0)),
        };

        let joins = self
            .group
            .as_ref()
            .is_some_and(|group| compatible(group) && group.claimed & mask == 0);
        if !joins {
            self.close_group();
        }
        let group = self.group.get_or_insert_with(|| Group {
            width,
            order,
            claimed: 0,
            members: Vec::new(),
        });
        group.claimed |= mask;
        group.members.push(Member {
            field,
            mask,
            shift: first_bit_position(mask),
        });
        Ok(())
    }
}

fn low_bits(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Locate the field a sequence's `bound` refers to.
fn find_bound<T>(
    fields: &[FieldSpec<T>],
    index: usize,
    bound: Option<&'static str>,
) -> Result<usize, ConfigErrorKind> {
    let name = bound.ok_or(ConfigErrorKind::MissingBound)?;
    match fields.iter().position(|field| field.name == name) {
        None => Err(ConfigErrorKind::UnknownBound(name.to_string())),
        Some(position) if position >= index => {
            Err(ConfigErrorKind::BoundNotBefore(name.to_string()))
        }
        Some(position) => match fields[position].access {
            Access::Uint { .. } => Ok(position),
            _ => Err(ConfigErrorKind::BoundNotInteger(name.to_string())),
        },
    }
}

/// Cursor over a decode buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], PayloadError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(PayloadError::UnexpectedEof { needed, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn advance(&mut self, consumed: usize) {
        self.pos = (self.pos + consumed).min(self.buf.len());
    }
}

/// Render an integer as zero-padded hex sized to its width.
pub(crate) fn format_hex(value: u64, width: usize) -> String {
    match width {
        1 => format!("{value:#04x}"),
        2 => format!("{value:#06x}"),
        4 => format!("{value:#010x}"),
        _ => format!("{value:#018x}"),
    }
}

impl<T: Payload> Plan<T> {
    /// Validate a schema and derive its steps.
    pub fn resolve(schema: Schema<T>) -> Result<Self, ConfigError> {
        let Schema { name, fields, .. } = schema;
        let mut resolver = Resolver::default();

        for (index, spec) in fields.iter().enumerate() {
            let error = |kind| ConfigError {
                record: name,
                field: spec.name,
                kind,
            };
            if fields[..index].iter().any(|field| field.name == spec.name) {
                return Err(error(ConfigErrorKind::DuplicateField));
            }
            let tags = &spec.tags;

            match &spec.access {
                Access::Uint { natural, .. } => {
                    tags.allow_only(&["endianness", "size", "bitmask", "bits"])
                        .map_err(error)?;
                    let width = tags.width(*natural).map_err(error)?;
                    if tags.is_packed() {
                        resolver
                            .pack(index, tags, width, tags.order())
                            .map_err(error)?;
                    } else {
                        resolver.push(Step::Scalar {
                            field: index,
                            width,
                            order: tags.order(),
                        });
                    }
                }
                Access::Bytes { len, .. } => {
                    tags.allow_only(&[]).map_err(error)?;
                    resolver.push(Step::Bytes {
                        field: index,
                        len: *len,
                    });
                }
                Access::UintSeq { natural, .. } => {
                    tags.allow_only(&["endianness", "size", "bound"])
                        .map_err(error)?;
                    let width = tags.width(*natural).map_err(error)?;
                    let bound = find_bound(&fields, index, tags.bound).map_err(error)?;
                    resolver.push(Step::Seq {
                        field: index,
                        width,
                        order: tags.order(),
                        bound,
                    });
                }
                Access::Record { validate, .. } => {
                    tags.allow_only(&[]).map_err(error)?;
                    validate()?;
                    resolver.push(Step::Record { field: index });
                }
                Access::Optional { validate, .. } => {
                    tags.allow_only(&[]).map_err(error)?;
                    validate()?;
                    resolver.push(Step::Optional { field: index });
                }
                Access::RecordSeq { validate, .. } => {
                    tags.allow_only(&["bound"]).map_err(error)?;
                    let bound = find_bound(&fields, index, tags.bound).map_err(error)?;
                    validate()?;
                    resolver.push(Step::Records {
                        field: index,
                        bound,
                    });
                }
            }
        }
        resolver.close_group();

        Ok(Self {
            name,
            fields,
            steps: resolver.steps,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn steps(&self) -> &[Step] {
        &self.steps
    }

    // resolve() only points integer steps and bounds at integer fields.
    fn integer(&self, field: usize, record: &T) -> u64 {
        match &self.fields[field].access {
            Access::Uint { get, .. } => get(record),
            _ => 0,
        }
    }

    fn set_integer(&self, field: usize, record: &mut T, value: u64) {
        if let Access::Uint { set, .. } = &self.fields[field].access {
            set(record, value);
        }
    }

    /// Append the wire form of `record` to `out`.
    pub fn encode_into(&self, record: &T, out: &mut Vec<u8>) -> Result<(), PayloadError> {
        for step in &self.steps {
            match step {
                Step::Scalar {
                    field,
                    width,
                    order,
                } => order.write(out, self.integer(*field, record), *width),
                Step::Packed {
                    width,
                    order,
                    members,
                } => {
                    let word = members.iter().fold(0u64, |word, member| {
                        word | ((self.integer(member.field, record) << member.shift) & member.mask)
                    });
                    order.write(out, word, *width);
                }
                Step::Bytes { field, .. } => {
                    if let Access::Bytes { get, .. } = &self.fields[*field].access {
                        out.extend_from_slice(&get(record));
                    }
                }
                Step::Seq {
                    field,
                    width,
                    order,
                    ..
                } => {
                    if let Access::UintSeq { get, .. } = &self.fields[*field].access {
                        for value in get(record) {
                            order.write(out, value, *width);
                        }
                    }
                }
                Step::Record { field } | Step::Optional { field } | Step::Records { field, .. } => {
                    match &self.fields[*field].access {
                        Access::Record { encode, .. }
                        | Access::Optional { encode, .. }
                        | Access::RecordSeq { encode, .. } => encode(record, out)?,
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Fill `record` from `buf`, returning the number of bytes consumed.
    ///
    /// Fields are decoded in wire order, so a sequence's bound has already
    /// been read when the sequence is reached.
    pub fn decode_into(&self, buf: &[u8], record: &mut T) -> Result<usize, PayloadError> {
        let mut reader = Reader::new(buf);
        for step in &self.steps {
            match step {
                Step::Scalar {
                    field,
                    width,
                    order,
                } => {
                    let value = order.read(reader.take(*width)?);
                    self.set_integer(*field, record, value);
                }
                Step::Packed {
                    width,
                    order,
                    members,
                } => {
                    let word = order.read(reader.take(*width)?);
                    for member in members {
                        self.set_integer(member.field, record, (word & member.mask) >> member.shift);
                    }
                }
                Step::Bytes { field, len } => {
                    let raw = reader.take(*len)?;
                    if let Access::Bytes { set, .. } = &self.fields[*field].access {
                        set(record, raw);
                    }
                }
                Step::Seq {
                    field,
                    width,
                    order,
                    bound,
                } => {
                    let count = usize::try_from(self.integer(*bound, record)).unwrap_or(usize::MAX);
                    let raw = reader.take(count.saturating_mul(*width))?;
                    let values = raw.chunks_exact(*width).map(|c| order.read(c)).collect();
                    if let Access::UintSeq { set, .. } = &self.fields[*field].access {
                        set(record, values);
                    }
                }
                Step::Record { field } | Step::Optional { field } => {
                    match &self.fields[*field].access {
                        Access::Record { decode, .. } | Access::Optional { decode, .. } => {
                            let consumed = decode(record, reader.rest())?;
                            reader.advance(consumed);
                        }
                        _ => {}
                    }
                }
                Step::Records { field, bound } => {
                    let count = usize::try_from(self.integer(*bound, record)).unwrap_or(usize::MAX);
                    if let Access::RecordSeq { decode, .. } = &self.fields[*field].access {
                        let consumed = decode(record, reader.rest(), count)?;
                        reader.advance(consumed);
                    }
                }
            }
        }
        Ok(reader.pos)
    }

    /// One-line diagnostic rendering honoring `hex` hints.
    pub fn render(&self, record: &T) -> String {
        if self.fields.is_empty() {
            return format!("{} {{}}", self.name);
        }
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|spec| format!("{}: {}", spec.name, show_field(spec, record)))
            .collect();
        format!("{} {{ {} }}", self.name, parts.join(", "))
    }
}

fn show_field<T>(spec: &FieldSpec<T>, record: &T) -> String {
    let hex = spec.tags.hex;
    let show = |value: u64, width: usize| {
        if hex {
            format_hex(value, width)
        } else {
            value.to_string()
        }
    };
    match &spec.access {
        Access::Uint { natural, get, .. } => show(get(record), *natural),
        Access::Bytes { get, .. } => {
            let items: Vec<String> = get(record)
                .into_iter()
                .map(|byte| show(u64::from(byte), 1))
                .collect();
            format!("[{}]", items.join(", "))
        }
        Access::UintSeq { natural, get, .. } => {
            let items: Vec<String> = get(record)
                .into_iter()
                .map(|value| show(value, *natural))
                .collect();
            format!("[{}]", items.join(", "))
        }
        Access::Record { show, .. }
        | Access::Optional { show, .. }
        | Access::RecordSeq { show, .. } => show(record),
    }
}
