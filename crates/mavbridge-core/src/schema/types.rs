//! Message definitions and wire layout rules

use serde::{Deserialize, Serialize};

use crate::protocol::checksum::X25;

/// Primitive field type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    /// Unsigned 8-bit integer
    U8,
    /// Signed 8-bit integer
    I8,
    /// Unsigned 16-bit integer
    U16,
    /// Signed 16-bit integer
    I16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 32-bit integer
    I32,
    /// Unsigned 64-bit integer
    U64,
    /// Signed 64-bit integer
    I64,
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// Single character, only meaningful as a fixed-size array
    Char,
}

impl PrimitiveType {
    /// Parse a dialect type name (without any `[N]` suffix)
    pub fn from_dialect_str(s: &str) -> Option<Self> {
        match s {
            "uint8_t" | "uint8_t_mavlink_version" => Some(Self::U8),
            "int8_t" => Some(Self::I8),
            "uint16_t" => Some(Self::U16),
            "int16_t" => Some(Self::I16),
            "uint32_t" => Some(Self::U32),
            "int32_t" => Some(Self::I32),
            "uint64_t" => Some(Self::U64),
            "int64_t" => Some(Self::I64),
            "float" => Some(Self::F32),
            "double" => Some(Self::F64),
            "char" => Some(Self::Char),
            _ => None,
        }
    }

    /// Canonical dialect name, as used for seed derivation
    pub fn dialect_name(self) -> &'static str {
        match self {
            Self::U8 => "uint8_t",
            Self::I8 => "int8_t",
            Self::U16 => "uint16_t",
            Self::I16 => "int16_t",
            Self::U32 => "uint32_t",
            Self::I32 => "int32_t",
            Self::U64 => "uint64_t",
            Self::I64 => "int64_t",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::Char => "char",
        }
    }

    /// Width of one element in bytes
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 | Self::Char => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

/// One declared field of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Element type
    pub primitive: PrimitiveType,
    /// Array length for `type[N]` declarations
    pub array_len: Option<u8>,
}

impl FieldDef {
    /// Create a scalar field
    pub fn scalar(name: impl Into<String>, primitive: PrimitiveType) -> Self {
        Self {
            name: name.into(),
            primitive,
            array_len: None,
        }
    }

    /// Create a fixed-size array field
    pub fn array(name: impl Into<String>, primitive: PrimitiveType, len: u8) -> Self {
        Self {
            name: name.into(),
            primitive,
            array_len: Some(len),
        }
    }

    /// Number of elements (1 for scalars)
    pub fn count(&self) -> usize {
        self.array_len.map(usize::from).unwrap_or(1)
    }

    /// Whether the field unpacks into numbered sub-fields (`name0`,
    /// `name1`, ...). A one-element array is read as a scalar.
    pub fn is_repeated(&self) -> bool {
        self.count() > 1
    }

    /// Bytes occupied on the wire
    pub fn wire_size(&self) -> usize {
        self.primitive.size() * self.count()
    }

    /// Parse a dialect type string such as `uint16_t` or `char[16]`
    pub fn parse_type(ty: &str) -> Option<(PrimitiveType, Option<u8>)> {
        let ty = ty.trim();
        match ty.split_once('[') {
            Some((base, rest)) => {
                let len: u8 = rest.strip_suffix(']')?.trim().parse().ok()?;
                if len == 0 {
                    return None;
                }
                Some((PrimitiveType::from_dialect_str(base.trim())?, Some(len)))
            }
            None => Some((PrimitiveType::from_dialect_str(ty)?, None)),
        }
    }
}

/// A message kind: id, name and field layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSchema {
    /// Kind identifier
    pub id: u8,
    /// Message name (e.g. `HEARTBEAT`)
    pub name: String,
    /// Fields in declaration order
    pub declared: Vec<FieldDef>,
    /// Fields in wire order
    pub wire: Vec<FieldDef>,
    /// Checksum seed byte
    pub crc_extra: u8,
    /// Total payload length in bytes
    pub payload_len: usize,
}

impl MessageSchema {
    /// Build a schema from declared fields. The seed is derived from the
    /// definition unless `crc_extra` is given explicitly.
    pub fn new(id: u8, name: impl Into<String>, declared: Vec<FieldDef>, crc_extra: Option<u8>) -> Self {
        let name = name.into();
        let wire = wire_order(&declared);
        let crc_extra = crc_extra.unwrap_or_else(|| derive_crc_extra(&name, &wire));
        let payload_len = wire.iter().map(FieldDef::wire_size).sum();
        Self {
            id,
            name,
            declared,
            wire,
            crc_extra,
            payload_len,
        }
    }

    /// Look up a declared field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.declared.iter().find(|f| f.name == name)
    }
}

/// Order fields for the wire: descending element width, declaration order
/// among fields of equal width. Arrays sort by their element width.
pub fn wire_order(fields: &[FieldDef]) -> Vec<FieldDef> {
    let mut ordered = fields.to_vec();
    // sort_by_key is stable, which keeps declaration order for ties
    ordered.sort_by_key(|f| std::cmp::Reverse(f.primitive.size()));
    ordered
}

/// Derive the checksum seed from a message definition.
pub fn derive_crc_extra(name: &str, wire: &[FieldDef]) -> u8 {
    let mut crc = X25::new();
    crc.update(name.as_bytes());
    crc.update_byte(b' ');
    for field in wire {
        crc.update(field.primitive.dialect_name().as_bytes());
        crc.update_byte(b' ');
        crc.update(field.name.as_bytes());
        crc.update_byte(b' ');
        if let Some(len) = field.array_len {
            crc.update_byte(len);
        }
    }
    let value = crc.finish();
    (value & 0xFF) as u8 ^ (value >> 8) as u8
}
