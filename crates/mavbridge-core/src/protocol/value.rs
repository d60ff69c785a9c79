//! Decoded field values

use serde::{Serialize, Serializer};
use std::collections::HashMap;

use crate::schema::PrimitiveType;

/// One decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Character array, byte for byte as on the wire (fill bytes included)
    Text(Vec<u8>),
}

impl Value {
    /// Zero value of a primitive type
    pub fn zero(primitive: PrimitiveType) -> Self {
        match primitive {
            PrimitiveType::U8 => Value::U8(0),
            PrimitiveType::I8 => Value::I8(0),
            PrimitiveType::U16 => Value::U16(0),
            PrimitiveType::I16 => Value::I16(0),
            PrimitiveType::U32 => Value::U32(0),
            PrimitiveType::I32 => Value::I32(0),
            PrimitiveType::U64 => Value::U64(0),
            PrimitiveType::I64 => Value::I64(0),
            PrimitiveType::F32 => Value::F32(0.0),
            PrimitiveType::F64 => Value::F64(0.0),
            PrimitiveType::Char => Value::Text(Vec::new()),
        }
    }

    /// Text from a string
    pub fn text(s: &str) -> Self {
        Value::Text(s.as_bytes().to_vec())
    }

    /// Numeric value as f64
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Value::U8(v) => v as f64,
            Value::I8(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::I16(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
            Value::Text(_) => return None,
        })
    }

    /// Numeric value as a wide integer. Floats are truncated toward zero.
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Value::U8(v) => v as i128,
            Value::I8(v) => v as i128,
            Value::U16(v) => v as i128,
            Value::I16(v) => v as i128,
            Value::U32(v) => v as i128,
            Value::I32(v) => v as i128,
            Value::U64(v) => v as i128,
            Value::I64(v) => v as i128,
            Value::F32(v) if v.is_finite() => v as i128,
            Value::F64(v) if v.is_finite() => v as i128,
            _ => return None,
        })
    }

    /// Raw bytes of a character array
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Text(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Character array as a string, cut at the first NUL
    pub fn as_trimmed_str(&self) -> Option<String> {
        self.as_bytes().map(|bytes| {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            String::from_utf8_lossy(&bytes[..end]).to_string()
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::U8(v) => serializer.serialize_u8(*v),
            Value::I8(v) => serializer.serialize_i8(*v),
            Value::U16(v) => serializer.serialize_u16(*v),
            Value::I16(v) => serializer.serialize_i16(*v),
            Value::U32(v) => serializer.serialize_u32(*v),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::U64(v) => serializer.serialize_u64(*v),
            Value::I64(v) => serializer.serialize_i64(*v),
            Value::F32(v) => serializer.serialize_f32(*v),
            Value::F64(v) => serializer.serialize_f64(*v),
            Value::Text(_) => serializer.serialize_str(&self.as_trimmed_str().unwrap_or_default()),
        }
    }
}

/// A decoded message: field name to value, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedMessage {
    /// Kind identifier
    pub kind: u8,
    /// Message name
    pub name: String,
    /// Field values. Array fields appear as numbered sub-fields
    /// (`q0`, `q1`, ...), character arrays as a single entry.
    pub fields: HashMap<String, Value>,
}

impl TypedMessage {
    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a numeric field as f64
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Get a numeric field as u64, if it is a non-negative integer in range
    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field)
            .and_then(Value::as_i128)
            .and_then(|v| u64::try_from(v).ok())
    }

    /// Get a character array as a NUL-trimmed string
    pub fn get_str(&self, field: &str) -> Option<String> {
        self.get(field).and_then(Value::as_trimmed_str)
    }
}
