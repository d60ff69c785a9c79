//! Schema-driven packet codec
//!
//! Turns raw frames into [`Packet`]s (checksum validated against the
//! per-kind seed) and packets into [`TypedMessage`]s by walking the kind's
//! fields in wire order.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::sync::Arc;

use super::checksum::frame_checksum;
use super::{
    Packet, PacketHeader, ProtocolError, TypedMessage, Value, CHECKSUM_LEN, HEADER_LEN, MAGIC,
    MIN_FRAME_LEN,
};
use crate::schema::{FieldDef, MessageSchema, PrimitiveType, SchemaRegistry};

/// Sender identity and sequence number stamped on outgoing packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// Sequence number
    pub seq: u8,
    /// Sender system id
    pub system_id: u8,
    /// Sender component id
    pub component_id: u8,
}

/// Codec bound to a schema registry
#[derive(Debug, Clone)]
pub struct Codec {
    registry: Arc<SchemaRegistry>,
}

impl Codec {
    /// Create a codec over a loaded registry
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this codec reads layouts from
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Decode one frame from the start of `data`.
    ///
    /// Bytes past the declared frame length are ignored. An unregistered kind
    /// yields [`ProtocolError::UnknownKind`] carrying the unvalidated packet.
    pub fn decode(&self, data: &[u8]) -> Result<Packet, ProtocolError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(ProtocolError::Truncated {
                needed: MIN_FRAME_LEN,
                available: data.len(),
            });
        }
        if data[0] != MAGIC {
            return Err(ProtocolError::BadMagic(data[0]));
        }

        let header = PacketHeader::from_frame(data);
        let payload_end = HEADER_LEN + header.len as usize;
        let total = payload_end + CHECKSUM_LEN;
        if data.len() < total {
            return Err(ProtocolError::Truncated {
                needed: total,
                available: data.len(),
            });
        }

        let packet = Packet {
            header,
            payload: data[HEADER_LEN..payload_end].to_vec(),
            checksum: LittleEndian::read_u16(&data[payload_end..total]),
        };

        let Some(seed) = self.registry.crc_extra(header.kind) else {
            return Err(ProtocolError::UnknownKind(Box::new(packet)));
        };

        let expected = frame_checksum(&data[1..payload_end], seed);
        if expected != packet.checksum {
            return Err(ProtocolError::Checksum {
                expected,
                actual: packet.checksum,
            });
        }

        Ok(packet)
    }

    /// Interpret a packet's payload according to its kind's layout
    pub fn unpack(&self, packet: &Packet) -> Result<TypedMessage, ProtocolError> {
        let schema = self.schema_for(packet)?;
        if packet.payload.len() < schema.payload_len {
            return Err(ProtocolError::Underrun {
                kind: schema.id,
                needed: schema.payload_len,
                available: packet.payload.len(),
            });
        }

        let mut fields = HashMap::with_capacity(schema.wire.len());
        let mut offset = 0;
        for field in &schema.wire {
            let width = field.primitive.size();
            if field.primitive == PrimitiveType::Char {
                let len = field.count();
                let bytes = packet.payload[offset..offset + len].to_vec();
                fields.insert(field.name.clone(), Value::Text(bytes));
                offset += len;
                continue;
            }
            if field.is_repeated() {
                for i in 0..field.count() {
                    let value = read_primitive(field.primitive, &packet.payload[offset..offset + width]);
                    fields.insert(format!("{}{}", field.name, i), value);
                    offset += width;
                }
            } else {
                let value = read_primitive(field.primitive, &packet.payload[offset..offset + width]);
                fields.insert(field.name.clone(), value);
                offset += width;
            }
        }

        Ok(TypedMessage {
            kind: schema.id,
            name: schema.name.clone(),
            fields,
        })
    }

    /// Build a packet of the given kind. Missing fields are zero-filled and
    /// character arrays are cut or NUL-padded to their declared length.
    pub fn pack(
        &self,
        kind: u8,
        fields: &HashMap<String, Value>,
        sender: SenderInfo,
    ) -> Result<Packet, ProtocolError> {
        let schema = self.registry.get(kind).ok_or_else(|| {
            ProtocolError::UnknownMessage(format!("kind {}", kind))
        })?;

        let mut payload = Vec::with_capacity(schema.payload_len);
        for field in &schema.wire {
            if field.primitive == PrimitiveType::Char {
                write_chars(&mut payload, field, fields.get(&field.name))?;
                continue;
            }
            if field.is_repeated() {
                for i in 0..field.count() {
                    let name = format!("{}{}", field.name, i);
                    write_primitive(&mut payload, field.primitive, &name, fields.get(&name))?;
                }
            } else {
                write_primitive(&mut payload, field.primitive, &field.name, fields.get(&field.name))?;
            }
        }

        let mut packet = Packet {
            header: PacketHeader {
                len: payload.len() as u8,
                seq: sender.seq,
                system_id: sender.system_id,
                component_id: sender.component_id,
                kind,
            },
            payload,
            checksum: 0,
        };
        packet.checksum = frame_checksum(&packet.checksum_body(), schema.crc_extra);
        Ok(packet)
    }

    /// Build a packet by message name
    pub fn pack_named(
        &self,
        name: &str,
        fields: &HashMap<String, Value>,
        sender: SenderInfo,
    ) -> Result<Packet, ProtocolError> {
        let kind = self
            .registry
            .by_name(name)
            .map(|s| s.id)
            .ok_or_else(|| ProtocolError::UnknownMessage(name.to_string()))?;
        self.pack(kind, fields, sender)
    }

    /// Serialize a packet, recomputing its length and checksum
    pub fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        let seed = self
            .registry
            .crc_extra(packet.header.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(Box::new(packet.clone())))?;
        let len = u8::try_from(packet.payload.len()).map_err(|_| ProtocolError::InvalidValue {
            field: "payload".to_string(),
            value: format!("{} bytes", packet.payload.len()),
        })?;

        let mut fixed = packet.clone();
        fixed.header.len = len;
        fixed.checksum = frame_checksum(&fixed.checksum_body(), seed);
        Ok(fixed.to_bytes())
    }

    fn schema_for(&self, packet: &Packet) -> Result<&MessageSchema, ProtocolError> {
        self.registry
            .get(packet.header.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(Box::new(packet.clone())))
    }
}

fn read_primitive(primitive: PrimitiveType, bytes: &[u8]) -> Value {
    match primitive {
        PrimitiveType::U8 | PrimitiveType::Char => Value::U8(bytes[0]),
        PrimitiveType::I8 => Value::I8(bytes[0] as i8),
        PrimitiveType::U16 => Value::U16(LittleEndian::read_u16(bytes)),
        PrimitiveType::I16 => Value::I16(LittleEndian::read_i16(bytes)),
        PrimitiveType::U32 => Value::U32(LittleEndian::read_u32(bytes)),
        PrimitiveType::I32 => Value::I32(LittleEndian::read_i32(bytes)),
        PrimitiveType::U64 => Value::U64(LittleEndian::read_u64(bytes)),
        PrimitiveType::I64 => Value::I64(LittleEndian::read_i64(bytes)),
        PrimitiveType::F32 => Value::F32(LittleEndian::read_f32(bytes)),
        PrimitiveType::F64 => Value::F64(LittleEndian::read_f64(bytes)),
    }
}

fn write_chars(out: &mut Vec<u8>, field: &FieldDef, value: Option<&Value>) -> Result<(), ProtocolError> {
    let len = field.count();
    let bytes = match value {
        None => &[][..],
        Some(Value::Text(bytes)) => bytes.as_slice(),
        Some(other) => {
            return Err(ProtocolError::InvalidValue {
                field: field.name.clone(),
                value: format!("{:?}", other),
            })
        }
    };
    let take = bytes.len().min(len);
    out.extend_from_slice(&bytes[..take]);
    out.resize(out.len() + (len - take), 0);
    Ok(())
}

fn write_primitive(
    out: &mut Vec<u8>,
    primitive: PrimitiveType,
    name: &str,
    value: Option<&Value>,
) -> Result<(), ProtocolError> {
    let value = value.cloned().unwrap_or_else(|| Value::zero(primitive));
    let invalid = || ProtocolError::InvalidValue {
        field: name.to_string(),
        value: format!("{:?}", value),
    };

    let start = out.len();
    out.resize(start + primitive.size(), 0);
    let slot = &mut out[start..];

    match primitive {
        PrimitiveType::F32 => {
            let v = match value {
                Value::F32(v) => v,
                ref other => other.as_f64().ok_or_else(invalid)? as f32,
            };
            LittleEndian::write_f32(slot, v);
        }
        PrimitiveType::F64 => {
            LittleEndian::write_f64(slot, value.as_f64().ok_or_else(invalid)?);
        }
        _ => {
            let v = value.as_i128().ok_or_else(invalid)?;
            match primitive {
                PrimitiveType::U8 | PrimitiveType::Char => {
                    slot[0] = u8::try_from(v).map_err(|_| invalid())?
                }
                PrimitiveType::I8 => slot[0] = i8::try_from(v).map_err(|_| invalid())? as u8,
                PrimitiveType::U16 => {
                    LittleEndian::write_u16(slot, u16::try_from(v).map_err(|_| invalid())?)
                }
                PrimitiveType::I16 => {
                    LittleEndian::write_i16(slot, i16::try_from(v).map_err(|_| invalid())?)
                }
                PrimitiveType::U32 => {
                    LittleEndian::write_u32(slot, u32::try_from(v).map_err(|_| invalid())?)
                }
                PrimitiveType::I32 => {
                    LittleEndian::write_i32(slot, i32::try_from(v).map_err(|_| invalid())?)
                }
                PrimitiveType::U64 => {
                    LittleEndian::write_u64(slot, u64::try_from(v).map_err(|_| invalid())?)
                }
                PrimitiveType::I64 => {
                    LittleEndian::write_i64(slot, i64::try_from(v).map_err(|_| invalid())?)
                }
                PrimitiveType::F32 | PrimitiveType::F64 => unreachable!("handled above"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn codec() -> Codec {
        Codec::new(Arc::new(SchemaRegistry::builtin().unwrap()))
    }

    const HEARTBEAT_VECTOR: [u8; 17] = [
        0xFE, 0x09, 0x00, 0x01, 0xC8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x5A, 0x3E,
    ];

    #[test]
    fn test_decode_known_vector() {
        let packet = codec().decode(&HEARTBEAT_VECTOR).expect("vector should decode");
        assert_eq!(packet.header.kind, 0);
        assert_eq!(packet.header.system_id, 1);
        assert_eq!(packet.header.component_id, 0xC8);
        assert_eq!(packet.payload, vec![0u8; 9]);
        assert_eq!(packet.checksum, 0x3E5A);
    }

    #[test]
    fn test_truncated_frame() {
        let codec = codec();
        assert!(matches!(
            codec.decode(&HEARTBEAT_VECTOR[..5]),
            Err(ProtocolError::Truncated { needed: 8, available: 5 })
        ));
        assert!(matches!(
            codec.decode(&HEARTBEAT_VECTOR[..12]),
            Err(ProtocolError::Truncated { needed: 17, available: 12 })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = HEARTBEAT_VECTOR;
        bytes[0] = 0x55;
        assert!(matches!(codec().decode(&bytes), Err(ProtocolError::BadMagic(0x55))));
    }

    #[test]
    fn test_unknown_kind_keeps_packet() {
        let bytes = [0xFE, 0x01, 0x00, 0x01, 0x01, 0xEE, 0x42, 0x00, 0x00];
        let err = codec().decode(&bytes).unwrap_err();
        let packet = err.into_unknown_packet().expect("packet should be returned");
        assert_eq!(packet.header.kind, 0xEE);
        assert_eq!(packet.payload, vec![0x42]);
    }

    #[test]
    fn test_unpack_heartbeat_wire_order() {
        let codec = codec();
        let mut fields = HashMap::new();
        fields.insert("custom_mode".to_string(), Value::U32(0x0403_0000));
        fields.insert("type".to_string(), Value::U8(2));
        fields.insert("base_mode".to_string(), Value::U8(0x81));
        fields.insert("mavlink_version".to_string(), Value::U8(3));
        let packet = codec.pack(0, &fields, SenderInfo::default()).unwrap();

        // custom_mode (4 bytes) is laid out first
        assert_eq!(&packet.payload[..4], &[0x00, 0x00, 0x03, 0x04]);
        assert_eq!(packet.payload[4], 2);

        let msg = codec.unpack(&packet).unwrap();
        assert_eq!(msg.name, "HEARTBEAT");
        assert_eq!(msg.get("custom_mode"), Some(&Value::U32(0x0403_0000)));
        assert_eq!(msg.get("autopilot"), Some(&Value::U8(0)));
    }

    #[test]
    fn test_unpack_underrun() {
        let codec = codec();
        let packet = Packet {
            header: PacketHeader {
                len: 2,
                seq: 0,
                system_id: 1,
                component_id: 1,
                kind: 0,
            },
            payload: vec![0, 0],
            checksum: 0,
        };
        assert!(matches!(
            codec.unpack(&packet),
            Err(ProtocolError::Underrun { kind: 0, needed: 9, available: 2 })
        ));
    }

    #[test]
    fn test_char_array_not_trimmed() {
        let codec = codec();
        let mut fields = HashMap::new();
        fields.insert("param_id".to_string(), Value::text("RATE_P"));
        fields.insert("param_value".to_string(), Value::F32(0.15));
        let packet = codec.pack_named("PARAM_VALUE", &fields, SenderInfo::default()).unwrap();
        let msg = codec.unpack(&packet).unwrap();

        let raw = msg.get("param_id").and_then(Value::as_bytes).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(&raw[..6], b"RATE_P");
        assert!(raw[6..].iter().all(|&b| b == 0));
        assert_eq!(msg.get_str("param_id").as_deref(), Some("RATE_P"));
    }

    #[test]
    fn test_array_fields_are_numbered() {
        let codec = codec();
        let mut fields = HashMap::new();
        for i in 0..4 {
            fields.insert(format!("q{}", i), Value::F32(i as f32 * 0.5));
        }
        let packet = codec.pack_named("ATTITUDE_TARGET", &fields, SenderInfo::default()).unwrap();
        let msg = codec.unpack(&packet).unwrap();
        assert_eq!(msg.get("q3"), Some(&Value::F32(1.5)));
        assert!(msg.get("q").is_none());
    }

    #[test]
    fn test_pack_rejects_out_of_range() {
        let codec = codec();
        let mut fields = HashMap::new();
        fields.insert("result".to_string(), Value::I32(300));
        assert!(matches!(
            codec.pack_named("COMMAND_ACK", &fields, SenderInfo::default()),
            Err(ProtocolError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_encode_recomputes_checksum() {
        let codec = codec();
        let mut packet = codec.decode(&HEARTBEAT_VECTOR).unwrap();
        packet.checksum = 0;
        packet.header.len = 0;
        assert_eq!(codec.encode(&packet).unwrap(), HEARTBEAT_VECTOR.to_vec());
    }

    #[test]
    fn test_single_element_array_is_scalar() {
        let xml = r#"<mavlink><messages>
            <message id="151" name="ONE_SLOT">
              <field type="uint8_t[1]" name="x"/>
              <field type="uint16_t[2]" name="y"/>
            </message>
        </messages></mavlink>"#;
        let codec = Codec::new(Arc::new(SchemaRegistry::from_xml_str(xml).unwrap()));

        let mut fields = HashMap::new();
        fields.insert("x".to_string(), Value::U8(7));
        fields.insert("y1".to_string(), Value::U16(900));
        let packet = codec.pack(151, &fields, SenderInfo::default()).unwrap();
        let msg = codec.unpack(&packet).unwrap();

        assert_eq!(msg.get("x"), Some(&Value::U8(7)));
        assert!(msg.get("x0").is_none());
        assert_eq!(msg.get("y0"), Some(&Value::U16(0)));
        assert_eq!(msg.get("y1"), Some(&Value::U16(900)));
    }
}
