use mavbridge_core::protocol::{Codec, FrameCodec, ProtocolError, SenderInfo, Value};
use mavbridge_core::schema::{FieldDef, PrimitiveType, SchemaRegistry};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

fn builtin_codec() -> Codec {
    Codec::new(Arc::new(SchemaRegistry::builtin().unwrap()))
}

fn sender() -> SenderInfo {
    SenderInfo {
        seq: 42,
        system_id: 1,
        component_id: 1,
    }
}

/// A value that exercises the upper bytes of the type, different per `n`
fn sample(primitive: PrimitiveType, n: usize) -> Value {
    let n = n as i64 + 1;
    match primitive {
        PrimitiveType::U8 => Value::U8((n * 37 % 256) as u8),
        PrimitiveType::I8 => Value::I8(-((n * 13 % 128) as i8)),
        PrimitiveType::U16 => Value::U16((n * 4099 % 65536) as u16),
        PrimitiveType::I16 => Value::I16(-((n * 3001 % 32768) as i16)),
        PrimitiveType::U32 => Value::U32((n * 0x0101_0101) as u32),
        PrimitiveType::I32 => Value::I32(-(n as i32) * 1_000_003),
        PrimitiveType::U64 => Value::U64(n as u64 * 0x0102_0304_0506_0708),
        PrimitiveType::I64 => Value::I64(-n * 0x0001_0203_0405_0607),
        PrimitiveType::F32 => Value::F32(n as f32 * -1.25),
        PrimitiveType::F64 => Value::F64(n as f64 * 3.5e10),
        PrimitiveType::Char => Value::text("HELLO"),
    }
}

/// Fields to pack, and what unpacking them must produce
fn sample_fields(wire: &[FieldDef]) -> (HashMap<String, Value>, HashMap<String, Value>) {
    let mut input = HashMap::new();
    let mut expected = HashMap::new();
    let mut n = 0;
    for field in wire {
        if field.primitive == PrimitiveType::Char {
            let len = field.count();
            let mut padded = b"HELLO".to_vec();
            padded.resize(len, 0);
            padded.truncate(len);
            input.insert(field.name.clone(), Value::text("HELLO"));
            expected.insert(field.name.clone(), Value::Text(padded));
        } else if field.is_repeated() {
            for i in 0..field.count() {
                let value = sample(field.primitive, n);
                n += 1;
                input.insert(format!("{}{}", field.name, i), value.clone());
                expected.insert(format!("{}{}", field.name, i), value);
            }
        } else {
            let value = sample(field.primitive, n);
            n += 1;
            input.insert(field.name.clone(), value.clone());
            expected.insert(field.name.clone(), value);
        }
    }
    (input, expected)
}

#[test]
fn test_round_trip_every_builtin_kind() {
    let codec = builtin_codec();
    // Decode with an independent instance
    let other = builtin_codec();

    for schema in codec.registry().iter() {
        let (input, expected) = sample_fields(&schema.wire);
        let packet = codec.pack(schema.id, &input, sender()).unwrap();
        assert_eq!(packet.payload.len(), schema.payload_len, "{}", schema.name);

        let bytes = codec.encode(&packet).unwrap();
        let decoded = other.decode(&bytes).unwrap();
        assert_eq!(decoded, packet, "{}", schema.name);

        let msg = other.unpack(&decoded).unwrap();
        assert_eq!(msg.name, schema.name);
        assert_eq!(msg.fields, expected, "{}", schema.name);
    }
}

#[test]
fn test_known_heartbeat_vector() {
    let codec = builtin_codec();
    let bytes = [
        0xFE, 0x09, 0x00, 0x01, 0xC8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x5A, 0x3E,
    ];
    let packet = codec.decode(&bytes).unwrap();
    assert_eq!(packet.header.kind, 0);
    assert_eq!(packet.header.system_id, 1);
    assert_eq!(packet.header.component_id, 0xC8);
    assert_eq!(packet.payload, vec![0u8; 9]);
    assert_eq!(packet.checksum, 0x3E5A);
    assert_eq!(codec.encode(&packet).unwrap(), bytes.to_vec());
}

#[test]
fn test_single_byte_corruption_is_rejected() {
    let codec = builtin_codec();
    let mut fields = HashMap::new();
    fields.insert("param_id".to_string(), Value::text("MPC_XY_VEL_MAX"));
    fields.insert("param_value".to_string(), Value::F32(12.0));
    fields.insert("param_count".to_string(), Value::U16(812));
    fields.insert("param_index".to_string(), Value::U16(301));
    let packet = codec.pack_named("PARAM_VALUE", &fields, sender()).unwrap();
    let bytes = codec.encode(&packet).unwrap();

    for i in 0..bytes.len() {
        for flip in [0x01u8, 0x80, 0xFF] {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= flip;
            let result = codec.decode(&corrupt);
            match i {
                // start byte, length and kind change how the frame is read
                0 => assert!(matches!(result, Err(ProtocolError::BadMagic(_)))),
                1 | 5 => assert!(result.is_err(), "byte {} flip {:#x}", i, flip),
                _ => assert!(
                    matches!(result, Err(ProtocolError::Checksum { .. })),
                    "byte {} flip {:#x}: {:?}",
                    i,
                    flip,
                    result
                ),
            }
        }
    }
}

#[test]
fn test_unknown_kind_returns_packet() {
    let codec = builtin_codec();
    let bytes = [0xFE, 1, 7, 3, 1, 199, 0x55, 0x12, 0x34];
    match codec.decode(&bytes) {
        Err(ProtocolError::UnknownKind(packet)) => {
            assert_eq!(packet.header.seq, 7);
            assert_eq!(packet.payload, vec![0x55]);
            assert_eq!(packet.checksum, 0x3412);
        }
        other => panic!("expected unknown kind, got {:?}", other),
    }
}

#[test]
fn test_registry_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"<?xml version="1.0"?>
<mavlink>
  <messages>
    <message id="150" name="SENSOR_OFFSETS_LITE">
      <field type="int16_t" name="mag_ofs_x">x</field>
      <field type="float" name="mag_declination">declination</field>
      <field type="uint8_t[3]" name="flags">flags</field>
    </message>
  </messages>
</mavlink>"#
    )
    .unwrap();

    let registry = SchemaRegistry::from_file(file.path()).unwrap();
    let schema = registry.by_name("SENSOR_OFFSETS_LITE").unwrap();
    assert_eq!(schema.id, 150);
    assert_eq!(schema.payload_len, 4 + 2 + 3);
    let order: Vec<&str> = schema.wire.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(order, vec!["mag_declination", "mag_ofs_x", "flags"]);

    let codec = Codec::new(Arc::new(registry));
    let mut fields = HashMap::new();
    fields.insert("flags2".to_string(), Value::U8(9));
    let packet = codec.pack(150, &fields, sender()).unwrap();
    let msg = codec.unpack(&codec.decode(&codec.encode(&packet).unwrap()).unwrap()).unwrap();
    assert_eq!(msg.get("flags2"), Some(&Value::U8(9)));
    assert_eq!(msg.get("flags0"), Some(&Value::U8(0)));
    assert_eq!(msg.get("mag_ofs_x"), Some(&Value::I16(0)));
}

#[test]
fn test_stream_framing_recovers_after_noise() {
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    let codec = Arc::new(builtin_codec());
    let mut fields = HashMap::new();
    fields.insert("severity".to_string(), Value::U8(4));
    fields.insert("text".to_string(), Value::text("Low battery"));
    let packet = codec.pack_named("STATUSTEXT", &fields, sender()).unwrap();
    let good = codec.encode(&packet).unwrap();

    let mut stream = vec![0x00, 0xFE, 0x13, 0x37];
    let mut corrupt = good.clone();
    corrupt[10] ^= 0x20;
    stream.extend_from_slice(&corrupt);
    stream.extend_from_slice(&good);

    let mut framer = FrameCodec::new(codec);
    let mut buf = BytesMut::from(&stream[..]);
    let mut frames = Vec::new();
    while let Some(item) = framer.decode(&mut buf).unwrap() {
        if let Ok(frame) = item {
            frames.push(frame);
        }
    }
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].raw, good);
    assert_eq!(frames[0].packet, packet);
}
