//! Dialect XML parser.
//!
//! Reads `<message>` definitions from a MAVLink-style XML dialect. Enum
//! definitions and descriptions are skipped; only the information needed
//! for the wire layout is kept.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::types::{FieldDef, MessageSchema};
use super::SchemaError;

/// Message under construction
#[derive(Debug)]
struct PendingMessage {
    id: u8,
    name: String,
    crc_extra: Option<u8>,
    fields: Vec<FieldDef>,
    in_extensions: bool,
}

/// Parse every message definition in a dialect document.
pub fn parse_dialect(xml: &str) -> Result<Vec<MessageSchema>, SchemaError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut messages = Vec::new();
    let mut current: Option<PendingMessage> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => match e.name().as_ref() {
                b"message" => current = Some(start_message(e)?),
                b"field" => push_field(current.as_mut(), e)?,
                _ => {}
            },
            Event::Empty(ref e) => match e.name().as_ref() {
                b"field" => push_field(current.as_mut(), e)?,
                b"extensions" => {
                    if let Some(msg) = current.as_mut() {
                        msg.in_extensions = true;
                    }
                }
                _ => {}
            },
            Event::End(ref e) => {
                if e.name().as_ref() == b"message" {
                    if let Some(msg) = current.take() {
                        messages.push(finish_message(msg)?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

fn start_message(e: &BytesStart) -> Result<PendingMessage, SchemaError> {
    let name = require_attribute(e, "message", "name")?;
    let raw_id = require_attribute(e, "message", "id")?;
    let id = raw_id
        .trim()
        .parse::<u8>()
        .map_err(|_| SchemaError::InvalidAttribute {
            attribute: "id".to_string(),
            value: raw_id.clone(),
        })?;
    let crc_extra = match get_attribute(e, "crc_extra") {
        Some(raw) => Some(raw.trim().parse::<u8>().map_err(|_| {
            SchemaError::InvalidAttribute {
                attribute: "crc_extra".to_string(),
                value: raw.clone(),
            }
        })?),
        None => None,
    };

    Ok(PendingMessage {
        id,
        name,
        crc_extra,
        fields: Vec::new(),
        in_extensions: false,
    })
}

fn push_field(current: Option<&mut PendingMessage>, e: &BytesStart) -> Result<(), SchemaError> {
    // Fields outside a message (e.g. in enums) are not part of any layout
    let Some(msg) = current else {
        return Ok(());
    };
    // MAVLink 1 frames never carry extension fields
    if msg.in_extensions {
        return Ok(());
    }

    let name = require_attribute(e, "field", "name")?;
    let ty = require_attribute(e, "field", "type")?;
    let (primitive, array_len) =
        FieldDef::parse_type(&ty).ok_or_else(|| SchemaError::UnknownType {
            message: msg.name.clone(),
            field: name.clone(),
            ty: ty.clone(),
        })?;

    msg.fields.push(FieldDef {
        name,
        primitive,
        array_len,
    });
    Ok(())
}

fn finish_message(msg: PendingMessage) -> Result<MessageSchema, SchemaError> {
    let schema = MessageSchema::new(msg.id, msg.name, msg.fields, msg.crc_extra);
    if schema.payload_len > u8::MAX as usize {
        return Err(SchemaError::PayloadTooLarge {
            name: schema.name,
            len: schema.payload_len,
        });
    }
    Ok(schema)
}

fn get_attribute(e: &BytesStart, name: &str) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name.as_bytes() {
            return Some(String::from_utf8_lossy(&attr.value).to_string());
        }
    }
    None
}

fn require_attribute(e: &BytesStart, element: &str, name: &str) -> Result<String, SchemaError> {
    get_attribute(e, name).ok_or_else(|| SchemaError::MissingAttribute {
        element: element.to_string(),
        attribute: name.to_string(),
    })
}
