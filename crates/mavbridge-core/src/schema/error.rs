//! Error types for dialect loading

use thiserror::Error;

/// Errors that can occur while loading a message dialect
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Missing attribute '{attribute}' on <{element}>")]
    MissingAttribute { element: String, attribute: String },

    #[error("Invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute { attribute: String, value: String },

    #[error("Unknown field type '{ty}' for {message}.{field}")]
    UnknownType {
        message: String,
        field: String,
        ty: String,
    },

    #[error("Duplicate message id {id} ({first} and {second})")]
    DuplicateId {
        id: u8,
        first: String,
        second: String,
    },

    #[error("Message {name} payload of {len} bytes exceeds 255")]
    PayloadTooLarge { name: String, len: usize },
}
