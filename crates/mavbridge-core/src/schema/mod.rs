//! Message Schema Registry
//!
//! Holds the field layout and checksum seed of every message kind the codec
//! understands. A registry is loaded once at start, either from the
//! built-in dialect or from a dialect XML file, and is shared read-only
//! with the codec afterwards.

mod error;
mod parser;
mod types;

pub use error::SchemaError;
pub use parser::parse_dialect;
pub use types::{derive_crc_extra, wire_order, FieldDef, MessageSchema, PrimitiveType};

use std::collections::HashMap;
use std::path::Path;

/// Dialect compiled into the crate
pub const BUILTIN_DIALECT: &str = include_str!("dialect.xml");

/// Message kinds by id and by name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    by_id: HashMap<u8, MessageSchema>,
    by_name: HashMap<String, u8>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the built-in dialect
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_xml_str(BUILTIN_DIALECT)
    }

    /// Load a dialect from an XML string
    pub fn from_xml_str(xml: &str) -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        for schema in parse_dialect(xml)? {
            registry.insert(schema)?;
        }
        Ok(registry)
    }

    /// Load a dialect from an XML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let xml = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_xml_str(&xml)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            kinds = registry.len(),
            "Loaded message dialect"
        );
        Ok(registry)
    }

    /// Register a message kind. Ids must be unique.
    pub fn insert(&mut self, schema: MessageSchema) -> Result<(), SchemaError> {
        if let Some(existing) = self.by_id.get(&schema.id) {
            return Err(SchemaError::DuplicateId {
                id: schema.id,
                first: existing.name.clone(),
                second: schema.name,
            });
        }
        self.by_name.insert(schema.name.clone(), schema.id);
        self.by_id.insert(schema.id, schema);
        Ok(())
    }

    /// Look up a kind by id
    pub fn get(&self, id: u8) -> Option<&MessageSchema> {
        self.by_id.get(&id)
    }

    /// Look up a kind by message name
    pub fn by_name(&self, name: &str) -> Option<&MessageSchema> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Checksum seed for a kind
    pub fn crc_extra(&self, id: u8) -> Option<u8> {
        self.by_id.get(&id).map(|s| s.crc_extra)
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when no kinds are registered
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterate over all registered kinds (unordered)
    pub fn iter(&self) -> impl Iterator<Item = &MessageSchema> {
        self.by_id.values()
    }
}
