//! Serializer selection per entity type

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigResult;
use crate::validation::Validatable;

/// Available payload serializers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    Json,
    Binary,
    Xml,
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializerKind::Json => write!(f, "json"),
            SerializerKind::Binary => write!(f, "binary"),
            SerializerKind::Xml => write!(f, "xml"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializationConfig {
    /// Serializer for entity types without an override
    pub default: SerializerKind,

    /// Overrides by entity type name
    pub entities: BTreeMap<String, SerializerKind>,
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self {
            default: SerializerKind::Json,
            entities: BTreeMap::new(),
        }
    }
}

impl SerializationConfig {
    pub fn serializer_for(&self, entity_type: &str) -> SerializerKind {
        self.entities
            .get(entity_type)
            .copied()
            .unwrap_or(self.default)
    }

    pub fn with_override(mut self, entity_type: impl Into<String>, kind: SerializerKind) -> Self {
        self.entities.insert(entity_type.into(), kind);
        self
    }
}

impl Validatable for SerializationConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.entities.keys().any(|name| name.trim().is_empty()) {
            return Err(self.validation_error("entity type names cannot be empty"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "serialization"
    }
}
