// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Field-encryption schema registry
//!
//! Schemas are registered once while the application starts and the
//! registry is then shared behind an `Arc`, read-only, for every call.

use std::collections::{BTreeSet, HashMap};

use super::error::CodecError;

/// Which top-level fields of a payload are encrypted, and under which section
///
/// Only constructed through [`FieldSchema::new`]; config files describe
/// schemas with `SchemaConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    schema_id: String,
    section: String,
    fields: Vec<String>,
}

impl FieldSchema {
    /// Duplicate field names are dropped; first occurrence keeps its position
    pub fn new<I, S>(schema_id: impl Into<String>, section: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered: Vec<String> = Vec::new();
        for field in fields {
            let field = field.into();
            if !ordered.contains(&field) {
                ordered.push(field);
            }
        }
        Self {
            schema_id: schema_id.into(),
            section: section.into(),
            fields: ordered,
        }
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, FieldSchema>,
    sections: BTreeSet<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema; its section becomes a known section
    pub fn register(&mut self, schema: FieldSchema) -> Result<(), CodecError> {
        if schema.schema_id.is_empty() {
            return Err(CodecError::UnknownSchema(String::new()));
        }
        if schema.section.is_empty() {
            return Err(CodecError::UnknownSection(String::new()));
        }
        if self.schemas.contains_key(&schema.schema_id) {
            return Err(CodecError::DuplicateSchema(schema.schema_id));
        }
        self.sections.insert(schema.section.clone());
        self.schemas.insert(schema.schema_id.clone(), schema);
        Ok(())
    }

    /// Declare a section usable for full-payload encryption
    pub fn register_section(&mut self, section: impl Into<String>) -> Result<(), CodecError> {
        let section = section.into();
        if section.is_empty() {
            return Err(CodecError::UnknownSection(section));
        }
        self.sections.insert(section);
        Ok(())
    }

    pub fn get(&self, schema_id: &str) -> Result<&FieldSchema, CodecError> {
        self.schemas
            .get(schema_id)
            .ok_or_else(|| CodecError::UnknownSchema(schema_id.to_string()))
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains(section)
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
