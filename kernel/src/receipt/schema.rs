//! Receipt schema: the declared payload shape of every receipt type.
//!
//! The schema document (`kernel/schema/receipt_schema_v1.json`) maps each
//! receipt type to its required payload fields and their allowed JSON
//! types. The ledger validates every append against it.
//!
//! Fail-closed:
//! - payload not a JSON object → error
//! - declared field missing → error
//! - field present with a type not in its allowed list → error
//! - field not declared for the type → error

use std::collections::BTreeMap;

use serde::Deserialize;

use super::ReceiptType;
use crate::proof::canon::canonical_json_bytes;
use crate::proof::hash::{canonical_hash, ContentHash, HashDomain};

/// The V1 schema document, embedded at build time.
pub const RECEIPT_SCHEMA_V1_JSON: &str = include_str!("../../schema/receipt_schema_v1.json");

const SCHEMA_VERSION_V1: &str = "receipt_schema.v1";

/// JSON type names used in the schema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_f64() => "number",
        serde_json::Value::Number(_) => "integer",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Schema document loading and validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema document parse error: {detail}")]
    DocumentParse { detail: String },
    #[error("schema version mismatch: {found:?}")]
    VersionMismatch { found: String },
    #[error("schema document declares no fields for receipt type {receipt_type}")]
    MissingType { receipt_type: ReceiptType },
    #[error("{receipt_type} payload is not a JSON object")]
    NotAnObject { receipt_type: ReceiptType },
    #[error("{receipt_type} payload missing required field {field:?}")]
    MissingField {
        receipt_type: ReceiptType,
        field: String,
    },
    #[error("{receipt_type} payload field {field:?} has type {found}")]
    WrongType {
        receipt_type: ReceiptType,
        field: String,
        found: String,
    },
    #[error("{receipt_type} payload has undeclared field {field:?}")]
    UndeclaredField {
        receipt_type: ReceiptType,
        field: String,
    },
}

#[derive(Deserialize)]
struct SchemaDocument {
    schema_version: String,
    receipt_types: BTreeMap<String, BTreeMap<String, Vec<JsonType>>>,
}

/// Parsed receipt schema.
#[derive(Debug, Clone)]
pub struct ReceiptSchema {
    types: BTreeMap<ReceiptType, BTreeMap<String, Vec<JsonType>>>,
    digest: ContentHash,
}

impl ReceiptSchema {
    /// Load the embedded V1 schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the embedded document is malformed.
    pub fn v1() -> Result<Self, SchemaError> {
        Self::parse(RECEIPT_SCHEMA_V1_JSON)
    }

    /// Parse a schema document. Every [`ReceiptType`] must be declared.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] on parse failure, version mismatch, or an
    /// undeclared receipt type.
    pub fn parse(json: &str) -> Result<Self, SchemaError> {
        let raw: serde_json::Value =
            serde_json::from_str(json).map_err(|e| SchemaError::DocumentParse {
                detail: e.to_string(),
            })?;
        let doc = SchemaDocument::deserialize(&raw).map_err(|e| SchemaError::DocumentParse {
            detail: e.to_string(),
        })?;
        if doc.schema_version != SCHEMA_VERSION_V1 {
            return Err(SchemaError::VersionMismatch {
                found: doc.schema_version,
            });
        }
        let mut types = BTreeMap::new();
        for (name, fields) in doc.receipt_types {
            let receipt_type: ReceiptType =
                name.parse().map_err(|e: super::ReceiptError| SchemaError::DocumentParse {
                    detail: e.to_string(),
                })?;
            types.insert(receipt_type, fields);
        }
        for receipt_type in ReceiptType::ALL {
            if !types.contains_key(&receipt_type) {
                return Err(SchemaError::MissingType { receipt_type });
            }
        }
        let canonical = canonical_json_bytes(&raw).map_err(|e| SchemaError::DocumentParse {
            detail: e.to_string(),
        })?;
        Ok(Self {
            types,
            digest: canonical_hash(HashDomain::ReceiptSchema, &canonical),
        })
    }

    /// Digest of the canonical schema document.
    #[must_use]
    pub fn digest(&self) -> &ContentHash {
        &self.digest
    }

    /// Declared field names for a receipt type, in sorted order.
    #[must_use]
    pub fn fields(&self, receipt_type: ReceiptType) -> Vec<&str> {
        self.types
            .get(&receipt_type)
            .map(|fields| fields.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Validate a payload against the declared shape of `receipt_type`.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found, checking declared fields in
    /// sorted order before undeclared ones.
    pub fn validate(
        &self,
        receipt_type: ReceiptType,
        payload: &serde_json::Value,
    ) -> Result<(), SchemaError> {
        let declared = self
            .types
            .get(&receipt_type)
            .ok_or(SchemaError::MissingType { receipt_type })?;
        let object = payload
            .as_object()
            .ok_or(SchemaError::NotAnObject { receipt_type })?;

        for (field, allowed) in declared {
            let value = object.get(field).ok_or_else(|| SchemaError::MissingField {
                receipt_type,
                field: field.clone(),
            })?;
            if !allowed.iter().any(|t| t.matches(value)) {
                return Err(SchemaError::WrongType {
                    receipt_type,
                    field: field.clone(),
                    found: json_type_name(value).to_string(),
                });
            }
        }
        if let Some(extra) = object.keys().find(|k| !declared.contains_key(*k)) {
            return Err(SchemaError::UndeclaredField {
                receipt_type,
                field: extra.clone(),
            });
        }
        Ok(())
    }
}
