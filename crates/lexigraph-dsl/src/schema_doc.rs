//! Schema documents (`"@type": "Class"` / `"@type": "Enum"`).
//!
//! The schema is written as a list of JSON documents:
//!
//! ```text
//! { "@id": "Person", "@type": "Class",
//!   "@key": { "@type": "Lexical", "@fields": ["name"] },
//!   "name": "xsd:string",
//!   "friend": { "@type": "Set", "@class": "Person" } }
//! { "@id": "Rocks", "@type": "Enum", "@value": ["Big", "Medium", "Small"] }
//! ```
//!
//! This module only turns JSON into a typed AST. Name resolution, inheritance
//! closure and collision checks happen when the schema is compiled by the
//! engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use thiserror::Error;

pub type Name = String;

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaDoc {
    Class(ClassDoc),
    Enum(EnumDoc),
}

impl SchemaDoc {
    pub fn id(&self) -> &str {
        match self {
            SchemaDoc::Class(c) => &c.id,
            SchemaDoc::Enum(e) => &e.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassDoc {
    pub id: Name,
    pub inherits: Vec<Name>,
    pub key: Option<KeyDoc>,
    pub is_abstract: bool,
    /// Own fields, in document order.
    pub fields: Vec<FieldDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnumDoc {
    pub id: Name,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDoc {
    pub name: Name,
    pub cardinality: Cardinality,
    /// `xsd:*` primitive, enum id or class id.
    pub target: Name,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Required,
    Optional,
    Set,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyDoc {
    Lexical { fields: Vec<Name> },
    Hash { fields: Vec<Name> },
    ValueHash,
    Random,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("document #{index}: expected a JSON object")]
    NotAnObject { index: usize },
    #[error("document #{index}: missing `{key}`")]
    MissingKey { index: usize, key: &'static str },
    #[error("document `{id}`: {message}")]
    Invalid { id: String, message: String },
}

impl DocumentError {
    fn invalid(id: &str, message: impl Into<String>) -> Self {
        DocumentError::Invalid {
            id: id.to_string(),
            message: message.into(),
        }
    }
}

/// Annotation keys that carry no meaning for the engine.
const IGNORED_ANNOTATIONS: &[&str] = &["@documentation", "@metadata", "@unfoldable", "@base"];

// ============================================================================
// Parser
// ============================================================================

/// Parse a JSON array (or a single object) of schema documents.
pub fn parse_schema_documents(text: &str) -> Result<Vec<SchemaDoc>, DocumentError> {
    let json: Json = serde_json::from_str(text).map_err(|e| DocumentError::Json(e.to_string()))?;
    schema_documents_from_json(&json)
}

pub fn schema_documents_from_json(json: &Json) -> Result<Vec<SchemaDoc>, DocumentError> {
    match json {
        Json::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| schema_doc_from_json(index, item))
            .collect(),
        other => Ok(vec![schema_doc_from_json(0, other)?]),
    }
}

pub fn schema_doc_from_json(index: usize, json: &Json) -> Result<SchemaDoc, DocumentError> {
    let obj = json
        .as_object()
        .ok_or(DocumentError::NotAnObject { index })?;
    let id = obj
        .get("@id")
        .and_then(Json::as_str)
        .ok_or(DocumentError::MissingKey { index, key: "@id" })?;
    let ty = obj
        .get("@type")
        .and_then(Json::as_str)
        .ok_or(DocumentError::MissingKey { index, key: "@type" })?;

    match ty {
        "Class" => parse_class(id, obj).map(SchemaDoc::Class),
        "Enum" => parse_enum(id, obj).map(SchemaDoc::Enum),
        other => Err(DocumentError::invalid(
            id,
            format!("unsupported schema document type `{other}` (expected Class or Enum)"),
        )),
    }
}

fn parse_enum(id: &str, obj: &Map<String, Json>) -> Result<EnumDoc, DocumentError> {
    let values = obj
        .get("@value")
        .and_then(Json::as_array)
        .ok_or_else(|| DocumentError::invalid(id, "enum expects `@value: [..]`"))?;
    let values = values
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| DocumentError::invalid(id, "enum values must be strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(EnumDoc {
        id: id.to_string(),
        values,
    })
}

fn parse_class(id: &str, obj: &Map<String, Json>) -> Result<ClassDoc, DocumentError> {
    let mut class = ClassDoc {
        id: id.to_string(),
        inherits: Vec::new(),
        key: None,
        is_abstract: false,
        fields: Vec::new(),
    };

    for (key, value) in obj {
        match key.as_str() {
            "@id" | "@type" => {}
            "@inherits" => class.inherits = parse_inherits(id, value)?,
            "@key" => class.key = Some(parse_key(id, value)?),
            // `"@abstract": []` is the usual spelling; a boolean is accepted too.
            "@abstract" => class.is_abstract = !matches!(value, Json::Bool(false)),
            k if IGNORED_ANNOTATIONS.contains(&k) => {}
            k if k.starts_with('@') => {
                return Err(DocumentError::invalid(id, format!("unknown annotation `{k}`")));
            }
            field => class.fields.push(parse_field(id, field, value)?),
        }
    }

    Ok(class)
}

fn parse_inherits(id: &str, value: &Json) -> Result<Vec<Name>, DocumentError> {
    match value {
        Json::String(s) => Ok(vec![s.clone()]),
        Json::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| DocumentError::invalid(id, "`@inherits` entries must be strings"))
            })
            .collect(),
        _ => Err(DocumentError::invalid(
            id,
            "`@inherits` expects a class name or a list of class names",
        )),
    }
}

fn parse_key(id: &str, value: &Json) -> Result<KeyDoc, DocumentError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DocumentError::invalid(id, "`@key` expects an object"))?;
    let ty = obj
        .get("@type")
        .and_then(Json::as_str)
        .ok_or_else(|| DocumentError::invalid(id, "`@key` is missing `@type`"))?;

    let fields = || -> Result<Vec<Name>, DocumentError> {
        let list = obj
            .get("@fields")
            .and_then(Json::as_array)
            .ok_or_else(|| DocumentError::invalid(id, format!("`{ty}` key expects `@fields`")))?;
        if list.is_empty() {
            return Err(DocumentError::invalid(id, "`@fields` must not be empty"));
        }
        list.iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| DocumentError::invalid(id, "`@fields` entries must be strings"))
            })
            .collect()
    };

    match ty {
        "Lexical" => Ok(KeyDoc::Lexical { fields: fields()? }),
        "Hash" => Ok(KeyDoc::Hash { fields: fields()? }),
        "ValueHash" => Ok(KeyDoc::ValueHash),
        "Random" => Ok(KeyDoc::Random),
        other => Err(DocumentError::invalid(id, format!("unknown key type `{other}`"))),
    }
}

fn parse_field(id: &str, name: &str, value: &Json) -> Result<FieldDoc, DocumentError> {
    match value {
        Json::String(target) => Ok(FieldDoc {
            name: name.to_string(),
            cardinality: Cardinality::Required,
            target: target.clone(),
        }),
        Json::Object(obj) => {
            let ty = obj.get("@type").and_then(Json::as_str).ok_or_else(|| {
                DocumentError::invalid(id, format!("field `{name}` is missing `@type`"))
            })?;
            let cardinality = match ty {
                "Optional" => Cardinality::Optional,
                "Set" => Cardinality::Set,
                "List" => Cardinality::List,
                other => {
                    return Err(DocumentError::invalid(
                        id,
                        format!("field `{name}`: unsupported field type `{other}`"),
                    ))
                }
            };
            let target = obj.get("@class").and_then(Json::as_str).ok_or_else(|| {
                DocumentError::invalid(id, format!("field `{name}` is missing `@class`"))
            })?;
            Ok(FieldDoc {
                name: name.to_string(),
                cardinality,
                target: target.to_string(),
            })
        }
        _ => Err(DocumentError::invalid(
            id,
            format!("field `{name}` expects a type name or a typed object"),
        )),
    }
}
