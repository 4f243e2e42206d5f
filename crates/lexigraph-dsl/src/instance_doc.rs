//! Instance documents.
//!
//! An instance document names its class with `@type` (or leaves it for the
//! engine to infer from the fields), may carry an explicit `@id`, and holds
//! field values as plain JSON. Reference values are instance
//! ids (`"Person/Plato"`), possibly of instances that are inserted later.
//! Typing against the schema happens in the engine's instance store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::schema_doc::{DocumentError, Name};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<Name>,
    pub id: Option<String>,
    pub fields: BTreeMap<Name, Json>,
}

impl InstanceDoc {
    pub fn new(class: impl Into<Name>) -> Self {
        Self {
            class: Some(class.into()),
            ..Self::untyped()
        }
    }

    /// A document without `@type`.
    pub fn untyped() -> Self {
        Self {
            class: None,
            id: None,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<Name>, value: impl Into<Json>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn from_json(index: usize, json: &Json) -> Result<Self, DocumentError> {
        let obj = json
            .as_object()
            .ok_or(DocumentError::NotAnObject { index })?;
        let mut doc = InstanceDoc::untyped();
        for (key, value) in obj {
            match key.as_str() {
                "@type" => {
                    let class = value.as_str().ok_or_else(|| DocumentError::Invalid {
                        id: format!("#{index}"),
                        message: "`@type` must be a class name".to_string(),
                    })?;
                    doc.class = Some(class.to_string());
                }
                "@id" => {
                    let id = value.as_str().ok_or_else(|| DocumentError::Invalid {
                        id: format!("#{index}"),
                        message: "`@id` must be a string".to_string(),
                    })?;
                    doc.id = Some(id.to_string());
                }
                k if k.starts_with('@') => {
                    return Err(DocumentError::Invalid {
                        id: format!("#{index}"),
                        message: format!("unknown annotation `{k}` on instance"),
                    });
                }
                field => {
                    doc.fields.insert(field.to_string(), value.clone());
                }
            }
        }
        Ok(doc)
    }
}

/// Parse a JSON array (or a single object) of instance documents.
pub fn parse_instance_documents(text: &str) -> Result<Vec<InstanceDoc>, DocumentError> {
    let json: Json = serde_json::from_str(text).map_err(|e| DocumentError::Json(e.to_string()))?;
    instance_documents_from_json(&json)
}

pub fn instance_documents_from_json(json: &Json) -> Result<Vec<InstanceDoc>, DocumentError> {
    match json {
        Json::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| InstanceDoc::from_json(index, item))
            .collect(),
        other => Ok(vec![InstanceDoc::from_json(0, other)?]),
    }
}
