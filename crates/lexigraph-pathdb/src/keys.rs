//! Instance id derivation from a class's key spec.
//!
//! Lexical ids are `<Class>/<v1>+<v2>...` with every key value
//! percent-encoded, so equal key values always map to the same id.

use std::collections::BTreeMap;

use lexigraph_dsl::Name;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::InsertError;
use crate::schema::{ClassDef, KeySpec};
use crate::store::FieldValue;

/// Everything except `A-Z a-z 0-9 - . _ ~`.
const KEY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn encode_key_component(text: &str) -> String {
    utf8_percent_encode(text, KEY_COMPONENT).to_string()
}

/// Derive the relative id for a typed document. `explicit` is the document's
/// own `@id` (already relative), honoured as-is for random keys and checked
/// against the derived id otherwise.
pub(crate) fn derive_id(
    class: &ClassDef,
    fields: &BTreeMap<Name, FieldValue>,
    explicit: Option<&str>,
) -> Result<String, InsertError> {
    let derived = match &class.key {
        KeySpec::Random => {
            return Ok(match explicit {
                Some(id) => id.to_string(),
                None => format!("{}/{}", class.name, Uuid::new_v4().simple()),
            });
        }
        KeySpec::Lexical(names) => {
            let parts = key_values(class, fields, names)?;
            let encoded: Vec<String> = parts.iter().map(|p| encode_key_component(p)).collect();
            format!("{}/{}", class.name, encoded.join("+"))
        }
        KeySpec::Hash(names) => {
            let parts = key_values(class, fields, names)?;
            format!("{}/{}", class.name, sha256_hex(parts.join("+").as_bytes()))
        }
        KeySpec::ValueHash => {
            let canonical: BTreeMap<&str, Json> = fields
                .iter()
                .map(|(name, value)| {
                    let rendered = match value {
                        FieldValue::One(v) => Json::String(v.key_text()),
                        FieldValue::Many(vs) => {
                            Json::Array(vs.iter().map(|v| Json::String(v.key_text())).collect())
                        }
                    };
                    (name.as_str(), rendered)
                })
                .collect();
            let text = serde_json::to_string(&canonical).unwrap_or_default();
            format!("{}/{}", class.name, sha256_hex(text.as_bytes()))
        }
    };

    match explicit {
        Some(given) if given != derived => Err(InsertError::IdMismatch {
            given: given.to_string(),
            derived,
        }),
        _ => Ok(derived),
    }
}

fn key_values(
    class: &ClassDef,
    fields: &BTreeMap<Name, FieldValue>,
    names: &[Name],
) -> Result<Vec<String>, InsertError> {
    names
        .iter()
        .map(|name| match fields.get(name) {
            Some(FieldValue::One(v)) => Ok(v.key_text()),
            _ => Err(InsertError::MissingKeyField {
                class: class.name.clone(),
                field: name.clone(),
            }),
        })
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
