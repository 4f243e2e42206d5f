//! Instance storage: typed instances keyed by interned node id, with an
//! id-ordered view and per-class membership bitmaps.

use std::collections::BTreeMap;

use ahash::AHashMap;
use lexigraph_dsl::{Cardinality, InstanceDoc, Name};
use roaring::RoaringBitmap;
use serde_json::Value as Json;

use crate::error::InsertError;
use crate::keys;
use crate::schema::{ClassDef, FieldDef, FieldType, Schema};
use crate::value::{CoerceError, Value};
use crate::{DbConfig, StrId};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    One(Value),
    Many(Vec<Value>),
}

impl FieldValue {
    pub fn values(&self) -> &[Value] {
        match self {
            FieldValue::One(v) => std::slice::from_ref(v),
            FieldValue::Many(vs) => vs,
        }
    }

    pub fn single(&self) -> Option<&Value> {
        match self {
            FieldValue::One(v) => Some(v),
            FieldValue::Many(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Relative id, e.g. `Person/Plato`.
    pub id: String,
    pub class: Name,
    pub fields: BTreeMap<Name, FieldValue>,
}

impl Instance {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Reference targets of `field`, in field order.
    pub fn refs<'a>(&'a self, field: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .get(field)
            .into_iter()
            .flat_map(|v| v.values())
            .filter_map(|v| match v {
                Value::Ref(id) => Some(id.as_str()),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstanceStore {
    instances: AHashMap<StrId, Instance>,
    /// Relative id -> node, for id-ordered iteration.
    ordered: BTreeMap<String, StrId>,
    by_class: AHashMap<Name, RoaringBitmap>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, node: StrId) -> Option<&Instance> {
        self.instances.get(&node)
    }

    pub fn contains(&self, node: StrId) -> bool {
        self.instances.contains_key(&node)
    }

    /// All instances in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.ordered
            .values()
            .filter_map(move |node| self.instances.get(node))
    }

    /// Nodes whose class is exactly `class`.
    pub fn of_class(&self, class: &str) -> Option<&RoaringBitmap> {
        self.by_class.get(class)
    }

    /// Insert `incoming`, or merge it into the instance already stored under
    /// `node`: scalars and lists are replaced, sets are unioned and fields
    /// the new document leaves out are kept. A document of a different class
    /// replaces the stored instance outright.
    pub(crate) fn upsert(&mut self, node: StrId, incoming: Instance, schema: &Schema) -> &Instance {
        let merged = match self.instances.remove(&node) {
            None => incoming,
            Some(existing) if existing.class != incoming.class => {
                if let Some(members) = self.by_class.get_mut(&existing.class) {
                    members.remove(node.raw());
                }
                incoming
            }
            Some(mut existing) => {
                for (name, value) in incoming.fields {
                    let is_set = schema
                        .field(&existing.class, &name)
                        .map(|f| f.cardinality == Cardinality::Set)
                        .unwrap_or(false);
                    match value {
                        FieldValue::Many(new) if is_set => {
                            let slot = existing
                                .fields
                                .entry(name)
                                .or_insert_with(|| FieldValue::Many(Vec::new()));
                            match slot {
                                FieldValue::Many(old) => {
                                    for v in new {
                                        if !old.contains(&v) {
                                            old.push(v);
                                        }
                                    }
                                }
                                one => *one = FieldValue::Many(new),
                            }
                        }
                        value => {
                            existing.fields.insert(name, value);
                        }
                    }
                }
                existing
            }
        };

        self.by_class
            .entry(merged.class.clone())
            .or_default()
            .insert(node.raw());
        self.ordered.insert(merged.id.clone(), node);
        self.instances.entry(node).or_insert(merged)
    }
}

// ============================================================================
// Document typing
// ============================================================================

/// Validate and coerce an instance document against the schema, deriving its
/// id from the class key.
pub(crate) fn type_document(
    schema: &Schema,
    config: &DbConfig,
    doc: &InstanceDoc,
) -> Result<Instance, InsertError> {
    let class = match doc.class.as_deref() {
        None => infer_class(schema, doc)?,
        Some(name) => match schema.class(name) {
            Some(class) => class,
            None if schema.enum_def(name).is_some() => {
                return Err(InsertError::NotInstantiable {
                    class: name.to_string(),
                    reason: "enums have no instances",
                })
            }
            None => return Err(InsertError::UnknownClass(name.to_string())),
        },
    };
    if class.is_abstract {
        return Err(InsertError::NotInstantiable {
            class: class.name.clone(),
            reason: "class is abstract",
        });
    }

    let mut fields = BTreeMap::new();
    for (name, json) in &doc.fields {
        let field = class.field(name).ok_or_else(|| InsertError::UnknownField {
            class: class.name.clone(),
            field: name.clone(),
        })?;
        if json.is_null() {
            continue;
        }
        let value = match field.cardinality {
            Cardinality::Required | Cardinality::Optional => {
                FieldValue::One(coerce(schema, config, class, field, json)?)
            }
            Cardinality::Set | Cardinality::List => {
                let items: &[Json] = match json {
                    Json::Array(items) => items,
                    single => std::slice::from_ref(single),
                };
                let mut values: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    let v = coerce(schema, config, class, field, item)?;
                    if field.cardinality == Cardinality::List || !values.contains(&v) {
                        values.push(v);
                    }
                }
                FieldValue::Many(values)
            }
        };
        fields.insert(name.clone(), value);
    }

    let explicit = doc.id.as_deref().map(|id| config.relative_id(id));
    let id = keys::derive_id(class, &fields, explicit)?;

    for field in class.fields() {
        if field.cardinality == Cardinality::Required && !fields.contains_key(&field.name) {
            return Err(InsertError::MissingField {
                class: class.name.clone(),
                field: field.name.clone(),
            });
        }
    }

    Ok(Instance {
        id,
        class: class.name.clone(),
        fields,
    })
}

/// The one concrete class that declares every field of an untyped document
/// and has all of its required fields supplied.
fn infer_class<'s>(schema: &'s Schema, doc: &InstanceDoc) -> Result<&'s ClassDef, InsertError> {
    let supplied = |name: &str| doc.fields.get(name).map_or(false, |v| !v.is_null());
    let mut candidates: Vec<&ClassDef> = schema
        .classes()
        .filter(|class| !class.is_abstract)
        .filter(|class| doc.fields.keys().all(|name| class.field(name).is_some()))
        .filter(|class| {
            class
                .fields()
                .iter()
                .filter(|f| f.cardinality == Cardinality::Required)
                .all(|f| supplied(&f.name))
        })
        .collect();

    let fields = || doc.fields.keys().cloned().collect::<Vec<_>>();
    match candidates.len() {
        0 => Err(InsertError::NoMatchingClass { fields: fields() }),
        1 => Ok(candidates.remove(0)),
        _ => Err(InsertError::AmbiguousClass {
            fields: fields(),
            candidates: candidates.iter().map(|c| c.name.clone()).collect(),
        }),
    }
}

fn coerce(
    schema: &Schema,
    config: &DbConfig,
    class: &ClassDef,
    field: &FieldDef,
    json: &Json,
) -> Result<Value, InsertError> {
    Value::coerce(&field.ty, json, schema, config).map_err(|e| match e {
        CoerceError::TypeMismatch => InsertError::TypeMismatch {
            class: class.name.clone(),
            field: field.name.clone(),
            expected: field.ty.to_string(),
            found: json.to_string(),
        },
        CoerceError::OutOfRange(ty) => InsertError::ValueOutOfRange {
            class: class.name.clone(),
            field: field.name.clone(),
            value: json.to_string(),
            ty: ty.xsd_name(),
        },
        CoerceError::InvalidEnumValue => InsertError::InvalidEnumValue {
            class: class.name.clone(),
            field: field.name.clone(),
            value: json.to_string(),
            enum_name: match &field.ty {
                FieldType::Enum(name) => name.clone(),
                other => other.to_string(),
            },
        },
    })
}
