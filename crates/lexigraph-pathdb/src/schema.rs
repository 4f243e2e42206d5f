//! Compiled schema: class/enum table, effective field sets and the
//! subsumption index.
//!
//! Compilation resolves every field target to a primitive, enum or class,
//! rejects inheritance cycles and conflicting inherited fields, and
//! precomputes the ancestor/descendant closures so that `is_subtype` and
//! `subtypes_including_self` are single map lookups afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ahash::{AHashMap, AHashSet};
use lexigraph_dsl::{Cardinality, ClassDoc, FieldDoc, KeyDoc, Name, SchemaDoc};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    String,
    Boolean,
    Decimal,
    Double,
    Integer,
    Long,
    Int,
    Short,
    Byte,
    NonNegativeInteger,
    DateTime,
}

impl PrimitiveType {
    pub fn from_xsd(name: &str) -> Option<Self> {
        let ty = match name {
            "xsd:string" => PrimitiveType::String,
            "xsd:boolean" => PrimitiveType::Boolean,
            "xsd:decimal" => PrimitiveType::Decimal,
            "xsd:double" | "xsd:float" => PrimitiveType::Double,
            "xsd:integer" => PrimitiveType::Integer,
            "xsd:long" => PrimitiveType::Long,
            "xsd:int" => PrimitiveType::Int,
            "xsd:short" => PrimitiveType::Short,
            "xsd:byte" => PrimitiveType::Byte,
            "xsd:nonNegativeInteger" => PrimitiveType::NonNegativeInteger,
            "xsd:dateTime" => PrimitiveType::DateTime,
            _ => return None,
        };
        Some(ty)
    }

    pub fn xsd_name(self) -> &'static str {
        match self {
            PrimitiveType::String => "xsd:string",
            PrimitiveType::Boolean => "xsd:boolean",
            PrimitiveType::Decimal => "xsd:decimal",
            PrimitiveType::Double => "xsd:double",
            PrimitiveType::Integer => "xsd:integer",
            PrimitiveType::Long => "xsd:long",
            PrimitiveType::Int => "xsd:int",
            PrimitiveType::Short => "xsd:short",
            PrimitiveType::Byte => "xsd:byte",
            PrimitiveType::NonNegativeInteger => "xsd:nonNegativeInteger",
            PrimitiveType::DateTime => "xsd:dateTime",
        }
    }

    /// Integer subtypes, with their inclusive value range.
    pub fn integer_range(self) -> Option<(i128, i128)> {
        match self {
            PrimitiveType::Integer => Some((i128::MIN, i128::MAX)),
            PrimitiveType::Long => Some((i64::MIN as i128, i64::MAX as i128)),
            PrimitiveType::Int => Some((i32::MIN as i128, i32::MAX as i128)),
            PrimitiveType::Short => Some((i16::MIN as i128, i16::MAX as i128)),
            PrimitiveType::Byte => Some((i8::MIN as i128, i8::MAX as i128)),
            PrimitiveType::NonNegativeInteger => Some((0, i128::MAX)),
            _ => None,
        }
    }

    /// Supports `lt`/`le`/`gt`/`ge` and ordering.
    pub fn is_ordered(self) -> bool {
        !matches!(self, PrimitiveType::Boolean)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.xsd_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum FieldType {
    Primitive(PrimitiveType),
    Enum(Name),
    Class(Name),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Primitive(p) => write!(f, "{p}"),
            FieldType::Enum(name) => write!(f, "enum {name}"),
            FieldType::Class(name) => write!(f, "reference to {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: Name,
    pub cardinality: Cardinality,
    pub ty: FieldType,
}

impl FieldDef {
    pub fn is_reference(&self) -> bool {
        matches!(self.ty, FieldType::Class(_))
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.cardinality, Cardinality::Set | Cardinality::List)
    }

    pub fn target_class(&self) -> Option<&str> {
        match &self.ty {
            FieldType::Class(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "fields", rename_all = "snake_case")]
pub enum KeySpec {
    Lexical(Vec<Name>),
    Hash(Vec<Name>),
    ValueHash,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: Name,
    pub parents: Vec<Name>,
    pub key: KeySpec,
    pub is_abstract: bool,
    /// Effective fields: inherited first, then own, in declaration order.
    fields: Vec<FieldDef>,
}

impl ClassDef {
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: Name,
    pub values: Vec<String>,
}

impl EnumDef {
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone)]
pub struct Schema {
    classes: BTreeMap<Name, ClassDef>,
    enums: BTreeMap<Name, EnumDef>,
    supertypes_of: AHashMap<Name, AHashSet<Name>>,
    subtypes_of: AHashMap<Name, BTreeSet<Name>>,
    /// Names of reference fields across all classes (valid path predicates).
    predicates: AHashSet<Name>,
}

impl Schema {
    /// Parse and compile a JSON array of schema documents.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let docs = lexigraph_dsl::parse_schema_documents(text)?;
        Self::compile(&docs)
    }

    pub fn compile(docs: &[SchemaDoc]) -> Result<Self, SchemaError> {
        let mut class_docs: BTreeMap<&str, &ClassDoc> = BTreeMap::new();
        let mut enums: BTreeMap<Name, EnumDef> = BTreeMap::new();
        let mut seen: AHashSet<&str> = AHashSet::new();

        for doc in docs {
            if !seen.insert(doc.id()) {
                return Err(SchemaError::DuplicateDefinition(doc.id().to_string()));
            }
            match doc {
                SchemaDoc::Class(c) => {
                    class_docs.insert(c.id.as_str(), c);
                }
                SchemaDoc::Enum(e) => {
                    enums.insert(
                        e.id.clone(),
                        EnumDef {
                            name: e.id.clone(),
                            values: e.values.clone(),
                        },
                    );
                }
            }
        }

        for class in class_docs.values() {
            for parent in &class.inherits {
                if !class_docs.contains_key(parent.as_str()) {
                    return Err(SchemaError::UnknownParent {
                        class: class.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        check_acyclic(&class_docs)?;

        let mut own_fields: AHashMap<&str, Vec<FieldDef>> = AHashMap::new();
        for (&name, class) in &class_docs {
            let resolved = class
                .fields
                .iter()
                .map(|fd| resolve_field(class, fd, &class_docs, &enums))
                .collect::<Result<Vec<_>, _>>()?;
            own_fields.insert(name, resolved);
        }

        let mut memo: AHashMap<String, Vec<FieldDef>> = AHashMap::new();
        let mut classes: BTreeMap<Name, ClassDef> = BTreeMap::new();
        for (&name, class) in &class_docs {
            let fields = effective_fields(name, &class_docs, &own_fields, &mut memo)?;
            let key = resolve_key(class, &fields)?;
            classes.insert(
                name.to_string(),
                ClassDef {
                    name: name.to_string(),
                    parents: class.inherits.clone(),
                    key,
                    is_abstract: class.is_abstract,
                    fields,
                },
            );
        }

        let (supertypes_of, subtypes_of) = subsumption_closures(&classes);

        let predicates = classes
            .values()
            .flat_map(|c| c.fields.iter())
            .filter(|f| f.is_reference())
            .map(|f| f.name.clone())
            .collect();

        Ok(Self {
            classes,
            enums,
            supertypes_of,
            subtypes_of,
            predicates,
        })
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    /// All classes, ordered by name.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.values()
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDef> {
        self.enums.values()
    }

    pub fn fields_of(&self, class: &str) -> Option<&[FieldDef]> {
        self.classes.get(class).map(|c| c.fields())
    }

    pub fn field(&self, class: &str, name: &str) -> Option<&FieldDef> {
        self.classes.get(class).and_then(|c| c.field(name))
    }

    /// True iff `candidate == target` or `target` is an ancestor of `candidate`.
    pub fn is_subtype(&self, candidate: &str, target: &str) -> bool {
        self.supertypes_of
            .get(candidate)
            .map(|s| s.contains(target))
            .unwrap_or(false)
    }

    /// Descendants of `class` including itself, in name order.
    pub fn subtypes_including_self(&self, class: &str) -> impl Iterator<Item = &str> {
        self.subtypes_of
            .get(class)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Ancestors of `class` including itself, in name order.
    pub fn supertypes_including_self(&self, class: &str) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .supertypes_of
            .get(class)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }

    /// Whether `name` is a reference field of some class.
    pub fn is_predicate(&self, name: &str) -> bool {
        self.predicates.contains(name)
    }
}

// ============================================================================
// Compilation helpers
// ============================================================================

fn resolve_field(
    class: &ClassDoc,
    field: &FieldDoc,
    class_docs: &BTreeMap<&str, &ClassDoc>,
    enums: &BTreeMap<Name, EnumDef>,
) -> Result<FieldDef, SchemaError> {
    let ty = if let Some(p) = PrimitiveType::from_xsd(&field.target) {
        FieldType::Primitive(p)
    } else if enums.contains_key(&field.target) {
        FieldType::Enum(field.target.clone())
    } else if class_docs.contains_key(field.target.as_str()) {
        FieldType::Class(field.target.clone())
    } else {
        return Err(SchemaError::UnknownType {
            class: class.id.clone(),
            field: field.name.clone(),
            ty: field.target.clone(),
        });
    };
    Ok(FieldDef {
        name: field.name.clone(),
        cardinality: field.cardinality,
        ty,
    })
}

enum Mark {
    Visiting,
    Done,
}

fn check_acyclic(class_docs: &BTreeMap<&str, &ClassDoc>) -> Result<(), SchemaError> {
    let mut marks: AHashMap<&str, Mark> = AHashMap::new();
    for &start in class_docs.keys() {
        let mut path = Vec::new();
        visit(start, class_docs, &mut marks, &mut path)?;
    }
    Ok(())
}

fn visit<'a>(
    class: &'a str,
    class_docs: &BTreeMap<&'a str, &'a ClassDoc>,
    marks: &mut AHashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<(), SchemaError> {
    match marks.get(class) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|c| *c == class).unwrap_or(0);
            let mut cycle: Vec<Name> = path[start..].iter().map(|c| c.to_string()).collect();
            cycle.push(class.to_string());
            return Err(SchemaError::InheritanceCycle { cycle });
        }
        None => {}
    }

    marks.insert(class, Mark::Visiting);
    path.push(class);
    if let Some(doc) = class_docs.get(class).copied() {
        for parent in &doc.inherits {
            visit(parent.as_str(), class_docs, marks, path)?;
        }
    }
    path.pop();
    marks.insert(class, Mark::Done);
    Ok(())
}

/// Parents' fields (declaration order, depth-first), then own fields.
fn effective_fields(
    class: &str,
    class_docs: &BTreeMap<&str, &ClassDoc>,
    own_fields: &AHashMap<&str, Vec<FieldDef>>,
    memo: &mut AHashMap<String, Vec<FieldDef>>,
) -> Result<Vec<FieldDef>, SchemaError> {
    if let Some(fields) = memo.get(class) {
        return Ok(fields.clone());
    }

    let mut merged: Vec<FieldDef> = Vec::new();
    if let Some(doc) = class_docs.get(class) {
        for parent in &doc.inherits {
            for field in effective_fields(parent, class_docs, own_fields, memo)? {
                merge_field(class, &mut merged, field)?;
            }
        }
    }
    for field in own_fields.get(class).into_iter().flatten() {
        merge_field(class, &mut merged, field.clone())?;
    }

    memo.insert(class.to_string(), merged.clone());
    Ok(merged)
}

fn merge_field(class: &str, merged: &mut Vec<FieldDef>, field: FieldDef) -> Result<(), SchemaError> {
    match merged.iter().find(|f| f.name == field.name) {
        Some(existing) if *existing == field => Ok(()),
        Some(_) => Err(SchemaError::FieldCollision {
            class: class.to_string(),
            field: field.name,
        }),
        None => {
            merged.push(field);
            Ok(())
        }
    }
}

fn resolve_key(class: &ClassDoc, fields: &[FieldDef]) -> Result<KeySpec, SchemaError> {
    let check = |names: &[Name]| -> Result<Vec<Name>, SchemaError> {
        for name in names {
            let Some(field) = fields.iter().find(|f| &f.name == name) else {
                return Err(SchemaError::UnknownKeyField {
                    class: class.id.clone(),
                    field: name.clone(),
                });
            };
            if field.is_multi() || field.is_reference() {
                return Err(SchemaError::InvalidKeyField {
                    class: class.id.clone(),
                    field: name.clone(),
                });
            }
        }
        Ok(names.to_vec())
    };

    Ok(match &class.key {
        None | Some(KeyDoc::Random) => KeySpec::Random,
        Some(KeyDoc::ValueHash) => KeySpec::ValueHash,
        Some(KeyDoc::Lexical { fields }) => KeySpec::Lexical(check(fields)?),
        Some(KeyDoc::Hash { fields }) => KeySpec::Hash(check(fields)?),
    })
}

type Closures = (
    AHashMap<Name, AHashSet<Name>>,
    AHashMap<Name, BTreeSet<Name>>,
);

fn subsumption_closures(classes: &BTreeMap<Name, ClassDef>) -> Closures {
    let mut direct_subs: AHashMap<&str, Vec<&str>> = AHashMap::new();
    for class in classes.values() {
        for parent in &class.parents {
            direct_subs
                .entry(parent.as_str())
                .or_default()
                .push(class.name.as_str());
        }
    }

    let mut supertypes_of: AHashMap<Name, AHashSet<Name>> = AHashMap::new();
    let mut subtypes_of: AHashMap<Name, BTreeSet<Name>> = AHashMap::new();

    for (name, class) in classes {
        let mut supers = AHashSet::new();
        supers.insert(name.clone());
        let mut stack: Vec<&str> = class.parents.iter().map(String::as_str).collect();
        while let Some(sup) = stack.pop() {
            if supers.insert(sup.to_string()) {
                if let Some(next) = classes.get(sup) {
                    stack.extend(next.parents.iter().map(String::as_str));
                }
            }
        }
        supertypes_of.insert(name.clone(), supers);

        let mut subs = BTreeSet::new();
        subs.insert(name.clone());
        let mut stack: Vec<&str> = direct_subs.get(name.as_str()).cloned().unwrap_or_default();
        while let Some(sub) = stack.pop() {
            if subs.insert(sub.to_string()) {
                if let Some(next) = direct_subs.get(sub) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        subtypes_of.insert(name.clone(), subs);
    }

    (supertypes_of, subtypes_of)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(docs: serde_json::Value) -> Result<Schema, SchemaError> {
        let docs = lexigraph_dsl::schema_documents_from_json(&docs)?;
        Schema::compile(&docs)
    }

    #[test]
    fn subsumption_closures_follow_diamonds() {
        let schema = compile(json!([
            { "@id": "Named", "@type": "Class", "@abstract": [], "name": "xsd:string" },
            { "@id": "Left", "@type": "Class", "@inherits": "Named" },
            { "@id": "Right", "@type": "Class", "@inherits": "Named" },
            { "@id": "Both", "@type": "Class", "@inherits": ["Left", "Right"], "n": "xsd:int" }
        ]))
        .unwrap();

        assert!(schema.is_subtype("Both", "Named"));
        assert!(schema.is_subtype("Both", "Both"));
        assert!(!schema.is_subtype("Left", "Right"));
        assert!(!schema.is_subtype("Nope", "Nope"));

        let subs: Vec<&str> = schema.subtypes_including_self("Named").collect();
        assert_eq!(subs, vec!["Both", "Left", "Named", "Right"]);
        assert_eq!(
            schema.supertypes_including_self("Both"),
            vec!["Both", "Left", "Named", "Right"]
        );

        let names: Vec<&str> = schema
            .fields_of("Both")
            .unwrap()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["name", "n"]);
        assert!(schema.class("Named").unwrap().is_abstract);
    }

    #[test]
    fn inherited_fields_precede_own_fields() {
        let schema = compile(json!([
            { "@id": "Parent", "@type": "Class", "name": "xsd:string" },
            { "@id": "Child", "@type": "Class", "@inherits": "Parent", "number": "xsd:byte" }
        ]))
        .unwrap();
        let child = schema.class("Child").unwrap();
        assert_eq!(child.fields()[0].name, "name");
        assert_eq!(
            child.field("number").unwrap().ty,
            FieldType::Primitive(PrimitiveType::Byte)
        );
        assert_eq!(child.key, KeySpec::Random);
    }

    #[test]
    fn rejects_cycles_with_the_cycle_path() {
        let err = compile(json!([
            { "@id": "A", "@type": "Class", "@inherits": "B" },
            { "@id": "B", "@type": "Class", "@inherits": "A" }
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::InheritanceCycle {
                cycle: vec!["A".into(), "B".into(), "A".into()]
            }
        );
    }

    #[test]
    fn rejects_conflicting_inherited_fields() {
        let err = compile(json!([
            { "@id": "A", "@type": "Class", "x": "xsd:string" },
            { "@id": "B", "@type": "Class", "x": "xsd:int" },
            { "@id": "C", "@type": "Class", "@inherits": ["A", "B"] }
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::FieldCollision {
                class: "C".into(),
                field: "x".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_names() {
        let err = compile(json!([{ "@id": "A", "@type": "Class", "@inherits": "Z" }])).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownParent { .. }));

        let err = compile(json!([{ "@id": "A", "@type": "Class", "x": "xsd:nope" }])).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));

        let err = compile(json!([
            { "@id": "A", "@type": "Class" },
            { "@id": "A", "@type": "Enum", "@value": ["x"] }
        ]))
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateDefinition("A".into()));
    }

    #[test]
    fn validates_key_fields() {
        let err = compile(json!([
            { "@id": "A", "@type": "Class",
              "@key": { "@type": "Lexical", "@fields": ["missing"] } }
        ]))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownKeyField { .. }));

        let err = compile(json!([
            { "@id": "A", "@type": "Class",
              "@key": { "@type": "Lexical", "@fields": ["tags"] },
              "tags": { "@type": "Set", "@class": "xsd:string" } }
        ]))
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidKeyField { .. }));
    }

    #[test]
    fn reference_fields_are_path_predicates() {
        let schema = compile(json!([
            { "@id": "Cat", "@type": "Class", "name": "xsd:string" },
            { "@id": "Person", "@type": "Class",
              "friend": { "@type": "Set", "@class": "Person" },
              "cat": { "@type": "Set", "@class": "Cat" },
              "name": "xsd:string" }
        ]))
        .unwrap();
        assert!(schema.is_predicate("friend"));
        assert!(schema.is_predicate("cat"));
        assert!(!schema.is_predicate("name"));
    }
}
