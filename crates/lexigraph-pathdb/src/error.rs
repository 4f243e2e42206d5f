//! Error taxonomy.
//!
//! - [`SchemaError`]: raised while compiling a schema; nothing can be inserted
//!   or queried against a schema that failed to compile.
//! - [`InsertError`]: one instance document could not be typed or keyed.
//! - [`ReferenceError`]: row-scoped; a projection needed the fields of an
//!   instance that does not exist (yet).
//! - [`QueryError`]: request-scoped; the whole request is rejected.

use lexigraph_dsl::{DocumentError, FilterOp, Name, PathSyntaxError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("`{0}` is defined more than once")]
    DuplicateDefinition(Name),
    #[error("class `{class}` inherits from unknown class `{parent}`")]
    UnknownParent { class: Name, parent: Name },
    #[error("field `{class}.{field}` has unknown type `{ty}`")]
    UnknownType { class: Name, field: Name, ty: Name },
    #[error("inheritance cycle: {}", cycle.join(" -> "))]
    InheritanceCycle { cycle: Vec<Name> },
    #[error("field `{field}` of class `{class}` collides with an inherited field of a different definition")]
    FieldCollision { class: Name, field: Name },
    #[error("key of class `{class}` names unknown field `{field}`")]
    UnknownKeyField { class: Name, field: Name },
    #[error("key field `{class}.{field}` must be a single-valued primitive or enum field")]
    InvalidKeyField { class: Name, field: Name },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InsertError {
    #[error("unknown class `{0}`")]
    UnknownClass(Name),
    #[error("no class declares all of the fields [{}]", fields.join(", "))]
    NoMatchingClass { fields: Vec<Name> },
    #[error("fields [{}] fit more than one class: {}", fields.join(", "), candidates.join(", "))]
    AmbiguousClass {
        fields: Vec<Name>,
        candidates: Vec<Name>,
    },
    #[error("`{class}` cannot be instantiated: {reason}")]
    NotInstantiable { class: Name, reason: &'static str },
    #[error("class `{class}` has no field `{field}`")]
    UnknownField { class: Name, field: Name },
    #[error("required field `{class}.{field}` is missing")]
    MissingField { class: Name, field: Name },
    #[error("key field `{class}.{field}` is missing")]
    MissingKeyField { class: Name, field: Name },
    #[error("field `{class}.{field}`: expected {expected}, found `{found}`")]
    TypeMismatch {
        class: Name,
        field: Name,
        expected: String,
        found: String,
    },
    #[error("field `{class}.{field}`: `{value}` is out of range for {ty}")]
    ValueOutOfRange {
        class: Name,
        field: Name,
        value: String,
        ty: &'static str,
    },
    #[error("field `{class}.{field}`: `{value}` is not a value of enum `{enum_name}`")]
    InvalidEnumValue {
        class: Name,
        field: Name,
        value: String,
        enum_name: Name,
    },
    #[error("`@id` `{given}` does not match the key-derived id `{derived}`")]
    IdMismatch { given: String, derived: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceError {
    #[error("`{subject}` reaches `{target}` via `{predicate}`, but `{target}` does not exist")]
    DanglingEdge {
        subject: String,
        predicate: String,
        target: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown class `{0}`")]
    UnknownClass(Name),
    #[error("class `{class}` has no field `{field}`")]
    UnknownField { class: Name, field: Name },
    #[error("filter `{op}` on `{class}.{field}`: {message}")]
    FilterTypeMismatch {
        class: Name,
        field: Name,
        op: FilterOp,
        message: String,
    },
    #[error("cannot order `{class}` by multi-valued field `{field}`")]
    UnorderableField { class: Name, field: Name },
    #[error(transparent)]
    PathSyntax(#[from] PathSyntaxError),
    #[error("nested selection `{field}` on `{class}` selects no fields")]
    EmptySelection { class: Name, field: String },
}
