//! Lexigraph surface types
//!
//! This crate defines the data formats the engine consumes and provides
//! parsers + typed ASTs for each:
//!
//! - `schema_doc`: schema documents (classes, enums, keys, inheritance)
//! - `instance_doc`: instance documents (`@type` + field values)
//! - `path_expr`: the path algebra (`friend+`, `(<friend)*,cat`, ...)
//! - `query`: structured query requests (filters, ordering, nested fields)
//!
//! Nothing here knows about a compiled schema; name resolution and typing
//! live in `lexigraph-pathdb`.

pub mod instance_doc;
pub mod path_expr;
pub mod query;
pub mod schema_doc;

pub use instance_doc::{instance_documents_from_json, parse_instance_documents, InstanceDoc};
pub use path_expr::{parse_path_expr, PathExpr, PathSyntaxError};
pub use query::{
    BacklinkSelection, Direction, FieldPredicate, FieldSelection, Filter, FilterOp, LinkSelection,
    NestedField, OrderKey, PathSelection, QueryRequest, Selection,
};
pub use schema_doc::{
    parse_schema_documents, schema_documents_from_json, Cardinality, ClassDoc, DocumentError,
    EnumDoc, FieldDoc, KeyDoc, Name, SchemaDoc,
};
