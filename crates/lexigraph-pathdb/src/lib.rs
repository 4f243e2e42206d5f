//! PathDB: schema-typed property graph with path queries
//!
//! The engine behind Lexigraph:
//!
//! 1. **Schema**: compiled classes, enums, effective field sets and the
//!    subsumption index (`schema`)
//! 2. **Instance Store**: typed instances under key-derived ids (`store`,
//!    `keys`, `value`)
//! 3. **Edge Index**: forward and backward adjacency for every reference
//!    field, kept current on each insert (`edge_index`)
//! 4. **Path Evaluator**: `p`, `<p`, `,`, `|`, `+`, `*`, `{n,m}` over the
//!    edge index (`path_eval`)
//! 5. **Query Executor**: candidate selection, filters, ordering, paging and
//!    nested backlink / path / link projection (`query`)
//!
//! Ids and predicates are interned to `u32` so adjacency sets are Roaring
//! bitmaps. A [`PathDB`] is a plain value: `Clone` produces an independent
//! copy sharing only the immutable [`Schema`], which is what the storage
//! layer uses for copy-on-write snapshots.

pub mod edge_index;
pub mod error;
pub mod keys;
pub mod path_eval;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;

use std::sync::Arc;

use ahash::AHashMap;
use lexigraph_dsl::{parse_path_expr, InstanceDoc, PathExpr, QueryRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use edge_index::EdgeIndex;
pub use error::{InsertError, QueryError, ReferenceError, SchemaError};
pub use path_eval::{NodeSet, PathEvaluator};
pub use query::{QueryResponse, RowError};
pub use schema::{ClassDef, EnumDef, FieldDef, FieldType, KeySpec, PrimitiveType, Schema};
pub use store::{FieldValue, Instance, InstanceStore};
pub use value::Value;

// ============================================================================
// String Interning
// ============================================================================

/// Interned string ID: instance ids and predicate names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct StrId(u32);

impl StrId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// String interner: maps strings to compact IDs, assigned densely from 0.
#[derive(Debug, Clone, Default)]
pub struct StringInterner {
    str_to_id: AHashMap<String, StrId>,
    id_to_str: Vec<String>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its ID
    pub fn intern(&mut self, s: &str) -> StrId {
        if let Some(id) = self.str_to_id.get(s) {
            return *id;
        }
        let id = StrId(self.id_to_str.len() as u32);
        self.str_to_id.insert(s.to_string(), id);
        self.id_to_str.push(s.to_string());
        id
    }

    pub fn id_of(&self, s: &str) -> Option<StrId> {
        self.str_to_id.get(s).copied()
    }

    pub fn lookup(&self, id: StrId) -> Option<&str> {
        self.id_to_str.get(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.id_to_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_str.is_empty()
    }
}

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_BASE_IRI: &str = "terminusdb:///data/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Prefix that turns a relative id (`Person/Plato`) into the `_id` IRI.
    pub base_iri: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            base_iri: DEFAULT_BASE_IRI.to_string(),
        }
    }
}

impl DbConfig {
    /// Strip the base IRI if present; relative ids pass through.
    pub fn relative_id<'a>(&self, id: &'a str) -> &'a str {
        id.strip_prefix(self.base_iri.as_str()).unwrap_or(id)
    }

    pub fn expand_id(&self, id: &str) -> String {
        format!("{}{}", self.base_iri, id)
    }
}

// ============================================================================
// PathDB
// ============================================================================

#[derive(Debug, Clone)]
pub struct PathDB {
    schema: Arc<Schema>,
    config: DbConfig,
    /// Every id seen as an instance or as a reference target
    nodes: StringInterner,
    store: InstanceStore,
    edges: EdgeIndex,
}

impl PathDB {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self::with_config(schema, DbConfig::default())
    }

    pub fn with_config(schema: Arc<Schema>, config: DbConfig) -> Self {
        Self {
            schema,
            config,
            nodes: StringInterner::new(),
            store: InstanceStore::new(),
            edges: EdgeIndex::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_arc(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn edges(&self) -> &EdgeIndex {
        &self.edges
    }

    /// Insert or upsert one document, returning its relative id.
    pub fn insert(&mut self, doc: &InstanceDoc) -> Result<String, InsertError> {
        let instance = store::type_document(&self.schema, &self.config, doc)?;
        let id = instance.id.clone();
        let class = instance.class.clone();
        let node = self.nodes.intern(&id);

        let stored = self.store.upsert(node, instance, &self.schema);
        let mut edges: Vec<(&str, Vec<StrId>)> = Vec::new();
        if let Some(class) = self.schema.class(&stored.class) {
            for field in class.fields().iter().filter(|f| f.is_reference()) {
                let mut targets = Vec::new();
                for target in stored.refs(&field.name) {
                    targets.push(self.nodes.intern(target));
                }
                edges.push((field.name.as_str(), targets));
            }
        }
        let edge_count: usize = edges.iter().map(|(_, t)| t.len()).sum();
        self.edges.replace_subject(node, edges);

        debug!(id = %id, class = %class, edges = edge_count, "instance stored");
        Ok(id)
    }

    /// Insert documents in order, stopping at the first failure. Documents
    /// before the failing one stay inserted; use the storage layer for
    /// all-or-nothing batches.
    pub fn insert_all<'d, I>(&mut self, docs: I) -> Result<Vec<String>, InsertError>
    where
        I: IntoIterator<Item = &'d InstanceDoc>,
    {
        docs.into_iter().map(|doc| self.insert(doc)).collect()
    }

    pub fn node_id(&self, id: &str) -> Option<StrId> {
        self.nodes.id_of(self.config.relative_id(id))
    }

    /// Look up an instance by relative or expanded id.
    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.node_id(id).and_then(|node| self.store.get(node))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn class_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|inst| inst.class.as_str())
    }

    /// All instances in ascending id order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.store.iter()
    }

    pub(crate) fn instance_at(&self, node: StrId) -> Option<&Instance> {
        self.store.get(node)
    }

    pub(crate) fn id_at(&self, node: StrId) -> Option<&str> {
        self.nodes.lookup(node)
    }

    pub(crate) fn store(&self) -> &InstanceStore {
        &self.store
    }

    /// Objects of `subject.predicate`, in field order.
    pub fn forward(&self, subject: &str, predicate: &str) -> Vec<&str> {
        let (Some(node), Some(pred)) = (self.node_id(subject), self.edges.predicate_id(predicate))
        else {
            return Vec::new();
        };
        self.edges
            .forward(node, pred)
            .iter()
            .filter_map(|&n| self.nodes.lookup(n))
            .collect()
    }

    /// Instances whose `predicate` points at `object`, in id order.
    pub fn backlinks(&self, object: &str, predicate: &str) -> Vec<&Instance> {
        let (Some(node), Some(pred)) = (self.node_id(object), self.edges.predicate_id(predicate))
        else {
            return Vec::new();
        };
        let mut subjects: Vec<&Instance> = self
            .edges
            .backward(node, pred)
            .into_iter()
            .flat_map(|subjects| subjects.iter())
            .filter_map(|raw| self.store.get(StrId::new(raw)))
            .collect();
        subjects.sort_by(|a, b| a.id.cmp(&b.id));
        subjects
    }

    /// Ids reached from `start` by `expr`, in discovery order. An id that was
    /// never inserted nor referenced reaches nothing.
    pub fn evaluate_path(&self, start: &str, expr: &PathExpr) -> Vec<&str> {
        let Some(node) = self.node_id(start) else {
            return Vec::new();
        };
        PathEvaluator::new(&self.edges)
            .evaluate(node, expr)
            .into_iter()
            .filter_map(|n| self.nodes.lookup(n))
            .collect()
    }

    /// Parse `expr`, check its predicates against the schema and evaluate.
    pub fn evaluate_path_str(&self, start: &str, expr: &str) -> Result<Vec<&str>, QueryError> {
        let expr = parse_path_expr(expr)?;
        query::check_predicates(&self.schema, &expr, self.class_of(start).unwrap_or("*"))?;
        Ok(self.evaluate_path(start, &expr))
    }

    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        query::execute(self, request)
    }
}
