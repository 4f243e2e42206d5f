//! Query execution.
//!
//! A request is first compiled into a [`Plan`] against the schema. Every
//! request-scoped error (unknown class or field, filter type mismatch, path
//! syntax, unknown path predicate) is raised there, before any row is read.
//! Execution then runs one pipeline per result set:
//!
//! ```text
//! candidates -> filter -> order (ties by id) -> offset/limit -> project
//! ```
//!
//! Nested backlink, path and link fields run the same pipeline on their own
//! candidates. A nested field that needs the fields of an instance that does
//! not exist renders as `null` and records a [`RowError`].

use std::cmp::Ordering;

use ahash::AHashSet;
use lexigraph_dsl::{
    parse_path_expr, Cardinality, Direction, FieldSelection, Filter, FilterOp, NestedField,
    PathExpr, QueryRequest, Selection,
};
use regex::Regex;
use roaring::RoaringBitmap;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::error::{QueryError, ReferenceError};
use crate::path_eval::PathEvaluator;
use crate::schema::{ClassDef, FieldDef, FieldType, PrimitiveType, Schema};
use crate::store::{FieldValue, Instance};
use crate::value::{CoerceError, Value};
use crate::{DbConfig, PathDB, StrId};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResponse {
    pub data: Vec<Json>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RowError>,
}

/// A row-scoped failure: `field` of row `row` could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// Expanded id of the row that owns the field.
    pub row: String,
    /// Output key of the affected field.
    pub field: String,
    pub error: ReferenceError,
}

pub(crate) fn execute(db: &PathDB, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
    let schema = db.schema();
    let class = schema
        .class(&request.class)
        .ok_or_else(|| QueryError::UnknownClass(request.class.clone()))?;

    let planner = Planner {
        schema,
        config: db.config(),
    };
    let plan = planner.selection(class, &request.selection)?;

    let candidates = candidates(db, class, request);
    let candidate_count = candidates.len();

    let mut executor = Executor {
        db,
        errors: Vec::new(),
    };
    let data = executor.run(candidates, &plan);

    debug!(
        class = %request.class,
        candidates = candidate_count,
        rows = data.len(),
        row_errors = executor.errors.len(),
        "query executed"
    );
    Ok(QueryResponse {
        data,
        errors: executor.errors,
    })
}

/// Every predicate of `expr` must be a reference field of some class.
pub(crate) fn check_predicates(
    schema: &Schema,
    expr: &PathExpr,
    class: &str,
) -> Result<(), QueryError> {
    for predicate in expr.predicates() {
        if !schema.is_predicate(predicate) {
            return Err(QueryError::UnknownField {
                class: class.to_string(),
                field: predicate.to_string(),
            });
        }
    }
    Ok(())
}

fn candidates<'d>(db: &'d PathDB, class: &ClassDef, request: &QueryRequest) -> Vec<&'d Instance> {
    let schema = db.schema();
    let requested: Vec<&String> = request
        .id
        .iter()
        .chain(request.ids.iter().flatten())
        .collect();

    if request.id.is_some() || request.ids.is_some() {
        let mut seen = AHashSet::new();
        return requested
            .into_iter()
            .filter_map(|id| db.get(id))
            .filter(|inst| schema.is_subtype(&inst.class, &class.name))
            .filter(|inst| seen.insert(inst.id.clone()))
            .collect();
    }

    let mut nodes = RoaringBitmap::new();
    for sub in schema.subtypes_including_self(&class.name) {
        if let Some(members) = db.store().of_class(sub) {
            nodes |= members;
        }
    }
    let mut rows: Vec<&Instance> = nodes
        .iter()
        .filter_map(|raw| db.instance_at(StrId::new(raw)))
        .collect();
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}

// ============================================================================
// Planning
// ============================================================================

struct Plan<'s> {
    class: &'s ClassDef,
    filter: Option<FilterPlan<'s>>,
    order: Vec<(OrderField<'s>, Direction)>,
    offset: usize,
    limit: Option<usize>,
    fields: Vec<FieldPlan<'s>>,
}

impl Plan<'_> {
    /// Projects nothing but `_id`, with nothing to filter or order on.
    fn ids_only(&self) -> bool {
        self.filter.is_none()
            && self.order.is_empty()
            && !self.fields.is_empty()
            && self.fields.iter().all(|f| matches!(f, FieldPlan::Id))
    }
}

enum OrderField<'s> {
    Id,
    Field(&'s FieldDef),
}

enum FieldPlan<'s> {
    Id,
    Type,
    Scalar(&'s FieldDef),
    Backlink {
        key: String,
        predicate: &'s str,
        plan: Plan<'s>,
    },
    Path {
        key: String,
        expr: PathExpr,
        plan: Plan<'s>,
    },
    Link {
        key: String,
        field: &'s FieldDef,
        plan: Plan<'s>,
    },
}

struct FilterPlan<'s> {
    clauses: Vec<Clause<'s>>,
    all: Vec<FilterPlan<'s>>,
    any: Vec<FilterPlan<'s>>,
    not: Option<Box<FilterPlan<'s>>>,
}

struct Clause<'s> {
    field: &'s str,
    tests: Vec<(FilterOp, Operand)>,
}

enum Operand {
    Value(Value),
    Regex(Regex),
    Prefix(String),
}

struct Planner<'s> {
    schema: &'s Schema,
    config: &'s DbConfig,
}

impl<'s> Planner<'s> {
    fn selection(&self, class: &'s ClassDef, selection: &Selection) -> Result<Plan<'s>, QueryError> {
        let filter = selection
            .filter
            .as_ref()
            .map(|f| self.filter(class, f))
            .transpose()?;

        let mut order = Vec::with_capacity(selection.order_by.len());
        for key in &selection.order_by {
            let field = if key.field == "_id" {
                OrderField::Id
            } else {
                let def = self.field(class, &key.field)?;
                if def.is_multi() {
                    return Err(QueryError::UnorderableField {
                        class: class.name.clone(),
                        field: key.field.clone(),
                    });
                }
                OrderField::Field(def)
            };
            order.push((field, key.dir));
        }

        let fields = selection
            .fields
            .iter()
            .map(|f| self.field_plan(class, f))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Plan {
            class,
            filter,
            order,
            offset: selection.offset.unwrap_or(0),
            limit: selection.limit,
            fields,
        })
    }

    fn field(&self, class: &'s ClassDef, name: &str) -> Result<&'s FieldDef, QueryError> {
        class.field(name).ok_or_else(|| QueryError::UnknownField {
            class: class.name.clone(),
            field: name.to_string(),
        })
    }

    fn class(&self, name: &str) -> Result<&'s ClassDef, QueryError> {
        self.schema
            .class(name)
            .ok_or_else(|| QueryError::UnknownClass(name.to_string()))
    }

    fn field_plan(
        &self,
        class: &'s ClassDef,
        selection: &FieldSelection,
    ) -> Result<FieldPlan<'s>, QueryError> {
        let nested = match selection {
            FieldSelection::Scalar(name) => {
                return Ok(match name.as_str() {
                    "_id" => FieldPlan::Id,
                    "_type" => FieldPlan::Type,
                    other => FieldPlan::Scalar(self.field(class, other)?),
                })
            }
            FieldSelection::Nested(nested) => nested,
        };

        match nested {
            NestedField::Backlink(b) => {
                let source = self.class(&b.class)?;
                let field = self.field(source, &b.field)?;
                if !field.is_reference() {
                    return Err(QueryError::UnknownField {
                        class: source.name.clone(),
                        field: b.field.clone(),
                    });
                }
                let key = b.output_key();
                let plan = self.nested(class, &key, source, &b.selection)?;
                Ok(FieldPlan::Backlink {
                    key,
                    predicate: field.name.as_str(),
                    plan,
                })
            }
            NestedField::Path(p) => {
                let expr = parse_path_expr(&p.expr)?;
                check_predicates(self.schema, &expr, &class.name)?;
                let target = self.class(&p.class)?;
                let key = p.output_key();
                let plan = self.nested(class, &key, target, &p.selection)?;
                Ok(FieldPlan::Path { key, expr, plan })
            }
            NestedField::Link(l) => {
                let field = self.field(class, &l.field)?;
                let Some(target) = field.target_class() else {
                    return Err(QueryError::UnknownField {
                        class: class.name.clone(),
                        field: l.field.clone(),
                    });
                };
                let target = self.class(target)?;
                let key = l.output_key();
                let plan = self.nested(class, &key, target, &l.selection)?;
                Ok(FieldPlan::Link { key, field, plan })
            }
        }
    }

    /// A nested selection must name at least one field to render.
    fn nested(
        &self,
        outer: &ClassDef,
        key: &str,
        target: &'s ClassDef,
        selection: &Selection,
    ) -> Result<Plan<'s>, QueryError> {
        if selection.fields.is_empty() {
            return Err(QueryError::EmptySelection {
                class: outer.name.clone(),
                field: key.to_string(),
            });
        }
        self.selection(target, selection)
    }

    fn filter(&self, class: &'s ClassDef, filter: &Filter) -> Result<FilterPlan<'s>, QueryError> {
        let mut clauses = Vec::with_capacity(filter.fields.len());
        for (name, predicate) in &filter.fields {
            let field = self.field(class, name)?;
            let mut tests = Vec::with_capacity(predicate.ops.len());
            for (&op, value) in &predicate.ops {
                tests.push((op, self.operand(class, field, op, value)?));
            }
            clauses.push(Clause {
                field: field.name.as_str(),
                tests,
            });
        }

        let nested = |filters: &[Filter]| -> Result<Vec<FilterPlan<'s>>, QueryError> {
            filters.iter().map(|f| self.filter(class, f)).collect()
        };

        Ok(FilterPlan {
            clauses,
            all: nested(&filter.all)?,
            any: nested(&filter.any)?,
            not: filter
                .not
                .as_deref()
                .map(|f| self.filter(class, f).map(Box::new))
                .transpose()?,
        })
    }

    fn operand(
        &self,
        class: &ClassDef,
        field: &FieldDef,
        op: FilterOp,
        value: &Json,
    ) -> Result<Operand, QueryError> {
        let mismatch = |message: String| QueryError::FilterTypeMismatch {
            class: class.name.clone(),
            field: field.name.clone(),
            op,
            message,
        };

        if field.is_multi() || field.is_reference() {
            return Err(mismatch(
                "filters apply to single-valued scalar fields only".to_string(),
            ));
        }

        match op {
            FilterOp::Regex | FilterOp::StartsWith => {
                if field.ty != FieldType::Primitive(PrimitiveType::String) {
                    return Err(mismatch(format!("`{op}` needs a string field, not {}", field.ty)));
                }
                let text = value
                    .as_str()
                    .ok_or_else(|| mismatch(format!("expected a string, found `{value}`")))?;
                if op == FilterOp::StartsWith {
                    return Ok(Operand::Prefix(text.to_string()));
                }
                Regex::new(text)
                    .map(Operand::Regex)
                    .map_err(|e| mismatch(format!("invalid regex: {e}")))
            }
            _ => {
                let ordered = match &field.ty {
                    FieldType::Primitive(p) => p.is_ordered(),
                    _ => false,
                };
                if op.is_ordering() && !ordered {
                    return Err(mismatch(format!(
                        "{} supports only `eq` and `ne`",
                        field.ty
                    )));
                }
                Value::coerce(&field.ty, value, self.schema, self.config)
                    .map(Operand::Value)
                    .map_err(|e| {
                        let reason = match e {
                            CoerceError::TypeMismatch => format!("`{value}` is not a {}", field.ty),
                            CoerceError::OutOfRange(ty) => {
                                format!("`{value}` is out of range for {ty}")
                            }
                            CoerceError::InvalidEnumValue => {
                                format!("`{value}` is not a value of {}", field.ty)
                            }
                        };
                        mismatch(reason)
                    })
            }
        }
    }
}

// ============================================================================
// Filtering and ordering
// ============================================================================

impl FilterPlan<'_> {
    fn matches(&self, row: &Instance) -> bool {
        self.clauses.iter().all(|c| c.matches(row))
            && self.all.iter().all(|f| f.matches(row))
            && (self.any.is_empty() || self.any.iter().any(|f| f.matches(row)))
            && self.not.as_ref().map_or(true, |f| !f.matches(row))
    }
}

impl Clause<'_> {
    fn matches(&self, row: &Instance) -> bool {
        let Some(actual) = row.get(self.field).and_then(FieldValue::single) else {
            return false;
        };
        self.tests.iter().all(|(op, operand)| apply_op(actual, *op, operand))
    }
}

fn apply_op(actual: &Value, op: FilterOp, operand: &Operand) -> bool {
    match operand {
        Operand::Regex(re) => matches!(actual, Value::String(s) if re.is_match(s)),
        Operand::Prefix(prefix) => matches!(actual, Value::String(s) if s.starts_with(prefix.as_str())),
        Operand::Value(expected) => {
            let Some(ord) = actual.compare(expected) else {
                return false;
            };
            match op {
                FilterOp::Eq => ord == Ordering::Equal,
                FilterOp::Ne => ord != Ordering::Equal,
                FilterOp::Lt => ord == Ordering::Less,
                FilterOp::Le => ord != Ordering::Greater,
                FilterOp::Gt => ord == Ordering::Greater,
                FilterOp::Ge => ord != Ordering::Less,
                FilterOp::Regex | FilterOp::StartsWith => false,
            }
        }
    }
}

fn directed(ord: Ordering, dir: Direction) -> Ordering {
    match dir {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

/// Missing values sort after present ones in either direction.
fn compare_rows(a: &Instance, b: &Instance, order: &[(OrderField<'_>, Direction)]) -> Ordering {
    for (field, dir) in order {
        let ord = match field {
            OrderField::Id => directed(a.id.cmp(&b.id), *dir),
            OrderField::Field(def) => {
                let av = a.get(&def.name).and_then(FieldValue::single);
                let bv = b.get(&def.name).and_then(FieldValue::single);
                match (av, bv) {
                    (Some(x), Some(y)) => directed(x.compare(y).unwrap_or(Ordering::Equal), *dir),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.id.cmp(&b.id)
}

// ============================================================================
// Execution
// ============================================================================

struct Executor<'d> {
    db: &'d PathDB,
    errors: Vec<RowError>,
}

impl<'d> Executor<'d> {
    fn run(&mut self, rows: Vec<&'d Instance>, plan: &Plan<'_>) -> Vec<Json> {
        let mut rows: Vec<&Instance> = match &plan.filter {
            Some(filter) => rows.into_iter().filter(|r| filter.matches(r)).collect(),
            None => rows,
        };
        if !plan.order.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &plan.order));
        }
        rows.into_iter()
            .skip(plan.offset)
            .take(plan.limit.unwrap_or(usize::MAX))
            .map(|row| self.project(row, plan))
            .collect()
    }

    fn project(&mut self, row: &'d Instance, plan: &Plan<'_>) -> Json {
        let config = self.db.config();
        let mut obj = Map::new();
        for field in &plan.fields {
            match field {
                FieldPlan::Id => {
                    obj.insert("_id".to_string(), Json::String(config.expand_id(&row.id)));
                }
                FieldPlan::Type => {
                    obj.insert("_type".to_string(), Json::String(row.class.clone()));
                }
                FieldPlan::Scalar(def) => {
                    obj.insert(def.name.clone(), render_field(row, def, config));
                }
                FieldPlan::Backlink {
                    key,
                    predicate,
                    plan,
                } => {
                    let subjects: Vec<&Instance> = self
                        .db
                        .backlinks(&row.id, predicate)
                        .into_iter()
                        .filter(|s| self.db.schema().is_subtype(&s.class, &plan.class.name))
                        .collect();
                    obj.insert(key.clone(), Json::Array(self.run(subjects, plan)));
                }
                FieldPlan::Path { key, expr, plan } => {
                    let value = match self.path_rows(row, expr, plan.class, key) {
                        Some(rows) => Json::Array(self.run(rows, plan)),
                        None => Json::Null,
                    };
                    obj.insert(key.clone(), value);
                }
                FieldPlan::Link { key, field, plan } => {
                    let value = self.link(row, field, plan, key);
                    obj.insert(key.clone(), value);
                }
            }
        }
        Json::Object(obj)
    }

    /// Instances reached by `expr`, restricted to subtypes of `class`;
    /// `None` if some reached id has no instance.
    fn path_rows(
        &mut self,
        row: &Instance,
        expr: &PathExpr,
        class: &ClassDef,
        key: &str,
    ) -> Option<Vec<&'d Instance>> {
        let db = self.db;
        let start = db.node_id(&row.id)?;
        let reached = PathEvaluator::new(db.edges()).evaluate(start, expr);

        let mut rows = Vec::with_capacity(reached.len());
        for node in reached {
            match db.instance_at(node) {
                Some(inst) => {
                    if db.schema().is_subtype(&inst.class, &class.name) {
                        rows.push(inst);
                    }
                }
                None => {
                    let target = db.id_at(node).unwrap_or_default().to_string();
                    self.dangling(row, key, expr.to_string(), target);
                    return None;
                }
            }
        }
        Some(rows)
    }

    fn link(&mut self, row: &Instance, field: &FieldDef, plan: &Plan<'_>, key: &str) -> Json {
        let db = self.db;
        let single = matches!(field.cardinality, Cardinality::Required | Cardinality::Optional);
        let targets: Vec<&str> = row.refs(&field.name).collect();

        let rendered = if plan.ids_only() {
            targets
                .iter()
                .skip(plan.offset)
                .take(plan.limit.unwrap_or(usize::MAX))
                .map(|id| {
                    let mut obj = Map::new();
                    obj.insert("_id".to_string(), Json::String(db.config().expand_id(id)));
                    Json::Object(obj)
                })
                .collect()
        } else {
            let mut rows = Vec::with_capacity(targets.len());
            for id in targets {
                match db.get(id) {
                    Some(inst) => rows.push(inst),
                    None => {
                        self.dangling(row, key, field.name.clone(), id.to_string());
                        return Json::Null;
                    }
                }
            }
            self.run(rows, plan)
        };

        if single {
            rendered.into_iter().next().unwrap_or(Json::Null)
        } else {
            Json::Array(rendered)
        }
    }

    fn dangling(&mut self, row: &Instance, key: &str, predicate: String, target: String) {
        let row_iri = self.db.config().expand_id(&row.id);
        warn!(row = %row_iri, field = %key, target = %target, "dangling reference");
        self.errors.push(RowError {
            row: row_iri,
            field: key.to_string(),
            error: ReferenceError::DanglingEdge {
                subject: row.id.clone(),
                predicate,
                target,
            },
        });
    }
}

fn render_field(row: &Instance, def: &FieldDef, config: &DbConfig) -> Json {
    match row.get(&def.name) {
        Some(FieldValue::One(v)) => v.to_json(&def.ty, config),
        Some(FieldValue::Many(vs)) => {
            Json::Array(vs.iter().map(|v| v.to_json(&def.ty, config)).collect())
        }
        None if def.is_multi() => Json::Array(Vec::new()),
        None => Json::Null,
    }
}
