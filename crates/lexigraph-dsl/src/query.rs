//! Structured query requests.
//!
//! A request is the already-parsed form of a class query: which class, an
//! optional id selection, filters, ordering, paging and the fields to
//! project. Nested fields (backlinks, paths, links) carry their own
//! [`Selection`], so the request mirrors the shape of the result tree.
//!
//! ```text
//! { "class": "Person",
//!   "filter": { "name": { "ge": "K" }, "age": { "ge": 30 } },
//!   "orderBy": [ { "field": "order", "dir": "ASC" } ],
//!   "fields": [ "name",
//!               { "backlink": { "field": "friend", "class": "Person", "fields": ["name"] } },
//!               { "path": { "expr": "friend+", "class": "Person", "fields": ["name"] } } ] }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::schema_doc::Name;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub class: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(flatten)]
    pub selection: Selection,
}

impl QueryRequest {
    pub fn new(class: impl Into<Name>) -> Self {
        Self {
            class: class.into(),
            id: None,
            ids: None,
            selection: Selection::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn field(mut self, field: impl Into<FieldSelection>) -> Self {
        self.selection.fields.push(field.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<Name>, dir: Direction) -> Self {
        self.selection.order_by.push(OrderKey {
            field: field.into(),
            dir,
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.selection.filter = Some(filter);
        self
    }
}

/// Everything a (possibly nested) result set needs besides its source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default)]
    pub fields: Vec<FieldSelection>,
}

impl Selection {
    pub fn fields<I, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldSelection>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn order_by(mut self, field: impl Into<Name>, dir: Direction) -> Self {
        self.order_by.push(OrderKey {
            field: field.into(),
            dir,
        });
        self
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Conjunction of field predicates, plus boolean combinators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "_and", default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<Filter>,
    #[serde(rename = "_or", default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<Filter>,
    #[serde(rename = "_not", default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Filter>>,
    #[serde(flatten)]
    pub fields: BTreeMap<Name, FieldPredicate>,
}

impl Filter {
    pub fn field(mut self, field: impl Into<Name>, op: FilterOp, value: impl Into<Json>) -> Self {
        self.fields
            .entry(field.into())
            .or_default()
            .ops
            .insert(op, value.into());
        self
    }
}

/// Operators applied to one field; all of them must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPredicate {
    pub ops: BTreeMap<FilterOp, Json>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Regex,
    StartsWith,
}

impl FilterOp {
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge
        )
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Lt => "lt",
            FilterOp::Le => "le",
            FilterOp::Gt => "gt",
            FilterOp::Ge => "ge",
            FilterOp::Regex => "regex",
            FilterOp::StartsWith => "startsWith",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub field: Name,
    #[serde(default)]
    pub dir: Direction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

// ============================================================================
// Field selections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSelection {
    /// A declared field, or one of the `_id` / `_type` pseudo-fields.
    Scalar(Name),
    Nested(NestedField),
}

impl From<&str> for FieldSelection {
    fn from(name: &str) -> Self {
        FieldSelection::Scalar(name.to_string())
    }
}

impl From<String> for FieldSelection {
    fn from(name: String) -> Self {
        FieldSelection::Scalar(name)
    }
}

impl From<BacklinkSelection> for FieldSelection {
    fn from(b: BacklinkSelection) -> Self {
        FieldSelection::Nested(NestedField::Backlink(b))
    }
}

impl From<PathSelection> for FieldSelection {
    fn from(p: PathSelection) -> Self {
        FieldSelection::Nested(NestedField::Path(p))
    }
}

impl From<LinkSelection> for FieldSelection {
    fn from(l: LinkSelection) -> Self {
        FieldSelection::Nested(NestedField::Link(l))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestedField {
    Backlink(BacklinkSelection),
    Path(PathSelection),
    Link(LinkSelection),
}

/// `_<field>_of_<Class>`: instances of `class` whose `field` points here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklinkSelection {
    pub field: Name,
    pub class: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<Name>,
    #[serde(flatten)]
    pub selection: Selection,
}

impl BacklinkSelection {
    pub fn new(field: impl Into<Name>, class: impl Into<Name>, selection: Selection) -> Self {
        Self {
            field: field.into(),
            class: class.into(),
            alias: None,
            selection,
        }
    }

    pub fn output_key(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("_{}_of_{}", self.field, self.class))
    }
}

/// `_path_to_<Class>(path: expr)`: instances of `class` reached by `expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSelection {
    pub expr: String,
    pub class: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<Name>,
    #[serde(flatten)]
    pub selection: Selection,
}

impl PathSelection {
    pub fn new(expr: impl Into<String>, class: impl Into<Name>, selection: Selection) -> Self {
        Self {
            expr: expr.into(),
            class: class.into(),
            alias: None,
            selection,
        }
    }

    pub fn output_key(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("_path_to_{}", self.class))
    }
}

/// Forward traversal of a reference field with a nested selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSelection {
    pub field: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<Name>,
    #[serde(flatten)]
    pub selection: Selection,
}

impl LinkSelection {
    pub fn new(field: impl Into<Name>, selection: Selection) -> Self {
        Self {
            field: field.into(),
            alias: None,
            selection,
        }
    }

    pub fn output_key(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.field.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_filter_order_and_nested_fields() {
        let req: QueryRequest = serde_json::from_value(json!({
            "class": "Person",
            "filter": { "name": { "ge": "K" }, "age": { "ge": 30 } },
            "orderBy": [ { "field": "order", "dir": "ASC" } ],
            "fields": [
                "name",
                { "backlink": { "field": "friend", "class": "Person",
                                "orderBy": [ { "field": "name", "dir": "DESC" } ],
                                "fields": ["name"] } },
                { "path": { "expr": "friend+", "class": "Person", "fields": ["name"] } }
            ]
        }))
        .unwrap();

        let filter = req.selection.filter.as_ref().unwrap();
        assert_eq!(filter.fields["name"].ops[&FilterOp::Ge], json!("K"));
        assert_eq!(filter.fields["age"].ops[&FilterOp::Ge], json!(30));
        assert_eq!(req.selection.order_by[0].dir, Direction::Asc);

        let FieldSelection::Nested(NestedField::Backlink(b)) = &req.selection.fields[1] else {
            panic!("expected backlink");
        };
        assert_eq!(b.output_key(), "_friend_of_Person");
        assert_eq!(b.selection.order_by[0].dir, Direction::Desc);

        let FieldSelection::Nested(NestedField::Path(p)) = &req.selection.fields[2] else {
            panic!("expected path");
        };
        assert_eq!(p.output_key(), "_path_to_Person");
        assert_eq!(p.expr, "friend+");
    }

    #[test]
    fn combinators_are_not_field_predicates() {
        let filter: Filter = serde_json::from_value(json!({
            "_or": [ { "name": { "eq": "Plato" } }, { "order": { "lt": 2 } } ],
            "_not": { "age": { "gt": 90 } }
        }))
        .unwrap();
        assert!(filter.fields.is_empty());
        assert_eq!(filter.any.len(), 2);
        assert!(filter.not.is_some());
    }

    #[test]
    fn builder_matches_json_form() {
        let built = QueryRequest::new("Target").field("name").field(BacklinkSelection::new(
            "targets",
            "Source",
            Selection::fields(["name"]).order_by("name", Direction::Desc),
        ));
        let parsed: QueryRequest = serde_json::from_value(json!({
            "class": "Target",
            "fields": [ "name", { "backlink": { "field": "targets", "class": "Source",
                "orderBy": [ { "field": "name", "dir": "DESC" } ], "fields": ["name"] } } ]
        }))
        .unwrap();
        assert_eq!(built, parsed);
    }
}
