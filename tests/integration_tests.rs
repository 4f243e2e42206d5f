//! Integration tests for the complete Lexigraph pipeline
//!
//! These tests drive the engine through the storage session:
//! - Schema documents → compiled schema → GraphStore
//! - Instance batches (with forward references) → snapshots
//! - Structured queries: filters, ordering, backlinks, paths, links
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;
use std::thread;

use lexigraph_dsl::{
    BacklinkSelection, Direction, Filter, FilterOp, LinkSelection, PathSelection, QueryRequest,
    Selection,
};
use lexigraph_pathdb::QueryError;
use lexigraph_storage::{ChangeSource, ChangeStatus, GraphStore, StorageConfig};
use serde_json::{json, Value};

const SCHEMA: &str = r#"[
    { "@id": "Person", "@type": "Class",
      "@key": { "@type": "Lexical", "@fields": ["name"] },
      "name": "xsd:string",
      "age": "xsd:decimal",
      "order": "xsd:integer",
      "friend": { "@type": "Set", "@class": "Person" },
      "cat": { "@type": "Set", "@class": "Cat" } },
    { "@id": "Cat", "@type": "Class",
      "@key": { "@type": "Lexical", "@fields": ["name"] },
      "name": "xsd:string",
      "size": { "@type": "Optional", "@class": "Rocks" } },
    { "@id": "Rocks", "@type": "Enum", "@value": ["Big", "Medium", "Small"] },
    { "@id": "Parent", "@type": "Class", "name": "xsd:string" },
    { "@id": "Child", "@type": "Class", "@inherits": "Parent", "number": "xsd:byte" }
]"#;

fn source() -> ChangeSource {
    ChangeSource::Api { client_id: None }
}

/// People first (their cats are forward references), cats in a later commit.
fn sample_store() -> GraphStore {
    let store = GraphStore::from_schema_json(SCHEMA, StorageConfig::default()).unwrap();
    store
        .commit_json(
            &json!([
                { "@type": "Person", "name": "Aristotle", "age": 61, "order": 3, "friend": ["Person/Plato"] },
                { "@type": "Person", "name": "Plato", "age": 80, "order": 2, "friend": ["Person/Aristotle"] },
                { "@type": "Person", "name": "Socrates", "age": 71, "order": 1, "friend": ["Person/Plato"] },
                { "@type": "Person", "name": "Immanuel Kant", "age": 79, "order": 3,
                  "friend": ["Person/Immanuel%20Kant"], "cat": ["Cat/Toots"] },
                { "@type": "Person", "name": "Karl Popper", "age": 92, "order": 5,
                  "cat": ["Cat/Pickles", "Cat/Toots"] },
                { "@type": "Person", "name": "Kurt Gödel", "age": 71, "order": 5,
                  "friend": ["Person/Immanuel%20Kant"], "cat": ["Cat/Pickles"] }
            ])
            .to_string(),
            source(),
        )
        .unwrap();
    store
        .commit_json(
            &json!([
                { "@type": "Cat", "name": "Pickles", "size": "Small" },
                { "@type": "Cat", "name": "Toots", "size": "Big" }
            ])
            .to_string(),
            source(),
        )
        .unwrap();
    store
}

fn names(rows: &[Value]) -> Vec<&str> {
    rows.iter().map(|r| r["name"].as_str().unwrap()).collect()
}

// ============================================================================
// Basic queries
// ============================================================================

#[test]
fn test_basic_query_lists_people_in_id_order() {
    let store = sample_store();
    let response = store
        .query(&QueryRequest::new("Person").field("name").field("age").field("order"))
        .unwrap();

    assert!(response.errors.is_empty());
    assert_eq!(
        names(&response.data),
        vec![
            "Aristotle",
            "Immanuel Kant",
            "Karl Popper",
            "Kurt Gödel",
            "Plato",
            "Socrates"
        ]
    );
    assert_eq!(
        response.data[0],
        json!({ "name": "Aristotle", "age": 61, "order": "3" })
    );
}

#[test]
fn test_filter_order_and_tie_break() {
    let store = sample_store();
    let request = QueryRequest::new("Person")
        .filter(Filter::default().field("age", FilterOp::Ge, 71))
        .order_by("order", Direction::Desc)
        .field("name");
    let response = store.query(&request).unwrap();
    // order 5 ties between Karl Popper and Kurt Gödel break by id.
    assert_eq!(
        names(&response.data),
        vec!["Karl Popper", "Kurt Gödel", "Immanuel Kant", "Plato", "Socrates"]
    );
}

#[test]
fn test_enum_filter_and_rendering() {
    let store = sample_store();
    let request = QueryRequest::new("Cat")
        .filter(Filter::default().field("size", FilterOp::Eq, "Big"))
        .field("name")
        .field("size");
    let response = store.query(&request).unwrap();
    assert_eq!(response.data, vec![json!({ "name": "Toots", "size": "Big" })]);
}

// ============================================================================
// Nested selections across commits
// ============================================================================

#[test]
fn test_backlinks_resolve_after_later_commit() {
    let store = sample_store();
    let request = QueryRequest::new("Cat").field("name").field(BacklinkSelection::new(
        "cat",
        "Person",
        Selection::fields(["name"]),
    ));
    let response = store.query(&request).unwrap();
    assert_eq!(
        response.data,
        vec![
            json!({ "name": "Pickles", "_cat_of_Person": [{ "name": "Karl Popper" }, { "name": "Kurt Gödel" }] }),
            json!({ "name": "Toots", "_cat_of_Person": [{ "name": "Immanuel Kant" }, { "name": "Karl Popper" }] }),
        ]
    );
}

#[test]
fn test_path_selection_discovery_order() {
    let store = sample_store();
    let request = QueryRequest::new("Person")
        .with_id("Person/Immanuel%20Kant")
        .field("name")
        .field(PathSelection::new(
            "(<friend)*,cat",
            "Cat",
            Selection::fields(["name"]),
        ));
    let response = store.query(&request).unwrap();
    assert_eq!(
        response.data,
        vec![json!({
            "name": "Immanuel Kant",
            "_path_to_Cat": [{ "name": "Toots" }, { "name": "Pickles" }]
        })]
    );

    let reached = store
        .evaluate_path("terminusdb:///data/Person/Socrates", "friend+")
        .unwrap();
    assert_eq!(reached, vec!["Person/Plato", "Person/Aristotle"]);
}

#[test]
fn test_link_follows_forward_references() {
    let store = sample_store();
    let request = QueryRequest::new("Person")
        .with_id("Person/Karl%20Popper")
        .field(LinkSelection::new(
            "cat",
            Selection::fields(["name"]).order_by("name", Direction::Desc),
        ));
    let response = store.query(&request).unwrap();
    assert_eq!(
        response.data,
        vec![json!({ "cat": [{ "name": "Toots" }, { "name": "Pickles" }] })]
    );
}

/// Jim and Joe carry no `@type`; only Child declares both of their fields.
#[test]
fn test_subsumption_across_commits() {
    let store = sample_store();
    store
        .commit_json(
            r#"[
                { "@type": "Parent", "@id": "Parent/Dad", "name": "Dad" },
                { "@id": "Child/Jim", "name": "Jim", "number": 5 }
            ]"#,
            source(),
        )
        .unwrap();
    store
        .commit_json(
            r#"{ "@id": "Child/Joe", "name": "Joe", "number": 3 }"#,
            source(),
        )
        .unwrap();

    let parents = store
        .query(&QueryRequest::new("Parent").field("name").field("_type"))
        .unwrap();
    assert_eq!(
        parents.data,
        vec![
            json!({ "name": "Jim", "_type": "Child" }),
            json!({ "name": "Joe", "_type": "Child" }),
            json!({ "name": "Dad", "_type": "Parent" }),
        ]
    );
}

// ============================================================================
// Session guarantees
// ============================================================================

#[test]
fn test_failed_batch_leaves_store_unchanged() {
    let store = sample_store();
    let before = store.snapshot();

    let err = store
        .commit_json(
            r#"[
                { "@type": "Cat", "name": "Felix", "size": "Tiny" },
                { "@type": "Cat", "name": "Garfield" }
            ]"#,
            source(),
        )
        .unwrap_err();
    assert!(format!("{err:#}").contains("Tiny"));

    assert!(Arc::ptr_eq(&before, &store.snapshot()));
    let cats = store.query(&QueryRequest::new("Cat").field("name")).unwrap();
    assert_eq!(names(&cats.data), vec!["Pickles", "Toots"]);

    let log = store.changelog();
    assert_eq!(log.len(), 3);
    assert!(matches!(log[2].status, ChangeStatus::Rejected { .. }));
}

#[test]
fn test_request_errors_abort_query() {
    let store = sample_store();
    let cases = [
        QueryRequest::new("Dog"),
        QueryRequest::new("Person").field("shoeSize"),
        QueryRequest::new("Person").filter(Filter::default().field("age", FilterOp::Ge, "old")),
        QueryRequest::new("Person").field(PathSelection::new(
            "friend+,",
            "Person",
            Selection::default(),
        )),
    ];
    for request in &cases {
        let err = store.query(request).unwrap_err();
        assert!(
            err.downcast_ref::<QueryError>().is_some(),
            "expected a query error, got {err:#}"
        );
    }
}

#[test]
fn test_readers_see_whole_batches() {
    let store = Arc::new(GraphStore::from_schema_json(SCHEMA, StorageConfig::default()).unwrap());

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..20 {
                let batch = json!([
                    { "@type": "Person", "name": format!("a{i}"), "age": i, "order": i,
                      "friend": [format!("Person/b{i}")] },
                    { "@type": "Person", "name": format!("b{i}"), "age": i, "order": i,
                      "friend": [format!("Person/a{i}")] }
                ]);
                store.commit_json(&batch.to_string(), source()).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let snapshot = store.snapshot();
                    let rows = snapshot
                        .query(&QueryRequest::new("Person").field("name"))
                        .unwrap();
                    assert_eq!(rows.data.len() % 2, 0, "half a batch is visible");
                    assert!(rows.errors.is_empty());
                    assert_eq!(rows.data.len(), snapshot.len());
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.snapshot().len(), 40);
    assert_eq!(store.applied_commits(), 20);
}
