//! Lexigraph Storage Layer
//!
//! A session around one [`PathDB`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        GRAPH STORE                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────┐  batch   ┌──────────────┐  publish  ┌────────┐  │
//! │  │ Writers │─────────►│ clone + apply│──────────►│Snapshot│  │
//! │  └─────────┘ (mutex)  └──────────────┘  (Arc)    └────────┘  │
//! │                              │                      ▲        │
//! │                              ▼                      │        │
//! │                       ┌─────────────┐         ┌─────────┐    │
//! │                       │ Change Log  │         │ Readers │    │
//! │                       └─────────────┘         └─────────┘    │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Atomic batches**: a commit applies every document or none of them
//! - **Snapshot reads**: readers hold an `Arc<PathDB>` and never see a
//!   half-applied batch
//! - **Change log**: every commit attempt is recorded with its outcome


use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use lexigraph_dsl::{parse_instance_documents, InstanceDoc, QueryRequest};
use lexigraph_pathdb::{DbConfig, PathDB, QueryResponse, Schema};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// Core Types
// ============================================================================

/// Unique identifier for a commit
pub type ChangeId = Uuid;

/// Where a batch came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSource {
    /// Documents read from a file
    FileImport { path: PathBuf },
    /// Programmatic insert
    Api { client_id: Option<String> },
    /// System-generated
    System { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    Applied,
    Rejected { reason: String },
}

/// One commit attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub timestamp: DateTime<Utc>,
    pub source: ChangeSource,
    /// Number of documents in the batch
    pub documents: usize,
    /// Relative ids written, in document order (empty when rejected)
    pub ids: Vec<String>,
    pub status: ChangeStatus,
}

/// Result of a successful commit
#[derive(Debug, Clone)]
pub struct CommitSummary {
    pub change_id: ChangeId,
    pub ids: Vec<String>,
    /// Instances in the published snapshot
    pub instances: usize,
    /// Edges in the published snapshot
    pub edges: usize,
}

// ============================================================================
// Storage Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Engine settings (base IRI)
    pub db: DbConfig,
    /// Oldest change log entries are dropped past this many
    pub changelog_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            changelog_limit: 1024,
        }
    }
}

// ============================================================================
// Graph Store
// ============================================================================

pub struct GraphStore {
    config: StorageConfig,
    /// Latest published snapshot
    current: RwLock<Arc<PathDB>>,
    /// Serializes writers
    writer: Mutex<()>,
    changelog: RwLock<Vec<Change>>,
}

impl GraphStore {
    pub fn new(schema: Arc<Schema>, config: StorageConfig) -> Self {
        let db = PathDB::with_config(schema, config.db.clone());
        Self {
            config,
            current: RwLock::new(Arc::new(db)),
            writer: Mutex::new(()),
            changelog: RwLock::new(Vec::new()),
        }
    }

    /// Compile schema documents (a JSON array) and open an empty store.
    pub fn from_schema_json(text: &str, config: StorageConfig) -> anyhow::Result<Self> {
        let schema = Schema::from_json_str(text).context("schema failed to compile")?;
        info!(
            classes = schema.classes().count(),
            enums = schema.enums().count(),
            "schema compiled"
        );
        Ok(Self::new(Arc::new(schema), config))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.current.read().schema_arc()
    }

    /// The latest published state. Later commits do not affect it.
    pub fn snapshot(&self) -> Arc<PathDB> {
        Arc::clone(&self.current.read())
    }

    // ========================================================================
    // Write Operations
    // ========================================================================

    /// Apply a batch of documents as one commit. On the first failing
    /// document the batch is rejected and the published snapshot is left
    /// untouched.
    pub fn commit(
        &self,
        docs: &[InstanceDoc],
        source: ChangeSource,
    ) -> anyhow::Result<CommitSummary> {
        let _writer = self.writer.lock();
        let change_id = Uuid::new_v4();
        let mut next: PathDB = self.current.read().as_ref().clone();

        let mut ids = Vec::with_capacity(docs.len());
        for (index, doc) in docs.iter().enumerate() {
            match next.insert(doc) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    warn!(
                        change = %change_id,
                        document = index,
                        class = doc.class.as_deref().unwrap_or("untyped"),
                        error = %err,
                        "batch rejected"
                    );
                    self.record(Change {
                        id: change_id,
                        timestamp: Utc::now(),
                        source,
                        documents: docs.len(),
                        ids: Vec::new(),
                        status: ChangeStatus::Rejected {
                            reason: err.to_string(),
                        },
                    });
                    return Err(anyhow::Error::new(err).context(format!(
                        "document #{index} (`{}`) rejected; nothing committed",
                        doc.class.as_deref().unwrap_or("untyped")
                    )));
                }
            }
        }

        let summary = CommitSummary {
            change_id,
            ids: ids.clone(),
            instances: next.len(),
            edges: next.edges().len(),
        };
        *self.current.write() = Arc::new(next);

        info!(
            change = %change_id,
            documents = docs.len(),
            instances = summary.instances,
            edges = summary.edges,
            "batch committed"
        );
        self.record(Change {
            id: change_id,
            timestamp: Utc::now(),
            source,
            documents: docs.len(),
            ids,
            status: ChangeStatus::Applied,
        });
        Ok(summary)
    }

    /// Parse a JSON array (or single object) of instance documents and
    /// commit them as one batch.
    pub fn commit_json(&self, text: &str, source: ChangeSource) -> anyhow::Result<CommitSummary> {
        let docs = parse_instance_documents(text).context("malformed instance documents")?;
        self.commit(&docs, source)
    }

    /// Read a file of instance documents and commit it as one batch.
    pub fn import_file(&self, path: &Path) -> anyhow::Result<CommitSummary> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.commit_json(
            &text,
            ChangeSource::FileImport {
                path: path.to_path_buf(),
            },
        )
        .with_context(|| format!("failed to import {}", path.display()))
    }

    fn record(&self, change: Change) {
        let mut log = self.changelog.write();
        log.push(change);
        if log.len() > self.config.changelog_limit {
            let excess = log.len() - self.config.changelog_limit;
            log.drain(..excess);
            debug!(dropped = excess, "change log trimmed");
        }
    }

    // ========================================================================
    // Read Operations
    // ========================================================================

    /// Run a query against the current snapshot.
    pub fn query(&self, request: &QueryRequest) -> anyhow::Result<QueryResponse> {
        let snapshot = self.snapshot();
        let response = snapshot
            .query(request)
            .with_context(|| format!("query on `{}` failed", request.class))?;
        if !response.errors.is_empty() {
            debug!(
                rows = response.data.len(),
                errors = response.errors.len(),
                "query had row errors"
            );
        }
        Ok(response)
    }

    /// Parse a JSON query request and run it.
    pub fn query_json(&self, text: &str) -> anyhow::Result<QueryResponse> {
        let request: QueryRequest =
            serde_json::from_str(text).context("malformed query request")?;
        self.query(&request)
    }

    /// Ids reached from `start` by a path expression, in discovery order.
    pub fn evaluate_path(&self, start: &str, expr: &str) -> anyhow::Result<Vec<String>> {
        let snapshot = self.snapshot();
        let ids = snapshot
            .evaluate_path_str(start, expr)
            .with_context(|| format!("path `{expr}` from `{start}` failed"))?;
        Ok(ids.into_iter().map(str::to_string).collect())
    }

    // ========================================================================
    // Change Log
    // ========================================================================

    pub fn changelog(&self) -> Vec<Change> {
        self.changelog.read().clone()
    }

    /// Number of applied commits still in the log.
    pub fn applied_commits(&self) -> usize {
        self.changelog
            .read()
            .iter()
            .filter(|c| c.status == ChangeStatus::Applied)
            .count()
    }

    /// Write the change log as pretty JSON.
    pub fn write_changelog(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&*self.changelog.read())?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write change log to {}", path.display()))?;
        Ok(())
    }
}
