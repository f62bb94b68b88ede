//! Persistence collaborator: optimistic-revision storage for executions and
//! sentry parts.
//!
//! The store is the sole arbiter of cross-command concurrency. Every save
//! carries the revision the caller last read; a mismatch fails the command
//! with [`StoreError::RevisionConflict`], the one retryable error kind.
//! [`CaseStore::touch_sentry_part`] bumps a part's revision without changing
//! any visible field; the engine uses it to manufacture conflicts on every
//! part of an affected sentry, so two commands racing to satisfy different
//! parts of the same sentry are guaranteed to collide.

pub mod memory;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::tree::{ExecutionId, SentryPartId};

pub use memory::InMemoryCaseStore;

/// Monotonic per-record revision. `0` means "not yet persisted".
pub type Revision = u64;

/// Persistence errors.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The caller's expected revision no longer matches the stored one.
    #[error("revision conflict on {entity} {id}: expected {expected}, stored {stored}")]
    #[diagnostic(
        code(caseweave::store::revision_conflict),
        help("Another command committed first; retry the whole command from scratch.")
    )]
    RevisionConflict {
        entity: &'static str,
        id: String,
        expected: Revision,
        stored: Revision,
    },

    /// No record with the given id exists.
    #[error("no stored {entity} with id {id}")]
    #[diagnostic(code(caseweave::store::not_found))]
    NotFound { entity: &'static str, id: String },

    /// Backend failure (I/O, serialization, connectivity).
    #[error("store backend error: {message}")]
    #[diagnostic(code(caseweave::store::backend))]
    Backend { message: String },
}

/// Persisted form of a case execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub activity_id: String,
    pub parent_id: Option<ExecutionId>,
    pub case_instance_id: ExecutionId,
    pub state: String,
    pub previous_state: String,
    pub required: bool,
    pub variables: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Persisted form of a sentry part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentryPartRecord {
    pub id: SentryPartId,
    pub case_execution_id: ExecutionId,
    pub case_instance_id: ExecutionId,
    pub sentry_id: String,
    pub kind: String,
    pub source: Option<String>,
    pub variable_name: Option<String>,
    pub variable_event: Option<String>,
    pub satisfied: bool,
    pub updated_at: DateTime<Utc>,
}

/// Storage collaborator for the engine.
///
/// All saves are compare-and-swap on the revision: pass the revision last
/// read (or `0` for a new record) and receive the new one on success.
pub trait CaseStore: Send + Sync {
    /// Save an execution record, expecting `expected` as the stored revision.
    fn save_execution(
        &self,
        record: &ExecutionRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError>;

    /// Load an execution record, if present.
    fn load_execution(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Save a sentry part record, expecting `expected` as the stored revision.
    fn save_sentry_part(
        &self,
        record: &SentryPartRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError>;

    /// Bump a part's revision without changing any visible field.
    ///
    /// Must succeed even when the part's own `satisfied` flag did not
    /// change; this is the engine's race-detection hook.
    fn touch_sentry_part(
        &self,
        id: SentryPartId,
        expected: Revision,
    ) -> Result<Revision, StoreError>;
}
