//! editorial_entity_store
//!
//! The relational half of the core: everything except on-disk blobs
//! (owned by `editorial_file_vault`). Backed by SQLite via `rusqlite`
//! (bundled), with `ON DELETE CASCADE` from `projects` to every child
//! table, and row-level locking for mutation ordering implemented as
//! `BEGIN IMMEDIATE` transactions (SQLite's analog of `SELECT … FOR
//! UPDATE`).
//!
//! `append_event` is the only way to write an [`editorial_privacy_guard::Event`]
//! row; it takes a [`editorial_privacy_guard::GuardedEvent`], which can only be
//! constructed by passing the Privacy Guard's checks. It writes the
//! event twice — once as a queryable SQL row, once to the hash-chained
//! JSONL sidecar (`audit_sidecar`) — and only returns success once both
//! writes land, so the two never silently diverge.

mod audit_sidecar;
mod models;
mod schema;
mod store;

pub use audit_sidecar::{verify as verify_audit_log, AuditSidecar, AuditSidecarError};
pub use models::{
    Document, EventRow, FileType, Job, JobKind, JobStatus, JournalistNote, JournalistNoteCategory,
    KnoxReport, MaskedContent, Project, ProjectNote, Source, SourceType,
};
pub use store::{DeleteProjectCounts, EntityStore, ProjectSubgraph};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timestamp parse error: {0}")]
    Chrono(#[from] chrono::ParseError),
    #[error("audit sidecar error: {0}")]
    AuditSidecar(#[from] AuditSidecarError),
    #[error("not found")]
    NotFound,
    #[error("sanitize level may not regress: current={current}, requested={requested}")]
    LevelRegression { current: String, requested: String },
    #[error("job {0} is already in a terminal state")]
    JobAlreadyTerminal(String),
}
