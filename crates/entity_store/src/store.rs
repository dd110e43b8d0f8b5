use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use editorial_common::{
    now, Classification, DocumentId, JobId, NoteId, PolicyId, ProjectId, ProjectStatus, ReportId,
    SanitizeLevel, SourceId, UsageRestrictions,
};
use editorial_privacy_guard::GuardedEvent;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use crate::audit_sidecar::AuditSidecar;
use crate::models::{classification_str, status_str};
use crate::schema::init_schema;
use crate::{
    Document, EventRow, FileType, Job, JobKind, JobStatus, JournalistNote, JournalistNoteCategory,
    KnoxReport, Project, ProjectNote, Source, SourceType, StoreError,
};

pub struct EntityStore {
    conn: Mutex<Connection>,
    audit: AuditSidecar,
}

impl EntityStore {
    pub fn open(db_path: impl AsRef<Path>, audit_log_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Sqlite(rusqlite::Error::from(e)))?;
        }
        let conn = Connection::open(db_path.as_ref())?;
        init_schema(&conn)?;
        let audit = AuditSidecar::open(audit_log_path)?;
        Ok(Self { conn: Mutex::new(conn), audit })
    }

    pub fn open_in_memory(audit_log_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        let audit = AuditSidecar::open(audit_log_path)?;
        Ok(Self { conn: Mutex::new(conn), audit })
    }

    // ---- Projects ----------------------------------------------------

    pub fn create_project(
        &self,
        name: &str,
        classification: Classification,
        due_date: Option<DateTime<Utc>>,
        tags: Vec<String>,
    ) -> Result<Project, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let id = ProjectId::new();
        let ts = now();
        conn.execute(
            "INSERT INTO projects (id, name, classification, status, due_date, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.to_string(),
                name,
                classification_str(classification),
                status_str(ProjectStatus::Research),
                due_date.map(|d| d.to_rfc3339()),
                serde_json::to_string(&tags)?,
                ts.to_rfc3339(),
            ],
        )?;
        self.get_project_locked(&conn, id)?.ok_or(StoreError::NotFound)
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        self.get_project_locked(&conn, id)
    }

    fn get_project_locked(&self, conn: &Connection, id: ProjectId) -> Result<Option<Project>, StoreError> {
        conn.query_row("SELECT * FROM projects WHERE id = ?1", params![id.to_string()], Project::from_row)
            .optional()?
            .map(Ok)
            .transpose()
    }

    // ---- Documents -----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn upload_document(
        &self,
        project_id: ProjectId,
        filename: &str,
        file_type: FileType,
        original_blob_ref: Option<String>,
        masked_text: &str,
        sanitize_level: SanitizeLevel,
        classification: Classification,
        sha256: &str,
    ) -> Result<Document, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let id = DocumentId::new();
        let ts = now();
        let restrictions = UsageRestrictions::for_level(sanitize_level);
        conn.execute(
            "INSERT INTO documents (
                id, project_id, filename, file_type, original_blob_ref, original_missing,
                masked_text, sanitize_level, classification, ai_allowed, export_allowed,
                sha256, excluded_from_compile, datetime_masked, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10, ?11, 0, 0, ?12, ?12)",
            params![
                id.to_string(),
                project_id.to_string(),
                filename,
                file_type.as_str(),
                original_blob_ref,
                masked_text,
                sanitize_level.as_str(),
                classification_str(classification),
                restrictions.ai_allowed as i64,
                restrictions.export_allowed as i64,
                sha256,
                ts.to_rfc3339(),
            ],
        )?;
        self.get_document_locked(&conn, id)?.ok_or(StoreError::NotFound)
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        self.get_document_locked(&conn, id)
    }

    fn get_document_locked(&self, conn: &Connection, id: DocumentId) -> Result<Option<Document>, StoreError> {
        conn.query_row("SELECT * FROM documents WHERE id = ?1", params![id.to_string()], Document::from_row)
            .optional()?
            .map(Ok)
            .transpose()
    }

    /// Shared core for `bump_sanitize_level` and `edit_masked`: both ask
    /// the Sanitization Service to recompute `(level, masked_text,
    /// sha256)` first, then persist it here under a row lock that
    /// refuses a level regression. `BEGIN IMMEDIATE` is SQLite's analog
    /// of `SELECT … FOR UPDATE` — it takes the write lock up front so a
    /// concurrent bump/edit on the same document serializes instead of
    /// racing.
    pub fn update_document_sanitization(
        &self,
        id: DocumentId,
        new_level: SanitizeLevel,
        new_masked_text: &str,
        new_sha256: &str,
    ) -> Result<Document, StoreError> {
        let mut conn = self.conn.lock().expect("entity store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tx
            .query_row("SELECT * FROM documents WHERE id = ?1", params![id.to_string()], Document::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        if new_level < current.sanitize_level {
            return Err(StoreError::LevelRegression {
                current: current.sanitize_level.to_string(),
                requested: new_level.to_string(),
            });
        }
        let restrictions = UsageRestrictions::for_level(new_level);
        let ts = now();
        tx.execute(
            "UPDATE documents SET masked_text = ?1, sanitize_level = ?2, ai_allowed = ?3,
             export_allowed = ?4, sha256 = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                new_masked_text,
                new_level.as_str(),
                restrictions.ai_allowed as i64,
                restrictions.export_allowed as i64,
                new_sha256,
                ts.to_rfc3339(),
                id.to_string(),
            ],
        )?;
        let updated = tx
            .query_row("SELECT * FROM documents WHERE id = ?1", params![id.to_string()], Document::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn mark_original_missing(&self, id: DocumentId) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        conn.execute(
            "UPDATE documents SET original_missing = 1, updated_at = ?2 WHERE id = ?1",
            params![id.to_string(), now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Toggle a document's compile eligibility (spec.md §3 `excluded_from_compile`).
    /// Does not re-run sanitization or bump `updated_at` for compile-selection
    /// purposes only — it is a visibility flag, not a content edit.
    pub fn set_document_excluded_from_compile(&self, id: DocumentId, excluded: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let changed = conn.execute(
            "UPDATE documents SET excluded_from_compile = ?1 WHERE id = ?2",
            params![excluded as i64, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Note analogue of [`EntityStore::set_document_excluded_from_compile`].
    pub fn set_note_excluded_from_compile(&self, id: NoteId, excluded: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let changed = conn.execute(
            "UPDATE project_notes SET excluded_from_compile = ?1 WHERE id = ?2",
            params![excluded as i64, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ---- Project notes --------------------------------------------------

    pub fn create_project_note(
        &self,
        project_id: ProjectId,
        title: Option<&str>,
        masked_body: &str,
        sanitize_level: SanitizeLevel,
        sha256: &str,
    ) -> Result<ProjectNote, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let id = NoteId::new();
        let ts = now();
        conn.execute(
            "INSERT INTO project_notes (id, project_id, title, masked_body, sanitize_level,
             excluded_from_compile, sha256, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
            params![
                id.to_string(),
                project_id.to_string(),
                title,
                masked_body,
                sanitize_level.as_str(),
                sha256,
                ts.to_rfc3339(),
            ],
        )?;
        conn.query_row("SELECT * FROM project_notes WHERE id = ?1", params![id.to_string()], ProjectNote::from_row)
            .map_err(StoreError::from)
    }

    pub fn get_project_note(&self, id: NoteId) -> Result<Option<ProjectNote>, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        conn.query_row("SELECT * FROM project_notes WHERE id = ?1", params![id.to_string()], ProjectNote::from_row)
            .optional()?
            .map(Ok)
            .transpose()
    }

    pub fn update_project_note_sanitization(
        &self,
        id: NoteId,
        new_level: SanitizeLevel,
        new_masked_body: &str,
        new_sha256: &str,
    ) -> Result<ProjectNote, StoreError> {
        let mut conn = self.conn.lock().expect("entity store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tx
            .query_row("SELECT * FROM project_notes WHERE id = ?1", params![id.to_string()], ProjectNote::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        if new_level < current.sanitize_level {
            return Err(StoreError::LevelRegression {
                current: current.sanitize_level.to_string(),
                requested: new_level.to_string(),
            });
        }
        let ts = now();
        tx.execute(
            "UPDATE project_notes SET masked_body = ?1, sanitize_level = ?2, sha256 = ?3, updated_at = ?4
             WHERE id = ?5",
            params![new_masked_body, new_level.as_str(), new_sha256, ts.to_rfc3339(), id.to_string()],
        )?;
        let updated = tx
            .query_row("SELECT * FROM project_notes WHERE id = ?1", params![id.to_string()], ProjectNote::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(updated)
    }

    // ---- Journalist notes ------------------------------------------------

    pub fn create_journalist_note(
        &self,
        project_id: ProjectId,
        body: &str,
        category: JournalistNoteCategory,
        image_blob_refs: Vec<String>,
    ) -> Result<JournalistNote, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let id = NoteId::new();
        let ts = now();
        conn.execute(
            "INSERT INTO journalist_notes (id, project_id, body, category, image_blob_refs, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id.to_string(),
                project_id.to_string(),
                body,
                category.as_str(),
                serde_json::to_string(&image_blob_refs)?,
                ts.to_rfc3339(),
            ],
        )?;
        conn.query_row(
            "SELECT * FROM journalist_notes WHERE id = ?1",
            params![id.to_string()],
            JournalistNote::from_row,
        )
        .map_err(StoreError::from)
    }

    // ---- Sources -----------------------------------------------------

    pub fn create_source(
        &self,
        project_id: ProjectId,
        title: &str,
        source_type: SourceType,
        url: Option<&str>,
        comment: Option<&str>,
    ) -> Result<Source, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let id = SourceId::new();
        let ts = now();
        conn.execute(
            "INSERT INTO sources (id, project_id, title, source_type, url, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id.to_string(), project_id.to_string(), title, source_type.as_str(), url, comment, ts.to_rfc3339()],
        )?;
        conn.query_row("SELECT * FROM sources WHERE id = ?1", params![id.to_string()], Source::from_row)
            .map_err(StoreError::from)
    }

    /// Documents, notes, and sources eligible for a KnoxInputPack,
    /// already sorted per the builder's determinism rules.
    pub fn list_eligible_for_compile(
        &self,
        project_id: ProjectId,
    ) -> Result<(Vec<Document>, Vec<ProjectNote>, Vec<Source>), StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let mut doc_stmt = conn.prepare(
            "SELECT * FROM documents WHERE project_id = ?1 AND excluded_from_compile = 0
             ORDER BY created_at ASC, id ASC",
        )?;
        let documents = doc_stmt
            .query_map(params![project_id.to_string()], Document::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut note_stmt = conn.prepare(
            "SELECT * FROM project_notes WHERE project_id = ?1 AND excluded_from_compile = 0
             ORDER BY created_at ASC, id ASC",
        )?;
        let notes = note_stmt
            .query_map(params![project_id.to_string()], ProjectNote::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut source_stmt =
            conn.prepare("SELECT * FROM sources WHERE project_id = ?1 ORDER BY source_type ASC, id ASC")?;
        let sources = source_stmt
            .query_map(params![project_id.to_string()], Source::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((documents, notes, sources))
    }

    // ---- Events -------------------------------------------------------

    /// Write a Guard-checked event to the SQL table, committing before
    /// appending to the hash-chained sidecar. The sidecar append
    /// durably writes a line and advances the in-memory `last_hash`, so
    /// it must never run against a transaction that might still roll
    /// back: committing first means the failure mode is at worst a SQL
    /// row with no matching sidecar line (a gap a sidecar audit can
    /// detect), never a hash-chained sidecar line that advanced off a
    /// row that was never actually persisted.
    pub fn append_event(&self, event: GuardedEvent) -> Result<EventRow, StoreError> {
        let mut conn = self.conn.lock().expect("entity store mutex poisoned");
        let tx = conn.transaction()?;
        let metadata_json = serde_json::to_string(&event.event)?;
        tx.execute(
            "INSERT INTO events (id, project_id, actor, event_type, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id.to_string(),
                event.project_id.to_string(),
                event.actor,
                event.event_type,
                metadata_json,
                event.created_at.to_rfc3339(),
            ],
        )?;
        let row = tx
            .query_row("SELECT * FROM events WHERE id = ?1", params![event.id.to_string()], EventRow::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        tx.commit()?;
        self.audit.append(&event)?;
        Ok(row)
    }

    pub fn list_events(&self, project_id: ProjectId) -> Result<Vec<EventRow>, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let mut stmt = conn.prepare("SELECT * FROM events WHERE project_id = ?1 ORDER BY created_at ASC")?;
        let rows = stmt.query_map(params![project_id.to_string()], EventRow::from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- Jobs ----------------------------------------------------------

    pub fn enqueue_job(&self, kind: JobKind, input_ref: &str) -> Result<Job, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let id = JobId::new();
        let ts = now();
        conn.execute(
            "INSERT INTO jobs (id, kind, status, input_ref, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id.to_string(), kind.as_str(), JobStatus::Queued.as_str(), input_ref, ts.to_rfc3339()],
        )?;
        conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id.to_string()], Job::from_row)
            .map_err(StoreError::from)
    }

    /// Atomically claim the oldest queued job of `kind`, transitioning
    /// it to `running`. Returns `None` if the queue is empty.
    pub fn claim_next_job(&self, kind: JobKind) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.lock().expect("entity store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidate: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE kind = ?1 AND status = ?2 ORDER BY created_at ASC LIMIT 1",
                params![kind.as_str(), JobStatus::Queued.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(job_id) = candidate else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE jobs SET status = ?1 WHERE id = ?2",
            params![JobStatus::Running.as_str(), job_id],
        )?;
        let job = tx
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![job_id], Job::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(Some(job))
    }

    pub fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        result_ref: Option<&str>,
        error_code: Option<&str>,
        error_detail: Option<&str>,
    ) -> Result<Job, StoreError> {
        let mut conn = self.conn.lock().expect("entity store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tx
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id.to_string()], Job::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        if current.status.is_terminal() {
            return Err(StoreError::JobAlreadyTerminal(id.to_string()));
        }
        tx.execute(
            "UPDATE jobs SET status = ?1, result_ref = ?2, error_code = ?3, error_detail = ?4, finished_at = ?5
             WHERE id = ?6",
            params![status.as_str(), result_ref, error_code, error_detail, now().to_rfc3339(), id.to_string()],
        )?;
        let job = tx
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id.to_string()], Job::from_row)
            .optional()?
            .ok_or(StoreError::NotFound)?;
        tx.commit()?;
        Ok(job)
    }

    pub fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id.to_string()], Job::from_row)
            .optional()
            .map_err(StoreError::from)
    }

    // ---- Knox reports --------------------------------------------------

    pub fn get_report_by_fingerprint(
        &self,
        project_id: ProjectId,
        policy_id: PolicyId,
        template_id: &str,
        input_fingerprint: &str,
    ) -> Result<Option<KnoxReport>, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        conn.query_row(
            "SELECT * FROM knox_reports WHERE project_id = ?1 AND policy_id = ?2 AND template_id = ?3
             AND input_fingerprint = ?4",
            params![project_id.to_string(), policy_id.as_str(), template_id, input_fingerprint],
            KnoxReport::from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Insert a freshly-compiled report, relying on the DB-enforced
    /// unique index on `(project_id, policy_id, template_id,
    /// input_fingerprint)` as the idempotence mutex. On a concurrent
    /// race, the losing writer re-reads and returns the winner's row
    /// instead of erroring — `compile` is idempotent either way.
    #[allow(clippy::too_many_arguments)]
    pub fn save_report_if_absent(
        &self,
        project_id: ProjectId,
        policy_id: PolicyId,
        policy_version: &str,
        ruleset_hash: &str,
        template_id: &str,
        engine_id: &str,
        input_fingerprint: &str,
        input_manifest: &serde_json::Value,
        gate_results: &serde_json::Value,
        rendered_markdown: &str,
        latency_ms: u64,
    ) -> Result<(KnoxReport, bool), StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let id = ReportId::new();
        let ts = now();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO knox_reports (
                id, project_id, policy_id, policy_version, ruleset_hash, template_id, engine_id,
                input_fingerprint, input_manifest, gate_results, rendered_markdown, latency_ms, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id.to_string(),
                project_id.to_string(),
                policy_id.as_str(),
                policy_version,
                ruleset_hash,
                template_id,
                engine_id,
                input_fingerprint,
                serde_json::to_string(input_manifest)?,
                serde_json::to_string(gate_results)?,
                rendered_markdown,
                latency_ms as i64,
                ts.to_rfc3339(),
            ],
        )?;
        if inserted == 1 {
            let report = conn
                .query_row("SELECT * FROM knox_reports WHERE id = ?1", params![id.to_string()], KnoxReport::from_row)?;
            return Ok((report, true));
        }
        let winner = conn
            .query_row(
                "SELECT * FROM knox_reports WHERE project_id = ?1 AND policy_id = ?2 AND template_id = ?3
                 AND input_fingerprint = ?4",
                params![project_id.to_string(), policy_id.as_str(), template_id, input_fingerprint],
                KnoxReport::from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        Ok((winner, false))
    }

    // ---- Secure delete --------------------------------------------------

    /// Read-only enumeration (Secure Delete steps 1–2): every blob_ref
    /// the project currently owns, plus a row count per table, without
    /// deleting anything.
    pub fn project_subgraph(&self, project_id: ProjectId) -> Result<ProjectSubgraph, StoreError> {
        let conn = self.conn.lock().expect("entity store mutex poisoned");
        let mut blob_refs = Vec::new();

        let mut doc_stmt = conn.prepare("SELECT original_blob_ref FROM documents WHERE project_id = ?1")?;
        let doc_refs = doc_stmt
            .query_map(params![project_id.to_string()], |row| row.get::<_, Option<String>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        blob_refs.extend(doc_refs.into_iter().flatten());

        let mut note_stmt = conn.prepare("SELECT image_blob_refs FROM journalist_notes WHERE project_id = ?1")?;
        let note_refs: Vec<String> = note_stmt.query_map(params![project_id.to_string()], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        for json in note_refs {
            let refs: Vec<String> = serde_json::from_str(&json)?;
            blob_refs.extend(refs);
        }

        let counts = DeleteProjectCounts {
            documents: count_where(&conn, "documents", project_id)?,
            project_notes: count_where(&conn, "project_notes", project_id)?,
            journalist_notes: count_where(&conn, "journalist_notes", project_id)?,
            sources: count_where(&conn, "sources", project_id)?,
            events: count_where(&conn, "events", project_id)?,
            knox_reports: count_where(&conn, "knox_reports", project_id)?,
        };

        Ok(ProjectSubgraph { blob_refs, row_counts: counts })
    }

    /// Secure Delete step 4: delete the project row, cascading to
    /// every child table. Deleting an already-absent project is a
    /// no-op that returns all-zero counts, so the overall operation
    /// stays idempotent.
    pub fn delete_project_rows(&self, project_id: ProjectId) -> Result<DeleteProjectCounts, StoreError> {
        let mut conn = self.conn.lock().expect("entity store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let exists: bool =
            tx.query_row("SELECT 1 FROM projects WHERE id = ?1", params![project_id.to_string()], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
        if !exists {
            tx.commit()?;
            return Ok(DeleteProjectCounts::default());
        }
        let counts = DeleteProjectCounts {
            documents: count_where(&tx, "documents", project_id)?,
            project_notes: count_where(&tx, "project_notes", project_id)?,
            journalist_notes: count_where(&tx, "journalist_notes", project_id)?,
            sources: count_where(&tx, "sources", project_id)?,
            events: count_where(&tx, "events", project_id)?,
            knox_reports: count_where(&tx, "knox_reports", project_id)?,
        };
        tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id.to_string()])?;
        tx.commit()?;
        Ok(counts)
    }
}

fn count_where(conn: &Connection, table: &str, project_id: ProjectId) -> Result<u64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE project_id = ?1");
    let n: i64 = conn.query_row(&sql, params![project_id.to_string()], |row| row.get(0))?;
    Ok(n as u64)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteProjectCounts {
    pub documents: u64,
    pub project_notes: u64,
    pub journalist_notes: u64,
    pub sources: u64,
    pub events: u64,
    pub knox_reports: u64,
}

impl DeleteProjectCounts {
    pub fn total(&self) -> u64 {
        self.documents + self.project_notes + self.journalist_notes + self.sources + self.events + self.knox_reports
    }
}

#[derive(Debug, Clone)]
pub struct ProjectSubgraph {
    pub blob_refs: Vec<String>,
    pub row_counts: DeleteProjectCounts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use editorial_common::Classification;
    use editorial_privacy_guard::{Event, GuardMode};
    use tempfile::TempDir;

    fn store() -> (TempDir, EntityStore) {
        let tmp = TempDir::new().unwrap();
        let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
        (tmp, store)
    }

    #[test]
    fn create_and_fetch_project_roundtrip() {
        let (_tmp, store) = store();
        let p = store.create_project("Project X", Classification::Sensitive, None, vec!["a".into()]).unwrap();
        let fetched = store.get_project(p.id).unwrap().unwrap();
        assert_eq!(fetched.name, "Project X");
        assert_eq!(fetched.status, ProjectStatus::Research);
    }

    #[test]
    fn create_and_fetch_project_note_roundtrip() {
        let (_tmp, store) = store();
        let p = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let note = store.create_project_note(p.id, Some("Title"), "masked body", SanitizeLevel::Normal, "sha-note").unwrap();
        let fetched = store.get_project_note(note.id).unwrap().unwrap();
        assert_eq!(fetched.title.as_deref(), Some("Title"));
        assert_eq!(fetched.masked_body, "masked body");
        assert!(store.get_project_note(NoteId::new()).unwrap().is_none());
    }

    #[test]
    fn document_sanitize_level_cannot_regress() {
        let (_tmp, store) = store();
        let p = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = store
            .upload_document(p.id, "f.txt", FileType::Txt, None, "masked", SanitizeLevel::Strict, Classification::Public, "sha")
            .unwrap();
        let err = store.update_document_sanitization(doc.id, SanitizeLevel::Normal, "masked", "sha").unwrap_err();
        assert!(matches!(err, StoreError::LevelRegression { .. }));
    }

    #[test]
    fn paranoid_bump_clears_usage_restrictions() {
        let (_tmp, store) = store();
        let p = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = store
            .upload_document(p.id, "f.txt", FileType::Txt, None, "m", SanitizeLevel::Normal, Classification::Public, "sha")
            .unwrap();
        let updated = store.update_document_sanitization(doc.id, SanitizeLevel::Paranoid, "m2", "sha2").unwrap();
        assert!(!updated.usage_restrictions.ai_allowed);
        assert!(!updated.usage_restrictions.export_allowed);
    }

    #[test]
    fn append_event_writes_sql_row_and_sidecar() {
        let (_tmp, store) = store();
        let p = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let ev = Event::JobEnqueued { job_id: "j1".into(), kind: "transcribe".into() };
        let guarded = GuardedEvent::new(p.id, "tester", ev, GuardMode::Strict, true).unwrap();
        store.append_event(guarded).unwrap();
        let events = store.list_events(p.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "job_enqueued");
    }

    #[test]
    fn knox_report_idempotent_under_unique_index() {
        let (_tmp, store) = store();
        let p = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let manifest = serde_json::json!([]);
        let gates = serde_json::json!({});
        let (r1, inserted1) = store
            .save_report_if_absent(p.id, PolicyId::Internal, "v1", "rh", "weekly", "engine", "fp1", &manifest, &gates, "# md", 10)
            .unwrap();
        assert!(inserted1);
        let (r2, inserted2) = store
            .save_report_if_absent(p.id, PolicyId::Internal, "v1", "rh", "weekly", "engine", "fp1", &manifest, &gates, "# different", 99)
            .unwrap();
        assert!(!inserted2);
        assert_eq!(r1.id.to_string(), r2.id.to_string());
    }

    #[test]
    fn delete_project_is_idempotent_and_orphan_free() {
        let (_tmp, store) = store();
        let p = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(p.id, "f.txt", FileType::Txt, Some("blob:x:document_original:abc".into()), "m", SanitizeLevel::Normal, Classification::Public, "sha")
            .unwrap();
        let subgraph = store.project_subgraph(p.id).unwrap();
        assert_eq!(subgraph.blob_refs.len(), 1);
        let counts = store.delete_project_rows(p.id).unwrap();
        assert_eq!(counts.documents, 1);
        assert!(store.get_project(p.id).unwrap().is_none());

        let counts_again = store.delete_project_rows(p.id).unwrap();
        assert_eq!(counts_again.total(), 0);
    }

    #[test]
    fn claim_next_job_transitions_to_running() {
        let (_tmp, store) = store();
        let job = store.enqueue_job(JobKind::Transcribe, "input-ref").unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        let claimed = store.claim_next_job(JobKind::Transcribe).unwrap().unwrap();
        assert_eq!(claimed.id.to_string(), job.id.to_string());
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(store.claim_next_job(JobKind::Transcribe).unwrap().is_none());
    }

    #[test]
    fn finish_job_is_not_allowed_twice() {
        let (_tmp, store) = store();
        let job = store.enqueue_job(JobKind::KnoxCompile, "input-ref").unwrap();
        store.claim_next_job(JobKind::KnoxCompile).unwrap();
        store.finish_job(job.id, JobStatus::Succeeded, Some("result"), None, None).unwrap();
        let err = store.finish_job(job.id, JobStatus::Failed, None, Some("E"), None).unwrap_err();
        assert!(matches!(err, StoreError::JobAlreadyTerminal(_)));
    }
}
