//! DDL for the relational store. Every child table cascades from
//! `projects` so that Secure Delete's DB-row step is a single
//! `DELETE FROM projects WHERE id = ?1` plus an explicit row count
//! taken beforehand (SQLite reports cascade-deleted row counts only
//! per-statement, so we count children ourselves).

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS projects (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    classification  TEXT NOT NULL,
    status          TEXT NOT NULL,
    due_date        TEXT,
    tags            TEXT NOT NULL DEFAULT '[]',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id                      TEXT PRIMARY KEY,
    project_id              TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    filename                TEXT NOT NULL,
    file_type               TEXT NOT NULL,
    original_blob_ref       TEXT,
    original_missing        INTEGER NOT NULL DEFAULT 0,
    masked_text             TEXT NOT NULL,
    sanitize_level          TEXT NOT NULL,
    classification          TEXT NOT NULL,
    ai_allowed              INTEGER NOT NULL,
    export_allowed          INTEGER NOT NULL,
    sha256                  TEXT NOT NULL,
    excluded_from_compile   INTEGER NOT NULL DEFAULT 0,
    datetime_masked         INTEGER NOT NULL DEFAULT 0,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id);

CREATE TABLE IF NOT EXISTS project_notes (
    id                      TEXT PRIMARY KEY,
    project_id              TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    title                   TEXT,
    masked_body             TEXT NOT NULL,
    sanitize_level          TEXT NOT NULL,
    excluded_from_compile   INTEGER NOT NULL DEFAULT 0,
    sha256                  TEXT NOT NULL,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_project_notes_project ON project_notes(project_id);

CREATE TABLE IF NOT EXISTS journalist_notes (
    id                  TEXT PRIMARY KEY,
    project_id          TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    body                TEXT NOT NULL,
    category            TEXT NOT NULL,
    image_blob_refs     TEXT NOT NULL DEFAULT '[]',
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_journalist_notes_project ON journalist_notes(project_id);

CREATE TABLE IF NOT EXISTS sources (
    id              TEXT PRIMARY KEY,
    project_id      TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    source_type     TEXT NOT NULL,
    url             TEXT,
    comment         TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sources_project ON sources(project_id);

CREATE TABLE IF NOT EXISTS events (
    id              TEXT PRIMARY KEY,
    project_id      TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    actor           TEXT NOT NULL,
    event_type      TEXT NOT NULL,
    metadata        TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_project ON events(project_id);

CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT PRIMARY KEY,
    kind            TEXT NOT NULL,
    status          TEXT NOT NULL,
    input_ref       TEXT NOT NULL,
    result_ref      TEXT,
    error_code      TEXT,
    error_detail    TEXT,
    created_at      TEXT NOT NULL,
    finished_at     TEXT
);

CREATE TABLE IF NOT EXISTS knox_reports (
    id                  TEXT PRIMARY KEY,
    project_id          TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    policy_id           TEXT NOT NULL,
    policy_version      TEXT NOT NULL,
    ruleset_hash        TEXT NOT NULL,
    template_id         TEXT NOT NULL,
    engine_id           TEXT NOT NULL,
    input_fingerprint   TEXT NOT NULL,
    input_manifest      TEXT NOT NULL,
    gate_results        TEXT NOT NULL,
    rendered_markdown   TEXT NOT NULL,
    latency_ms          INTEGER NOT NULL,
    created_at          TEXT NOT NULL,
    UNIQUE(project_id, policy_id, template_id, input_fingerprint)
);
"#;

pub fn init_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
