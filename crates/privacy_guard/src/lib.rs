//! editorial_privacy_guard
//!
//! Metadata-only event and diagnostic-log policy. Every place in the
//! workspace that records an audit [`Event`] or logs a metadata map
//! must pass it through this crate first — the Entity Store's
//! `append_event` (in `editorial_entity_store`) only accepts a
//! [`GuardedEvent`], which can only be constructed here.
//!
//! Two closed forbidden-key sets are enforced:
//! - content keys: always forbidden, in every mode.
//! - source-identifier keys: forbidden when `source_safety_mode` is on
//!   (on by default, favoring the stricter behavior for protecting sources).

use editorial_common::{now, EventId, ProjectId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use thiserror::Error;

/// Closed set of keys that may never appear in event/log metadata,
/// regardless of mode: they name raw content.
pub const FORBIDDEN_CONTENT_KEYS: &[&str] = &[
    "text",
    "body",
    "content",
    "transcript",
    "note_body",
    "file_content",
    "payload",
    "query_params",
    "query",
    "segment_text",
    "transcript_text",
    "file_data",
    "raw_content",
    "original_text",
    "headers",
    "authorization",
    "cookie",
];

/// Closed set of keys that identify a source/requester, forbidden when
/// `source_safety_mode` is active (default: true).
pub const FORBIDDEN_SOURCE_KEYS: &[&str] = &[
    "ip",
    "ip_address",
    "client_ip",
    "remote_addr",
    "x-forwarded-for",
    "x-real-ip",
    "user_agent",
    "referer",
    "referrer",
    "origin",
    "url",
    "uri",
    "filename",
    "filepath",
    "file_path",
    "original_filename",
    "querystring",
    "query_string",
    "cookies",
    "host",
    "hostname",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Development/test: any forbidden key is a hard failure.
    Strict,
    /// Production: forbidden keys are silently dropped and counted.
    Permissive,
}

impl GuardMode {
    /// Tied to `DEBUG`: set ⇒ strict, unset ⇒ permissive.
    pub fn from_debug_env(debug: bool) -> Self {
        if debug {
            GuardMode::Strict
        } else {
            GuardMode::Permissive
        }
    }
}

#[derive(Debug, Error)]
pub enum ContentLeakError {
    #[error("forbidden key '{key}' present in metadata for {context}")]
    ForbiddenKey { key: String, context: String },
}

/// Process-wide counters of dropped keys, keyed by key name. Exposed for
/// tests and for an operator to confirm the guard is actually doing
/// something, without ever exposing the dropped values.
pub struct DropCounters {
    counts: std::sync::Mutex<HashMap<String, u64>>,
    total: AtomicU64,
}

impl DropCounters {
    fn new() -> Self {
        Self { counts: std::sync::Mutex::new(HashMap::new()), total: AtomicU64::new(0) }
    }

    fn bump(&self, key: &str) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.counts.lock().expect("drop counter mutex poisoned");
        *guard.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn count_for(&self, key: &str) -> u64 {
        self.counts.lock().expect("drop counter mutex poisoned").get(key).copied().unwrap_or(0)
    }
}

pub fn drop_counters() -> &'static DropCounters {
    static COUNTERS: OnceLock<DropCounters> = OnceLock::new();
    COUNTERS.get_or_init(DropCounters::new)
}

fn is_forbidden(key: &str, source_safety_mode: bool) -> bool {
    let lower = key.to_ascii_lowercase();
    FORBIDDEN_CONTENT_KEYS.contains(&lower.as_str())
        || (source_safety_mode && FORBIDDEN_SOURCE_KEYS.contains(&lower.as_str()))
}

/// Return a copy of `map` with any forbidden key removed. Never
/// inspects values — only key names are examined. Every drop bumps the
/// process-wide counter and emits a `tracing` event naming the key (not
/// its value) and the call site `context`.
pub fn sanitize_for_logging(map: &Map<String, Value>, context: &str, source_safety_mode: bool) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());
    for (k, v) in map {
        if is_forbidden(k, source_safety_mode) {
            drop_counters().bump(k);
            tracing::warn!(key = %k, context, "privacy_guard: dropped forbidden metadata key");
            continue;
        }
        out.insert(k.clone(), v.clone());
    }
    out
}

/// In [`GuardMode::Strict`], fail if any forbidden key is present. In
/// [`GuardMode::Permissive`], silently drop and count, returning the
/// cleaned map.
pub fn assert_no_content(
    map: &Map<String, Value>,
    context: &str,
    mode: GuardMode,
    source_safety_mode: bool,
) -> Result<Map<String, Value>, ContentLeakError> {
    if mode == GuardMode::Strict {
        for k in map.keys() {
            if is_forbidden(k, source_safety_mode) {
                return Err(ContentLeakError::ForbiddenKey { key: k.clone(), context: context.to_string() });
            }
        }
        return Ok(map.clone());
    }
    Ok(sanitize_for_logging(map, context, source_safety_mode))
}

/// Closed tagged variants for every event this workspace records. Each
/// variant only exposes fields reviewed to be content-free (counts,
/// hashes, ids, levels, classifications) — it is a compile error to add
/// a free-text field here without reviewing this module. `Generic` is
/// the escape hatch for forward compatibility and is the only variant
/// whose metadata passes through the runtime forbidden-key check.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    DocumentUploaded { document_id: String, classification: String, sanitize_level: String, byte_count: u64 },
    DocumentEdited { document_id: String, sanitize_level: String, sha256: String },
    NoteEdited { note_id: String, sanitize_level: String, sha256: String },
    SanitizeLevelBumped { entity_id: String, from_level: String, to_level: String },
    RecordingTranscribed { document_id: String, mime: String, size_bytes: u64, duration_secs: Option<f64> },
    KnoxReportCreated { report_id: String, policy_id: String, template_id: String, input_fingerprint: String, latency_ms: u64 },
    KnoxCompileFailed { project_id: String, policy_id: String, template_id: String, error_code: String, reason_count: u64 },
    ProjectDeleted { project_id: String, blob_count: u64, row_count: u64 },
    JobEnqueued { job_id: String, kind: String },
    JobFinished { job_id: String, kind: String, status: String },
    Generic { event_type: String, metadata: Map<String, Value> },
}

/// A `Privacy Guard`-checked, ready-to-persist audit record. The only
/// way to obtain one is [`GuardedEvent::new`], which runs every variant
/// through the appropriate check — named variants are safe by
/// construction and only pass through the drop-counter bookkeeping;
/// `Generic` goes through the full [`assert_no_content`]/
/// [`sanitize_for_logging`] path.
#[derive(Debug, Clone)]
pub struct GuardedEvent {
    pub id: EventId,
    pub project_id: ProjectId,
    pub actor: String,
    pub event_type: &'static str,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub event: Event,
}

impl GuardedEvent {
    pub fn new(
        project_id: ProjectId,
        actor: impl Into<String>,
        event: Event,
        mode: GuardMode,
        source_safety_mode: bool,
    ) -> Result<Self, ContentLeakError> {
        let event_type = event_type_name(&event);
        let event = match event {
            Event::Generic { event_type, metadata } => {
                let checked = assert_no_content(&metadata, "event:generic", mode, source_safety_mode)?;
                Event::Generic { event_type, metadata: checked }
            }
            other => {
                // Named variants are safe by construction; still run the
                // no-op sanitize pass so the drop-counter bookkeeping stays
                // uniform across all event paths.
                let as_map = event_to_map(&other);
                let _ = sanitize_for_logging(&as_map, "event:named", source_safety_mode);
                other
            }
        };
        Ok(Self {
            id: EventId::new(),
            project_id,
            actor: actor.into(),
            event_type,
            created_at: now(),
            event,
        })
    }
}

fn event_type_name(event: &Event) -> &'static str {
    match event {
        Event::DocumentUploaded { .. } => "document_uploaded",
        Event::DocumentEdited { .. } => "document_edited",
        Event::NoteEdited { .. } => "note_edited",
        Event::SanitizeLevelBumped { .. } => "sanitize_level_bumped",
        Event::RecordingTranscribed { .. } => "recording_transcribed",
        Event::KnoxReportCreated { .. } => "knox_report_created",
        Event::KnoxCompileFailed { .. } => "knox_compile_failed",
        Event::ProjectDeleted { .. } => "project_deleted",
        Event::JobEnqueued { .. } => "job_enqueued",
        Event::JobFinished { .. } => "job_finished",
        Event::Generic { .. } => "generic",
    }
}

fn event_to_map(event: &Event) -> Map<String, Value> {
    match serde_json::to_value(event) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_content_key_is_dropped_in_permissive_mode() {
        let mut map = Map::new();
        map.insert("text".to_string(), Value::String("leak".into()));
        map.insert("count".to_string(), Value::from(3));
        let cleaned = sanitize_for_logging(&map, "test", true);
        assert!(!cleaned.contains_key("text"));
        assert!(cleaned.contains_key("count"));
    }

    #[test]
    fn strict_mode_rejects_forbidden_key() {
        let mut map = Map::new();
        map.insert("body".to_string(), Value::String("leak".into()));
        let err = assert_no_content(&map, "test", GuardMode::Strict, true).unwrap_err();
        assert!(matches!(err, ContentLeakError::ForbiddenKey { .. }));
    }

    #[test]
    fn source_keys_only_forbidden_when_source_safety_mode_on() {
        let mut map = Map::new();
        map.insert("ip_address".to_string(), Value::String("127.0.0.1".into()));
        assert!(assert_no_content(&map, "test", GuardMode::Strict, true).is_err());
        assert!(assert_no_content(&map, "test", GuardMode::Strict, false).is_ok());
    }

    #[test]
    fn guarded_event_construction_never_carries_raw_text() {
        let ev = Event::DocumentUploaded {
            document_id: "d1".into(),
            classification: "sensitive".into(),
            sanitize_level: "strict".into(),
            byte_count: 512,
        };
        let guarded = GuardedEvent::new(ProjectId::new(), "ingest", ev, GuardMode::Strict, true).unwrap();
        assert_eq!(guarded.event_type, "document_uploaded");
    }

    #[test]
    fn generic_event_with_forbidden_key_is_rejected_in_strict_mode() {
        let mut metadata = Map::new();
        metadata.insert("transcript".to_string(), Value::String("leak".into()));
        let ev = Event::Generic { event_type: "custom".into(), metadata };
        let err = GuardedEvent::new(ProjectId::new(), "test", ev, GuardMode::Strict, true).unwrap_err();
        assert!(matches!(err, ContentLeakError::ForbiddenKey { .. }));
    }
}
