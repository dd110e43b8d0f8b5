//! Append-only, hash-chained JSONL mirror of the `events` table.
//!
//! Every row written by `append_event` lands here in addition to the
//! SQL table: `hash = sha256(canonical_json({prev_hash, event}))`.
//! A verifier can replay the file end-to-end and detect any edit,
//! reorder, or truncation — the SQL row alone cannot, since an
//! operator with DB access could rewrite it undetected.

use editorial_common::CanonError;
use editorial_privacy_guard::GuardedEvent;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditSidecarError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json error: {0}")]
    Canon(#[from] CanonError),
    #[error("hash mismatch at line {line}: expected {expected}, got {got}")]
    HashMismatch { line: usize, expected: String, got: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarRecord {
    pub prev_hash: String,
    pub hash: String,
    pub id: String,
    pub project_id: String,
    pub actor: String,
    pub event_type: String,
    pub created_at: String,
    pub event: serde_json::Value,
}

#[derive(Serialize)]
struct HashPayload<'a> {
    prev_hash: &'a str,
    event_id: &'a str,
    event: &'a serde_json::Value,
}

pub fn genesis_hash() -> String {
    "sha256:0000000000000000000000000000000000000000000000000000000000000000".to_string()
}

/// Hash-chained append-only writer. Locked internally so a single
/// instance can be shared across threads in the Entity Store.
pub struct AuditSidecar {
    inner: Mutex<Inner>,
}

struct Inner {
    file: File,
    last_hash: String,
}

impl AuditSidecar {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditSidecarError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let last_hash = last_hash_in_file(&path)?.unwrap_or_else(genesis_hash);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { inner: Mutex::new(Inner { file, last_hash }) })
    }

    pub fn append(&self, event: &GuardedEvent) -> Result<SidecarRecord, AuditSidecarError> {
        let event_json = serde_json::to_value(&event.event)?;
        let mut guard = self.inner.lock().expect("audit sidecar mutex poisoned");
        let prev_hash = guard.last_hash.clone();
        let payload = HashPayload { prev_hash: &prev_hash, event_id: &event.id.to_string(), event: &event_json };
        let hash = editorial_common::sha256_canonical_json(&payload)?;
        let record = SidecarRecord {
            prev_hash,
            hash: hash.clone(),
            id: event.id.to_string(),
            project_id: event.project_id.to_string(),
            actor: event.actor.clone(),
            event_type: event.event_type.to_string(),
            created_at: event.created_at.to_rfc3339(),
            event: event_json,
        };
        let line = serde_json::to_string(&record)?;
        guard.file.write_all(line.as_bytes())?;
        guard.file.write_all(b"\n")?;
        guard.file.flush()?;
        guard.last_hash = hash;
        Ok(record)
    }
}

fn last_hash_in_file(path: &Path) -> Result<Option<String>, AuditSidecarError> {
    if !path.exists() {
        return Ok(None);
    }
    let f = File::open(path)?;
    let reader = BufReader::new(f);
    let mut last = None;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: SidecarRecord = serde_json::from_str(&line)?;
        last = Some(rec.hash);
    }
    Ok(last)
}

/// Replay the entire file, recomputing each hash, and confirm the
/// chain is unbroken. Returns the final hash on success.
pub fn verify(path: impl AsRef<Path>) -> Result<String, AuditSidecarError> {
    let f = File::open(path)?;
    let reader = BufReader::new(f);
    let mut expected_prev = genesis_hash();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: SidecarRecord = serde_json::from_str(&line)?;
        if rec.prev_hash != expected_prev {
            return Err(AuditSidecarError::HashMismatch {
                line: line_no,
                expected: expected_prev,
                got: rec.prev_hash,
            });
        }
        let payload = HashPayload { prev_hash: &rec.prev_hash, event_id: &rec.id, event: &rec.event };
        let computed = editorial_common::sha256_canonical_json(&payload)?;
        if computed != rec.hash {
            return Err(AuditSidecarError::HashMismatch { line: line_no, expected: computed, got: rec.hash });
        }
        expected_prev = rec.hash;
    }

    Ok(expected_prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use editorial_common::ProjectId;
    use editorial_privacy_guard::{Event, GuardMode};
    use tempfile::TempDir;

    #[test]
    fn hash_chain_verifies_after_several_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let sidecar = AuditSidecar::open(&path).unwrap();
        let project_id = ProjectId::new();

        for i in 0..3u64 {
            let ev = Event::JobEnqueued { job_id: format!("job-{i}"), kind: "transcribe".into() };
            let guarded = GuardedEvent::new(project_id, "test", ev, GuardMode::Strict, true).unwrap();
            sidecar.append(&guarded).unwrap();
        }

        let last = verify(&path).unwrap();
        assert!(last.starts_with("sha256:"));
    }

    #[test]
    fn tampered_line_breaks_verification() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let sidecar = AuditSidecar::open(&path).unwrap();
        let project_id = ProjectId::new();
        let ev = Event::JobEnqueued { job_id: "job-1".into(), kind: "transcribe".into() };
        let guarded = GuardedEvent::new(project_id, "test", ev, GuardMode::Strict, true).unwrap();
        sidecar.append(&guarded).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let tampered = contents.replace("job-1", "job-999");
        std::fs::write(&path, tampered).unwrap();

        assert!(verify(&path).is_err());
    }
}
