//! editorial_secure_delete
//!
//! Permanently removes a project. Blobs go first — if any real
//! blob delete fails, the whole call aborts before a single DB row is
//! touched. The
//! `project_deleted` event is appended while the project row still
//! exists (its own SQL `events` row is cascade-deleted a moment later
//! along with everything else under the project — only the
//! hash-chained JSONL sidecar keeps a permanent record, which is the
//! point: the audit trail must outlive the thing it audits). Orphan
//! verification runs last and reports leftovers without rolling
//! anything back, since the rows are already gone by then.

use editorial_common::ProjectId;
use editorial_entity_store::{EntityStore, StoreError};
use editorial_file_vault::{BlobRef, FileVault, VaultError};
use editorial_privacy_guard::{ContentLeakError, Event, GuardMode, GuardedEvent};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecureDeleteError {
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("event guard error: {0}")]
    Guard(#[from] ContentLeakError),
    #[error("{0} orphaned blob(s) remain after delete")]
    OrphansRemaining(usize),
}

#[derive(Debug, Clone)]
pub struct SecureDeleteReport {
    pub blob_count: u64,
    pub row_count: u64,
    /// True when the project row was already gone before this call —
    /// a prior successful delete, or a call against an id that never
    /// existed. Either way a second call is a safe no-op.
    pub already_deleted: bool,
}

pub fn secure_delete(
    store: &EntityStore,
    vault: &FileVault,
    project_id: ProjectId,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<SecureDeleteReport, SecureDeleteError> {
    let existed = store.get_project(project_id)?.is_some();
    let subgraph = store.project_subgraph(project_id)?;

    for blob_ref in &subgraph.blob_refs {
        vault.delete(&BlobRef(blob_ref.clone()))?;
    }

    if existed {
        let event = Event::ProjectDeleted {
            project_id: project_id.to_string(),
            blob_count: subgraph.blob_refs.len() as u64,
            row_count: subgraph.row_counts.total(),
        };
        let guarded = GuardedEvent::new(project_id, actor, event, guard_mode, source_safety_mode)?;
        store.append_event(guarded)?;
    }

    let row_count = if existed { store.delete_project_rows(project_id)?.total() } else { 0 };

    let orphans = vault.list_orphans(project_id)?;
    if !orphans.is_empty() {
        tracing::error!(project_id = %project_id, orphan_count = orphans.len(), "secure_delete: orphaned blobs remain after delete");
        return Err(SecureDeleteError::OrphansRemaining(orphans.len()));
    }

    if existed {
        tracing::info!(project_id = %project_id, row_count, blob_count = subgraph.blob_refs.len(), "secure_delete: project removed");
    }

    Ok(SecureDeleteReport { blob_count: subgraph.blob_refs.len() as u64, row_count, already_deleted: !existed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use editorial_common::Classification;
    use editorial_entity_store::FileType;
    use editorial_file_vault::BlobKind;
    use tempfile::TempDir;

    fn harness() -> (TempDir, EntityStore, FileVault) {
        let tmp = TempDir::new().unwrap();
        let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
        let vault = FileVault::new(tmp.path().join("blobs"));
        (tmp, store, vault)
    }

    #[test]
    fn deleting_a_project_removes_its_blobs_and_rows() {
        let (_tmp, store, vault) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let blob_ref = vault.put(project.id, BlobKind::DocumentOriginal, b"original bytes").unwrap();
        store
            .upload_document(
                project.id,
                "a.txt",
                FileType::Txt,
                Some(blob_ref.0.clone()),
                "masked text",
                editorial_common::SanitizeLevel::Normal,
                Classification::Public,
                "sha-a",
            )
            .unwrap();

        let report = secure_delete(&store, &vault, project.id, "tester", GuardMode::Strict, true).unwrap();
        assert!(!report.already_deleted);
        assert_eq!(report.blob_count, 1);
        assert!(report.row_count >= 1);

        assert!(store.get_project(project.id).unwrap().is_none());
        assert!(vault.get(&blob_ref).unwrap().is_none());
        assert!(vault.list_orphans(project.id).unwrap().is_empty());
    }

    #[test]
    fn deleting_twice_is_idempotent() {
        let (_tmp, store, vault) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();

        let first = secure_delete(&store, &vault, project.id, "tester", GuardMode::Strict, true).unwrap();
        assert!(!first.already_deleted);

        let second = secure_delete(&store, &vault, project.id, "tester", GuardMode::Strict, true).unwrap();
        assert!(second.already_deleted);
        assert_eq!(second.blob_count, 0);
        assert_eq!(second.row_count, 0);
    }

    #[test]
    fn deleting_an_unknown_project_id_is_a_harmless_no_op() {
        let (_tmp, store, vault) = harness();
        let report = secure_delete(&store, &vault, ProjectId::new(), "tester", GuardMode::Strict, true).unwrap();
        assert!(report.already_deleted);
        assert_eq!(report.blob_count, 0);
    }
}
