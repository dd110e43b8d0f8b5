//! editorial_file_vault
//!
//! Owns every on-disk blob (uploaded originals, transcribed audio,
//! journalist-note images). Blobs are content-addressed and scoped
//! under a per-project directory so that Secure Delete (§4.10 of the
//! spec) can verify "no orphans remain" by simply checking the
//! project's directory is empty, without needing a second index.
//!
//! Writes are atomic: a blob is written to a temp file in its target
//! directory, then renamed into place (atomic on the same filesystem).
//! Deletes are best-effort unlinks; deleting an already-missing blob is
//! not an error (Secure Delete must be idempotent).

use editorial_common::{sha256_bytes, ProjectId};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed blob ref: {0}")]
    MalformedRef(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    DocumentOriginal,
    RecordingAudio,
    JournalistNoteImage,
}

impl BlobKind {
    fn as_str(self) -> &'static str {
        match self {
            BlobKind::DocumentOriginal => "document_original",
            BlobKind::RecordingAudio => "recording_audio",
            BlobKind::JournalistNoteImage => "journalist_note_image",
        }
    }

    fn parse(s: &str) -> Result<Self, VaultError> {
        match s {
            "document_original" => Ok(BlobKind::DocumentOriginal),
            "recording_audio" => Ok(BlobKind::RecordingAudio),
            "journalist_note_image" => Ok(BlobKind::JournalistNoteImage),
            other => Err(VaultError::MalformedRef(format!("unknown blob kind '{other}'"))),
        }
    }
}

/// Stable, opaque handle to a stored blob. Internally carries the
/// owning project, kind, and content hash, but callers must treat it as
/// an opaque string — the only supported operations are `put`/`get`/
/// `delete`/`list_orphans`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub String);

impl BlobRef {
    fn parse(&self) -> Result<(ProjectId, BlobKind, String), VaultError> {
        let mut parts = self.0.splitn(4, ':');
        let tag = parts.next().ok_or_else(|| VaultError::MalformedRef(self.0.clone()))?;
        if tag != "blob" {
            return Err(VaultError::MalformedRef(self.0.clone()));
        }
        let project = parts.next().ok_or_else(|| VaultError::MalformedRef(self.0.clone()))?;
        let kind = parts.next().ok_or_else(|| VaultError::MalformedRef(self.0.clone()))?;
        let hash = parts.next().ok_or_else(|| VaultError::MalformedRef(self.0.clone()))?;
        let project_id: ProjectId = project.parse().map_err(|_| VaultError::MalformedRef(self.0.clone()))?;
        Ok((project_id, BlobKind::parse(kind)?, hash.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Missing,
}

pub struct FileVault {
    root: PathBuf,
}

impl FileVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn project_dir(&self, project_id: ProjectId) -> PathBuf {
        self.root.join(project_id.to_string())
    }

    fn blob_path(&self, project_id: ProjectId, kind: BlobKind, hash_hex: &str) -> PathBuf {
        self.project_dir(project_id)
            .join(kind.as_str())
            .join(&hash_hex[0..2])
            .join(&hash_hex[2..4])
            .join(format!("{hash_hex}.blob"))
    }

    /// Store `bytes`, returning a stable ref. Writing the same bytes
    /// twice for the same project+kind returns the same ref and is a
    /// no-op on disk (content-addressed dedup).
    pub fn put(&self, project_id: ProjectId, kind: BlobKind, bytes: &[u8]) -> Result<BlobRef, VaultError> {
        let digest = sha256_bytes(bytes);
        let hash_hex = digest.trim_start_matches("sha256:").to_string();
        let path = self.blob_path(project_id, kind, &hash_hex);
        if !path.exists() {
            let dir = path.parent().expect("blob path always has a parent");
            fs::create_dir_all(dir)?;
            let tmp_path = dir.join(format!(".{hash_hex}.tmp"));
            {
                let mut tmp = fs::File::create(&tmp_path)?;
                tmp.write_all(bytes)?;
                tmp.sync_all()?;
            }
            fs::rename(&tmp_path, &path)?;
        }
        Ok(BlobRef(format!("blob:{project_id}:{}:{hash_hex}", kind.as_str())))
    }

    /// Read the bytes for a ref, or `Ok(None)` if the blob is missing.
    pub fn get(&self, blob_ref: &BlobRef) -> Result<Option<Vec<u8>>, VaultError> {
        let (project_id, kind, hash_hex) = blob_ref.parse()?;
        let path = self.blob_path(project_id, kind, &hash_hex);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort delete. Deleting an already-missing blob succeeds
    /// with [`DeleteOutcome::Missing`] rather than erroring, so Secure
    /// Delete stays idempotent.
    pub fn delete(&self, blob_ref: &BlobRef) -> Result<DeleteOutcome, VaultError> {
        let (project_id, kind, hash_hex) = blob_ref.parse()?;
        let path = self.blob_path(project_id, kind, &hash_hex);
        match fs::remove_file(&path) {
            Ok(()) => {
                prune_empty_ancestors(&path, &self.project_dir(project_id));
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Every blob file still present under a project's directory.
    /// After a correct Secure Delete, this must be empty.
    pub fn list_orphans(&self, project_id: ProjectId) -> Result<Vec<BlobRef>, VaultError> {
        let dir = self.project_dir(project_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        walk_blobs(&dir, &mut |path| {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(hash_hex) = name.strip_suffix(".blob") {
                    if let Some(kind) = path
                        .parent()
                        .and_then(|p| p.parent())
                        .and_then(|p| p.parent())
                        .and_then(|p| p.file_name())
                        .and_then(|n| n.to_str())
                    {
                        out.push(BlobRef(format!("blob:{project_id}:{kind}:{hash_hex}")));
                    }
                }
            }
        })?;
        Ok(out)
    }
}

fn walk_blobs(dir: &Path, visit: &mut impl FnMut(&Path)) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_blobs(&path, visit)?;
        } else {
            visit(&path);
        }
    }
    Ok(())
}

/// Clean up now-empty hash fan-out directories after a delete, purely
/// cosmetic (keeps the tree tidy); failures here are not fatal.
fn prune_empty_ancestors(blob_path: &Path, stop_at: &Path) {
    let mut dir = blob_path.parent();
    while let Some(d) = dir {
        if d == stop_at || !d.starts_with(stop_at) {
            break;
        }
        match fs::read_dir(d) {
            Ok(mut entries) if entries.next().is_none() => {
                let _ = fs::remove_dir(d);
                dir = d.parent();
            }
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let vault = FileVault::new(tmp.path());
        let project = ProjectId::new();
        let r = vault.put(project, BlobKind::DocumentOriginal, b"hello world").unwrap();
        let bytes = vault.get(&r).unwrap().unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn duplicate_content_dedups_to_same_ref() {
        let tmp = TempDir::new().unwrap();
        let vault = FileVault::new(tmp.path());
        let project = ProjectId::new();
        let r1 = vault.put(project, BlobKind::DocumentOriginal, b"same bytes").unwrap();
        let r2 = vault.put(project, BlobKind::DocumentOriginal, b"same bytes").unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let vault = FileVault::new(tmp.path());
        let project = ProjectId::new();
        let r = vault.put(project, BlobKind::DocumentOriginal, b"data").unwrap();
        assert_eq!(vault.delete(&r).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(vault.delete(&r).unwrap(), DeleteOutcome::Missing);
        assert!(vault.get(&r).unwrap().is_none());
    }

    #[test]
    fn list_orphans_empty_after_full_delete() {
        let tmp = TempDir::new().unwrap();
        let vault = FileVault::new(tmp.path());
        let project = ProjectId::new();
        let r1 = vault.put(project, BlobKind::DocumentOriginal, b"a").unwrap();
        let r2 = vault.put(project, BlobKind::RecordingAudio, b"b").unwrap();
        vault.delete(&r1).unwrap();
        vault.delete(&r2).unwrap();
        assert!(vault.list_orphans(project).unwrap().is_empty());
    }

    #[test]
    fn list_orphans_reports_remaining_blobs() {
        let tmp = TempDir::new().unwrap();
        let vault = FileVault::new(tmp.path());
        let project = ProjectId::new();
        vault.put(project, BlobKind::DocumentOriginal, b"still here").unwrap();
        assert_eq!(vault.list_orphans(project).unwrap().len(), 1);
    }
}
