//! editorial_knox_pack
//!
//! Builds the deterministic `KnoxInputPack` for a project selection —
//! a content-free `manifest` (hashed into the idempotence key) and a
//! separate remote `payload` (the only place masked text actually
//! travels). `canonical_json_bytes`/`sha256_canonical_json` (from
//! `editorial_common`) give the fingerprint its key-order and
//! insertion-order independence.

use editorial_common::{sha256_str, CanonError, DocumentId, NoteId, ProjectId};
use editorial_entity_store::{Document, EntityStore, MaskedContent, ProjectNote, Source, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KnoxPackError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("canonical json error: {0}")]
    Canon(#[from] CanonError),
}

/// Caller-provided include/exclude filter layered on top of each
/// item's own `excluded_from_compile` flag (spec.md §4.7 step 1: "not
/// `excluded_from_compile`, not soft-excluded by selection"). An
/// `include` set, when present, is an allow-list; `exclude` always
/// wins over `include`.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub include_documents: Option<HashSet<DocumentId>>,
    pub exclude_documents: HashSet<DocumentId>,
    pub include_notes: Option<HashSet<NoteId>>,
    pub exclude_notes: HashSet<NoteId>,
}

impl Selection {
    fn allows_document(&self, id: DocumentId) -> bool {
        if self.exclude_documents.contains(&id) {
            return false;
        }
        match &self.include_documents {
            Some(set) => set.contains(&id),
            None => true,
        }
    }

    fn allows_note(&self, id: NoteId) -> bool {
        if self.exclude_notes.contains(&id) {
            return false;
        }
        match &self.include_notes {
            Some(set) => set.contains(&id),
            None => true,
        }
    }
}

/// One line of the content-free manifest. `sha256` is populated for
/// documents/notes; `url_hash` for sources; never both. Sources carry
/// no `sanitize_level` in the data model (§3) — they are metadata-only
/// and never pass through the Masker — so the manifest fixes it at
/// `"normal"` and reuses `created_at` as `updated_at`, matching how
/// every other entry shape is represented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub kind: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_hash: Option<String>,
    pub sanitize_level: String,
    pub updated_at: String,
}

impl ManifestEntry {
    /// Builds the manifest entry for a `Document` or `ProjectNote`
    /// through their shared `MaskedContent` capability set, so the
    /// manifest loop in `build_pack` does not duplicate this shape per
    /// entity type — only `kind` distinguishes them.
    fn for_masked_content(kind: &'static str, item: &impl MaskedContent) -> Self {
        Self {
            kind: kind.to_string(),
            id: item.content_id(),
            sha256: Some(item.sha256().to_string()),
            url_hash: None,
            sanitize_level: item.sanitize_level().as_str().to_string(),
            updated_at: item.updated_at().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadDocument {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadNote {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub title: String,
}

/// The bundle sent to the remote compiler: policy/template metadata
/// are attached by the orchestrator, not here (C7 only knows about the
/// project's content).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackPayload {
    pub documents: Vec<PayloadDocument>,
    pub notes: Vec<PayloadNote>,
    pub sources: Vec<PayloadSource>,
}

/// The full deterministic pack: the filtered entities themselves (kept
/// around so the Gate Engine can inspect per-item sanitize levels and
/// masked text without re-querying the store), the content-free
/// manifest, the remote payload, and the manifest's fingerprint.
#[derive(Debug, Clone)]
pub struct KnoxInputPack {
    pub documents: Vec<Document>,
    pub notes: Vec<ProjectNote>,
    pub sources: Vec<Source>,
    pub manifest: Vec<ManifestEntry>,
    pub payload: PackPayload,
    pub input_fingerprint: String,
}

impl KnoxInputPack {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.notes.is_empty()
    }

    /// Byte size of the payload actually sent to the remote, as
    /// measured by the Input Gate's `size_exceeded` check (spec.md
    /// §4.8).
    pub fn payload_byte_len(&self) -> Result<usize, KnoxPackError> {
        Ok(editorial_common::canonical_json_bytes(&self.payload)?.len())
    }

    /// Concatenation of every masked payload, used by the PII-gate
    /// sweep (documents then notes, in manifest order).
    pub fn concatenated_masked_text(&self) -> String {
        let mut out = String::new();
        for d in &self.payload.documents {
            out.push_str(&d.text);
            out.push('\n');
        }
        for n in &self.payload.notes {
            out.push_str(&n.text);
            out.push('\n');
        }
        out
    }

    pub fn counts(&self) -> PackCounts {
        PackCounts { documents: self.documents.len(), notes: self.notes.len(), sources: self.sources.len() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PackCounts {
    pub documents: usize,
    pub notes: usize,
    pub sources: usize,
}

/// Plain masked-view rendering of a pack for the workspace's own
/// `export_snapshot` operation (spec.md §6) — no Fort Knox call, no
/// gates, just the same masked text an operator already has the right
/// to read, laid out under one heading per item in manifest order.
pub fn export_markdown(pack: &KnoxInputPack) -> String {
    let mut md = String::new();
    for d in &pack.documents {
        md.push_str(&format!("## {}\n\n", d.filename));
        let text = pack.payload.documents.iter().find(|p| p.id == d.id.to_string()).map(|p| p.text.as_str()).unwrap_or("");
        md.push_str(text);
        md.push_str("\n\n");
    }
    for n in &pack.notes {
        let title = n.title.clone().unwrap_or_else(|| "(untitled note)".to_string());
        md.push_str(&format!("## {title}\n\n"));
        let text = pack.payload.notes.iter().find(|p| p.id == n.id.to_string()).map(|p| p.text.as_str()).unwrap_or("");
        md.push_str(text);
        md.push_str("\n\n");
    }
    md
}

/// Build a `KnoxInputPack` for `project_id`. Deterministic: the same
/// set of (doc, note, source) identifiers and content hashes yields a
/// byte-identical `input_fingerprint` regardless of insertion order,
/// because the store already returns each collection sorted (§4.7 step
/// 2) and the fingerprint is computed over canonical JSON (§4.7 step
/// 4), which is itself order-independent on object keys and stable on
/// array order since the manifest's array order is fixed by the sort.
pub fn build_pack(
    store: &EntityStore,
    project_id: ProjectId,
    selection: Option<&Selection>,
) -> Result<KnoxInputPack, KnoxPackError> {
    let (mut documents, mut notes, sources) = store.list_eligible_for_compile(project_id)?;

    if let Some(sel) = selection {
        documents.retain(|d| sel.allows_document(d.id));
        notes.retain(|n| sel.allows_note(n.id));
    }

    let mut manifest = Vec::with_capacity(documents.len() + notes.len() + sources.len());
    for d in &documents {
        manifest.push(ManifestEntry::for_masked_content("document", d));
    }
    for n in &notes {
        manifest.push(ManifestEntry::for_masked_content("note", n));
    }
    for s in &sources {
        manifest.push(ManifestEntry {
            kind: "source".to_string(),
            id: s.id.to_string(),
            sha256: None,
            url_hash: Some(sha256_str(s.url.as_deref().unwrap_or(""))),
            sanitize_level: "normal".to_string(),
            updated_at: s.created_at.to_rfc3339(),
        });
    }

    let input_fingerprint = editorial_common::sha256_canonical_json(&manifest)?;

    let payload = PackPayload {
        documents: documents.iter().map(|d| PayloadDocument { id: d.id.to_string(), text: d.masked_text.clone() }).collect(),
        notes: notes.iter().map(|n| PayloadNote { id: n.id.to_string(), text: n.masked_body.clone() }).collect(),
        sources: sources
            .iter()
            .map(|s| PayloadSource { source_type: s.source_type.as_str().to_string(), title: s.title.clone() })
            .collect(),
    };

    Ok(KnoxInputPack { documents, notes, sources, manifest, payload, input_fingerprint })
}

#[cfg(test)]
mod tests {
    use super::*;
    use editorial_common::{Classification, SanitizeLevel};
    use editorial_entity_store::{FileType, SourceType};
    use tempfile::TempDir;

    fn harness() -> (TempDir, EntityStore) {
        let tmp = TempDir::new().unwrap();
        let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
        (tmp, store)
    }

    #[test]
    fn manifest_is_sorted_by_created_at_then_id_regardless_of_store_scan_order() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "alpha", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        store
            .upload_document(project.id, "b.txt", FileType::Txt, None, "beta", SanitizeLevel::Normal, Classification::Public, "sha-b")
            .unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        assert_eq!(pack.manifest.len(), 2);
        assert_eq!(pack.manifest[0].sha256.as_deref(), Some("sha-a"));
        assert_eq!(pack.manifest[1].sha256.as_deref(), Some("sha-b"));
    }

    #[test]
    fn rebuilding_the_same_pack_twice_yields_the_same_fingerprint() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "alpha", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        let first = build_pack(&store, project.id, None).unwrap();
        let second = build_pack(&store, project.id, None).unwrap();
        assert_eq!(first.input_fingerprint, second.input_fingerprint);
    }

    #[test]
    fn excluded_from_compile_is_never_in_the_pack() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "alpha", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        store.set_document_excluded_from_compile(doc.id, true).unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        assert!(pack.documents.is_empty());
    }

    #[test]
    fn selection_exclude_wins_over_include() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "alpha", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        let mut sel = Selection::default();
        sel.include_documents = Some(std::iter::once(doc.id).collect());
        sel.exclude_documents.insert(doc.id);
        let pack = build_pack(&store, project.id, Some(&sel)).unwrap();
        assert!(pack.documents.is_empty());
    }

    #[test]
    fn sources_never_carry_url_in_the_payload() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .create_source(project.id, "A tip", SourceType::Link, Some("https://example.com/secret"), None)
            .unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        assert_eq!(pack.payload.sources.len(), 1);
        assert_eq!(pack.payload.sources[0].title, "A tip");
        let serialized = serde_json::to_string(&pack.payload).unwrap();
        assert!(!serialized.contains("example.com"));
    }
}
