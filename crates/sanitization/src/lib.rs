//! editorial_sanitization
//!
//! C5: the pipeline that turns an uploaded file or an edited note body
//! into a stored [`Document`]/[`ProjectNote`] row with a masked text
//! that has actually passed the PII gate at its claimed level.
//!
//! Three public operations, mirroring spec.md §4.5:
//! - [`ingest_text`]: extract -> mask+gate escalation loop starting at
//!   `normal` -> persist.
//! - [`bump_sanitize_level`]: re-derive masked text from the best
//!   available source of truth (the original blob if one still exists
//!   and is re-extractable, otherwise the current masked text) and
//!   re-run the gate loop starting at the requested level.
//! - [`edit_masked`]: treat operator-edited text as a new input at the
//!   current level, re-run the gate loop (which may escalate further).
//!
//! None of the three ever lowers a stored sanitize level — the gate
//! loop only walks `normal -> strict -> paranoid`, never back down.

use editorial_common::{Classification, DocumentId, NoteId, ProjectId, SanitizeLevel};
use editorial_entity_store::{Document, EntityStore, FileType, ProjectNote, StoreError};
use editorial_file_vault::{BlobKind, BlobRef, FileVault, VaultError};
use editorial_masker::{mask, pii_leak_detected, MaskOptions, MaskResult};
use editorial_privacy_guard::{ContentLeakError, Event, GuardMode, GuardedEvent};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SanitizationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("event guard error: {0}")]
    Guard(#[from] ContentLeakError),
    #[error("unsupported mime type '{0}'")]
    UnsupportedMime(String),
    #[error("pdf text extraction failed: {0}")]
    PdfExtract(String),
    #[error("invalid utf-8 in plain-text input: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("document not found")]
    DocumentNotFound,
    #[error("project note not found")]
    NoteNotFound,
    #[error("no masking of this input satisfies the pii gate, even at paranoid level")]
    Unmaskable,
    #[error("original is required to bump this document but is no longer in the vault")]
    OriginalMissing,
}

/// Extract raw readable text out of an uploaded file by mime type.
/// Anything that is not `application/pdf` or `text/plain` is rejected;
/// audio is routed through `editorial_transcription` instead, never
/// through this extractor.
fn extract_text(mime: &str, raw_bytes: &[u8]) -> Result<String, SanitizationError> {
    match mime {
        "application/pdf" => pdf_extract::extract_text_from_mem(raw_bytes)
            .map_err(|e| SanitizationError::PdfExtract(e.to_string())),
        "text/plain" => Ok(String::from_utf8(raw_bytes.to_vec())?),
        other => Err(SanitizationError::UnsupportedMime(other.to_string())),
    }
}

fn file_type_for_mime(mime: &str) -> Result<FileType, SanitizationError> {
    match mime {
        "application/pdf" => Ok(FileType::Pdf),
        "text/plain" => Ok(FileType::Txt),
        other => Err(SanitizationError::UnsupportedMime(other.to_string())),
    }
}

fn mime_for_file_type(file_type: FileType) -> Option<&'static str> {
    match file_type {
        FileType::Pdf => Some("application/pdf"),
        FileType::Txt => Some("text/plain"),
        FileType::Audio | FileType::NoteDerived | FileType::ReportDerived => None,
    }
}

/// Run `mask` at `start` and every level above it until the result
/// clears the PII gate, never trying a level below `start`. Returns
/// the level the result actually cleared at (which may be higher than
/// `start`) together with the mask output, or [`SanitizationError::Unmaskable`]
/// if paranoid still leaks.
fn escalate_mask(
    start: SanitizeLevel,
    text: &str,
    date_strictness: bool,
) -> Result<(SanitizeLevel, MaskResult), SanitizationError> {
    for level in [SanitizeLevel::Normal, SanitizeLevel::Strict, SanitizeLevel::Paranoid] {
        if level < start {
            continue;
        }
        let result = mask(level, text, MaskOptions { date_strictness });
        if !pii_leak_detected(&result.text) {
            return Ok((level, result));
        }
        if level == SanitizeLevel::Paranoid {
            return Err(SanitizationError::Unmaskable);
        }
    }
    unreachable!("loop always terminates at SanitizeLevel::Paranoid")
}

/// Ingest a freshly uploaded document: extract its text, run the
/// mask+gate escalation loop starting at `normal`, persist the original
/// bytes in the vault and the result row in the store, and emit a
/// `document_uploaded` event.
#[allow(clippy::too_many_arguments)]
pub fn ingest_text(
    store: &EntityStore,
    vault: &FileVault,
    project_id: ProjectId,
    filename: &str,
    raw_bytes: &[u8],
    mime: &str,
    classification: Classification,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<Document, SanitizationError> {
    let file_type = file_type_for_mime(mime)?;
    let text = extract_text(mime, raw_bytes)?;
    // Run the mask+gate escalation loop before touching the vault: an
    // `Unmaskable` paranoid failure must abort with no blob and no
    // document row written, not just no document row (spec.md §4.5).
    let (level, result) = escalate_mask(SanitizeLevel::Normal, &text, false)?;
    let blob_ref = vault.put(project_id, BlobKind::DocumentOriginal, raw_bytes)?;

    persist_masked_document(
        store,
        project_id,
        filename,
        file_type,
        Some(blob_ref.0),
        level,
        result,
        raw_bytes.len() as u64,
        classification,
        actor,
        guard_mode,
        source_safety_mode,
    )
}

/// Shared core of "extract -> mask+gate loop starting at normal ->
/// persist -> emit `document_uploaded`", used both by [`ingest_text`]
/// (PDF/TXT originals) and by `editorial_transcription` (audio-derived
/// markdown, which has no text original to re-extract from — its
/// `original_blob_ref` points at the audio blob instead).
#[allow(clippy::too_many_arguments)]
pub fn ingest_masked_text(
    store: &EntityStore,
    project_id: ProjectId,
    filename: &str,
    file_type: FileType,
    original_blob_ref: Option<String>,
    raw_text: &str,
    byte_count: u64,
    classification: Classification,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<Document, SanitizationError> {
    let (level, result) = escalate_mask(SanitizeLevel::Normal, raw_text, false)?;
    persist_masked_document(
        store,
        project_id,
        filename,
        file_type,
        original_blob_ref,
        level,
        result,
        byte_count,
        classification,
        actor,
        guard_mode,
        source_safety_mode,
    )
}

/// Write an already-masked, already-gated result to the store and emit
/// `document_uploaded`. Callers must run [`escalate_mask`] (or
/// equivalent) first and must not have committed any other partial
/// state — this is the only step that may fail into a document row.
#[allow(clippy::too_many_arguments)]
fn persist_masked_document(
    store: &EntityStore,
    project_id: ProjectId,
    filename: &str,
    file_type: FileType,
    original_blob_ref: Option<String>,
    level: SanitizeLevel,
    result: MaskResult,
    byte_count: u64,
    classification: Classification,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<Document, SanitizationError> {
    let sha256 = editorial_common::sha256_str(&result.text);

    let document = store.upload_document(
        project_id,
        filename,
        file_type,
        original_blob_ref,
        &result.text,
        level,
        classification,
        &sha256,
    )?;

    let event = Event::DocumentUploaded {
        document_id: document.id.to_string(),
        classification: classification_str(classification),
        sanitize_level: level.as_str().to_string(),
        byte_count,
    };
    let guarded = GuardedEvent::new(project_id, actor, event, guard_mode, source_safety_mode)?;
    store.append_event(guarded)?;

    Ok(document)
}

fn classification_str(c: Classification) -> String {
    match c {
        Classification::Public => "public",
        Classification::Sensitive => "sensitive",
        Classification::SourceSensitive => "source_sensitive",
    }
    .to_string()
}

/// Re-derive the text to re-mask from the best available source of
/// truth: the original blob, re-extracted, when the document's
/// `file_type` supports re-extraction and the blob is still present;
/// the current masked text otherwise. Marks `original_missing` and
/// fails with [`SanitizationError::OriginalMissing`] only in the
/// genuine case where a blob_ref is recorded but the bytes are gone.
fn source_text_for_document(
    store: &EntityStore,
    vault: &FileVault,
    document: &Document,
) -> Result<String, SanitizationError> {
    let Some(mime) = mime_for_file_type(document.file_type) else {
        return Ok(document.masked_text.clone());
    };
    let Some(blob_ref) = &document.original_blob_ref else {
        return Ok(document.masked_text.clone());
    };
    if document.original_missing {
        return Ok(document.masked_text.clone());
    }
    match vault.get(&BlobRef(blob_ref.clone()))? {
        Some(bytes) => extract_text(mime, &bytes),
        None => {
            store.mark_original_missing(document.id)?;
            Err(SanitizationError::OriginalMissing)
        }
    }
}

/// Raise a document's sanitize level to at least `target_level`.
/// Re-derives the source text (original blob if re-extractable and
/// present, masked text otherwise), re-runs the gate loop starting at
/// `target_level`, and persists through [`EntityStore::update_document_sanitization`],
/// which itself refuses any level regression.
pub fn bump_document_sanitize_level(
    store: &EntityStore,
    vault: &FileVault,
    document_id: DocumentId,
    target_level: SanitizeLevel,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<Document, SanitizationError> {
    let document = store.get_document(document_id)?.ok_or(SanitizationError::DocumentNotFound)?;
    let from_level = document.sanitize_level;
    let source_text = source_text_for_document(store, vault, &document)?;
    let (new_level, result) = escalate_mask(target_level, &source_text, false)?;
    let sha256 = editorial_common::sha256_str(&result.text);
    let updated = store.update_document_sanitization(document_id, new_level, &result.text, &sha256)?;

    if new_level != from_level {
        let event = Event::SanitizeLevelBumped {
            entity_id: document_id.to_string(),
            from_level: from_level.as_str().to_string(),
            to_level: new_level.as_str().to_string(),
        };
        let guarded = GuardedEvent::new(updated.project_id, actor, event, guard_mode, source_safety_mode)?;
        store.append_event(guarded)?;
    }

    Ok(updated)
}

/// Edit a document's masked text directly (an operator touching up the
/// masked output). Treated as a new input at the document's current
/// level: the gate loop starts there and may escalate further, but
/// never drops below it.
pub fn edit_document_masked(
    store: &EntityStore,
    document_id: DocumentId,
    new_masked_text: &str,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<Document, SanitizationError> {
    let document = store.get_document(document_id)?.ok_or(SanitizationError::DocumentNotFound)?;
    let (new_level, result) = escalate_mask(document.sanitize_level, new_masked_text, false)?;
    let sha256 = editorial_common::sha256_str(&result.text);
    let updated = store.update_document_sanitization(document_id, new_level, &result.text, &sha256)?;

    let event = Event::DocumentEdited {
        document_id: document_id.to_string(),
        sanitize_level: new_level.as_str().to_string(),
        sha256,
    };
    let guarded = GuardedEvent::new(updated.project_id, actor, event, guard_mode, source_safety_mode)?;
    store.append_event(guarded)?;

    Ok(updated)
}

/// Create a new project note. Notes are born masked — there is never
/// an original blob for one — so the gate loop always starts at
/// `normal`.
pub fn ingest_project_note(
    store: &EntityStore,
    project_id: ProjectId,
    title: Option<&str>,
    raw_body: &str,
) -> Result<ProjectNote, SanitizationError> {
    let (level, result) = escalate_mask(SanitizeLevel::Normal, raw_body, false)?;
    let sha256 = editorial_common::sha256_str(&result.text);
    let note = store.create_project_note(project_id, title, &result.text, level, &sha256)?;
    Ok(note)
}

/// Raise a project note's sanitize level, re-running the gate loop
/// starting at `target_level` against its current masked body (notes
/// have no original to re-extract from).
pub fn bump_note_sanitize_level(
    store: &EntityStore,
    note_id: NoteId,
    current: &ProjectNote,
    target_level: SanitizeLevel,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<ProjectNote, SanitizationError> {
    let from_level = current.sanitize_level;
    let (new_level, result) = escalate_mask(target_level, &current.masked_body, false)?;
    let sha256 = editorial_common::sha256_str(&result.text);
    let updated = store.update_project_note_sanitization(note_id, new_level, &result.text, &sha256)?;

    if new_level != from_level {
        let event = Event::SanitizeLevelBumped {
            entity_id: note_id.to_string(),
            from_level: from_level.as_str().to_string(),
            to_level: new_level.as_str().to_string(),
        };
        let guarded = GuardedEvent::new(current.project_id, actor, event, guard_mode, source_safety_mode)?;
        store.append_event(guarded)?;
    }

    Ok(updated)
}

/// Edit a project note's masked body directly, same escalate-only
/// semantics as [`edit_document_masked`].
pub fn edit_note_masked(
    store: &EntityStore,
    note_id: NoteId,
    current: &ProjectNote,
    new_masked_body: &str,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<ProjectNote, SanitizationError> {
    let (new_level, result) = escalate_mask(current.sanitize_level, new_masked_body, false)?;
    let sha256 = editorial_common::sha256_str(&result.text);
    let updated = store.update_project_note_sanitization(note_id, new_level, &result.text, &sha256)?;

    let event = Event::NoteEdited {
        note_id: note_id.to_string(),
        sanitize_level: new_level.as_str().to_string(),
        sha256,
    };
    let guarded = GuardedEvent::new(current.project_id, actor, event, guard_mode, source_safety_mode)?;
    store.append_event(guarded)?;

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn harness() -> (TempDir, EntityStore, FileVault) {
        let tmp = TempDir::new().unwrap();
        let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
        let vault = FileVault::new(tmp.path().join("blobs"));
        (tmp, store, vault)
    }

    #[test]
    fn ingest_plain_text_persists_masked_document() {
        let (_tmp, store, vault) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = ingest_text(
            &store,
            &vault,
            project.id,
            "notes.txt",
            b"Contact jane@example.com for details.",
            "text/plain",
            Classification::Public,
            "tester",
            GuardMode::Strict,
            true,
        )
        .unwrap();
        assert!(!doc.masked_text.contains("jane@example.com"));
        assert_eq!(doc.sanitize_level, SanitizeLevel::Normal);
        assert!(doc.original_blob_ref.is_some());
    }

    #[test]
    fn bump_sanitize_level_re_extracts_from_original_when_present() {
        let (_tmp, store, vault) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = ingest_text(
            &store,
            &vault,
            project.id,
            "notes.txt",
            b"plain text with no pii at all",
            "text/plain",
            Classification::Public,
            "tester",
            GuardMode::Strict,
            true,
        )
        .unwrap();
        let bumped = bump_document_sanitize_level(
            &store,
            &vault,
            doc.id,
            SanitizeLevel::Strict,
            "tester",
            GuardMode::Strict,
            true,
        )
        .unwrap();
        assert_eq!(bumped.sanitize_level, SanitizeLevel::Strict);
    }

    #[test]
    fn bump_without_original_falls_back_to_masked_text() {
        let (_tmp, store, vault) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = store
            .upload_document(
                project.id,
                "derived.txt",
                FileType::NoteDerived,
                None,
                "already masked body",
                SanitizeLevel::Normal,
                Classification::Public,
                "sha",
            )
            .unwrap();
        let bumped = bump_document_sanitize_level(
            &store,
            &vault,
            doc.id,
            SanitizeLevel::Paranoid,
            "tester",
            GuardMode::Strict,
            true,
        )
        .unwrap();
        assert_eq!(bumped.sanitize_level, SanitizeLevel::Paranoid);
    }

    #[test]
    fn edit_masked_never_drops_below_current_level() {
        let (_tmp, store, vault) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = ingest_text(
            &store,
            &vault,
            project.id,
            "notes.txt",
            b"no pii here whatsoever",
            "text/plain",
            Classification::Public,
            "tester",
            GuardMode::Strict,
            true,
        )
        .unwrap();
        store.update_document_sanitization(doc.id, SanitizeLevel::Strict, &doc.masked_text, &doc.sha256).unwrap();
        let edited =
            edit_document_masked(&store, doc.id, "still no pii here", "tester", GuardMode::Strict, true).unwrap();
        assert!(edited.sanitize_level >= SanitizeLevel::Strict);
    }

    #[test]
    fn ingest_project_note_masks_and_persists() {
        let (_tmp, store, _vault) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let note = ingest_project_note(&store, project.id, Some("title"), "call me at 555-123-4567").unwrap();
        assert_eq!(note.sanitize_level, SanitizeLevel::Normal);
    }
}
