//! editorial_transcription
//!
//! Audio -> STT engine (black box, behind a `dyn` trait object boundary)
//! -> deterministic refinement -> deterministic three-section markdown
//! render -> handed to `editorial_sanitization::ingest_masked_text` the
//! same way a PDF/TXT upload is, just with a different `FileType` and
//! `original_blob_ref` pointing at the audio blob instead of a
//! re-extractable document.

use async_trait::async_trait;
use editorial_common::{Classification, ProjectId};
use editorial_entity_store::{Document, EntityStore, FileType};
use editorial_file_vault::{BlobKind, FileVault, VaultError};
use editorial_privacy_guard::{ContentLeakError, Event, GuardMode, GuardedEvent};
use editorial_sanitization::{ingest_masked_text, SanitizationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("stt engine error: {0}")]
    Stt(#[from] SttError),
    #[error("sanitization error: {0}")]
    Sanitization(#[from] SanitizationError),
    #[error("event guard error: {0}")]
    Guard(#[from] ContentLeakError),
    #[error("store error: {0}")]
    Store(#[from] editorial_entity_store::StoreError),
}

#[derive(Debug, Error)]
pub enum SttError {
    #[error("stt engine invocation failed: {0}")]
    EngineFailed(String),
}

/// Raw output of an STT invocation: unrefined text plus whatever
/// duration metadata the engine was able to report.
#[derive(Debug, Clone)]
pub struct SttOutput {
    pub raw_text: String,
    pub duration_secs: Option<f64>,
}

/// Transport boundary to an external speech-to-text engine. No policy,
/// no redaction, no retries live here — this crate only consumes
/// `raw_text`; everything downstream still goes through the full
/// mask+gate pipeline before anything is persisted.
#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn transcribe(&self, audio_bytes: &[u8], mime: &str) -> Result<SttOutput, SttError>;
}

#[derive(Debug, serde::Deserialize)]
struct HttpSttResponse {
    text: String,
    #[serde(default)]
    duration_secs: Option<f64>,
}

/// Production `SttEngine`: POSTs the raw audio bytes to `STT_ENGINE`
/// (an HTTP endpoint configured the same way `FORTKNOX_REMOTE_URL`
/// configures the Fort Knox client) and reads back `{text,
/// duration_secs?}`. This is the only place audio bytes leave the
/// process; the engine's own transcription logic stays out of scope.
pub struct HttpSttEngine {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSttEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("reqwest client builds");
        Self { base_url: base_url.into(), client }
    }

    /// `None` when `STT_ENGINE` is unset or empty, matching
    /// `FortKnoxClient::from_env`'s "absent config means no client"
    /// convention.
    pub fn from_env(stt_engine_url: Option<&str>) -> Option<Self> {
        let url = stt_engine_url?;
        if url.is_empty() {
            return None;
        }
        Some(Self::new(url))
    }
}

#[async_trait]
impl SttEngine for HttpSttEngine {
    async fn transcribe(&self, audio_bytes: &[u8], mime: &str) -> Result<SttOutput, SttError> {
        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .header("content-type", mime)
            .body(audio_bytes.to_vec())
            .send()
            .await
            .map_err(|e| SttError::EngineFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| SttError::EngineFailed(e.to_string()))?
            .json::<HttpSttResponse>()
            .await
            .map_err(|e| SttError::EngineFailed(e.to_string()))?;
        Ok(SttOutput { raw_text: response.text, duration_secs: response.duration_secs })
    }
}

/// Deterministic disfluency/misspelling substitution table. Order
/// matters: longer phrases are matched before the shorter phrases they
/// contain. Same `raw_text` always yields the same `refined_text`.
const REFINEMENTS: &[(&str, &str)] = &[
    ("you know, ", ""),
    ("i mean, ", ""),
    ("sort of, ", ""),
    ("kind of, ", ""),
    ("um, ", ""),
    ("umm, ", ""),
    ("uh, ", ""),
    ("uhh, ", ""),
    ("er, ", ""),
    (" gonna ", " going to "),
    (" wanna ", " want to "),
    (" gotta ", " got to "),
    (" kinda ", " kind of "),
    (" dunno ", " don't know "),
];

/// Apply the substitution table, then collapse any whitespace runs the
/// removals left behind. Purely textual, no clock or randomness — safe
/// to call as many times as needed for the same input.
pub fn refine_transcript(raw_text: &str) -> String {
    let mut text = raw_text.to_string();
    for (from, to) in REFINEMENTS {
        text = text.replace(from, to);
    }
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// Split refined text into sentences on `.`/`!`/`?`, dropping empties.
/// Purely mechanical — no summarization model is in scope for this
/// core, so "Sammanfattning" and "Nyckelpunkter" are derived
/// deterministically from sentence position rather than generated.
fn split_sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Render the fixed three-section markdown template. The summary is
/// the refined transcript's first sentence, key points are up to the
/// next four sentences as bullets, and the full transcript is the
/// complete refined text verbatim. Plain `format!`/`push_str` — this
/// is three fixed headers over already-computed fields, not generative
/// Markdown construction, so no templating crate is warranted.
pub fn render_transcript_markdown(refined_text: &str) -> String {
    let sentences = split_sentences(refined_text);
    let summary = sentences.first().cloned().unwrap_or_default();
    let key_points: Vec<&String> = sentences.iter().skip(1).take(4).collect();

    let mut md = String::new();
    md.push_str("## Sammanfattning\n\n");
    md.push_str(&summary);
    md.push('\n');
    md.push_str("\n## Nyckelpunkter\n\n");
    if key_points.is_empty() {
        md.push_str("- (inga ytterligare punkter)\n");
    } else {
        for point in key_points {
            md.push_str("- ");
            md.push_str(point);
            md.push('\n');
        }
    }
    md.push_str("\n## Fullständigt transkript\n\n");
    md.push_str(refined_text);
    md.push('\n');
    md
}

/// Full C6 flow: persist audio, invoke the engine, refine, render, and
/// hand the rendered markdown to the C5 entry point starting at
/// `normal`. Emits `recording_transcribed` with only `{mime, size,
/// duration}` — the transcript text itself never reaches metadata.
#[allow(clippy::too_many_arguments)]
pub async fn transcribe(
    store: &EntityStore,
    vault: &FileVault,
    engine: &dyn SttEngine,
    project_id: ProjectId,
    filename: &str,
    audio_bytes: &[u8],
    mime: &str,
    classification: Classification,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<Document, TranscriptionError> {
    let blob_ref = vault.put(project_id, BlobKind::RecordingAudio, audio_bytes)?;

    let stt_output = engine.transcribe(audio_bytes, mime).await?;
    let refined = refine_transcript(&stt_output.raw_text);
    let markdown = render_transcript_markdown(&refined);

    let document = ingest_masked_text(
        store,
        project_id,
        filename,
        FileType::Audio,
        Some(blob_ref.0),
        &markdown,
        audio_bytes.len() as u64,
        classification,
        actor,
        guard_mode,
        source_safety_mode,
    )?;

    let event = Event::RecordingTranscribed {
        document_id: document.id.to_string(),
        mime: mime.to_string(),
        size_bytes: audio_bytes.len() as u64,
        duration_secs: stt_output.duration_secs,
    };
    let guarded = GuardedEvent::new(project_id, actor, event, guard_mode, source_safety_mode)?;
    store.append_event(guarded)?;

    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use editorial_entity_store::EntityStore;
    use tempfile::TempDir;

    struct FixtureEngine {
        raw_text: String,
        duration_secs: Option<f64>,
    }

    #[async_trait]
    impl SttEngine for FixtureEngine {
        async fn transcribe(&self, _audio_bytes: &[u8], _mime: &str) -> Result<SttOutput, SttError> {
            Ok(SttOutput { raw_text: self.raw_text.clone(), duration_secs: self.duration_secs })
        }
    }

    #[test]
    fn refine_transcript_strips_disfluencies_deterministically() {
        let raw = "so, um, the meeting is, uh, gonna start soon";
        let refined = refine_transcript(raw);
        assert!(!refined.contains("um,"));
        assert!(!refined.contains("uh,"));
        assert!(refined.contains("going to start"));
        assert_eq!(refined, refine_transcript(raw));
    }

    #[test]
    fn render_transcript_markdown_has_three_fixed_sections() {
        let md = render_transcript_markdown("First sentence. Second point. Third point.");
        assert!(md.contains("## Sammanfattning"));
        assert!(md.contains("## Nyckelpunkter"));
        assert!(md.contains("## Fullständigt transkript"));
        assert!(md.find("Sammanfattning").unwrap() < md.find("Nyckelpunkter").unwrap());
        assert!(md.find("Nyckelpunkter").unwrap() < md.find("Fullständigt").unwrap());
    }

    #[tokio::test]
    async fn transcribe_persists_audio_and_masked_document() {
        let tmp = TempDir::new().unwrap();
        let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
        let vault = FileVault::new(tmp.path().join("blobs"));
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let engine = FixtureEngine {
            raw_text: "This is a clean recording. It has no pii at all.".to_string(),
            duration_secs: Some(12.5),
        };

        let doc = transcribe(
            &store,
            &vault,
            &engine,
            project.id,
            "interview.wav",
            b"fake-audio-bytes",
            "audio/wav",
            Classification::Public,
            "tester",
            GuardMode::Strict,
            true,
        )
        .await
        .unwrap();

        assert_eq!(doc.file_type, FileType::Audio);
        assert!(doc.masked_text.contains("## Sammanfattning"));
        assert!(doc.original_blob_ref.is_some());

        let events = store.list_events(project.id).unwrap();
        assert!(events.iter().any(|e| e.event_type == "recording_transcribed"));
        assert!(events.iter().any(|e| e.event_type == "document_uploaded"));
    }
}
