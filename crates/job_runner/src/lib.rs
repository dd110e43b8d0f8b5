//! editorial_job_runner
//!
//! One worker loop per `JobKind`, backed by an `mpsc` channel that
//! only ever carries a wake-up signal — the `jobs` table, not the
//! channel, is the source of truth. `enqueue_*` inserts the row and
//! then nudges the matching worker so it doesn't have to poll on a
//! tight interval; the worker re-checks on its own tick anyway, so a
//! dropped or coalesced notification never loses a job.
//!
//! Every claimed job gets exactly one attempt, bounded by
//! `tokio::time::timeout`. A timeout or any other failure finishes the
//! job as `failed` — there is no automatic retry.

use editorial_common::{PolicyId, ProjectId};
use editorial_entity_store::{EntityStore, Job, JobKind, JobStatus, StoreError};
use editorial_file_vault::{BlobRef, FileVault, VaultError};
use editorial_fortknox_client::FortKnoxClient;
use editorial_gate_engine::Policy;
use editorial_knox_orchestrator::{compile, KnoxError};
use editorial_knox_pack::Selection;
use editorial_privacy_guard::GuardMode;
use editorial_transcription::{SttEngine, TranscriptionError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Every attempt gets this long before the runner gives up and finishes
/// the job as `failed` with `error_code = "TIMEOUT"`.
pub const DEFAULT_JOB_DEADLINE: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum JobRunnerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed job input: {0}")]
    MalformedInput(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeJobInput {
    pub project_id: ProjectId,
    pub filename: String,
    pub audio_blob_ref: BlobRef,
    pub mime: String,
    pub classification: editorial_common::Classification,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnoxCompileJobInput {
    pub project_id: ProjectId,
    pub policy_id: PolicyId,
    pub template_id: String,
    pub include_documents: Option<HashSet<editorial_common::DocumentId>>,
    pub exclude_documents: HashSet<editorial_common::DocumentId>,
    pub include_notes: Option<HashSet<editorial_common::NoteId>>,
    pub exclude_notes: HashSet<editorial_common::NoteId>,
    pub actor: String,
}

impl KnoxCompileJobInput {
    fn selection(&self) -> Selection {
        Selection {
            include_documents: self.include_documents.clone(),
            exclude_documents: self.exclude_documents.clone(),
            include_notes: self.include_notes.clone(),
            exclude_notes: self.exclude_notes.clone(),
        }
    }
}

/// A wake-up channel per job kind. Enqueuing a job both writes the row
/// (via `EntityStore::enqueue_job`) and sends a notification; a full
/// channel (a worker already knows there's work) is not an error, so
/// sends use `try_send` and ignore `Full`/`Closed`.
pub struct JobQueue {
    transcribe_tx: mpsc::Sender<()>,
    knox_compile_tx: mpsc::Sender<()>,
}

pub struct JobQueueHandles {
    pub queue: JobQueue,
    pub transcribe_rx: mpsc::Receiver<()>,
    pub knox_compile_rx: mpsc::Receiver<()>,
}

impl JobQueue {
    pub fn new() -> JobQueueHandles {
        let (transcribe_tx, transcribe_rx) = mpsc::channel(16);
        let (knox_compile_tx, knox_compile_rx) = mpsc::channel(16);
        JobQueueHandles { queue: JobQueue { transcribe_tx, knox_compile_tx }, transcribe_rx, knox_compile_rx }
    }

    fn notify(&self, kind: JobKind) {
        let tx = match kind {
            JobKind::Transcribe => &self.transcribe_tx,
            JobKind::KnoxCompile => &self.knox_compile_tx,
        };
        let _ = tx.try_send(());
    }

    pub fn enqueue_transcribe(&self, store: &EntityStore, input: &TranscribeJobInput) -> Result<Job, JobRunnerError> {
        let input_ref = serde_json::to_string(input)?;
        let job = store.enqueue_job(JobKind::Transcribe, &input_ref)?;
        self.notify(JobKind::Transcribe);
        Ok(job)
    }

    pub fn enqueue_knox_compile(&self, store: &EntityStore, input: &KnoxCompileJobInput) -> Result<Job, JobRunnerError> {
        let input_ref = serde_json::to_string(input)?;
        let job = store.enqueue_job(JobKind::KnoxCompile, &input_ref)?;
        self.notify(JobKind::KnoxCompile);
        Ok(job)
    }
}

/// Drain every queued job of `kind`, one attempt each, stopping when the
/// queue is empty. Called both right after a wake-up and on the
/// worker loop's own fallback tick, so a coalesced notification never
/// strands a job.
async fn drain_transcribe(
    store: &EntityStore,
    vault: &FileVault,
    engine: &dyn SttEngine,
    guard_mode: GuardMode,
    source_safety_mode: bool,
    deadline: Duration,
) -> Result<(), JobRunnerError> {
    while let Some(job) = store.claim_next_job(JobKind::Transcribe)? {
        run_transcribe_job(store, vault, engine, &job, guard_mode, source_safety_mode, deadline).await?;
    }
    Ok(())
}

async fn run_transcribe_job(
    store: &EntityStore,
    vault: &FileVault,
    engine: &dyn SttEngine,
    job: &Job,
    guard_mode: GuardMode,
    source_safety_mode: bool,
    deadline: Duration,
) -> Result<(), JobRunnerError> {
    let input: TranscribeJobInput = match serde_json::from_str(&job.input_ref) {
        Ok(i) => i,
        Err(e) => {
            store.finish_job(job.id, JobStatus::Failed, None, Some("VALIDATION_ERROR"), Some(&e.to_string()))?;
            return Ok(());
        }
    };

    let attempt = tokio::time::timeout(deadline, async {
        let bytes = vault.get(&input.audio_blob_ref)?.ok_or(VaultError::MalformedRef(input.audio_blob_ref.0.clone()))?;
        editorial_transcription::transcribe(
            store,
            vault,
            engine,
            input.project_id,
            &input.filename,
            &bytes,
            &input.mime,
            input.classification,
            &input.actor,
            guard_mode,
            source_safety_mode,
        )
        .await
    })
    .await;

    match attempt {
        Ok(Ok(document)) => {
            store.finish_job(job.id, JobStatus::Succeeded, Some(&document.id.to_string()), None, None)?;
        }
        Ok(Err(e)) => {
            let code = transcription_error_code(&e);
            store.finish_job(job.id, JobStatus::Failed, None, Some(code), Some(&e.to_string()))?;
        }
        Err(_) => {
            store.finish_job(job.id, JobStatus::Failed, None, Some("TIMEOUT"), Some("transcribe job exceeded its deadline"))?;
        }
    }
    Ok(())
}

fn transcription_error_code(e: &TranscriptionError) -> &'static str {
    match e {
        TranscriptionError::Vault(_) => "VALIDATION_ERROR",
        TranscriptionError::Stt(_) => "NETWORK_ERROR",
        TranscriptionError::Sanitization(_) => "UNMASKABLE",
        TranscriptionError::Guard(_) => "VALIDATION_ERROR",
        TranscriptionError::Store(_) => "VALIDATION_ERROR",
    }
}

/// Worker loop: block on either a wake-up or a fallback tick, then
/// drain the queue. Runs until `rx` is dropped/closed.
pub async fn run_transcribe_worker(
    store: Arc<EntityStore>,
    vault: Arc<FileVault>,
    engine: Arc<dyn SttEngine>,
    mut rx: mpsc::Receiver<()>,
    guard_mode: GuardMode,
    source_safety_mode: bool,
    deadline: Duration,
    fallback_tick: Duration,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                if msg.is_none() {
                    return;
                }
            }
            _ = tokio::time::sleep(fallback_tick) => {}
        }
        if let Err(e) = drain_transcribe(&store, &vault, engine.as_ref(), guard_mode, source_safety_mode, deadline).await {
            tracing::warn!(error = %e, "transcribe worker: drain failed");
        }
    }
}

async fn drain_knox_compile(
    store: &EntityStore,
    client: Option<&FortKnoxClient>,
    guard_mode: GuardMode,
    source_safety_mode: bool,
    deadline: Duration,
) -> Result<(), JobRunnerError> {
    while let Some(job) = store.claim_next_job(JobKind::KnoxCompile)? {
        run_knox_compile_job(store, client, &job, guard_mode, source_safety_mode, deadline).await?;
    }
    Ok(())
}

async fn run_knox_compile_job(
    store: &EntityStore,
    client: Option<&FortKnoxClient>,
    job: &Job,
    guard_mode: GuardMode,
    source_safety_mode: bool,
    deadline: Duration,
) -> Result<(), JobRunnerError> {
    let input: KnoxCompileJobInput = match serde_json::from_str(&job.input_ref) {
        Ok(i) => i,
        Err(e) => {
            store.finish_job(job.id, JobStatus::Failed, None, Some("VALIDATION_ERROR"), Some(&e.to_string()))?;
            return Ok(());
        }
    };
    let policy = Policy::default_for(input.policy_id);
    let selection = input.selection();

    let attempt = tokio::time::timeout(
        deadline,
        compile(
            store,
            client,
            &policy,
            input.project_id,
            &input.template_id,
            Some(&selection),
            &input.actor,
            guard_mode,
            source_safety_mode,
        ),
    )
    .await;

    match attempt {
        Ok(Ok(report)) => {
            store.finish_job(job.id, JobStatus::Succeeded, Some(&report.id.to_string()), None, None)?;
        }
        Ok(Err(e)) => {
            let code = e.error_code();
            store.finish_job(job.id, JobStatus::Failed, None, Some(code), Some(&e.to_string()))?;
        }
        Err(_) => {
            store.finish_job(job.id, JobStatus::Failed, None, Some("TIMEOUT"), Some("knox_compile job exceeded its deadline"))?;
        }
    }
    Ok(())
}

pub async fn run_knox_compile_worker(
    store: Arc<EntityStore>,
    client: Option<Arc<FortKnoxClient>>,
    mut rx: mpsc::Receiver<()>,
    guard_mode: GuardMode,
    source_safety_mode: bool,
    deadline: Duration,
    fallback_tick: Duration,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                if msg.is_none() {
                    return;
                }
            }
            _ = tokio::time::sleep(fallback_tick) => {}
        }
        if let Err(e) =
            drain_knox_compile(&store, client.as_deref(), guard_mode, source_safety_mode, deadline).await
        {
            tracing::warn!(error = %e, "knox_compile worker: drain failed");
        }
    }
}

/// Silences the otherwise-unused import when `KnoxError::error_code`
/// is only reached through `editorial_knox_orchestrator::KnoxError`.
#[allow(dead_code)]
fn _assert_knox_error_has_error_code(e: &KnoxError) -> &'static str {
    e.error_code()
}
