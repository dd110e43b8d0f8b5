use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use editorial_common::{Classification, DocumentId, NoteId, PolicyId, ProjectId, SanitizeLevel};
use editorial_entity_store::EntityStore;
use editorial_file_vault::FileVault;
use editorial_fortknox_client::{FixtureTable, FortKnoxClient};
use editorial_gate_engine::Policy;
use editorial_knox_pack::Selection;
use editorial_privacy_guard::GuardMode;
use editorial_transcription::HttpSttEngine;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] editorial_entity_store::StoreError),
    #[error("vault error: {0}")]
    Vault(#[from] editorial_file_vault::VaultError),
    #[error("sanitization error: {0}")]
    Sanitization(#[from] editorial_sanitization::SanitizationError),
    #[error("knox compile error: {0}")]
    Knox(#[from] editorial_knox_orchestrator::KnoxError),
    #[error("secure delete error: {0}")]
    SecureDelete(#[from] editorial_secure_delete::SecureDeleteError),
    #[error("audit sidecar error: {0}")]
    Audit(#[from] editorial_entity_store::AuditSidecarError),
    #[error("invalid uuid: {0}")]
    Uuid(#[from] uuid::Error),
    #[error("invalid value for --{field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("project not found")]
    ProjectNotFound,
    #[error("document not found")]
    DocumentNotFound,
    #[error("note not found")]
    NoteNotFound,
    #[error("job not found")]
    JobNotFound,
    #[error("transcription error: {0}")]
    Transcription(#[from] editorial_transcription::TranscriptionError),
    #[error("STT_ENGINE is not configured")]
    SttEngineNotConfigured,
    #[error("knox pack error: {0}")]
    KnoxPack(#[from] editorial_knox_pack::KnoxPackError),
}

/// Everything the commands need to talk to a single workspace on disk:
/// `<data_dir>/db.sqlite`, `<data_dir>/audit.jsonl`, `<data_dir>/blobs/`.
#[derive(Parser)]
#[command(name = "editorial-cli", version, about = "Editorial workspace sanitization + Fort Knox compile pipeline")]
struct Args {
    /// Root directory holding this workspace's db, audit log, and blobs.
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    /// Acting user recorded on every audit event.
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    /// Strict mode treats a forbidden-key leak in event metadata as a hard
    /// failure; permissive mode drops the key and keeps going. Strict is the
    /// default everywhere except long-running services.
    #[arg(long, global = true, default_value_t = true)]
    strict_guard: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project.
    CreateProject {
        name: String,
        #[arg(long, default_value = "public")]
        classification: String,
        #[arg(long)]
        due_date: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Upload a PDF or plain-text document and run it through the mask+gate pipeline.
    UploadDocument {
        project_id: String,
        path: PathBuf,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long, default_value = "text/plain")]
        mime: String,
        #[arg(long, default_value = "public")]
        classification: String,
    },

    /// Raise a document's sanitize level to at least `level`.
    BumpDocumentLevel {
        document_id: String,
        level: String,
    },

    /// Create a free-text project note (always ingested at `normal`).
    IngestNote {
        project_id: String,
        #[arg(long)]
        title: Option<String>,
        body: String,
    },

    /// Replace a document's masked text directly, re-running the gate
    /// loop from its current level.
    EditDocumentMasked {
        document_id: String,
        new_text: String,
    },

    /// Raise a project note's sanitize level to at least `level`.
    BumpNoteLevel {
        note_id: String,
        level: String,
    },

    /// Replace a project note's masked body directly, re-running the
    /// gate loop from its current level.
    EditNoteMasked {
        note_id: String,
        new_text: String,
    },

    /// Transcribe an audio recording via `STT_ENGINE` and ingest the
    /// rendered transcript as a document.
    Transcribe {
        project_id: String,
        path: PathBuf,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long, default_value = "audio/wav")]
        mime: String,
        #[arg(long, default_value = "public")]
        classification: String,
    },

    /// Render a masked, non-compiled snapshot of a project's eligible
    /// content (no Fort Knox call, no gates).
    ExportSnapshot {
        project_id: String,
    },

    /// Look up a background job's current status.
    JobStatus {
        job_id: String,
    },

    /// Toggle whether a document is included in future compiles.
    ExcludeDocument {
        document_id: String,
        #[arg(long, default_value_t = true)]
        excluded: bool,
    },

    /// Toggle whether a note is included in future compiles.
    ExcludeNote {
        note_id: String,
        #[arg(long, default_value_t = true)]
        excluded: bool,
    },

    /// Run the full Knox compile cycle for a project.
    Compile {
        project_id: String,
        #[arg(long, default_value = "internal")]
        policy: String,
        #[arg(long, default_value = "weekly")]
        template_id: String,
        /// Documents/notes to leave out of this compile's selection, even if
        /// not marked `excluded_from_compile`.
        #[arg(long = "exclude-document")]
        exclude_documents: Vec<String>,
        #[arg(long = "exclude-note")]
        exclude_notes: Vec<String>,
    },

    /// Permanently delete a project: blobs first, then rows, then verify no
    /// orphaned blobs remain.
    DeleteProject {
        project_id: String,
    },

    /// List the audit events recorded for a project.
    ListEvents {
        project_id: String,
    },

    /// Replay the hash-chained audit sidecar and confirm it is unbroken.
    VerifyAudit,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let guard_mode = if args.strict_guard { GuardMode::Strict } else { GuardMode::Permissive };
    let source_safety_mode = std::env::var("SOURCE_SAFETY_MODE").map(|v| v != "0").unwrap_or(true);

    fs::create_dir_all(&args.data_dir)?;
    let store = EntityStore::open(args.data_dir.join("db.sqlite"), args.data_dir.join("audit.jsonl"))?;
    let vault = FileVault::new(args.data_dir.join("blobs"));

    match args.cmd {
        Command::CreateProject { name, classification, due_date, tags } => {
            let classification = parse_classification(&classification)?;
            let due_date = due_date
                .map(|d| d.parse::<DateTime<Utc>>())
                .transpose()
                .map_err(|_| CliError::InvalidValue { field: "due-date", value: "not rfc3339".into() })?;
            let project = store.create_project(&name, classification, due_date, tags)?;
            print_json(&json!({"project_id": project.id.to_string(), "name": project.name}));
            Ok(())
        }

        Command::UploadDocument { project_id, path, filename, mime, classification } => {
            let project_id = parse_project_id(&project_id)?;
            let classification = parse_classification(&classification)?;
            let raw_bytes = fs::read(&path)?;
            let filename = filename.unwrap_or_else(|| {
                path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "upload".to_string())
            });
            let document = editorial_sanitization::ingest_text(
                &store,
                &vault,
                project_id,
                &filename,
                &raw_bytes,
                &mime,
                classification,
                &args.actor,
                guard_mode,
                source_safety_mode,
            )?;
            print_json(&json!({
                "document_id": document.id.to_string(),
                "sanitize_level": document.sanitize_level.as_str(),
                "sha256": document.sha256,
            }));
            Ok(())
        }

        Command::BumpDocumentLevel { document_id, level } => {
            let document_id = parse_document_id(&document_id)?;
            let level = parse_sanitize_level(&level)?;
            let document = editorial_sanitization::bump_document_sanitize_level(
                &store,
                &vault,
                document_id,
                level,
                &args.actor,
                guard_mode,
                source_safety_mode,
            )?;
            print_json(&json!({"document_id": document.id.to_string(), "sanitize_level": document.sanitize_level.as_str()}));
            Ok(())
        }

        Command::IngestNote { project_id, title, body } => {
            let project_id = parse_project_id(&project_id)?;
            let note = editorial_sanitization::ingest_project_note(&store, project_id, title.as_deref(), &body)?;
            print_json(&json!({"note_id": note.id.to_string(), "sanitize_level": note.sanitize_level.as_str()}));
            Ok(())
        }

        Command::EditDocumentMasked { document_id, new_text } => {
            let document_id = parse_document_id(&document_id)?;
            let document = editorial_sanitization::edit_document_masked(
                &store,
                document_id,
                &new_text,
                &args.actor,
                guard_mode,
                source_safety_mode,
            )?;
            print_json(&json!({"document_id": document.id.to_string(), "sanitize_level": document.sanitize_level.as_str()}));
            Ok(())
        }

        Command::BumpNoteLevel { note_id, level } => {
            let note_id: NoteId = note_id.parse()?;
            let level = parse_sanitize_level(&level)?;
            let current = store.get_project_note(note_id)?.ok_or(CliError::NoteNotFound)?;
            let note = editorial_sanitization::bump_note_sanitize_level(
                &store,
                note_id,
                &current,
                level,
                &args.actor,
                guard_mode,
                source_safety_mode,
            )?;
            print_json(&json!({"note_id": note.id.to_string(), "sanitize_level": note.sanitize_level.as_str()}));
            Ok(())
        }

        Command::EditNoteMasked { note_id, new_text } => {
            let note_id: NoteId = note_id.parse()?;
            let current = store.get_project_note(note_id)?.ok_or(CliError::NoteNotFound)?;
            let note = editorial_sanitization::edit_note_masked(
                &store,
                note_id,
                &current,
                &new_text,
                &args.actor,
                guard_mode,
                source_safety_mode,
            )?;
            print_json(&json!({"note_id": note.id.to_string(), "sanitize_level": note.sanitize_level.as_str()}));
            Ok(())
        }

        Command::Transcribe { project_id, path, filename, mime, classification } => {
            let project_id = parse_project_id(&project_id)?;
            let classification = parse_classification(&classification)?;
            let engine = HttpSttEngine::from_env(std::env::var("STT_ENGINE").ok().as_deref())
                .ok_or(CliError::SttEngineNotConfigured)?;
            let audio_bytes = fs::read(&path)?;
            let filename = filename.unwrap_or_else(|| {
                path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "recording".to_string())
            });
            let document = editorial_transcription::transcribe(
                &store,
                &vault,
                &engine,
                project_id,
                &filename,
                &audio_bytes,
                &mime,
                classification,
                &args.actor,
                guard_mode,
                source_safety_mode,
            )
            .await?;
            print_json(&json!({
                "document_id": document.id.to_string(),
                "sanitize_level": document.sanitize_level.as_str(),
                "sha256": document.sha256,
            }));
            Ok(())
        }

        Command::ExportSnapshot { project_id } => {
            let project_id = parse_project_id(&project_id)?;
            let pack = editorial_knox_pack::build_pack(&store, project_id, None)?;
            let counts = pack.counts();
            let export_markdown = editorial_knox_pack::export_markdown(&pack);
            print_json(&json!({
                "input_manifest": pack.manifest,
                "counts": {"documents": counts.documents, "notes": counts.notes, "sources": counts.sources},
                "export_markdown": export_markdown,
            }));
            Ok(())
        }

        Command::JobStatus { job_id } => {
            let job_id: editorial_common::JobId = job_id.parse()?;
            let job = store.get_job(job_id)?.ok_or(CliError::JobNotFound)?;
            print_json(&json!({
                "job_id": job.id.to_string(),
                "kind": job.kind.as_str(),
                "status": job.status.as_str(),
                "result_ref": job.result_ref,
                "error_code": job.error_code,
                "error_detail": job.error_detail,
            }));
            Ok(())
        }

        Command::ExcludeDocument { document_id, excluded } => {
            let document_id = parse_document_id(&document_id)?;
            store.set_document_excluded_from_compile(document_id, excluded)?;
            print_json(&json!({"document_id": document_id.to_string(), "excluded_from_compile": excluded}));
            Ok(())
        }

        Command::ExcludeNote { note_id, excluded } => {
            let note_id: NoteId = note_id.parse()?;
            store.set_note_excluded_from_compile(note_id, excluded)?;
            print_json(&json!({"note_id": note_id.to_string(), "excluded_from_compile": excluded}));
            Ok(())
        }

        Command::Compile { project_id, policy, template_id, exclude_documents, exclude_notes } => {
            let project_id = parse_project_id(&project_id)?;
            let policy_id = parse_policy_id(&policy)?;
            let policy = Policy::default_for(policy_id);

            let selection = Selection {
                include_documents: None,
                exclude_documents: exclude_documents
                    .iter()
                    .map(|s| s.parse::<DocumentId>())
                    .collect::<Result<_, _>>()?,
                include_notes: None,
                exclude_notes: exclude_notes.iter().map(|s| s.parse::<NoteId>()).collect::<Result<_, _>>()?,
            };

            let client = FortKnoxClient::from_env(
                std::env::var("FORTKNOX_REMOTE_URL").ok().as_deref(),
                std::env::var("FORTKNOX_TESTMODE").map(|v| v == "1").unwrap_or(false),
                FixtureTable::new(),
            );

            let report = editorial_knox_orchestrator::compile(
                &store,
                client.as_ref(),
                &policy,
                project_id,
                &template_id,
                Some(&selection),
                &args.actor,
                guard_mode,
                source_safety_mode,
            )
            .await?;

            print_json(&json!({
                "report_id": report.id.to_string(),
                "policy_id": report.policy_id.as_str(),
                "template_id": report.template_id,
                "input_fingerprint": report.input_fingerprint,
                "latency_ms": report.latency_ms,
                "rendered_markdown": report.rendered_markdown,
            }));
            Ok(())
        }

        Command::DeleteProject { project_id } => {
            let project_id = parse_project_id(&project_id)?;
            let report =
                editorial_secure_delete::secure_delete(&store, &vault, project_id, &args.actor, guard_mode, source_safety_mode)?;
            print_json(&json!({
                "blob_count": report.blob_count,
                "row_count": report.row_count,
                "already_deleted": report.already_deleted,
            }));
            Ok(())
        }

        Command::ListEvents { project_id } => {
            let project_id = parse_project_id(&project_id)?;
            let events = store.list_events(project_id)?;
            let out: Vec<_> = events
                .iter()
                .map(|e| json!({"id": e.id.to_string(), "event_type": e.event_type, "created_at": e.created_at.to_rfc3339()}))
                .collect();
            print_json(&serde_json::Value::Array(out));
            Ok(())
        }

        Command::VerifyAudit => {
            let last_hash = editorial_entity_store::verify_audit_log(args.data_dir.join("audit.jsonl"))?;
            print_json(&json!({"ok": true, "last_hash": last_hash}));
            Ok(())
        }
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string(value).expect("json values from this crate always serialize"));
}

fn parse_project_id(s: &str) -> Result<ProjectId, CliError> {
    Ok(s.parse()?)
}

fn parse_document_id(s: &str) -> Result<DocumentId, CliError> {
    Ok(s.parse()?)
}

fn parse_classification(s: &str) -> Result<Classification, CliError> {
    match s {
        "public" => Ok(Classification::Public),
        "sensitive" => Ok(Classification::Sensitive),
        "source_sensitive" => Ok(Classification::SourceSensitive),
        other => Err(CliError::InvalidValue { field: "classification", value: other.to_string() }),
    }
}

fn parse_sanitize_level(s: &str) -> Result<SanitizeLevel, CliError> {
    match s {
        "normal" => Ok(SanitizeLevel::Normal),
        "strict" => Ok(SanitizeLevel::Strict),
        "paranoid" => Ok(SanitizeLevel::Paranoid),
        other => Err(CliError::InvalidValue { field: "level", value: other.to_string() }),
    }
}

fn parse_policy_id(s: &str) -> Result<PolicyId, CliError> {
    match s {
        "internal" => Ok(PolicyId::Internal),
        "external" => Ok(PolicyId::External),
        other => Err(CliError::InvalidValue { field: "policy", value: other.to_string() }),
    }
}
