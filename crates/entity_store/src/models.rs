use chrono::{DateTime, Utc};
use editorial_common::{
    Classification, DocumentId, JobId, NoteId, PolicyId, ProjectId, ProjectStatus, ReportId,
    SanitizeLevel, SourceId, UsageRestrictions,
};
use rusqlite::types::Type as SqlType;
use rusqlite::{Error as SqlError, Result as SqlResult};
use serde::{Deserialize, Serialize};

/// Row-conversion failures (bad enum text, malformed UUID, unparsable
/// JSON/timestamp) are reported through `rusqlite::Error`'s own
/// conversion-failure variants rather than our higher-level
/// `StoreError`, since that is the error type the `rusqlite` row-mapping
/// closures are contracted to return.
fn conv_err(column: &'static str, source: impl std::error::Error + Send + Sync + 'static) -> SqlError {
    SqlError::FromSqlConversionFailure(0, SqlType::Text, format!("{column}: {source}").into())
}

fn bad_enum(column: &'static str, value: &str) -> SqlError {
    SqlError::InvalidColumnType(0, format!("{column}='{value}'"), SqlType::Text)
}

fn parse_classification(s: &str) -> SqlResult<Classification> {
    match s {
        "public" => Ok(Classification::Public),
        "sensitive" => Ok(Classification::Sensitive),
        "source_sensitive" => Ok(Classification::SourceSensitive),
        other => Err(bad_enum("classification", other)),
    }
}

pub(crate) fn classification_str(c: Classification) -> &'static str {
    match c {
        Classification::Public => "public",
        Classification::Sensitive => "sensitive",
        Classification::SourceSensitive => "source_sensitive",
    }
}

fn parse_status(s: &str) -> SqlResult<ProjectStatus> {
    match s {
        "research" => Ok(ProjectStatus::Research),
        "processing" => Ok(ProjectStatus::Processing),
        "fact_check" => Ok(ProjectStatus::FactCheck),
        "ready" => Ok(ProjectStatus::Ready),
        "archived" => Ok(ProjectStatus::Archived),
        other => Err(bad_enum("status", other)),
    }
}

pub(crate) fn status_str(s: ProjectStatus) -> &'static str {
    match s {
        ProjectStatus::Research => "research",
        ProjectStatus::Processing => "processing",
        ProjectStatus::FactCheck => "fact_check",
        ProjectStatus::Ready => "ready",
        ProjectStatus::Archived => "archived",
    }
}

pub(crate) fn parse_sanitize_level(s: &str) -> SqlResult<SanitizeLevel> {
    match s {
        "normal" => Ok(SanitizeLevel::Normal),
        "strict" => Ok(SanitizeLevel::Strict),
        "paranoid" => Ok(SanitizeLevel::Paranoid),
        other => Err(bad_enum("sanitize_level", other)),
    }
}

pub(crate) fn parse_policy_id(s: &str) -> SqlResult<PolicyId> {
    match s {
        "internal" => Ok(PolicyId::Internal),
        "external" => Ok(PolicyId::External),
        other => Err(bad_enum("policy_id", other)),
    }
}

fn parse_id<T: std::str::FromStr>(column: &'static str, s: &str) -> SqlResult<T>
where
    T::Err: std::fmt::Display,
{
    s.parse().map_err(|e: T::Err| bad_enum(column, &e.to_string()))
}

fn parse_timestamp(column: &'static str, s: &str) -> SqlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).map_err(|e| conv_err(column, e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Pdf,
    Txt,
    Audio,
    NoteDerived,
    ReportDerived,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Txt => "txt",
            FileType::Audio => "audio",
            FileType::NoteDerived => "note_derived",
            FileType::ReportDerived => "report_derived",
        }
    }

    pub fn parse(s: &str) -> SqlResult<Self> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "txt" => Ok(FileType::Txt),
            "audio" => Ok(FileType::Audio),
            "note_derived" => Ok(FileType::NoteDerived),
            "report_derived" => Ok(FileType::ReportDerived),
            other => Err(bad_enum("file_type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Link,
    Person,
    Document,
    Other,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Link => "link",
            SourceType::Person => "person",
            SourceType::Document => "document",
            SourceType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> SqlResult<Self> {
        match s {
            "link" => Ok(SourceType::Link),
            "person" => Ok(SourceType::Person),
            "document" => Ok(SourceType::Document),
            "other" => Ok(SourceType::Other),
            other => Err(bad_enum("source_type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalistNoteCategory {
    Raw,
    Work,
    Reflection,
    Question,
    Source,
    Other,
}

impl JournalistNoteCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalistNoteCategory::Raw => "raw",
            JournalistNoteCategory::Work => "work",
            JournalistNoteCategory::Reflection => "reflection",
            JournalistNoteCategory::Question => "question",
            JournalistNoteCategory::Source => "source",
            JournalistNoteCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> SqlResult<Self> {
        match s {
            "raw" => Ok(JournalistNoteCategory::Raw),
            "work" => Ok(JournalistNoteCategory::Work),
            "reflection" => Ok(JournalistNoteCategory::Reflection),
            "question" => Ok(JournalistNoteCategory::Question),
            "source" => Ok(JournalistNoteCategory::Source),
            "other" => Ok(JournalistNoteCategory::Other),
            other => Err(bad_enum("category", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcribe,
    KnoxCompile,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Transcribe => "transcribe",
            JobKind::KnoxCompile => "knox_compile",
        }
    }

    pub fn parse(s: &str) -> SqlResult<Self> {
        match s {
            "transcribe" => Ok(JobKind::Transcribe),
            "knox_compile" => Ok(JobKind::KnoxCompile),
            other => Err(bad_enum("kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> SqlResult<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(bad_enum("status", other)),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub classification: Classification,
    pub status: ProjectStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let tags_json: String = row.get("tags")?;
        let due_date: Option<String> = row.get("due_date")?;
        Ok(Self {
            id: parse_id("projects.id", &id)?,
            name: row.get("name")?,
            classification: parse_classification(&row.get::<_, String>("classification")?)?,
            status: parse_status(&row.get::<_, String>("status")?)?,
            due_date: due_date.map(|s| parse_timestamp("due_date", &s)).transpose()?,
            tags: serde_json::from_str(&tags_json).map_err(|e| conv_err("tags", e))?,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
            updated_at: parse_timestamp("updated_at", &row.get::<_, String>("updated_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub project_id: ProjectId,
    pub filename: String,
    pub file_type: FileType,
    pub original_blob_ref: Option<String>,
    pub original_missing: bool,
    pub masked_text: String,
    pub sanitize_level: SanitizeLevel,
    pub classification: Classification,
    pub usage_restrictions: UsageRestrictions,
    pub sha256: String,
    pub excluded_from_compile: bool,
    pub datetime_masked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let project_id: String = row.get("project_id")?;
        Ok(Self {
            id: parse_id("documents.id", &id)?,
            project_id: parse_id("documents.project_id", &project_id)?,
            filename: row.get("filename")?,
            file_type: FileType::parse(&row.get::<_, String>("file_type")?)?,
            original_blob_ref: row.get("original_blob_ref")?,
            original_missing: row.get::<_, i64>("original_missing")? != 0,
            masked_text: row.get("masked_text")?,
            sanitize_level: parse_sanitize_level(&row.get::<_, String>("sanitize_level")?)?,
            classification: parse_classification(&row.get::<_, String>("classification")?)?,
            usage_restrictions: UsageRestrictions {
                ai_allowed: row.get::<_, i64>("ai_allowed")? != 0,
                export_allowed: row.get::<_, i64>("export_allowed")? != 0,
            },
            sha256: row.get("sha256")?,
            excluded_from_compile: row.get::<_, i64>("excluded_from_compile")? != 0,
            datetime_masked: row.get::<_, i64>("datetime_masked")? != 0,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
            updated_at: parse_timestamp("updated_at", &row.get::<_, String>("updated_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectNote {
    pub id: NoteId,
    pub project_id: ProjectId,
    pub title: Option<String>,
    pub masked_body: String,
    pub sanitize_level: SanitizeLevel,
    pub excluded_from_compile: bool,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectNote {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let project_id: String = row.get("project_id")?;
        Ok(Self {
            id: parse_id("project_notes.id", &id)?,
            project_id: parse_id("project_notes.project_id", &project_id)?,
            title: row.get("title")?,
            masked_body: row.get("masked_body")?,
            sanitize_level: parse_sanitize_level(&row.get::<_, String>("sanitize_level")?)?,
            excluded_from_compile: row.get::<_, i64>("excluded_from_compile")? != 0,
            sha256: row.get("sha256")?,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
            updated_at: parse_timestamp("updated_at", &row.get::<_, String>("updated_at")?)?,
        })
    }
}

/// The capability set shared by `Document` and `ProjectNote`: both are
/// masked, leveled, hashed, eligible-for-compile content, and callers
/// that only need those three facts (the KnoxInputPack Builder's
/// manifest/payload assembly, the sanitize-level "never regress" check)
/// can stay generic over which one they were handed instead of
/// duck-typing two near-identical code paths.
pub trait MaskedContent {
    fn content_id(&self) -> String;
    fn masked_text(&self) -> &str;
    fn sanitize_level(&self) -> SanitizeLevel;
    fn sha256(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
}

impl MaskedContent for Document {
    fn content_id(&self) -> String {
        self.id.to_string()
    }
    fn masked_text(&self) -> &str {
        &self.masked_text
    }
    fn sanitize_level(&self) -> SanitizeLevel {
        self.sanitize_level
    }
    fn sha256(&self) -> &str {
        &self.sha256
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl MaskedContent for ProjectNote {
    fn content_id(&self) -> String {
        self.id.to_string()
    }
    fn masked_text(&self) -> &str {
        &self.masked_body
    }
    fn sanitize_level(&self) -> SanitizeLevel {
        self.sanitize_level
    }
    fn sha256(&self) -> &str {
        &self.sha256
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalistNote {
    pub id: NoteId,
    pub project_id: ProjectId,
    pub body: String,
    pub category: JournalistNoteCategory,
    pub image_blob_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalistNote {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let project_id: String = row.get("project_id")?;
        let images_json: String = row.get("image_blob_refs")?;
        Ok(Self {
            id: parse_id("journalist_notes.id", &id)?,
            project_id: parse_id("journalist_notes.project_id", &project_id)?,
            body: row.get("body")?,
            category: JournalistNoteCategory::parse(&row.get::<_, String>("category")?)?,
            image_blob_refs: serde_json::from_str(&images_json).map_err(|e| conv_err("image_blob_refs", e))?,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
            updated_at: parse_timestamp("updated_at", &row.get::<_, String>("updated_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub project_id: ProjectId,
    pub title: String,
    pub source_type: SourceType,
    pub url: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let project_id: String = row.get("project_id")?;
        Ok(Self {
            id: parse_id("sources.id", &id)?,
            project_id: parse_id("sources.project_id", &project_id)?,
            title: row.get("title")?,
            source_type: SourceType::parse(&row.get::<_, String>("source_type")?)?,
            url: row.get("url")?,
            comment: row.get("comment")?,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub id: editorial_common::EventId,
    pub project_id: ProjectId,
    pub actor: String,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl EventRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let project_id: String = row.get("project_id")?;
        let metadata_json: String = row.get("metadata")?;
        Ok(Self {
            id: parse_id("events.id", &id)?,
            project_id: parse_id("events.project_id", &project_id)?,
            actor: row.get("actor")?,
            event_type: row.get("event_type")?,
            metadata: serde_json::from_str(&metadata_json).map_err(|e| conv_err("metadata", e))?,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub input_ref: String,
    pub result_ref: Option<String>,
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let finished_at: Option<String> = row.get("finished_at")?;
        Ok(Self {
            id: parse_id("jobs.id", &id)?,
            kind: JobKind::parse(&row.get::<_, String>("kind")?)?,
            status: JobStatus::parse(&row.get::<_, String>("status")?)?,
            input_ref: row.get("input_ref")?,
            result_ref: row.get("result_ref")?,
            error_code: row.get("error_code")?,
            error_detail: row.get("error_detail")?,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
            finished_at: finished_at.map(|s| parse_timestamp("finished_at", &s)).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnoxReport {
    pub id: ReportId,
    pub project_id: ProjectId,
    pub policy_id: PolicyId,
    pub policy_version: String,
    pub ruleset_hash: String,
    pub template_id: String,
    pub engine_id: String,
    pub input_fingerprint: String,
    pub input_manifest: serde_json::Value,
    pub gate_results: serde_json::Value,
    pub rendered_markdown: String,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl KnoxReport {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqlResult<Self> {
        let id: String = row.get("id")?;
        let project_id: String = row.get("project_id")?;
        let manifest_json: String = row.get("input_manifest")?;
        let gate_json: String = row.get("gate_results")?;
        Ok(Self {
            id: parse_id("knox_reports.id", &id)?,
            project_id: parse_id("knox_reports.project_id", &project_id)?,
            policy_id: parse_policy_id(&row.get::<_, String>("policy_id")?)?,
            policy_version: row.get("policy_version")?,
            ruleset_hash: row.get("ruleset_hash")?,
            template_id: row.get("template_id")?,
            engine_id: row.get("engine_id")?,
            input_fingerprint: row.get("input_fingerprint")?,
            input_manifest: serde_json::from_str(&manifest_json).map_err(|e| conv_err("input_manifest", e))?,
            gate_results: serde_json::from_str(&gate_json).map_err(|e| conv_err("gate_results", e))?,
            rendered_markdown: row.get("rendered_markdown")?,
            latency_ms: row.get::<_, i64>("latency_ms")? as u64,
            created_at: parse_timestamp("created_at", &row.get::<_, String>("created_at")?)?,
        })
    }
}
