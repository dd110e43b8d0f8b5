//! editorial_knox_orchestrator
//!
//! The compile cycle itself — idempotency lookup, remote call,
//! gates, report persistence — in that order.
//! Idempotency is checked *before* the remote-availability check so an
//! offline system still serves a cached report; a
//! gate failure of either kind never reaches `save_report_if_absent`,
//! so no partial report is ever persisted.

use editorial_common::ProjectId;
use editorial_entity_store::{EntityStore, KnoxReport, StoreError};
use editorial_fortknox_client::{FortKnoxClient, FortKnoxClientError};
use editorial_gate_engine::{run_input_gate, run_output_gate, GateResults, Policy};
use editorial_knox_pack::{build_pack, KnoxPackError, Selection};
use editorial_privacy_guard::{ContentLeakError, Event, GuardMode, GuardedEvent};
use thiserror::Error;

/// Fixed identifier for the rendering/compile engine this workspace
/// ships, persisted on every `KnoxReport` row alongside `ruleset_hash`
/// so an audit can tell which code produced it.
pub const ENGINE_ID: &str = "editorial-knox-orchestrator-v1";

#[derive(Debug, Error)]
pub enum KnoxError {
    #[error("input gate failed: {reasons:?}")]
    InputGateFailed { reasons: Vec<String> },
    #[error("output gate failed: {reasons:?}")]
    OutputGateFailed { reasons: Vec<String> },
    #[error("fortknox remote is not configured")]
    FortKnoxOffline,
    #[error("fortknox remote call timed out")]
    Timeout,
    #[error("fortknox remote call failed: {0}")]
    NetworkError(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("knox pack error: {0}")]
    Pack(#[from] KnoxPackError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event guard error: {0}")]
    Guard(#[from] ContentLeakError),
}

impl KnoxError {
    /// The closed error-code set returned in a compile failure's error envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            KnoxError::InputGateFailed { .. } => "INPUT_GATE_FAILED",
            KnoxError::OutputGateFailed { .. } => "OUTPUT_GATE_FAILED",
            KnoxError::FortKnoxOffline => "FORTKNOX_OFFLINE",
            KnoxError::Timeout => "TIMEOUT",
            KnoxError::NetworkError(_) => "NETWORK_ERROR",
            KnoxError::Store(_) | KnoxError::Pack(_) | KnoxError::Json(_) | KnoxError::Guard(_) => "VALIDATION_ERROR",
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        match self {
            KnoxError::InputGateFailed { reasons } | KnoxError::OutputGateFailed { reasons } => reasons.clone(),
            _ => Vec::new(),
        }
    }
}

fn classify_client_error(e: FortKnoxClientError) -> KnoxError {
    match e {
        FortKnoxClientError::Network(inner) if inner.is_timeout() => KnoxError::Timeout,
        FortKnoxClientError::Network(inner) => KnoxError::NetworkError(inner.to_string()),
        FortKnoxClientError::FixtureMissing { .. } => KnoxError::NetworkError(e.to_string()),
    }
}

/// Run the full compile cycle for `project_id` under `policy` against
/// `template_id`. `client` is `None` exactly when `FORTKNOX_REMOTE_URL`
/// is unset and `FORTKNOX_TESTMODE` is off — the orchestrator's only
/// job with a `None` client is to still serve a cached report if one
/// exists.
#[allow(clippy::too_many_arguments)]
pub async fn compile(
    store: &EntityStore,
    client: Option<&FortKnoxClient>,
    policy: &Policy,
    project_id: ProjectId,
    template_id: &str,
    selection: Option<&Selection>,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<KnoxReport, KnoxError> {
    let pack = build_pack(store, project_id, selection)?;

    let input_outcome = match run_input_gate(policy, &pack) {
        Ok(outcome) => outcome,
        Err(failure) => {
            let err = KnoxError::InputGateFailed { reasons: failure.reasons };
            emit_compile_failed(store, project_id, policy, template_id, &err, actor, guard_mode, source_safety_mode)?;
            return Err(err);
        }
    };

    if let Some(existing) =
        store.get_report_by_fingerprint(project_id, policy.policy_id, template_id, &pack.input_fingerprint)?
    {
        return Ok(existing);
    }

    let Some(client) = client else {
        let err = KnoxError::FortKnoxOffline;
        emit_compile_failed(store, project_id, policy, template_id, &err, actor, guard_mode, source_safety_mode)?;
        return Err(err);
    };

    let call_result = match client.compile(&pack, policy.policy_id, template_id).await {
        Ok(r) => r,
        Err(e) => {
            let err = classify_client_error(e);
            emit_compile_failed(store, project_id, policy, template_id, &err, actor, guard_mode, source_safety_mode)?;
            return Err(err);
        }
    };

    let (gated, output_outcome) = match run_output_gate(policy, &pack, &call_result.response) {
        Ok(v) => v,
        Err(failure) => {
            let err = KnoxError::OutputGateFailed { reasons: failure.reasons };
            emit_compile_failed(store, project_id, policy, template_id, &err, actor, guard_mode, source_safety_mode)?;
            return Err(err);
        }
    };

    let gate_results = GateResults { input_gate: input_outcome, output_gate: output_outcome };
    let gate_results_json = serde_json::to_value(&gate_results)?;
    let manifest_json = serde_json::to_value(&pack.manifest)?;

    let (report, inserted) = store.save_report_if_absent(
        project_id,
        policy.policy_id,
        &policy.policy_version,
        &policy.ruleset_hash,
        template_id,
        ENGINE_ID,
        &pack.input_fingerprint,
        &manifest_json,
        &gate_results_json,
        &gated.rendered_markdown,
        call_result.latency_ms,
    )?;

    if inserted {
        let event = Event::KnoxReportCreated {
            report_id: report.id.to_string(),
            policy_id: policy.policy_id.as_str().to_string(),
            template_id: template_id.to_string(),
            input_fingerprint: pack.input_fingerprint.clone(),
            latency_ms: call_result.latency_ms,
        };
        let guarded = GuardedEvent::new(project_id, actor, event, guard_mode, source_safety_mode)?;
        store.append_event(guarded)?;
        tracing::info!(
            project_id = %project_id,
            report_id = %report.id,
            policy_id = %policy.policy_id,
            latency_ms = call_result.latency_ms,
            "knox_orchestrator: report persisted"
        );
    }

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn emit_compile_failed(
    store: &EntityStore,
    project_id: ProjectId,
    policy: &Policy,
    template_id: &str,
    err: &KnoxError,
    actor: &str,
    guard_mode: GuardMode,
    source_safety_mode: bool,
) -> Result<(), KnoxError> {
    let event = Event::KnoxCompileFailed {
        project_id: project_id.to_string(),
        policy_id: policy.policy_id.as_str().to_string(),
        template_id: template_id.to_string(),
        error_code: err.error_code().to_string(),
        reason_count: err.reasons().len() as u64,
    };
    let guarded = GuardedEvent::new(project_id, actor, event, guard_mode, source_safety_mode)?;
    store.append_event(guarded)?;
    tracing::warn!(
        project_id = %project_id,
        policy_id = %policy.policy_id,
        error_code = err.error_code(),
        "knox_orchestrator: compile failed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use editorial_common::{Classification, PolicyId, SanitizeLevel};
    use editorial_entity_store::FileType;
    use editorial_fortknox_client::FixtureTable;
    use tempfile::TempDir;

    fn harness() -> (TempDir, EntityStore) {
        let tmp = TempDir::new().unwrap();
        let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
        (tmp, store)
    }

    fn fixture_response() -> serde_json::Value {
        serde_json::json!({
            "template_id": "weekly",
            "language": "sv",
            "title": "Titel",
            "executive_summary": "En kort sammanfattning.",
            "themes": [{"name": "Tema", "bullets": ["punkt"]}],
            "timeline_high_level": ["steg"],
            "risks": [{"risk": "risk", "mitigation": "atgard"}],
            "open_questions": ["fraga"],
            "next_steps": ["steg"],
            "confidence": "medium",
        })
    }

    #[tokio::test]
    async fn offline_with_no_prior_report_returns_fortknox_offline() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "no pii here", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        let policy = Policy::default_for(PolicyId::Internal);
        let err = compile(&store, None, &policy, project.id, "weekly", None, "tester", GuardMode::Strict, true)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORTKNOX_OFFLINE");
    }

    #[tokio::test]
    async fn external_policy_blocks_normal_level_document_without_remote_call() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "no pii here", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        let mut fixtures = FixtureTable::new();
        fixtures.insert((PolicyId::External, "weekly".to_string()), fixture_response());
        let client = FortKnoxClient::fixture(fixtures);
        let policy = Policy::default_for(PolicyId::External);
        let err = compile(&store, Some(&client), &policy, project.id, "weekly", None, "tester", GuardMode::Strict, true)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INPUT_GATE_FAILED");
        assert!(err.reasons().iter().any(|r| r.ends_with("_sanitize_level_too_low")));
    }

    #[tokio::test]
    async fn compile_twice_with_testmode_fixture_is_idempotent() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "inget kansligt innehall alls har", SanitizeLevel::Strict, Classification::Public, "sha-a")
            .unwrap();
        let mut fixtures = FixtureTable::new();
        fixtures.insert((PolicyId::Internal, "weekly".to_string()), fixture_response());
        let client = FortKnoxClient::fixture(fixtures);
        let policy = Policy::default_for(PolicyId::Internal);

        let first = compile(&store, Some(&client), &policy, project.id, "weekly", None, "tester", GuardMode::Strict, true)
            .await
            .unwrap();
        let second = compile(&store, Some(&client), &policy, project.id, "weekly", None, "tester", GuardMode::Strict, true)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }
}
