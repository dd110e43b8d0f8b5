//! editorial_fortknox_client
//!
//! A small `reqwest`-based client for the remote Fort Knox compiler,
//! grounded on the teacher's bounded-timeout `.json()` request/response
//! discipline: a live variant posts `{policy, template_id,
//! input_fingerprint, documents, notes, sources}` (spec.md §6) and
//! returns the raw JSON body untouched — schema validation belongs to
//! `editorial_gate_engine`'s Output Gate, not to the transport.
//!
//! `FortKnoxClient::Fixture` is the TESTMODE substitute (spec.md §4.9):
//! selecting it is a constructor-time choice, so `editorial_knox_orchestrator`'s
//! `compile` reads the same way regardless of which variant it holds.

use editorial_common::PolicyId;
use editorial_knox_pack::KnoxInputPack;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Error)]
pub enum FortKnoxClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("no fixture registered for policy={policy_id} template={template_id}")]
    FixtureMissing { policy_id: String, template_id: String },
}

#[derive(Debug, Clone)]
pub struct FortKnoxCallResult {
    pub response: serde_json::Value,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
struct CompileRequest<'a> {
    policy: &'a str,
    template_id: &'a str,
    input_fingerprint: &'a str,
    documents: &'a [editorial_knox_pack::PayloadDocument],
    notes: &'a [editorial_knox_pack::PayloadNote],
    sources: &'a [editorial_knox_pack::PayloadSource],
}

/// Keyed by `(policy_id, template_id)`, matching spec.md §4.9's
/// "fixture lookup keyed by (policy_id, template_id)".
pub type FixtureTable = HashMap<(PolicyId, String), serde_json::Value>;

pub enum FortKnoxClient {
    Live { base_url: String, client: reqwest::Client, timeout: Duration },
    Fixture { fixtures: FixtureTable },
}

impl FortKnoxClient {
    pub fn live(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder().timeout(timeout).build().expect("reqwest client builds");
        Self::Live { base_url: base_url.into(), client, timeout }
    }

    pub fn fixture(fixtures: FixtureTable) -> Self {
        Self::Fixture { fixtures }
    }

    /// Resolve a client from the environment the way spec.md §6
    /// describes: `FORTKNOX_TESTMODE=1` selects the fixture variant
    /// regardless of `FORTKNOX_REMOTE_URL`; otherwise an empty/absent
    /// `remote_url` means there is no client at all (the orchestrator's
    /// `FORTKNOX_OFFLINE` path), and a present one selects `Live` with
    /// the default 180s timeout.
    pub fn from_env(remote_url: Option<&str>, testmode: bool, fixtures: FixtureTable) -> Option<Self> {
        if testmode {
            return Some(Self::fixture(fixtures));
        }
        let url = remote_url?;
        if url.is_empty() {
            return None;
        }
        Some(Self::live(url, DEFAULT_TIMEOUT))
    }

    /// POST the pack to the remote compiler (or look up the TESTMODE
    /// fixture) and return the raw response JSON, untouched, plus the
    /// call's latency. Only metadata is logged — never the payload or
    /// the response body.
    pub async fn compile(
        &self,
        pack: &KnoxInputPack,
        policy_id: PolicyId,
        template_id: &str,
    ) -> Result<FortKnoxCallResult, FortKnoxClientError> {
        match self {
            FortKnoxClient::Fixture { fixtures } => {
                let key = (policy_id, template_id.to_string());
                let response = fixtures.get(&key).cloned().ok_or_else(|| FortKnoxClientError::FixtureMissing {
                    policy_id: policy_id.to_string(),
                    template_id: template_id.to_string(),
                })?;
                tracing::info!(policy_id = %policy_id, template_id, "fortknox: testmode fixture served");
                Ok(FortKnoxCallResult { response, latency_ms: 0 })
            }
            FortKnoxClient::Live { base_url, client, .. } => {
                let request = CompileRequest {
                    policy: policy_id.as_str(),
                    template_id,
                    input_fingerprint: &pack.input_fingerprint,
                    documents: &pack.payload.documents,
                    notes: &pack.payload.notes,
                    sources: &pack.payload.sources,
                };
                let started = Instant::now();
                let response = client
                    .post(format!("{base_url}/compile"))
                    .json(&request)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<serde_json::Value>()
                    .await?;
                let latency_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    policy_id = %policy_id,
                    template_id,
                    input_fingerprint = %pack.input_fingerprint,
                    latency_ms,
                    "fortknox: remote compile completed"
                );
                Ok(FortKnoxCallResult { response, latency_ms })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_client_serves_registered_response() {
        let mut fixtures = FixtureTable::new();
        fixtures.insert((PolicyId::Internal, "weekly".to_string()), serde_json::json!({"ok": true}));
        let client = FortKnoxClient::fixture(fixtures);
        let store = editorial_entity_store_for_tests::empty_pack();
        let result = client.compile(&store, PolicyId::Internal, "weekly").await.unwrap();
        assert_eq!(result.response, serde_json::json!({"ok": true}));
        assert_eq!(result.latency_ms, 0);
    }

    #[tokio::test]
    async fn fixture_client_errors_on_unregistered_key() {
        let client = FortKnoxClient::fixture(FixtureTable::new());
        let pack = editorial_entity_store_for_tests::empty_pack();
        let err = client.compile(&pack, PolicyId::Internal, "missing").await.unwrap_err();
        assert!(matches!(err, FortKnoxClientError::FixtureMissing { .. }));
    }

    #[test]
    fn from_env_prefers_testmode_over_remote_url() {
        let client = FortKnoxClient::from_env(Some(""), true, FixtureTable::new());
        assert!(matches!(client, Some(FortKnoxClient::Fixture { .. })));
    }

    #[test]
    fn from_env_is_offline_with_no_url_and_no_testmode() {
        let client = FortKnoxClient::from_env(None, false, FixtureTable::new());
        assert!(client.is_none());
        let client = FortKnoxClient::from_env(Some(""), false, FixtureTable::new());
        assert!(client.is_none());
    }

    mod editorial_entity_store_for_tests {
        use editorial_entity_store::EntityStore;
        use editorial_knox_pack::{build_pack, KnoxInputPack};
        use tempfile::TempDir;

        pub fn empty_pack() -> KnoxInputPack {
            let tmp = TempDir::new().unwrap();
            let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
            let project = store
                .create_project("P", editorial_common::Classification::Public, None, vec![])
                .unwrap();
            build_pack(&store, project.id, None).unwrap()
        }
    }
}
