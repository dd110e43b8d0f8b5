//! editorial_gate_engine
//!
//! The Input Gate (run before any remote call) and the Output Gate
//! + Re-ID Guard (run on the remote response before persistence), plus
//! the PII-gate leak sweep both sides share with `editorial_sanitization`'s
//! escalation loop (`editorial_masker::pii_leak_detected`).
//!
//! Both gates are fail-closed: a single tripped check aborts the whole
//! operation and no partial result is ever handed back to the caller.

mod policy;
mod render;
mod response;

pub use policy::Policy;
pub use response::{Confidence, FortKnoxResponse, Risk, Theme};

use editorial_knox_pack::KnoxInputPack;
use editorial_masker::pii_leak_detected;
use jsonschema::{Draft, JSONSchema};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

const RESPONSE_SCHEMA_JSON: &str = include_str!("fortknox_response.schema.json");

/// Input Gate failure: per-item reasons are enumerated so the UI can
/// prompt autofix (e.g. `document_<id>_sanitize_level_too_low`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputGateFailure {
    pub reasons: Vec<String>,
}

/// Output Gate / Re-ID Guard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputGateFailure {
    pub reasons: Vec<String>,
}

/// Machine-readable outcome of one gate, suitable for embedding
/// verbatim into `KnoxReport.gate_results`.
#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub passed: bool,
    pub reasons: Vec<String>,
}

impl GateOutcome {
    fn passed() -> Self {
        Self { passed: true, reasons: Vec::new() }
    }

    fn failed(reasons: Vec<String>) -> Self {
        Self { passed: false, reasons }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateResults {
    pub input_gate: GateOutcome,
    pub output_gate: GateOutcome,
}

/// Output of a successful Output Gate pass: the validated, typed
/// response plus the exact markdown that was checked. The orchestrator
/// persists this `rendered_markdown` as-is — the same deterministic
/// render used here, not a second pass.
pub struct GatedResponse {
    pub response: FortKnoxResponse,
    pub rendered_markdown: String,
}

/// Run every Input Gate check in order, stopping at the
/// first category that fails (an empty input set makes every other
/// check meaningless; a sanitize-level failure should not also report
/// spurious PII-gate/size findings against content that was never
/// supposed to be sent).
pub fn run_input_gate(policy: &Policy, pack: &KnoxInputPack) -> Result<GateOutcome, InputGateFailure> {
    if pack.is_empty() {
        return Err(InputGateFailure { reasons: vec!["empty_input_set".to_string()] });
    }

    let min_level = policy.policy_id.sanitize_min_level();
    let mut level_reasons = Vec::new();
    for d in &pack.documents {
        if d.sanitize_level < min_level {
            level_reasons.push(format!("document_{}_sanitize_level_too_low", d.id));
        }
    }
    for n in &pack.notes {
        if n.sanitize_level < min_level {
            level_reasons.push(format!("note_{}_sanitize_level_too_low", n.id));
        }
    }
    if !level_reasons.is_empty() {
        return Err(InputGateFailure { reasons: level_reasons });
    }

    if pii_leak_detected(&pack.concatenated_masked_text()) {
        return Err(InputGateFailure { reasons: vec!["pii_gate_failed".to_string()] });
    }

    let payload_bytes = pack
        .payload_byte_len()
        .map_err(|e| InputGateFailure { reasons: vec![format!("internal_error:{e}")] })?;
    if payload_bytes > policy.max_bytes {
        return Err(InputGateFailure { reasons: vec!["size_exceeded".to_string()] });
    }

    Ok(GateOutcome::passed())
}

fn schema() -> &'static JSONSchema {
    static SCHEMA: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let value: serde_json::Value =
            serde_json::from_str(RESPONSE_SCHEMA_JSON).expect("embedded fortknox response schema is valid json");
        JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .compile(&value)
            .expect("embedded fortknox response schema compiles")
    })
}

fn date_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}\s+(?:januari|februari|mars|april|maj|juni|juli|augusti|september|oktober|november|december)(?:\s+\d{4})?\b",
        )
        .unwrap()
    })
}

fn normalized_words(text: &str) -> Vec<String> {
    text.to_lowercase().split_whitespace().map(|w| w.to_string()).collect()
}

/// True if an `n`-word run (`n = quote_limit_words + 1`) of the masked
/// input reappears verbatim (after lowercasing/whitespace collapse) in
/// the rendered output — i.e. the model quoted source material instead
/// of paraphrasing it.
fn reid_guard_trips(input_text: &str, output_text: &str, quote_limit_words: usize) -> bool {
    let n = quote_limit_words + 1;
    let input_words = normalized_words(input_text);
    if input_words.len() < n {
        return false;
    }
    let mut ngrams: HashSet<String> = HashSet::new();
    for window in input_words.windows(n) {
        ngrams.insert(window.join(" "));
    }
    let output_words = normalized_words(output_text);
    if output_words.len() < n {
        return false;
    }
    output_words.windows(n).any(|window| ngrams.contains(&window.join(" ")))
}

/// Run the Output Gate + Re-ID Guard against a raw remote response:
/// schema validation, PII-gate on the rendered markdown, n-gram quote
/// detection against the masked input, and (for policies with
/// `date_strictness`) an exact-date sweep of the output.
pub fn run_output_gate(
    policy: &Policy,
    pack: &KnoxInputPack,
    raw_response: &serde_json::Value,
) -> Result<(GatedResponse, GateOutcome), OutputGateFailure> {
    if !schema().is_valid(raw_response) {
        return Err(OutputGateFailure { reasons: vec!["schema_invalid".to_string()] });
    }
    let response: FortKnoxResponse = serde_json::from_value(raw_response.clone())
        .map_err(|_| OutputGateFailure { reasons: vec!["schema_invalid".to_string()] })?;

    let rendered_markdown = render::render_markdown(&response);

    if pii_leak_detected(&rendered_markdown) {
        return Err(OutputGateFailure { reasons: vec!["pii_gate_failed".to_string()] });
    }

    if reid_guard_trips(&pack.concatenated_masked_text(), &rendered_markdown, policy.quote_limit_words) {
        return Err(OutputGateFailure { reasons: vec!["quote_detected".to_string()] });
    }

    if policy.date_strictness && date_token_re().is_match(&rendered_markdown) {
        return Err(OutputGateFailure { reasons: vec!["exact_date_detected".to_string()] });
    }

    Ok((GatedResponse { response, rendered_markdown }, GateOutcome::passed()))
}

/// Build the `GateOutcome::failed` shape for an [`InputGateFailure`],
/// for the orchestrator to embed in a persisted `GateResults`.
impl From<InputGateFailure> for GateOutcome {
    fn from(f: InputGateFailure) -> Self {
        GateOutcome::failed(f.reasons)
    }
}

/// Output Gate analogue of the `InputGateFailure` conversion above.
impl From<OutputGateFailure> for GateOutcome {
    fn from(f: OutputGateFailure) -> Self {
        GateOutcome::failed(f.reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use editorial_common::{Classification, PolicyId, SanitizeLevel};
    use editorial_entity_store::EntityStore;
    use editorial_knox_pack::build_pack;
    use tempfile::TempDir;

    fn harness() -> (TempDir, EntityStore) {
        let tmp = TempDir::new().unwrap();
        let store = EntityStore::open(tmp.path().join("db.sqlite"), tmp.path().join("audit.jsonl")).unwrap();
        (tmp, store)
    }

    #[test]
    fn empty_pack_fails_input_gate_with_empty_input_set() {
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        let policy = Policy::default_for(PolicyId::Internal);
        let err = run_input_gate(&policy, &pack).unwrap_err();
        assert_eq!(err.reasons, vec!["empty_input_set".to_string()]);
    }

    #[test]
    fn external_policy_rejects_normal_level_documents() {
        use editorial_entity_store::FileType;
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        let doc = store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "no pii here", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        let policy = Policy::default_for(PolicyId::External);
        let err = run_input_gate(&policy, &pack).unwrap_err();
        assert_eq!(err.reasons, vec![format!("document_{}_sanitize_level_too_low", doc.id)]);
    }

    #[test]
    fn internal_policy_accepts_normal_level_documents() {
        use editorial_entity_store::FileType;
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "no pii here", SanitizeLevel::Normal, Classification::Public, "sha-a")
            .unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        let policy = Policy::default_for(PolicyId::Internal);
        assert!(run_input_gate(&policy, &pack).is_ok());
    }

    fn sample_response(extra_bullets: &str) -> serde_json::Value {
        serde_json::json!({
            "template_id": "weekly",
            "language": "sv",
            "title": "Sammanfattning",
            "executive_summary": extra_bullets,
            "themes": [{"name": "Tema", "bullets": ["punkt ett"]}],
            "timeline_high_level": ["steg ett"],
            "risks": [{"risk": "risk", "mitigation": "atgard"}],
            "open_questions": ["fraga"],
            "next_steps": ["steg"],
            "confidence": "medium",
        })
    }

    #[test]
    fn output_gate_accepts_well_formed_schema_conformant_response() {
        use editorial_entity_store::FileType;
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "en kort text utan persondata", SanitizeLevel::Strict, Classification::Public, "sha-a")
            .unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        let policy = Policy::default_for(PolicyId::Internal);
        let raw = sample_response("En kort sammanfattning utan citat.");
        let (gated, outcome) = run_output_gate(&policy, &pack, &raw).unwrap();
        assert!(outcome.passed);
        assert!(gated.rendered_markdown.contains("Sammanfattning"));
    }

    #[test]
    fn output_gate_rejects_response_with_additional_properties() {
        use editorial_entity_store::FileType;
        let (_tmp, store) = harness();
        let project = store.create_project("P", Classification::Public, None, vec![]).unwrap();
        store
            .upload_document(project.id, "a.txt", FileType::Txt, None, "text", SanitizeLevel::Strict, Classification::Public, "sha-a")
            .unwrap();
        let pack = build_pack(&store, project.id, None).unwrap();
        let policy = Policy::default_for(PolicyId::Internal);
        let mut raw = sample_response("summary");
        raw.as_object_mut().unwrap().insert("unexpected_field".to_string(), serde_json::json!("oops"));
        let err = run_output_gate(&policy, &pack, &raw).unwrap_err();
        assert_eq!(err.reasons, vec!["schema_invalid".to_string()]);
    }

    #[test]
    fn reid_guard_trips_on_long_verbatim_overlap() {
        let input = "den hemliga kallan beratta att mote skulle aga rum pa tisdag klockan tio pa morgonen";
        let output_long_quote = "enligt rapporten den hemliga kallan beratta att mote skulle aga rum pa tisdag klockan tio";
        assert!(reid_guard_trips(input, output_long_quote, 8));
        let output_paraphrased = "kallan namnde ett mote tidigt i veckan utan att ange exakt tid";
        assert!(!reid_guard_trips(input, output_paraphrased, 8));
    }

    #[test]
    fn date_strictness_only_applies_when_policy_requests_it() {
        let text_with_date = "Motet agde rum 2025-06-01 enligt kallan.";
        assert!(date_token_re().is_match(text_with_date));
        let policy_internal = Policy::default_for(PolicyId::Internal);
        assert!(!policy_internal.date_strictness);
        let policy_external = Policy::default_for(PolicyId::External);
        assert!(policy_external.date_strictness);
    }
}
