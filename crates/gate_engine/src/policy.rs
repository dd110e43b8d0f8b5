use editorial_common::{sha256_str, PolicyId};

/// The tunable knobs a compile runs under. `policy_version`/`ruleset_hash`
/// are persisted onto the `KnoxReport` row so a later audit can tell
/// which ruleset produced a given report even after the defaults below
/// change.
#[derive(Debug, Clone)]
pub struct Policy {
    pub policy_id: PolicyId,
    pub policy_version: String,
    pub ruleset_hash: String,
    pub max_bytes: usize,
    pub quote_limit_words: usize,
    pub date_strictness: bool,
}

const DEFAULT_POLICY_VERSION: &str = "2026.1";
const DEFAULT_MAX_BYTES: usize = 2_000_000;
const DEFAULT_QUOTE_LIMIT_WORDS: usize = 8;

impl Policy {
    /// The policy shipped with this crate for `policy_id`: `internal`
    /// ⇒ `normal` minimum sanitize level, `external` ⇒ `strict`; quote
    /// limit 8 words; only `external` enables date strictness.
    pub fn default_for(policy_id: PolicyId) -> Self {
        let ruleset_hash = sha256_str(&format!("{policy_id}:{DEFAULT_POLICY_VERSION}"));
        Self {
            policy_id,
            policy_version: DEFAULT_POLICY_VERSION.to_string(),
            ruleset_hash,
            max_bytes: DEFAULT_MAX_BYTES,
            quote_limit_words: DEFAULT_QUOTE_LIMIT_WORDS,
            date_strictness: policy_id.date_strictness(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruleset_hash_is_stable_for_the_same_policy_id() {
        let a = Policy::default_for(PolicyId::Internal);
        let b = Policy::default_for(PolicyId::Internal);
        assert_eq!(a.ruleset_hash, b.ruleset_hash);
    }

    #[test]
    fn internal_and_external_get_distinct_ruleset_hashes() {
        let internal = Policy::default_for(PolicyId::Internal);
        let external = Policy::default_for(PolicyId::External);
        assert_ne!(internal.ruleset_hash, external.ruleset_hash);
    }
}
