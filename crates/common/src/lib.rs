//! editorial_common
//!
//! Canonical JSON serialization + SHA-256 hashing utilities, plus the
//! shared identifier and enum types every other crate in this workspace
//! builds on.
//!
//! IMPORTANT: Do not "pretty print" anywhere a hash is computed. Hashes
//! and fingerprints are computed over canonical bytes only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize to canonical JSON bytes:
/// - stable key ordering (enforced by a `Value` roundtrip)
/// - no whitespace
/// - UTF-8, non-ASCII left unescaped
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Return "sha256:<hex>" of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_bytes(&bytes))
}

/// Return "sha256:<hex>" of raw bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(digest))
}

/// Return "sha256:<hex>" of a UTF-8 string's bytes.
pub fn sha256_str(text: &str) -> String {
    sha256_bytes(text.as_bytes())
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}

/// Current UTC instant. The only place in the workspace that is allowed
/// to call this directly is a service boundary (ingest, edit, compile);
/// pure functions like `mask` never read the clock.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(ProjectId);
uuid_id!(DocumentId);
uuid_id!(NoteId);
uuid_id!(JournalistNoteId);
uuid_id!(SourceId);
uuid_id!(EventId);
uuid_id!(JobId);
uuid_id!(ReportId);

/// Progressive sanitization level. Ord derives the lattice used
/// throughout the workspace: `Normal < Strict < Paranoid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeLevel {
    Normal,
    Strict,
    Paranoid,
}

impl SanitizeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SanitizeLevel::Normal => "normal",
            SanitizeLevel::Strict => "strict",
            SanitizeLevel::Paranoid => "paranoid",
        }
    }
}

impl std::fmt::Display for SanitizeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Sensitive,
    SourceSensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Research,
    Processing,
    FactCheck,
    Ready,
    Archived,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        ProjectStatus::Research
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRestrictions {
    pub ai_allowed: bool,
    pub export_allowed: bool,
}

impl UsageRestrictions {
    pub fn for_level(level: SanitizeLevel) -> Self {
        match level {
            SanitizeLevel::Paranoid => Self { ai_allowed: false, export_allowed: false },
            SanitizeLevel::Normal | SanitizeLevel::Strict => {
                Self { ai_allowed: true, export_allowed: true }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyId {
    Internal,
    External,
}

impl PolicyId {
    pub fn sanitize_min_level(self) -> SanitizeLevel {
        match self {
            PolicyId::Internal => SanitizeLevel::Normal,
            PolicyId::External => SanitizeLevel::Strict,
        }
    }

    pub fn date_strictness(self) -> bool {
        matches!(self, PolicyId::External)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyId::Internal => "internal",
            PolicyId::External => "external",
        }
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Obj {
        b: u32,
        a: u32,
    }

    #[test]
    fn canonical_hash_is_stable_under_key_reordering() {
        let x = Obj { b: 2, a: 1 };
        let y = Obj { a: 1, b: 2 };
        let hx = sha256_canonical_json(&x).unwrap();
        let hy = sha256_canonical_json(&y).unwrap();
        assert_eq!(hx, hy);
    }

    #[test]
    fn sanitize_level_lattice_is_monotone() {
        assert!(SanitizeLevel::Normal < SanitizeLevel::Strict);
        assert!(SanitizeLevel::Strict < SanitizeLevel::Paranoid);
    }

    #[test]
    fn paranoid_forces_restrictions_off() {
        let r = UsageRestrictions::for_level(SanitizeLevel::Paranoid);
        assert!(!r.ai_allowed && !r.export_allowed);
        let r = UsageRestrictions::for_level(SanitizeLevel::Strict);
        assert!(r.ai_allowed && r.export_allowed);
    }

    #[test]
    fn policy_min_levels_match_spec() {
        assert_eq!(PolicyId::Internal.sanitize_min_level(), SanitizeLevel::Normal);
        assert_eq!(PolicyId::External.sanitize_min_level(), SanitizeLevel::Strict);
    }
}
