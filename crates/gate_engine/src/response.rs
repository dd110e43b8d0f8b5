use serde::{Deserialize, Serialize};

/// The closed shape a Fort Knox remote response must match.
/// Deserializing into this type after schema validation gives
/// the renderer typed access without a second parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FortKnoxResponse {
    pub template_id: String,
    pub language: String,
    pub title: String,
    pub executive_summary: String,
    pub themes: Vec<Theme>,
    pub timeline_high_level: Vec<String>,
    pub risks: Vec<Risk>,
    pub open_questions: Vec<String>,
    pub next_steps: Vec<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub risk: String,
    pub mitigation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}
