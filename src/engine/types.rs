use serde::{Deserialize, Serialize};

/// Structured output for one chunk, keyed by bucket / metadata name.
pub type PartialResult = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractOut {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOut {
    pub page_count: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeIn<'a> {
    pub source_name: &'a str,
    pub result: &'a crate::merge::UnifiedResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeOut {
    pub ok: bool,
    #[serde(default)]
    pub normalized: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}
