//! Turn raw model output into something storable.
//!
//! Models frequently wrap JSON in a markdown fence even when asked not to.
//! The fence is stripped before parsing, but when parsing still fails the
//! original text (fence included) is what gets kept.

use serde_json::Value;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Outcome of normalizing one model response.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResponse {
    Json(Value),
    /// Output that is not valid JSON, untouched, with the parse error.
    Raw { text: String, error: String },
}

impl NormalizedResponse {
    pub fn parsed(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw { .. } => None,
        }
    }

    pub fn raw_fallback(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Raw { text, .. } => Some(text),
        }
    }

    /// Bytes to persist: pretty JSON with two-space indentation, or the raw
    /// text verbatim.
    pub fn to_artifact(&self) -> serde_json::Result<String> {
        match self {
            Self::Json(value) => serde_json::to_string_pretty(value),
            Self::Raw { text, .. } => Ok(text.clone()),
        }
    }
}

pub fn normalize(raw: &str) -> NormalizedResponse {
    match serde_json::from_str::<Value>(strip_code_fence(raw)) {
        Ok(value) => NormalizedResponse::Json(value),
        Err(err) => NormalizedResponse::Raw {
            text: raw.to_string(),
            error: err.to_string(),
        },
    }
}

/// Trim, drop an opening fence (optionally tagged `json`) and a closing
/// fence, then trim again.
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix(JSON_FENCE) {
        body = rest;
    } else if let Some(rest) = body.strip_prefix(FENCE) {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix(FENCE) {
        body = rest;
    }
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_inside_tagged_fence() {
        let normalized = normalize("```json\n{\"a\":1}\n```");
        assert_eq!(normalized.parsed(), Some(&json!({"a": 1})));
        assert_eq!(normalized.raw_fallback(), None);
    }

    #[test]
    fn parses_untagged_fence_and_surrounding_whitespace() {
        let normalized = normalize("  \n```\n[1, 2, 3]\n```\n\n");
        assert_eq!(normalized.parsed(), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn parses_bare_json() {
        assert_eq!(
            normalize("{\"study\": \"RCT\"}").parsed(),
            Some(&json!({"study": "RCT"}))
        );
    }

    #[test]
    fn invalid_json_keeps_original_text() {
        let normalized = normalize("not json");
        assert_eq!(normalized.parsed(), None);
        assert_eq!(normalized.raw_fallback(), Some("not json"));
        match normalized {
            NormalizedResponse::Raw { error, .. } => assert!(!error.is_empty()),
            other => panic!("expected raw fallback, got {other:?}"),
        }
    }

    #[test]
    fn fallback_is_unstripped_original() {
        let raw = "```json\n{\"a\": 1,}\n```";
        let normalized = normalize(raw);
        assert_eq!(normalized.raw_fallback(), Some(raw));
        assert_eq!(normalized.to_artifact().unwrap(), raw);
    }

    #[test]
    fn only_a_closing_fence_is_removed() {
        assert_eq!(strip_code_fence("{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json"), "");
    }

    #[test]
    fn artifact_is_two_space_indented_and_keeps_unicode() {
        let normalized = normalize("{\"zeta\": \"Müller\", \"alpha\": [1]}");
        let artifact = normalized.to_artifact().unwrap();
        assert_eq!(
            artifact,
            "{\n  \"zeta\": \"Müller\",\n  \"alpha\": [\n    1\n  ]\n}"
        );

        let reread: Value = serde_json::from_str(&artifact).unwrap();
        assert_eq!(Some(&reread), normalized.parsed());
    }
}
