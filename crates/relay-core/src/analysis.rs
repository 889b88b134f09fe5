//! Code Analysis Results
//!
//! Models rarely return bare JSON. Parsing tries the whole reply first,
//! then the first balanced `{...}` object found in it.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AgentError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    #[serde(alias = "low", alias = "LOW")]
    Low,
    #[serde(alias = "medium", alias = "MEDIUM", alias = "moderate", alias = "Moderate")]
    Medium,
    #[serde(alias = "high", alias = "HIGH")]
    High,
}

/// Structured review of a code snippet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeAnalysis {
    #[serde(default)]
    pub summary: String,

    pub complexity: Complexity,

    #[serde(default, alias = "qualityIssues", deserialize_with = "string_list")]
    pub quality_issues: Vec<String>,

    #[serde(default, alias = "securityIssues", deserialize_with = "string_list")]
    pub security_issues: Vec<String>,

    #[serde(default, deserialize_with = "string_list")]
    pub suggestions: Vec<String>,

    #[serde(default, deserialize_with = "string_list")]
    pub dependencies: Vec<String>,
}

/// Accepts `["a", "b"]` as well as `[{"description": "a"}, ...]`
fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(s) => s,
            serde_json::Value::Object(ref map) => ["description", "message", "issue", "name"]
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
                .map_or_else(|| item.to_string(), str::to_string),
            other => other.to_string(),
        })
        .collect())
}

/// Parse a model reply into a [`CodeAnalysis`]
pub fn parse_analysis(raw: &str) -> Result<CodeAnalysis> {
    if let Ok(analysis) = serde_json::from_str::<CodeAnalysis>(raw.trim()) {
        return Ok(analysis);
    }

    let candidate = extract_json_object(raw).ok_or_else(|| {
        AgentError::llm(None, "analysis response contained no JSON object")
    })?;

    serde_json::from_str(candidate).map_err(|e| {
        tracing::debug!(error = %e, "Rejected analysis payload");
        AgentError::llm(None, format!("malformed analysis response: {e}"))
    })
}

/// First balanced JSON object in `text`, ignoring braces inside strings
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRICT: &str = r#"{"summary": "Adds two numbers", "complexity": "Low", "qualityIssues": [], "securityIssues": [], "suggestions": ["Add tests"], "dependencies": []}"#;

    #[test]
    fn test_strict_json() {
        let analysis = parse_analysis(STRICT).unwrap();
        assert_eq!(analysis.complexity, Complexity::Low);
        assert_eq!(analysis.suggestions, vec!["Add tests".to_string()]);
    }

    #[test]
    fn test_json_wrapped_in_prose_and_fences() {
        let raw = format!("Here is my review:\n```json\n{STRICT}\n```\nLet me know if you need more.");
        let analysis = parse_analysis(&raw).unwrap();
        assert_eq!(analysis.summary, "Adds two numbers");
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = r#"Result: {"summary": "uses a } in a string {", "complexity": "high", "securityIssues": [{"description": "eval of input"}]} trailing }"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.summary, "uses a } in a string {");
        assert_eq!(analysis.complexity, Complexity::High);
        assert_eq!(analysis.security_issues, vec!["eval of input".to_string()]);
    }

    #[test]
    fn test_no_json_is_llm_error() {
        let err = parse_analysis("I cannot analyze this code.").unwrap_err();
        assert!(matches!(err, AgentError::LlmApi { .. }));
    }

    #[test]
    fn test_unbalanced_json_is_llm_error() {
        let err = parse_analysis(r#"{"summary": "cut off"#).unwrap_err();
        assert!(matches!(err, AgentError::LlmApi { .. }));
    }

    #[test]
    fn test_extract_first_object_only() {
        let text = r#"a {"x": {"y": 1}} b {"z": 2}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"x": {"y": 1}}"#));
    }
}
