//! JSON extraction from model output.
//!
//! Even in JSON mode some models wrap the object in a markdown fence or add a
//! sentence around it. Strategies, in order:
//! 1. the whole (trimmed) content
//! 2. the body of a ```` ```json ```` or bare ```` ``` ```` fence
//! 3. the first balanced `{ ... }` found by brace matching
//!
//! Content that opens an object but never closes it is reported as truncated.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },
    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

/// Extracts the first JSON object from `content`.
///
/// The returned string is guaranteed to parse as a JSON object.
pub fn extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    if is_json_object(trimmed) {
        return Ok(trimmed.to_string());
    }

    if let Some(body) = extract_from_code_block(trimmed) {
        if is_json_object(body) {
            return Ok(body.to_string());
        }
    }

    if let Some(start) = trimmed.find('{') {
        let candidate = &trimmed[start..];
        if let Some(end) = find_matching_brace(candidate) {
            let object = &candidate[..=end];
            if is_json_object(object) {
                return Ok(object.to_string());
            }
        }

        let unclosed = count_unclosed_braces(candidate);
        if unclosed > 0 {
            return Err(JsonExtractionError::Truncated {
                partial_preview: preview(candidate, 100),
                unclosed_braces: unclosed,
            });
        }
    }

    Err(JsonExtractionError::NotFound {
        content_preview: preview(trimmed, 50),
    })
}

fn is_json_object(s: &str) -> bool {
    s.starts_with('{')
        && serde_json::from_str::<serde_json::Value>(s).is_ok_and(|value| value.is_object())
}

/// Body of the first markdown code fence, with or without a `json` tag.
pub fn extract_from_code_block(content: &str) -> Option<&str> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok())
        .as_ref()?;
    fence
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim())
}

/// Helper function to find the matching closing brace for a JSON object.
///
/// `s` must start at the opening brace. String literals and escape sequences
/// are skipped. Returns the byte index of the closing brace.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn count_unclosed_braces(s: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object() {
        let json = extract_json_object(r#"  {"email": "a@b.com"} "#).unwrap();
        assert_eq!(json, r#"{"email": "a@b.com"}"#);
    }

    #[test]
    fn test_fenced_object() {
        let content = "Here you go:\n```json\n{\"phone\": \"555\"}\n```\nDone.";
        assert_eq!(extract_json_object(content).unwrap(), r#"{"phone": "555"}"#);

        let content = "```\n{\"phone\": \"555\"}\n```";
        assert_eq!(extract_json_object(content).unwrap(), r#"{"phone": "555"}"#);
    }

    #[test]
    fn test_object_inside_text() {
        let content = r#"The agent data is {"city": "Fargo", "notes": "uses {braces}"} as requested."#;
        assert_eq!(
            extract_json_object(content).unwrap(),
            r#"{"city": "Fargo", "notes": "uses {braces}"}"#
        );
    }

    #[test]
    fn test_truncated_object() {
        let err = extract_json_object(r#"{"email": "a@b.com", "other": {"x": 1"#).unwrap_err();
        match err {
            JsonExtractionError::Truncated {
                unclosed_braces, ..
            } => assert_eq!(unclosed_braces, 2),
            other => panic!("expected Truncated, got {:?}", other),
        }
    }

    #[test]
    fn test_not_found() {
        let err = extract_json_object("I could not find anything.").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
        assert!(extract_json_object("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_find_matching_brace_with_escapes() {
        let s = r#"{"a": "quote \" and } brace"} trailing"#;
        let end = find_matching_brace(s).unwrap();
        assert_eq!(&s[..=end], r#"{"a": "quote \" and } brace"}"#);
    }
}
