// src/utils/json.rs
// Tolerant JSON extraction from LLM output

use serde::de::DeserializeOwned;

use crate::error::{AgentError, Result};

/// Parse a JSON object out of raw LLM output.
///
/// Models wrap structured answers in prose and markdown fences often
/// enough that a direct parse is not reliable. Strategy, in order:
/// direct parse of the trimmed content; strip ```json / ``` fences and
/// retry; slice from the first `{` to the last `}` and retry.
pub fn parse_llm_json<T: DeserializeOwned>(content: &str) -> Result<T> {
    let trimmed = content.trim();

    if let Ok(v) = serde_json::from_str::<T>(trimmed) {
        return Ok(v);
    }

    let unfenced = strip_code_fences(trimmed);
    if unfenced != trimmed
        && let Ok(v) = serde_json::from_str::<T>(unfenced)
    {
        return Ok(v);
    }

    if let Some(body) = brace_slice(unfenced)
        && let Ok(v) = serde_json::from_str::<T>(body)
    {
        return Ok(v);
    }

    Err(AgentError::MalformedLlmOutput(format!(
        "no parseable JSON object in output starting: {:?}",
        &trimmed.chars().take(120).collect::<String>()
    )))
}

/// Strip a surrounding markdown code fence, if present.
fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    for prefix in ["```json", "```"] {
        if let Some(rest) = trimmed.strip_prefix(prefix)
            && let Some(body) = rest.strip_suffix("```")
        {
            return body.trim();
        }
    }
    trimmed
}

/// Slice from the first `{` to the last `}` inclusive.
fn brace_slice(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        routing: String,
    }

    #[test]
    fn test_parse_bare_json() {
        let p: Probe = parse_llm_json(r#"{"routing": "full_rag"}"#).unwrap();
        assert_eq!(p.routing, "full_rag");
    }

    #[test]
    fn test_parse_fenced_json() {
        let p: Probe = parse_llm_json("```json\n{\"routing\": \"full_rag\"}\n```").unwrap();
        assert_eq!(p.routing, "full_rag");
    }

    #[test]
    fn test_parse_plain_fenced_json() {
        let p: Probe = parse_llm_json("```\n{\"routing\": \"full_rag\"}\n```").unwrap();
        assert_eq!(p.routing, "full_rag");
    }

    #[test]
    fn test_parse_json_wrapped_in_prose() {
        let input = "Sure, here is the analysis:\n{\"routing\": \"search_kb_targeted\"}\nLet me know!";
        let p: Probe = parse_llm_json(input).unwrap();
        assert_eq!(p.routing, "search_kb_targeted");
    }

    #[test]
    fn test_prose_and_fences_parse_same_as_bare() {
        let bare: Probe = parse_llm_json(r#"{"routing": "answer_from_context"}"#).unwrap();
        let wrapped: Probe =
            parse_llm_json("Result below.\n```json\n{\"routing\": \"answer_from_context\"}\n```")
                .unwrap();
        assert_eq!(bare.routing, wrapped.routing);
    }

    #[test]
    fn test_parse_failure_is_typed() {
        let err = parse_llm_json::<Probe>("no json at all").unwrap_err();
        assert_eq!(err.kind(), "malformed_llm_output");
    }

    #[test]
    fn test_brace_slice_spans_first_to_last() {
        assert_eq!(brace_slice("a {1} b {2} c"), Some("{1} b {2}"));
        assert_eq!(brace_slice("none"), None);
    }
}
