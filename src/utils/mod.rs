// src/utils/mod.rs
// Small shared helpers

pub mod json;

use crate::error::{AgentError, Result};
use std::future::Future;
use std::time::Duration;

/// Await a future with a stage-level deadline, mapping elapse to a typed
/// timeout error.
pub async fn with_deadline<T, F>(stage: &'static str, deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout {
            stage,
            secs: deadline.as_secs(),
        }),
    }
}

/// Substitute `{name}` placeholders in a prompt template.
///
/// Unknown placeholders are left in place so template typos stay visible
/// in logs rather than silently disappearing.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

/// Truncate a string on a char boundary, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_elapses() {
        let result: Result<()> = with_deadline("embedding", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match result {
            Err(AgentError::Timeout { stage, secs: _ }) => assert_eq!(stage, "embedding"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let result = with_deadline("cache", Duration::from_secs(1), async { Ok(42) }).await;
        assert_eq!(result.ok(), Some(42));
    }

    #[test]
    fn test_render_template() {
        let out = render_template("q={query} c={context}", &[("query", "hi"), ("context", "none")]);
        assert_eq!(out, "q=hi c=none");
    }

    #[test]
    fn test_render_template_leaves_unknown() {
        let out = render_template("{query} {missing}", &[("query", "hi")]);
        assert_eq!(out, "hi {missing}");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
    }
}
