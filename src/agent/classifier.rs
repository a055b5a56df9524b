// src/agent/classifier.rs
// Regex-based query classification
//
// Ordered, first match wins. The greeting patterns anchor to the whole
// string so "hi, what is an API key?" is not treated as a greeting, and
// the error patterns run before definition/howto so "what is error 405"
// lands on error without needing look-ahead exclusions.

use std::sync::LazyLock;

use regex::Regex;

/// Intent tag for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTag {
    Greeting,
    Error,
    Definition,
    Howto,
    Workflow,
    General,
}

impl QueryTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Error => "error",
            Self::Definition => "definition",
            Self::Howto => "howto",
            Self::Workflow => "workflow",
            Self::General => "general",
        }
    }

    /// Index-side entry type this tag filters on, if any.
    /// The classifier says "howto", the index stores "how_to".
    pub fn entry_type(&self) -> Option<&'static str> {
        match self {
            Self::Error => Some("error"),
            Self::Definition => Some("definition"),
            Self::Howto => Some("how_to"),
            Self::Workflow => Some("workflow"),
            Self::Greeting | Self::General => None,
        }
    }
}

static PATTERNS: LazyLock<Vec<(QueryTag, Vec<Regex>)>> = LazyLock::new(|| {
    let compile = |patterns: &[&str]| -> Vec<Regex> {
        patterns
            .iter()
            .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad classifier pattern {p}: {e}")))
            .collect()
    };

    vec![
        (
            QueryTag::Greeting,
            compile(&[
                r"^(hi|hello|hey|good morning|good afternoon|good evening)[\s.,!?]*$",
                r"^(hi|hello|hey)[\s.,!?]*(there|everyone|team)?[\s.,!?]*$",
            ]),
        ),
        (
            QueryTag::Error,
            compile(&[
                r"\berror\s*\d+\b",
                r"\berror\b",
                r"\bissue\b",
                r"\bproblem\b",
                r"\bfail(ed|ing|ure)?\b",
                r"\bnot work(ing)?\b",
                r"\bcan'?t\s+(see|find|view|access|open|load|sync|log\s*in)\b",
                r"\b(not\s+showing|not\s+visible|not\s+appearing|not\s+loading|not\s+syncing)\b",
                r"\b(missing|disappeared|gone|lost)\b",
                r"\bwhy\s+(is|are|can'?t|won'?t|doesn'?t|isn'?t|don'?t)\b",
                r"\bunable\s+to\b",
                r"\b(stuck|frozen|blank|empty)\b",
            ]),
        ),
        (
            QueryTag::Definition,
            compile(&[
                r"\bwhat (is|are|does|do)\b",
                r"\bdefine\b",
                r"\bmeaning of\b",
                r"\bmean\b",
                r"\btell me about\b",
                r"\bexplain\b",
            ]),
        ),
        (
            QueryTag::Howto,
            compile(&[
                r"\bhow (to|do|can)\b",
                r"\bsteps to\b",
                r"\bprocess for\b",
                r"\bguide\b",
            ]),
        ),
        (
            QueryTag::Workflow,
            compile(&[
                r"\bworkflow\b",
                r"\bprocess\b",
                r"\bautomation\b",
                r"\bsequence\b",
            ]),
        ),
    ]
});

/// Classify a query into (tag, confidence).
///
/// A pattern match is worth 0.8; unmatched queries fall back to
/// `general` at 0.5, which searches without an entry-type filter.
pub fn classify(query: &str) -> (QueryTag, f32) {
    let normalized = query.to_lowercase();
    let normalized = normalized.trim();

    for (tag, patterns) in PATTERNS.iter() {
        for pattern in patterns {
            if pattern.is_match(normalized) {
                return (*tag, 0.8);
            }
        }
    }

    (QueryTag::General, 0.5)
}
