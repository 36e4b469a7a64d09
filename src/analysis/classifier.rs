use async_trait::async_trait;
use serde_json::{json, Value};

use crate::analysis::Classifier;
use crate::error::Result;
use crate::workflow::state::{Classification, JsonMap};

const HIGH_SIGNAL: &[&str] = &[
    "crash",
    "exception",
    "error",
    "null pointer",
    "segfault",
    "memory leak",
    "deadlock",
    "hang",
    "freeze",
    "corrupt",
    "fail",
    "broken",
    "not working",
];

const MEDIUM_SIGNAL: &[&str] = &[
    "bug",
    "issue",
    "problem",
    "defect",
    "wrong",
    "incorrect",
    "unexpected",
    "missing",
    "invalid",
    "timeout",
    "slow",
    "performance",
];

const BUG_ISSUE_TYPES: &[&str] = &["bug", "defect", "error", "issue"];

const COMPONENTS: &[(&str, &[&str])] = &[
    (
        "frontend",
        &["ui", "frontend", "react", "vue", "angular", "javascript", "css", "html"],
    ),
    (
        "backend",
        &["api", "backend", "server", "database", "sql", "rest", "endpoint"],
    ),
    ("mobile", &["android", "ios", "mobile", "kotlin", "swift"]),
    (
        "infrastructure",
        &["docker", "kubernetes", "aws", "deployment", "ci/cd", "pipeline"],
    ),
];

const SEVERITY_PHRASES: &[(&str, &[&str])] = &[
    (
        "critical",
        &[
            "production down",
            "system crash",
            "data loss",
            "security breach",
            "cannot login",
            "payment fail",
            "critical error",
        ],
    ),
    (
        "high",
        &[
            "major feature broken",
            "api not responding",
            "database error",
            "user cannot",
            "application crash",
        ],
    ),
    (
        "medium",
        &[
            "incorrect behavior",
            "performance issue",
            "ui bug",
            "validation error",
            "timeout",
        ],
    ),
    ("low", &["minor ui", "cosmetic", "typo", "suggestion", "enhancement"]),
];

const TECHNICAL_TERMS: &[&str] = &[
    "null pointer",
    "exception",
    "timeout",
    "connection",
    "database",
    "api",
    "authentication",
    "authorization",
    "validation",
    "parsing",
    "serialization",
    "configuration",
    "deployment",
    "performance",
    "memory",
    "cpu",
    "network",
    "ssl",
    "certificate",
    "cors",
];

/// Keyword heuristics over summary, description, issue type and priority.
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_sync(&self, ticket: &JsonMap) -> Classification {
        let summary = text_field(ticket, "summary");
        let description = text_field(ticket, "description");
        let issue_type = text_field(ticket, "issue_type");
        let priority = text_field(ticket, "priority");
        let text = format!("{summary} {description}");

        let is_bug = is_bug(&issue_type, &text);
        let severity = severity(&text, &priority);
        let component = component(&text);
        let keywords: Vec<&str> = TECHNICAL_TERMS
            .iter()
            .copied()
            .filter(|term| text.contains(term))
            .collect();

        let mut confidence: f64 = if issue_type.contains("bug") || issue_type.contains("defect") {
            0.4
        } else if is_bug {
            0.2
        } else {
            0.0
        };
        confidence += match (priority.as_str(), severity) {
            ("highest", "critical") | ("high", "high") => 0.3,
            ("medium", "medium") | ("low", "low") => 0.2,
            _ => 0.1,
        };
        confidence += match keywords.len() {
            0 => 0.0,
            1 | 2 => 0.1,
            _ => 0.2,
        };
        if component != "unknown" {
            confidence += 0.1;
        }

        Classification::from(json!({
            "is_bug": is_bug,
            "severity": severity,
            "component": component,
            "keywords": keywords,
            "confidence": round2(confidence.min(1.0)),
        }))
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, ticket: &JsonMap, tenant_id: &str) -> Result<Classification> {
        let classification = self.classify_sync(ticket);
        tracing::debug!(
            tenant_id,
            ticket_key = ?ticket.get("key"),
            is_bug = classification.is_bug(),
            confidence = classification.confidence(),
            "Keyword classification"
        );
        Ok(classification)
    }
}

fn text_field(ticket: &JsonMap, key: &str) -> String {
    ticket
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase()
}

fn count_matches(text: &str, terms: &[&str]) -> usize {
    terms.iter().filter(|term| text.contains(*term)).count()
}

fn is_bug(issue_type: &str, text: &str) -> bool {
    if BUG_ISSUE_TYPES.iter().any(|t| issue_type.contains(t)) {
        return true;
    }
    count_matches(text, HIGH_SIGNAL) * 3 + count_matches(text, MEDIUM_SIGNAL) >= 2
}

fn severity(text: &str, priority: &str) -> &'static str {
    for (severity, phrases) in SEVERITY_PHRASES {
        if phrases.iter().any(|p| text.contains(p)) {
            return *severity;
        }
    }

    match priority {
        "highest" => "critical",
        "high" => "high",
        "medium" => "medium",
        "low" | "lowest" => "low",
        _ => match count_matches(text, HIGH_SIGNAL) {
            0 => "low",
            1 => "medium",
            _ => "high",
        },
    }
}

fn component(text: &str) -> &'static str {
    // Keywords are matched on word boundaries so "ui" does not hit "build".
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric() && c != '/')
        .filter(|w| !w.is_empty())
        .collect();

    COMPONENTS
        .iter()
        .map(|(name, keywords)| {
            let score = keywords.iter().filter(|k| words.contains(k)).count();
            (*name, score)
        })
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .map(|(name, _)| name)
        .unwrap_or("unknown")
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_bug_issue_type() {
        let c = KeywordClassifier::new().classify_sync(&ticket(json!({
            "summary": "Checkout API returns 500",
            "description": "The endpoint throws an exception on empty carts",
            "issue_type": "Bug",
            "priority": "High",
        })));

        assert!(c.is_bug());
        assert_eq!(c.get("component"), Some(&json!("backend")));
        assert!(c.confidence() > 0.5);
    }

    #[test]
    fn test_inferred_bug_from_keywords() {
        let c = KeywordClassifier::new().classify_sync(&ticket(json!({
            "summary": "App crash when uploading",
            "issue_type": "Task",
        })));
        assert!(c.is_bug());
        assert_eq!(c.get("severity"), Some(&json!("medium")));
    }

    #[test]
    fn test_feature_request_not_bug() {
        let c = KeywordClassifier::new().classify_sync(&ticket(json!({
            "summary": "Add dark mode",
            "description": "Users would like a darker theme",
            "issue_type": "Story",
            "priority": "Low",
        })));
        assert!(!c.is_bug());
        assert!(c.confidence() <= 0.5);
    }

    #[test]
    fn test_severity_phrase_beats_priority() {
        assert_eq!(severity("production down since 9am", "low"), "critical");
        assert_eq!(severity("nothing notable", "highest"), "critical");
        assert_eq!(severity("nothing notable", ""), "low");
    }

    #[test]
    fn test_component_word_boundaries() {
        assert_eq!(component("the build is slow"), "unknown");
        assert_eq!(component("the ui button and css are off"), "frontend");
    }

    #[test]
    fn test_confidence_is_capped() {
        let c = KeywordClassifier::new().classify_sync(&ticket(json!({
            "summary": "Production down: API exception on database connection",
            "description": "Null pointer during authentication, then a timeout",
            "issue_type": "Bug",
            "priority": "Highest",
        })));
        assert!(c.is_bug());
        assert_eq!(c.get("severity"), Some(&json!("critical")));
        assert_eq!(c.confidence(), 1.0);
    }
}
