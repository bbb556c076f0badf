//! Secret detection and redaction.
//!
//! Every secret rule contributes all of its non-overlapping matches. Matches
//! from different rules may overlap (a bearer token wrapping a JWT, a bare
//! run inside an OpenAI key); overlapping matches are merged into one span
//! and the whole span is replaced, labelled with the longest member
//! (longest-match-wins, ties go to the earlier rule). No character of any
//! matched secret survives in the redacted text.

use std::sync::Arc;

use serde::Serialize;

use super::patterns::{PatternCatalog, Rule, RuleDomain};
use super::scanner::DetectedThreat;

/// Threat type reported for every secret finding
pub const SECRET_LEAK: &str = "secret_leak";

/// Maximum number of secret characters kept in a finding preview
pub const PREVIEW_CHARS: usize = 10;

/// Result of a redaction pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactionResult {
    /// Content with every detected secret replaced by `[REDACTED:<type>]`
    pub redacted: String,
    /// One finding per redacted span
    pub findings: Vec<DetectedThreat>,
}

impl RedactionResult {
    /// True when nothing was redacted
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Number of redactions performed
    pub fn count(&self) -> usize {
        self.findings.len()
    }
}

/// Placeholder written in place of a secret
pub fn placeholder(kind: &str) -> String {
    format!("[REDACTED:{kind}]")
}

/// Short, non-revealing preview of a secret.
///
/// Keeps at most [`PREVIEW_CHARS`] characters and never more than half of
/// the secret, so short keys are not exposed whole.
pub fn preview(secret: &str) -> String {
    let keep = PREVIEW_CHARS.min(secret.chars().count() / 2);
    let head: String = secret.chars().take(keep).collect();
    format!("{head}...[REDACTED]")
}

struct Candidate<'r> {
    start: usize,
    end: usize,
    rule: &'r Rule,
    order: usize,
}

impl Candidate<'_> {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

struct Span<'r> {
    start: usize,
    end: usize,
    winner: Candidate<'r>,
}

/// Applies the secret catalog to text
#[derive(Debug, Clone)]
pub struct SecretRedactor {
    catalog: Arc<PatternCatalog>,
}

impl Default for SecretRedactor {
    fn default() -> Self {
        Self::new(Arc::new(PatternCatalog::builtin()))
    }
}

impl SecretRedactor {
    /// Create a redactor over a shared catalog
    pub fn new(catalog: Arc<PatternCatalog>) -> Self {
        Self { catalog }
    }

    /// Find and redact secrets in `content`.
    ///
    /// The output is a literal substitution over the input text. It is not
    /// guaranteed to remain valid JSON if a secret straddled a delimiter.
    pub fn redact(&self, content: &str) -> RedactionResult {
        let mut candidates = Vec::new();
        for (order, rule) in self.catalog.rules(RuleDomain::Secret).iter().enumerate() {
            for m in rule.find_iter(content) {
                if m.start() < m.end() {
                    candidates.push(Candidate {
                        start: m.start(),
                        end: m.end(),
                        rule,
                        order,
                    });
                }
            }
        }

        if candidates.is_empty() {
            return RedactionResult {
                redacted: content.to_string(),
                findings: vec![],
            };
        }

        candidates.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.end.cmp(&a.end))
                .then(a.order.cmp(&b.order))
        });

        let mut spans: Vec<Span<'_>> = Vec::new();
        for candidate in candidates {
            match spans.last_mut() {
                Some(span) if candidate.start < span.end => {
                    span.end = span.end.max(candidate.end);
                    let longer = candidate.len() > span.winner.len();
                    let tie_earlier_rule = candidate.len() == span.winner.len()
                        && candidate.order < span.winner.order;
                    if longer || tie_earlier_rule {
                        span.winner = candidate;
                    }
                },
                _ => spans.push(Span {
                    start: candidate.start,
                    end: candidate.end,
                    winner: candidate,
                }),
            }
        }

        let mut redacted = String::with_capacity(content.len());
        let mut findings = Vec::with_capacity(spans.len());
        let mut cursor = 0;

        for span in &spans {
            let rule = span.winner.rule;
            redacted.push_str(&content[cursor..span.start]);
            redacted.push_str(&placeholder(rule.kind()));
            cursor = span.end;

            let secret = &content[span.winner.start..span.winner.end];
            let finding = DetectedThreat {
                threat_type: SECRET_LEAK.to_string(),
                severity: rule.severity(),
                description: format!("Detected {}", rule.kind()),
                pattern: preview(secret),
                position: Some(span.start),
            };
            tracing::debug!(
                kind = rule.kind(),
                preview = %finding.pattern,
                "secret redacted"
            );
            findings.push(finding);
        }
        redacted.push_str(&content[cursor..]);

        RedactionResult { redacted, findings }
    }
}
