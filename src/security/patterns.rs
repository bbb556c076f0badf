//! Pattern catalog for rule-based threat detection.
//!
//! Contains the built-in regex rules for the three detection domains:
//! - Instruction injection
//! - Credential/secret formats
//! - Dangerous URL shapes
//!
//! The catalog is plain data. Scanners iterate over whatever rules it holds,
//! so new rules (built-in or from configuration) never touch scanning code.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::{Matches, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{AisError, Result};

/// Threat severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, usually benign
    Low,
    /// Suspicious
    Medium,
    /// Likely malicious or sensitive
    High,
    /// Known attack or live credential
    Critical,
}

impl Severity {
    /// Lowercase wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(AisError::Config(format!("Unknown severity: {other}"))),
        }
    }
}

/// Detection domain a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleDomain {
    /// Instruction/prompt injection
    Injection,
    /// Credentials and secret material
    Secret,
    /// URLs pointing at risky hosts
    DangerousUrl,
}

impl RuleDomain {
    /// Injection and URL rules match regardless of case; secret formats are case-sensitive.
    fn case_insensitive(self) -> bool {
        !matches!(self, RuleDomain::Secret)
    }
}

impl fmt::Display for RuleDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleDomain::Injection => write!(f, "injection"),
            RuleDomain::Secret => write!(f, "secret"),
            RuleDomain::DangerousUrl => write!(f, "dangerous_url"),
        }
    }
}

/// A built-in rule definition
#[derive(Debug, Clone, Copy)]
pub struct RuleDef {
    /// Rule type (e.g. `prompt_injection`, `openai_key`)
    pub kind: &'static str,
    /// Regex pattern
    pub pattern: &'static str,
    /// Severity
    pub severity: Severity,
    /// Description
    pub description: &'static str,
}

/// Prompt injection rules
pub static INJECTION_RULES: &[RuleDef] = &[
    RuleDef {
        kind: "prompt_injection",
        pattern: r"ignore\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?)",
        severity: Severity::Critical,
        description: "Attempted to override system instructions",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"forget\s+(everything|all|your)\s+(you|instructions?)",
        severity: Severity::Critical,
        description: "Attempted memory wipe injection",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"you\s+are\s+now\s+(a|an)\s+",
        severity: Severity::High,
        description: "Attempted identity override",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"new\s+instructions?:",
        severity: Severity::High,
        description: "Attempted instruction injection",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"system\s*:\s*you\s+(must|should|will)",
        severity: Severity::Critical,
        description: "Fake system prompt injection",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"\[system\]",
        severity: Severity::High,
        description: "System tag injection attempt",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"disregard\s+(the\s+)?(above|previous)",
        severity: Severity::Critical,
        description: "Disregard instruction injection",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"pretend\s+(you('re|\s+are)|to\s+be)",
        severity: Severity::Medium,
        description: "Role-play manipulation attempt",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"act\s+as\s+(if|though)",
        severity: Severity::Medium,
        description: "Behavioral manipulation attempt",
    },
    RuleDef {
        kind: "prompt_injection",
        pattern: r"override\s+(safety|security|restrictions?)",
        severity: Severity::Critical,
        description: "Safety override attempt",
    },
];

/// Secret and credential rules
pub static SECRET_RULES: &[RuleDef] = &[
    RuleDef {
        kind: "stripe_secret_key",
        pattern: r"sk[_-]live[_-][a-zA-Z0-9]{24,}",
        severity: Severity::Critical,
        description: "Stripe live secret key",
    },
    RuleDef {
        kind: "stripe_test_key",
        pattern: r"sk[_-]test[_-][a-zA-Z0-9]{24,}",
        severity: Severity::High,
        description: "Stripe test secret key",
    },
    RuleDef {
        kind: "github_pat",
        pattern: r"ghp_[a-zA-Z0-9]{36,}",
        severity: Severity::Critical,
        description: "GitHub personal access token",
    },
    RuleDef {
        kind: "github_fine_grained",
        pattern: r"github_pat_[a-zA-Z0-9_]{22,}",
        severity: Severity::Critical,
        description: "GitHub fine-grained token",
    },
    RuleDef {
        kind: "openai_key",
        pattern: r"sk-(?:proj-|svcacct-)?[a-zA-Z0-9]{40,}",
        severity: Severity::Critical,
        description: "OpenAI API key",
    },
    RuleDef {
        kind: "slack_bot_token",
        pattern: r"xoxb-[0-9]+-[0-9]+-[a-zA-Z0-9]+",
        severity: Severity::Critical,
        description: "Slack bot token",
    },
    RuleDef {
        kind: "slack_user_token",
        pattern: r"xoxp-[0-9]+-[0-9]+-[0-9]+-[a-zA-Z0-9]+",
        severity: Severity::Critical,
        description: "Slack user token",
    },
    RuleDef {
        kind: "aws_access_key",
        pattern: r"AKIA[0-9A-Z]{16}",
        severity: Severity::Critical,
        description: "AWS access key id",
    },
    RuleDef {
        kind: "potential_aws_secret",
        pattern: r"[a-zA-Z0-9+/]{40,}",
        severity: Severity::Medium,
        description: "Possible AWS secret access key",
    },
    RuleDef {
        kind: "private_key",
        pattern: r"-----BEGIN\s+(RSA\s+)?PRIVATE\s+KEY-----",
        severity: Severity::Critical,
        description: "PEM private key header",
    },
    RuleDef {
        kind: "jwt_token",
        pattern: r"eyJ[a-zA-Z0-9_-]*\.eyJ[a-zA-Z0-9_-]*\.[a-zA-Z0-9_-]*",
        severity: Severity::High,
        description: "JSON Web Token",
    },
    RuleDef {
        kind: "pressbase_service_key",
        pattern: r"pb_sk_[a-zA-Z0-9_]+",
        severity: Severity::Critical,
        description: "PressBase service key",
    },
    RuleDef {
        kind: "bearer_token",
        pattern: r"Bearer\s+[a-zA-Z0-9._-]{20,}",
        severity: Severity::High,
        description: "Bearer token",
    },
];

/// Dangerous URL rules
pub static DANGEROUS_URL_RULES: &[RuleDef] = &[
    RuleDef {
        kind: "pastebin_url",
        pattern: r"https?://[^/]*pastebin\.com",
        severity: Severity::Medium,
        description: "Pastebin link",
    },
    RuleDef {
        kind: "raw_github_url",
        pattern: r"https?://[^/]*raw\.githubusercontent\.com",
        severity: Severity::Low,
        description: "Raw GitHub content link",
    },
    RuleDef {
        kind: "ngrok_tunnel",
        pattern: r"https?://[^/]*ngrok\.(io|app)",
        severity: Severity::High,
        description: "ngrok tunnel",
    },
    RuleDef {
        kind: "localhost_url",
        pattern: r"https?://[^/]*localhost",
        severity: Severity::Medium,
        description: "Localhost URL",
    },
    RuleDef {
        kind: "ip_address_url",
        pattern: r"https?://\d+\.\d+\.\d+\.\d+",
        severity: Severity::Medium,
        description: "Raw IP address URL",
    },
];

/// A rule supplied through configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Rule type
    pub kind: String,
    /// Regex pattern
    pub pattern: String,
    /// Severity
    pub severity: Severity,
    /// Description
    #[serde(default)]
    pub description: String,
}

/// A compiled rule
#[derive(Debug, Clone)]
pub struct Rule {
    kind: String,
    severity: Severity,
    description: String,
    regex: Regex,
}

impl Rule {
    /// Compile a rule for the given domain
    pub fn compile(
        domain: RuleDomain,
        kind: &str,
        pattern: &str,
        severity: Severity,
        description: &str,
    ) -> Result<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(domain.case_insensitive())
            .build()
            .map_err(|e| AisError::InvalidPattern {
                name: kind.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            kind: kind.to_string(),
            severity,
            description: description.to_string(),
            regex,
        })
    }

    fn from_def(domain: RuleDomain, def: &RuleDef) -> Result<Self> {
        Self::compile(domain, def.kind, def.pattern, def.severity, def.description)
    }

    fn from_spec(domain: RuleDomain, spec: &RuleSpec) -> Result<Self> {
        Self::compile(
            domain,
            &spec.kind,
            &spec.pattern,
            spec.severity,
            &spec.description,
        )
    }

    /// Rule type
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Severity
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Source pattern
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Leftmost match in `text`
    pub fn find<'t>(&self, text: &'t str) -> Option<regex::Match<'t>> {
        self.regex.find(text)
    }

    /// All non-overlapping matches in `text`
    pub fn find_iter<'r, 't>(&'r self, text: &'t str) -> Matches<'r, 't> {
        self.regex.find_iter(text)
    }
}

/// Ordered rule lists for all three domains.
///
/// Rule order is evaluation order. A catalog is built once at startup and
/// shared read-only (behind an `Arc`) by the scanner and the redactor.
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    injection: Vec<Rule>,
    secret: Vec<Rule>,
    dangerous_url: Vec<Rule>,
}

lazy_static! {
    /// Compiled built-in catalog
    static ref BUILTIN: PatternCatalog = PatternCatalog {
        injection: compile_defs(RuleDomain::Injection, INJECTION_RULES),
        secret: compile_defs(RuleDomain::Secret, SECRET_RULES),
        dangerous_url: compile_defs(RuleDomain::DangerousUrl, DANGEROUS_URL_RULES),
    };
}

fn compile_defs(domain: RuleDomain, defs: &[RuleDef]) -> Vec<Rule> {
    defs.iter()
        .filter_map(|d| Rule::from_def(domain, d).ok())
        .collect()
}

impl PatternCatalog {
    /// Catalog with the built-in rules
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Catalog without any rules
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a compiled rule to a domain
    pub fn push(&mut self, domain: RuleDomain, rule: Rule) {
        self.rules_mut(domain).push(rule);
    }

    /// Compile and append configured rules to a domain.
    ///
    /// Fails on the first pattern that does not compile; nothing is appended
    /// in that case.
    pub fn extend(&mut self, domain: RuleDomain, specs: &[RuleSpec]) -> Result<()> {
        let compiled = specs
            .iter()
            .map(|s| Rule::from_spec(domain, s))
            .collect::<Result<Vec<_>>>()?;
        self.rules_mut(domain).extend(compiled);
        Ok(())
    }

    /// Builder form of [`PatternCatalog::extend`]
    pub fn with_rules(mut self, domain: RuleDomain, specs: &[RuleSpec]) -> Result<Self> {
        self.extend(domain, specs)?;
        Ok(self)
    }

    /// Rules for a domain, in evaluation order
    pub fn rules(&self, domain: RuleDomain) -> &[Rule] {
        match domain {
            RuleDomain::Injection => &self.injection,
            RuleDomain::Secret => &self.secret,
            RuleDomain::DangerousUrl => &self.dangerous_url,
        }
    }

    fn rules_mut(&mut self, domain: RuleDomain) -> &mut Vec<Rule> {
        match domain {
            RuleDomain::Injection => &mut self.injection,
            RuleDomain::Secret => &mut self.secret,
            RuleDomain::DangerousUrl => &mut self.dangerous_url,
        }
    }

    /// Total number of rules
    pub fn len(&self) -> usize {
        self.injection.len() + self.secret.len() + self.dangerous_url.len()
    }

    /// True when no domain holds a rule
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
