//! Policy resolver for severity promotion and action decisions
//!
//! Both decisions are pure table lookups: identical inputs always produce
//! identical outputs, so any decision can be re-derived during an audit.

use super::patterns::Severity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Action taken for a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Refuse to transmit the text
    Block,
    /// Transmit only after redacting the matched spans
    Redact,
    /// Transmit, but surface the finding
    Warn,
}

impl Action {
    /// Whether matched spans must be rewritten by the redactor
    pub fn requires_redaction(self) -> bool {
        matches!(self, Action::Block | Action::Redact)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Block => write!(f, "BLOCK"),
            Self::Redact => write!(f, "REDACT"),
            Self::Warn => write!(f, "WARN"),
        }
    }
}

/// Per-context policy table as loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPolicyConfig {
    /// Pattern types promoted to CRITICAL in this context
    #[serde(default)]
    pub critical: Vec<String>,
    /// Pattern types promoted to HIGH in this context
    #[serde(default)]
    pub high: Vec<String>,
    /// Pattern types always blocked in this context
    #[serde(default)]
    pub always_block: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct ContextPolicy {
    critical: HashSet<String>,
    high: HashSet<String>,
}

/// Resolves effective severity and action for pattern findings
#[derive(Debug, Clone)]
pub struct PolicyResolver {
    contexts: HashMap<String, ContextPolicy>,
    always_block: HashSet<(String, String)>,
}

impl PolicyResolver {
    /// Resolver with the built-in healthcare, finance and legal tables
    pub fn new() -> Self {
        Self::with_contexts(&BTreeMap::new())
    }

    /// Built-in tables merged with configured contexts.
    ///
    /// A configured context extends the built-in context of the same name;
    /// entries are unioned, never removed.
    pub fn with_contexts(extra: &BTreeMap<String, ContextPolicyConfig>) -> Self {
        let mut resolver = Self {
            contexts: HashMap::new(),
            always_block: HashSet::new(),
        };

        for (name, table) in builtin_contexts() {
            resolver.merge_context(name, &table);
        }
        for (name, table) in extra {
            resolver.merge_context(name, table);
        }

        resolver
    }

    fn merge_context(&mut self, name: &str, table: &ContextPolicyConfig) {
        let ctx = self.contexts.entry(name.to_string()).or_default();
        ctx.critical.extend(table.critical.iter().cloned());
        ctx.high.extend(table.high.iter().cloned());
        for pattern_type in &table.always_block {
            self.always_block
                .insert((name.to_string(), pattern_type.clone()));
        }
    }

    /// Effective severity of a pattern type within a context.
    ///
    /// A type listed under both CRITICAL and HIGH resolves to CRITICAL.
    /// Unknown contexts and unlisted types keep `base`.
    pub fn severity(&self, pattern_type: &str, context: &str, base: Severity) -> Severity {
        match self.contexts.get(context) {
            Some(ctx) if ctx.critical.contains(pattern_type) => Severity::Critical,
            Some(ctx) if ctx.high.contains(pattern_type) => Severity::High,
            _ => base,
        }
    }

    /// Action for a finding of the given type and resolved severity
    pub fn action(
        &self,
        pattern_type: &str,
        context: &str,
        severity: Severity,
        strict_mode: bool,
    ) -> Action {
        if strict_mode && severity == Severity::Critical {
            return Action::Block;
        }

        if self
            .always_block
            .contains(&(context.to_string(), pattern_type.to_string()))
        {
            return Action::Block;
        }

        match severity {
            Severity::Critical => Action::Block,
            Severity::High | Severity::Medium => Action::Redact,
            Severity::Low => Action::Warn,
        }
    }

    /// Severity and action in one step
    pub fn resolve(
        &self,
        pattern_type: &str,
        context: &str,
        base: Severity,
        strict_mode: bool,
    ) -> (Severity, Action) {
        let severity = self.severity(pattern_type, context, base);
        (severity, self.action(pattern_type, context, severity, strict_mode))
    }

    /// Names of all known contexts, sorted
    pub fn contexts(&self) -> BTreeSet<&str> {
        self.contexts.keys().map(String::as_str).collect()
    }

    pub fn is_always_blocked(&self, pattern_type: &str, context: &str) -> bool {
        self.always_block
            .contains(&(context.to_string(), pattern_type.to_string()))
    }
}

impl Default for PolicyResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn table(critical: &[&str], high: &[&str], always_block: &[&str]) -> ContextPolicyConfig {
    let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
    ContextPolicyConfig {
        critical: owned(critical),
        high: owned(high),
        always_block: owned(always_block),
    }
}

fn builtin_contexts() -> Vec<(&'static str, ContextPolicyConfig)> {
    vec![
        (
            "healthcare",
            table(
                &["ssn", "mrn", "health_plan_id", "date_of_birth"],
                &["npi", "dea_number", "icd10_code", "prescription", "email", "phone"],
                &["mrn", "health_plan_id"],
            ),
        ),
        (
            "finance",
            table(
                &["ssn", "credit_card", "cvv", "bank_account", "routing_number", "iban"],
                &["ein", "card_expiry", "date_of_birth", "email", "phone"],
                &["credit_card", "cvv"],
            ),
        ),
        (
            "legal",
            table(
                &["ssn", "passport", "drivers_license"],
                &["date_of_birth", "bank_account", "email", "phone"],
                &["ssn"],
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthcare_promotes_ssn() {
        let policy = PolicyResolver::new();
        assert_eq!(
            policy.severity("ssn", "healthcare", Severity::High),
            Severity::Critical
        );
        assert_eq!(
            policy.severity("npi", "healthcare", Severity::Medium),
            Severity::High
        );
    }

    #[test]
    fn test_unlisted_type_keeps_base() {
        let policy = PolicyResolver::new();
        assert_eq!(
            policy.severity("ip_address", "healthcare", Severity::Low),
            Severity::Low
        );
    }

    #[test]
    fn test_unknown_context_keeps_base() {
        let policy = PolicyResolver::new();
        for base in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            assert_eq!(policy.severity("ssn", "aerospace", base), base);
        }
    }

    #[test]
    fn test_default_action_by_severity() {
        let policy = PolicyResolver::new();
        assert_eq!(policy.action("x", "general", Severity::Critical, false), Action::Block);
        assert_eq!(policy.action("x", "general", Severity::High, false), Action::Redact);
        assert_eq!(policy.action("x", "general", Severity::Medium, false), Action::Redact);
        assert_eq!(policy.action("x", "general", Severity::Low, false), Action::Warn);
    }

    #[test]
    fn test_strict_mode_blocks_critical() {
        let policy = PolicyResolver::new();
        assert_eq!(policy.action("email", "general", Severity::Critical, true), Action::Block);
        // Strict mode does not touch non-critical findings
        assert_eq!(policy.action("email", "general", Severity::High, true), Action::Redact);
    }

    #[test]
    fn test_always_block_set() {
        let policy = PolicyResolver::new();
        assert_eq!(policy.action("mrn", "healthcare", Severity::Low, false), Action::Block);
        assert_eq!(policy.action("credit_card", "finance", Severity::Medium, false), Action::Block);
        assert_eq!(policy.action("mrn", "finance", Severity::Medium, false), Action::Redact);
        assert!(policy.is_always_blocked("credit_card", "finance"));
        assert!(!policy.is_always_blocked("credit_card", "healthcare"));
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let a = PolicyResolver::new();
        let b = PolicyResolver::new();
        for ty in ["ssn", "mrn", "credit_card", "email", "phone", "unknown"] {
            for ctx in ["healthcare", "finance", "legal", "general"] {
                for base in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
                    for strict in [false, true] {
                        assert_eq!(a.resolve(ty, ctx, base, strict), b.resolve(ty, ctx, base, strict));
                    }
                }
            }
        }
    }

    #[test]
    fn test_configured_context() {
        let mut extra = BTreeMap::new();
        extra.insert(
            "hr".to_string(),
            ContextPolicyConfig {
                critical: vec!["ssn".to_string()],
                high: vec![],
                always_block: vec!["date_of_birth".to_string()],
            },
        );
        let policy = PolicyResolver::with_contexts(&extra);
        assert_eq!(policy.severity("ssn", "hr", Severity::Medium), Severity::Critical);
        assert_eq!(policy.action("date_of_birth", "hr", Severity::Low, false), Action::Block);
        assert!(policy.contexts().contains("hr"));
        assert!(policy.contexts().contains("healthcare"));
    }

    #[test]
    fn test_configured_context_extends_builtin() {
        let mut extra = BTreeMap::new();
        extra.insert(
            "healthcare".to_string(),
            ContextPolicyConfig {
                critical: vec!["passport".to_string()],
                ..Default::default()
            },
        );
        let policy = PolicyResolver::with_contexts(&extra);
        assert_eq!(policy.severity("passport", "healthcare", Severity::High), Severity::Critical);
        assert_eq!(policy.severity("mrn", "healthcare", Severity::High), Severity::Critical);
    }

    #[test]
    fn test_action_serde() {
        assert_eq!(serde_json::to_string(&Action::Block).unwrap(), "\"BLOCK\"");
        assert!(Action::Redact.requires_redaction());
        assert!(!Action::Warn.requires_redaction());
    }
}
