//! Sensitive data classification, policy, redaction and validation
//!
//! ## Architecture
//!
//! ```text
//! text → Scanner ──(PatternRegistry)──→ Findings
//!                 └─(PolicyResolver)──→ severity + action per finding
//!                          ↓
//!        Redactor (sanitized text + ledger) / Validator (verdict)
//! ```
//!
//! The registry and policy are immutable values shared behind `Arc`, so the
//! engine can be cloned into every request handler without locks.

pub mod patterns;
pub mod policy;
pub mod redactor;
pub mod scanner;
pub mod validator;

pub use patterns::{Category, Pattern, PatternRegistry, PatternSpec, Severity};
pub use policy::{Action, ContextPolicyConfig, PolicyResolver};
pub use redactor::{
    RedactOptions, RedactionEntry, RedactionResult, RedactionStyle, Redactor, TokenMap,
};
pub use scanner::{Finding, ScanOptions, ScanResult, Scanner, DEFAULT_CONTEXT};
pub use validator::{Recommendation, ValidateOptions, ValidationResult, Validator};

use crate::config::{SafeDlpConfig, TenantPolicy};
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Facade bundling scanner, redactor and validator over one registry
#[derive(Debug, Clone)]
pub struct DlpEngine {
    scanner: Scanner,
    redactor: Redactor,
    validator: Validator,
}

impl DlpEngine {
    /// Engine over the built-in patterns and policy tables
    pub fn new(strict_mode: bool) -> Result<Self> {
        Self::with_custom_patterns(strict_mode, &BTreeMap::new())
    }

    /// Engine with caller-supplied patterns merged over the built-ins by id
    pub fn with_custom_patterns(
        strict_mode: bool,
        custom_patterns: &BTreeMap<String, PatternSpec>,
    ) -> Result<Self> {
        let registry = Arc::new(PatternRegistry::with_custom(custom_patterns)?);
        Ok(Self::from_parts(registry, Arc::new(PolicyResolver::new()), strict_mode))
    }

    /// Engine configured from the `[engine]` and `[policy]` sections
    pub fn from_config(config: &SafeDlpConfig) -> Result<Self> {
        let registry = Arc::new(PatternRegistry::with_custom(&config.engine.custom_patterns)?);
        let policy = Arc::new(PolicyResolver::with_contexts(&config.policy.contexts));
        tracing::info!(
            patterns = registry.len(),
            contexts = policy.contexts().len(),
            strict_mode = config.engine.strict_mode,
            "DLP engine initialized"
        );
        Ok(Self::from_parts(registry, policy, config.engine.strict_mode))
    }

    /// Engine over explicitly injected components
    pub fn from_parts(
        registry: Arc<PatternRegistry>,
        policy: Arc<PolicyResolver>,
        strict_mode: bool,
    ) -> Self {
        let scanner = Scanner::new(registry, policy).with_strict_mode(strict_mode);
        Self {
            redactor: Redactor::from_scanner(scanner.clone()),
            validator: Validator::new(scanner.clone()),
            scanner,
        }
    }

    /// Clone sharing registry and policy, with the tenant's strict mode applied
    pub fn for_tenant(&self, tenant: &TenantPolicy) -> Self {
        let strict = tenant.effective_strict_mode(self.strict_mode());
        if strict == self.strict_mode() {
            return self.clone();
        }
        Self::from_parts(
            self.scanner.registry().clone(),
            self.scanner.policy().clone(),
            strict,
        )
    }

    pub fn strict_mode(&self) -> bool {
        self.scanner.strict_mode()
    }

    pub fn registry(&self) -> &PatternRegistry {
        self.scanner.registry()
    }

    pub fn policy(&self) -> &PolicyResolver {
        self.scanner.policy()
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn scan(&self, text: &str, options: &ScanOptions) -> ScanResult {
        self.scanner.scan(text, options)
    }

    pub fn redact(&self, text: &str, options: &RedactOptions) -> RedactionResult {
        self.redactor.redact(text, options)
    }

    pub fn validate(&self, text: &str, options: &ValidateOptions) -> ValidationResult {
        self.validator.validate(text, options)
    }

    pub fn scan_value(&self, value: &serde_json::Value, options: &ScanOptions) -> ScanResult {
        self.scanner.scan_value(value, options)
    }

    pub fn redact_value(&self, value: &serde_json::Value, options: &RedactOptions) -> RedactionResult {
        self.redactor.redact_value(value, options)
    }

    pub fn validate_value(&self, value: &serde_json::Value, options: &ValidateOptions) -> ValidationResult {
        self.validator.validate_value(value, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_end_to_end_healthcare() {
        let engine = DlpEngine::new(true).unwrap();
        let text = "Patient SSN: 555-12-3456, MRN: ABC123";

        let scan = engine.scan(text, &ScanOptions::new("healthcare"));
        let types: Vec<&str> = scan.findings.iter().map(|f| f.pattern_type.as_str()).collect();
        assert_eq!(types, vec!["ssn", "mrn"]);
        for finding in &scan.findings {
            assert_eq!(finding.severity, Severity::Critical);
            assert_eq!(finding.action, Action::Block);
        }

        let verdict = engine.validate(text, &ValidateOptions::new("healthcare"));
        assert!(!verdict.is_valid);
        assert_eq!(verdict.recommendation, Recommendation::BlockTransmission);
    }

    #[test]
    fn test_tenant_override_wins() {
        let engine = DlpEngine::new(false).unwrap();
        let strict_tenant = TenantPolicy {
            dlp_strict_mode: Some(true),
            ..Default::default()
        };
        assert!(engine.for_tenant(&strict_tenant).strict_mode());

        let strict_engine = DlpEngine::new(true).unwrap();
        let lenient_tenant = TenantPolicy {
            dlp_strict_mode: Some(false),
            ..Default::default()
        };
        assert!(!strict_engine.for_tenant(&lenient_tenant).strict_mode());

        // Unset tenant flag inherits the engine flag
        assert!(strict_engine.for_tenant(&TenantPolicy::default()).strict_mode());
    }

    #[test]
    fn test_tenant_engine_shares_custom_patterns() {
        let mut custom = BTreeMap::new();
        custom.insert(
            "case_number".to_string(),
            PatternSpec {
                pattern: r"\bCASE-\d{5}\b".to_string(),
                description: "Sealed case number".to_string(),
                severity: Severity::Critical,
                categories: vec![Category::Pii],
            },
        );
        let engine = DlpEngine::with_custom_patterns(false, &custom).unwrap();
        let scan = engine.scan("see CASE-12345", &ScanOptions::default());
        assert_eq!(scan.finding("case_number").unwrap().action, Action::Block);

        let tenant = TenantPolicy {
            dlp_strict_mode: Some(true),
            ..Default::default()
        };
        let tenant_engine = engine.for_tenant(&tenant);
        assert!(tenant_engine.strict_mode());
        assert_eq!(tenant_engine.registry().len(), engine.registry().len());
        let scan = tenant_engine.scan("see CASE-12345", &ScanOptions::default());
        assert_eq!(scan.finding("case_number").unwrap().severity, Severity::Critical);
        assert_eq!(scan.finding("case_number").unwrap().action, Action::Block);
    }

    #[test]
    fn test_from_config_uses_custom_patterns() {
        let mut config = SafeDlpConfig::default();
        config.engine.custom_patterns.insert(
            "employee_id".to_string(),
            PatternSpec {
                pattern: r"\bEMP-\d{6}\b".to_string(),
                description: "Employee ID".to_string(),
                severity: Severity::Medium,
                categories: vec![Category::Pii],
            },
        );
        let engine = DlpEngine::from_config(&config).unwrap();
        let scan = engine.scan("badge EMP-004211", &ScanOptions::default());
        assert_eq!(scan.findings[0].pattern_type, "employee_id");
        assert_eq!(scan.findings[0].action, Action::Redact);
    }
}
