//! Transmission validator
//!
//! Turns a scan into a go/no-go verdict for forwarding text to an external
//! party (model provider, export, webhook).

use super::patterns::Category;
use super::scanner::{default_context, Finding, ScanOptions, Scanner, DEFAULT_CONTEXT};
use serde::{Deserialize, Serialize};

/// Recommended handling for the validated text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Safe,
    RedactBeforeTransmission,
    BlockTransmission,
}

/// Options for a single validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOptions {
    #[serde(default = "default_context")]
    pub context: String,
    /// Categories the caller is authorized to transmit; blocking findings
    /// carrying any of them are downgraded to warnings
    #[serde(default)]
    pub allowed_categories: Vec<Category>,
}

impl ValidateOptions {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            allowed_categories: Vec::new(),
        }
    }

    pub fn allow(mut self, categories: Vec<Category>) -> Self {
        self.allowed_categories = categories;
        self
    }
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT)
    }
}

/// Transmission verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub blockers: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub recommendation: Recommendation,
}

impl ValidationResult {
    /// Verdict for input that carries nothing to inspect
    pub fn safe() -> Self {
        Self {
            is_valid: true,
            blockers: Vec::new(),
            warnings: Vec::new(),
            recommendation: Recommendation::Safe,
        }
    }

    fn from_findings(findings: Vec<Finding>, allowed: &[Category]) -> Self {
        let (blockers, warnings): (Vec<Finding>, Vec<Finding>) = findings
            .into_iter()
            .partition(|f| f.is_blocking() && !f.categories.iter().any(|c| allowed.contains(c)));

        let recommendation = if !blockers.is_empty() {
            Recommendation::BlockTransmission
        } else if !warnings.is_empty() {
            Recommendation::RedactBeforeTransmission
        } else {
            Recommendation::Safe
        };

        Self {
            is_valid: blockers.is_empty(),
            blockers,
            warnings,
            recommendation,
        }
    }
}

/// Validates text for transmission using a scanner
#[derive(Debug, Clone)]
pub struct Validator {
    scanner: Scanner,
}

impl Validator {
    pub fn new(scanner: Scanner) -> Self {
        Self { scanner }
    }

    /// Scan text and derive a transmission verdict
    pub fn validate(&self, text: &str, options: &ValidateOptions) -> ValidationResult {
        let scan = self
            .scanner
            .scan(text, &ScanOptions::new(options.context.clone()));
        let result = ValidationResult::from_findings(scan.findings, &options.allowed_categories);

        if !result.is_valid {
            tracing::info!(
                context = %options.context,
                blockers = result.blockers.len(),
                "Transmission blocked"
            );
        }

        result
    }

    /// Validate an arbitrary JSON value; anything but a string is SAFE
    pub fn validate_value(&self, value: &serde_json::Value, options: &ValidateOptions) -> ValidationResult {
        match value.as_str() {
            Some(text) => self.validate(text, options),
            None => ValidationResult::safe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlp::patterns::PatternRegistry;
    use crate::dlp::policy::{Action, PolicyResolver};
    use std::sync::Arc;

    fn create_test_scanner(strict: bool) -> Scanner {
        Scanner::new(
            Arc::new(PatternRegistry::builtin().unwrap()),
            Arc::new(PolicyResolver::new()),
        )
        .with_strict_mode(strict)
    }

    #[test]
    fn test_clean_text_is_safe() {
        let validator = Validator::new(create_test_scanner(false));
        let result = validator.validate("The weather is nice", &ValidateOptions::default());
        assert!(result.is_valid);
        assert_eq!(result.recommendation, Recommendation::Safe);
    }

    #[test]
    fn test_redactable_text() {
        let validator = Validator::new(create_test_scanner(false));
        let result = validator.validate("reach me at jo@example.com", &ValidateOptions::default());
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.recommendation, Recommendation::RedactBeforeTransmission);
    }

    #[test]
    fn test_blocking_text() {
        let validator = Validator::new(create_test_scanner(true));
        let result = validator.validate(
            "Patient SSN: 555-12-3456, MRN: ABC123",
            &ValidateOptions::new("healthcare"),
        );
        assert!(!result.is_valid);
        assert_eq!(result.blockers.len(), 2);
        assert_eq!(result.recommendation, Recommendation::BlockTransmission);
    }

    #[test]
    fn test_allowed_category_downgrades_blocker() {
        let validator = Validator::new(create_test_scanner(false));
        let options = ValidateOptions::new("healthcare").allow(vec![Category::Phi]);
        let result = validator.validate("MRN: ABC123", &options);
        assert!(result.is_valid);
        assert!(result.blockers.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].action, Action::Block);
        assert_eq!(result.recommendation, Recommendation::RedactBeforeTransmission);
    }

    #[test]
    fn test_valid_iff_no_block_findings() {
        let scanner = create_test_scanner(false);
        let validator = Validator::new(scanner.clone());
        let samples = [
            "plain text",
            "jo@example.com",
            "cvv: 123",
            "MRN: ABC123",
            "host 10.0.0.1",
            "card 4111 1111 1111 1111",
        ];
        for context in ["general", "healthcare", "finance"] {
            for text in samples {
                let scan = scanner.scan(text, &ScanOptions::new(context));
                let verdict = validator.validate(text, &ValidateOptions::new(context));
                assert_eq!(
                    verdict.is_valid,
                    scan.blockers().next().is_none(),
                    "{} / {}",
                    context,
                    text
                );
            }
        }
    }

    #[test]
    fn test_non_string_value_is_safe() {
        let validator = Validator::new(create_test_scanner(true));
        let result = validator.validate_value(&serde_json::json!({"ssn": "555-12-3456"}), &ValidateOptions::default());
        assert!(result.is_valid);
    }

    #[test]
    fn test_recommendation_serde() {
        assert_eq!(
            serde_json::to_string(&Recommendation::BlockTransmission).unwrap(),
            "\"BLOCK_TRANSMISSION\""
        );
        assert_eq!(
            serde_json::to_string(&Recommendation::RedactBeforeTransmission).unwrap(),
            "\"REDACT_BEFORE_TRANSMISSION\""
        );
    }
}
