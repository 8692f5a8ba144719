//! Pattern registry for sensitive data detection
//!
//! Provides the built-in detector table, grouped by regulatory domain:
//! - PHI (HIPAA protected health information)
//! - PCI (payment card data)
//! - Financial (bank and tax identifiers)
//! - PII (personal identifiers)
//! - Security (credentials and key material)
//!
//! Every matcher is compiled by the `regex` crate, which executes with finite
//! automata and guarantees matching time linear in the input length. Custom
//! patterns are additionally compiled under a size limit so a caller cannot
//! register a matcher whose automaton is unreasonably large.

use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound on the compiled size of a single matcher (bytes).
pub const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Severity of a finding. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Regulated data category a pattern belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    /// Protected health information
    Phi,
    /// Personally identifiable information
    Pii,
    /// Payment card industry data
    Pci,
    /// Credentials and key material
    Security,
    /// Bank, tax and account identifiers
    Financial,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Phi => write!(f, "PHI"),
            Self::Pii => write!(f, "PII"),
            Self::Pci => write!(f, "PCI"),
            Self::Security => write!(f, "SECURITY"),
            Self::Financial => write!(f, "FINANCIAL"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PHI" => Ok(Self::Phi),
            "PII" => Ok(Self::Pii),
            "PCI" => Ok(Self::Pci),
            "SECURITY" => Ok(Self::Security),
            "FINANCIAL" => Ok(Self::Financial),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// Uncompiled pattern definition, as supplied by configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Regular expression source
    pub pattern: String,
    /// Human-readable description
    pub description: String,
    /// Base severity before context promotion
    pub severity: Severity,
    /// Categories this pattern detects
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl PatternSpec {
    fn new(pattern: &str, description: &str, severity: Severity, categories: &[Category]) -> Self {
        Self {
            pattern: pattern.to_string(),
            description: description.to_string(),
            severity,
            categories: categories.to_vec(),
        }
    }
}

/// A compiled, immutable detector
#[derive(Debug, Clone)]
pub struct Pattern {
    id: String,
    matcher: Regex,
    description: String,
    severity: Severity,
    categories: Vec<Category>,
}

impl Pattern {
    /// Compile a pattern spec under the registry size limit
    pub fn compile(id: impl Into<String>, spec: &PatternSpec) -> Result<Self> {
        let id = id.into();
        let matcher = RegexBuilder::new(&spec.pattern)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map_err(|e| Error::Pattern(format!("Invalid pattern '{}': {}", id, e)))?;

        Ok(Self {
            id,
            matcher,
            description: spec.description.clone(),
            severity: spec.severity,
            categories: spec.categories.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn matcher(&self) -> &Regex {
        &self.matcher
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Base severity, before context promotion
    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Whether this pattern carries any of the given categories
    pub fn in_any(&self, categories: &[Category]) -> bool {
        self.categories.iter().any(|c| categories.contains(c))
    }
}

/// Immutable, ordered table of detectors.
///
/// Built once and shared behind an `Arc`; iteration order is the built-in
/// order followed by custom patterns in id order. A custom pattern whose id
/// matches a built-in replaces it in place.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: Vec<Pattern>,
}

impl PatternRegistry {
    /// Registry containing only the built-in detectors
    pub fn builtin() -> Result<Self> {
        Self::with_custom(&BTreeMap::new())
    }

    /// Built-in detectors merged with caller-supplied patterns (caller wins by id)
    pub fn with_custom(custom: &BTreeMap<String, PatternSpec>) -> Result<Self> {
        let mut patterns = builtin_specs()
            .into_iter()
            .map(|(id, spec)| match custom.get(id) {
                Some(override_spec) => Pattern::compile(id, override_spec),
                None => Pattern::compile(id, &spec),
            })
            .collect::<Result<Vec<_>>>()?;

        for (id, spec) in custom {
            if !patterns.iter().any(|p| p.id == *id) {
                patterns.push(Pattern::compile(id.clone(), spec)?);
            }
        }

        tracing::debug!(
            patterns = patterns.len(),
            custom = custom.len(),
            "Built pattern registry"
        );

        Ok(Self { patterns })
    }

    /// Registry built from an explicit list, in the given order.
    ///
    /// Later entries with a duplicate id replace earlier ones in place.
    pub fn from_specs<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, PatternSpec)>,
        S: Into<String>,
    {
        let mut patterns: Vec<Pattern> = Vec::new();
        for (id, spec) in specs {
            let pattern = Pattern::compile(id, &spec)?;
            match patterns.iter_mut().find(|p| p.id == pattern.id) {
                Some(existing) => *existing = pattern,
                None => patterns.push(pattern),
            }
        }
        Ok(Self { patterns })
    }

    pub fn get(&self, id: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// All built-in detector specs, in registry order
pub fn builtin_specs() -> Vec<(&'static str, PatternSpec)> {
    let mut specs = phi_patterns();
    specs.extend(pci_patterns());
    specs.extend(financial_patterns());
    specs.extend(pii_patterns());
    specs.extend(security_patterns());
    specs
}

// ---- PHI ----

/// HIPAA protected health information detectors
pub fn phi_patterns() -> Vec<(&'static str, PatternSpec)> {
    use Category::*;
    vec![
        (
            "ssn",
            PatternSpec::new(
                r"\b\d{3}[- ]\d{2}[- ]\d{4}\b",
                "US Social Security Number",
                Severity::High,
                &[Pii, Phi],
            ),
        ),
        (
            "mrn",
            PatternSpec::new(
                r"(?i)\b(?:MRN|medical\s+record(?:\s+(?:number|no\.?))?)\s*[#:]?\s*[A-Z0-9]{6,12}\b",
                "Medical Record Number",
                Severity::High,
                &[Phi],
            ),
        ),
        (
            "health_plan_id",
            PatternSpec::new(
                r"(?i)\b(?:health\s*plan|beneficiary|member)\s*(?:id|number|#)\s*:?\s*[A-Z0-9]{6,15}\b",
                "Health plan beneficiary number",
                Severity::High,
                &[Phi],
            ),
        ),
        (
            "npi",
            PatternSpec::new(
                r"(?i)\bNPI\s*[#:]?\s*\d{10}\b",
                "National Provider Identifier",
                Severity::Medium,
                &[Phi],
            ),
        ),
        (
            "dea_number",
            PatternSpec::new(
                r"\b[ABFMPRabfmpr][A-Za-z]\d{7}\b",
                "DEA prescriber registration number",
                Severity::Medium,
                &[Phi],
            ),
        ),
        (
            "icd10_code",
            PatternSpec::new(
                r"(?i)\b(?:ICD-?10|diagnosis|dx)(?:\s+code)?\s*[:#]?\s*[A-TV-Z]\d{2}(?:\.\d{1,4})?\b",
                "ICD-10 diagnosis code",
                Severity::Medium,
                &[Phi],
            ),
        ),
        (
            "prescription",
            PatternSpec::new(
                r"(?i)\b(?:prescribed|taking|dosage|rx)\s*:?\s*\w+\s+\d+\s*(?:mg|ml|mcg|units?)\b",
                "Prescription with dosage",
                Severity::Medium,
                &[Phi],
            ),
        ),
    ]
}

// ---- PCI ----

/// Payment card detectors
pub fn pci_patterns() -> Vec<(&'static str, PatternSpec)> {
    use Category::*;
    vec![
        (
            "credit_card",
            PatternSpec::new(
                r"\b(?:4\d{3}|5[1-5]\d{2}|6(?:011|5\d{2}))[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b|\b3[47]\d{2}[- ]?\d{6}[- ]?\d{5}\b",
                "Payment card number (Visa, Mastercard, Discover, Amex)",
                Severity::High,
                &[Pci, Financial],
            ),
        ),
        (
            "cvv",
            PatternSpec::new(
                r"(?i)\b(?:cvv2?|cvc2?|security\s*code)\s*[:#]?\s*\d{3,4}\b",
                "Card verification value",
                Severity::Critical,
                &[Pci],
            ),
        ),
        (
            "card_expiry",
            PatternSpec::new(
                r"(?i)\b(?:exp(?:iry|iration)?|valid\s*(?:thru|through))\s*[:#]?\s*(?:0[1-9]|1[0-2])\s*[/-]\s*(?:\d{4}|\d{2})\b",
                "Card expiration date",
                Severity::Medium,
                &[Pci],
            ),
        ),
    ]
}

// ---- Financial ----

/// Bank and tax identifier detectors
pub fn financial_patterns() -> Vec<(&'static str, PatternSpec)> {
    use Category::*;
    vec![
        (
            "bank_account",
            PatternSpec::new(
                r"\b\d{8,17}\b",
                "Bank account number",
                Severity::Medium,
                &[Financial],
            ),
        ),
        (
            "routing_number",
            PatternSpec::new(
                r"(?i)\b(?:routing|ABA|RTN)(?:\s*(?:number|no\.?|#))?\s*[:#]?\s*\d{9}\b",
                "ABA routing number",
                Severity::Medium,
                &[Financial],
            ),
        ),
        (
            "iban",
            PatternSpec::new(
                r"\b[A-Z]{2}\d{2} ?[A-Z0-9]{4} ?(?:\d{4} ?){2,7}\d{1,4}\b",
                "International Bank Account Number",
                Severity::High,
                &[Financial, Pii],
            ),
        ),
        (
            "ein",
            PatternSpec::new(
                r"(?i)\b(?:EIN|employer\s+identification(?:\s+number)?)\s*[:#]?\s*\d{2}-\d{7}\b",
                "Employer Identification Number",
                Severity::Medium,
                &[Financial],
            ),
        ),
    ]
}

// ---- PII ----

/// Personal identifier detectors
pub fn pii_patterns() -> Vec<(&'static str, PatternSpec)> {
    use Category::*;
    vec![
        (
            "email",
            PatternSpec::new(
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                "Email address",
                Severity::Medium,
                &[Pii],
            ),
        ),
        (
            "phone",
            PatternSpec::new(
                r"(?:\+?\b1[-. ]?)?(?:\(\d{3}\)|\b\d{3})[-. ]?\d{3}[-. ]?\d{4}\b",
                "Phone number (North American format)",
                Severity::Medium,
                &[Pii],
            ),
        ),
        (
            "date_of_birth",
            PatternSpec::new(
                r"(?i)\b(?:DOB|date\s+of\s+birth|birth\s*date)\s*[:#]?\s*(?:\d{1,2}[/-]\d{1,2}[/-](?:\d{4}|\d{2})|\d{4}-\d{2}-\d{2})\b",
                "Date of birth",
                Severity::High,
                &[Pii, Phi],
            ),
        ),
        (
            "passport",
            PatternSpec::new(
                r"(?i)\bpassport\s*(?:number|no\.?|#)\s*[:#]?\s*[A-Z0-9]{6,12}\b",
                "Passport number",
                Severity::High,
                &[Pii],
            ),
        ),
        (
            "drivers_license",
            PatternSpec::new(
                r"(?i)\bdriver'?s?\s+licen[cs]e(?:\s*(?:number|no\.?|#))?\s*[:#]?\s*[A-Z0-9]{5,15}\b",
                "Driver's license number",
                Severity::High,
                &[Pii],
            ),
        ),
        (
            "ip_address",
            PatternSpec::new(
                r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b",
                "IPv4 address",
                Severity::Low,
                &[Pii],
            ),
        ),
    ]
}

// ---- Security ----

/// Credential and key material detectors
pub fn security_patterns() -> Vec<(&'static str, PatternSpec)> {
    use Category::*;
    vec![
        (
            "api_key",
            PatternSpec::new(
                r#"(?i)\b(?:api[_-]?key|secret[_-]?key|access[_-]?token)\s*[:=]\s*['"]?[A-Za-z0-9_\-]{16,}|\bsk-[A-Za-z0-9_\-]{20,}"#,
                "API key or access token",
                Severity::Critical,
                &[Security],
            ),
        ),
        (
            "aws_access_key",
            PatternSpec::new(
                r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b",
                "AWS access key id",
                Severity::Critical,
                &[Security],
            ),
        ),
        (
            "jwt",
            PatternSpec::new(
                r"\beyJ[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}",
                "JSON Web Token",
                Severity::High,
                &[Security],
            ),
        ),
        (
            "private_key",
            PatternSpec::new(
                r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED )?PRIVATE KEY-----",
                "PEM private key header",
                Severity::Critical,
                &[Security],
            ),
        ),
        (
            "password",
            PatternSpec::new(
                r"(?i)\b(?:password|passwd|pwd)\s*[:=]\s*\S{4,}",
                "Inline password assignment",
                Severity::High,
                &[Security],
            ),
        ),
    ]
}
