//! SafeDLP configuration management

use crate::dlp::{ContextPolicyConfig, PatternSpec};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main SafeDLP configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafeDlpConfig {
    /// Detection engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Context policy tables
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Per-tenant overrides, keyed by tenant id
    #[serde(default)]
    pub tenants: BTreeMap<String, TenantPolicy>,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

impl SafeDlpConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.as_ref().display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_input_bytes == 0 {
            return Err(Error::Config("engine.max_input_bytes must be positive".to_string()));
        }
        if self.engine.default_context.trim().is_empty() {
            return Err(Error::Config("engine.default_context must not be empty".to_string()));
        }
        for (id, tenant) in &self.tenants {
            if matches!(&tenant.default_context, Some(ctx) if ctx.trim().is_empty()) {
                return Err(Error::Config(format!(
                    "tenants.{}.default_context must not be empty",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Tenant overrides, or the neutral policy for unknown tenants
    pub fn tenant(&self, tenant_id: &str) -> TenantPolicy {
        self.tenants.get(tenant_id).cloned().unwrap_or_default()
    }

    /// Context to scan under when the caller names none
    pub fn context_for(&self, tenant_id: Option<&str>) -> String {
        tenant_id
            .and_then(|id| self.tenants.get(id))
            .and_then(|t| t.default_context.clone())
            .unwrap_or_else(|| self.engine.default_context.clone())
    }
}

/// Detection engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Block every CRITICAL finding regardless of context
    #[serde(default)]
    pub strict_mode: bool,

    /// Context used when a request names none
    #[serde(default = "default_context")]
    pub default_context: String,

    /// Maximum accepted input size in bytes
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,

    /// Extra detectors, merged over the built-ins by id
    #[serde(default)]
    pub custom_patterns: BTreeMap<String, PatternSpec>,
}

fn default_context() -> String {
    crate::dlp::DEFAULT_CONTEXT.to_string()
}

fn default_max_input_bytes() -> usize {
    1024 * 1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            default_context: default_context(),
            max_input_bytes: default_max_input_bytes(),
            custom_patterns: BTreeMap::new(),
        }
    }
}

/// Context policy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Context tables merged over the built-in healthcare/finance/legal tables
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextPolicyConfig>,
}

/// Tenant-level overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantPolicy {
    /// When set, replaces the engine's strict mode for this tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlp_strict_mode: Option<bool>,

    /// Default scan context for this tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_context: Option<String>,
}

impl TenantPolicy {
    /// The tenant flag wins whenever it is set
    pub fn effective_strict_mode(&self, engine_strict: bool) -> bool {
        self.dlp_strict_mode.unwrap_or(engine_strict)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18791,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for audit rows and chains
    pub base_dir: PathBuf,
}

impl StorageConfig {
    /// Root of the file-backed audit store
    pub fn audit_dir(&self) -> PathBuf {
        self.base_dir.join("audit")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base_dir = dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".safedlp");
        Self { base_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlp::Severity;

    #[test]
    fn test_default_config() {
        let config = SafeDlpConfig::default();
        assert!(!config.engine.strict_mode);
        assert_eq!(config.engine.default_context, "general");
        assert_eq!(config.server.port, 18791);
        assert!(config.storage.base_dir.ends_with(".safedlp"));
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let config = SafeDlpConfig::from_toml_str(
            r#"
[engine]
strict_mode = true
default_context = "healthcare"

[engine.custom_patterns.employee_id]
pattern = '\bEMP-\d{6}\b'
description = "Employee ID"
severity = "MEDIUM"
categories = ["PII"]

[policy.contexts.hr]
critical = ["ssn"]
always_block = ["date_of_birth"]

[tenants.acme]
dlp_strict_mode = false

[server]
host = "0.0.0.0"
port = 9000
"#,
        )
        .unwrap();

        assert!(config.engine.strict_mode);
        assert_eq!(config.engine.default_context, "healthcare");
        assert_eq!(config.engine.max_input_bytes, 1024 * 1024);
        let spec = &config.engine.custom_patterns["employee_id"];
        assert_eq!(spec.severity, Severity::Medium);
        assert_eq!(config.policy.contexts["hr"].critical, vec!["ssn"]);
        assert!(config.policy.contexts["hr"].high.is_empty());
        assert_eq!(config.tenants["acme"].dlp_strict_mode, Some(false));
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = SafeDlpConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine.default_context, "general");
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let err = SafeDlpConfig::from_toml_str("[engine\nstrict_mode = ").unwrap_err();
        assert!(matches!(err, crate::error::Error::Toml(_)));
    }

    #[test]
    fn test_unusable_settings_rejected() {
        let err = SafeDlpConfig::from_toml_str("[engine]\nmax_input_bytes = 0\n").unwrap_err();
        assert!(matches!(err, crate::error::Error::Config(_)));

        let err = SafeDlpConfig::from_toml_str("[tenants.acme]\ndefault_context = \" \"\n").unwrap_err();
        assert!(err.to_string().contains("tenants.acme"));

        assert!(SafeDlpConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_roundtrips_through_toml() {
        let text = toml::to_string_pretty(&SafeDlpConfig::default()).unwrap();
        let parsed = SafeDlpConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.server.port, 18791);
        assert_eq!(parsed.engine.max_input_bytes, 1024 * 1024);
    }

    #[test]
    fn test_effective_strict_mode() {
        let unset = TenantPolicy::default();
        assert!(unset.effective_strict_mode(true));
        assert!(!unset.effective_strict_mode(false));

        let lenient = TenantPolicy {
            dlp_strict_mode: Some(false),
            ..Default::default()
        };
        assert!(!lenient.effective_strict_mode(true));
    }

    #[test]
    fn test_context_for_tenant() {
        let mut config = SafeDlpConfig::default();
        config.tenants.insert(
            "clinic".to_string(),
            TenantPolicy {
                default_context: Some("healthcare".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(config.context_for(Some("clinic")), "healthcare");
        assert_eq!(config.context_for(Some("other")), "general");
        assert_eq!(config.context_for(None), "general");
        assert_eq!(config.tenant("other"), TenantPolicy::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safedlp.toml");
        std::fs::write(&path, "[engine]\nstrict_mode = true\n").unwrap();
        let config = SafeDlpConfig::load(&path).unwrap();
        assert!(config.engine.strict_mode);

        assert!(SafeDlpConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
