//! Guarded skill execution
//!
//! Skills are vertical-specific units of work (summarize a chart, draft a
//! claim letter, ...) that see caller text. Every run goes through the same
//! guard:
//!
//! ```text
//! input → validate ──BLOCK──→ audit row (best effort) → Error::Skill
//!            │
//!            └─ok─→ execute → redact output (mask) → audit row (best effort) → caller
//! ```
//!
//! Skills are registered explicitly at startup; there is no discovery.

use crate::audit::{log_best_effort, AuditRow, AuditStore};
use crate::config::TenantPolicy;
use crate::dlp::{
    DlpEngine, Finding, Recommendation, RedactOptions, RedactionStyle, ScanOptions,
    ValidateOptions,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Regulated vertical a skill operates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vertical {
    Healthcare,
    Finance,
    Legal,
    General,
}

impl Vertical {
    /// Policy context used when guarding this vertical
    pub fn context(self) -> &'static str {
        match self {
            Self::Healthcare => "healthcare",
            Self::Finance => "finance",
            Self::Legal => "legal",
            Self::General => crate::dlp::DEFAULT_CONTEXT,
        }
    }
}

/// Subscription tier required to run a skill
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillTier {
    Standard,
    Professional,
    Enterprise,
}

/// Input to one skill run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillContext {
    pub tenant_id: String,
    pub input: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl SkillContext {
    pub fn new(tenant_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            input: input.into(),
            parameters: serde_json::Value::Null,
        }
    }
}

/// What a skill produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillOutput {
    pub text: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SkillOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: serde_json::Value::Null,
        }
    }
}

/// A unit of vertical-specific work
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique registry name
    fn name(&self) -> &str;

    fn vertical(&self) -> Vertical;

    fn tier(&self) -> SkillTier;

    /// Perform the work on already-validated input
    async fn execute(&self, ctx: &SkillContext) -> Result<SkillOutput>;
}

/// Public description of a registered skill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillInfo {
    pub name: String,
    pub vertical: Vertical,
    pub tier: SkillTier,
}

/// Explicit name → skill table
#[derive(Default)]
pub struct SkillRegistry {
    skills: BTreeMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill; names must be unique
    pub fn register(&mut self, skill: Arc<dyn Skill>) -> Result<()> {
        let name = skill.name().to_string();
        if self.skills.contains_key(&name) {
            return Err(Error::Skill(format!("Skill '{}' is already registered", name)));
        }
        tracing::debug!(skill = %name, vertical = ?skill.vertical(), "Registered skill");
        self.skills.insert(name, skill);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn list(&self) -> Vec<SkillInfo> {
        self.skills
            .values()
            .map(|s| SkillInfo {
                name: s.name().to_string(),
                vertical: s.vertical(),
                tier: s.tier(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

/// Result of a guarded skill run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRun {
    pub skill: String,
    /// Output with every BLOCK/REDACT span masked
    pub output: SkillOutput,
    /// Non-blocking input findings
    pub warnings: Vec<Finding>,
    pub redactions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_id: Option<String>,
}

/// Runs skills behind input validation and output redaction
pub struct SkillRunner {
    engine: DlpEngine,
    registry: Arc<SkillRegistry>,
    store: Arc<dyn AuditStore>,
    tenants: BTreeMap<String, TenantPolicy>,
}

impl SkillRunner {
    pub fn new(engine: DlpEngine, registry: Arc<SkillRegistry>, store: Arc<dyn AuditStore>) -> Self {
        Self {
            engine,
            registry,
            store,
            tenants: BTreeMap::new(),
        }
    }

    pub fn with_tenants(mut self, tenants: BTreeMap<String, TenantPolicy>) -> Self {
        self.tenants = tenants;
        self
    }

    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    pub async fn run(&self, name: &str, ctx: &SkillContext) -> Result<SkillRun> {
        let skill = self
            .registry
            .get(name)
            .ok_or_else(|| Error::Skill(format!("Unknown skill '{}'", name)))?;

        let engine = match self.tenants.get(&ctx.tenant_id) {
            Some(tenant) => self.engine.for_tenant(tenant),
            None => self.engine.clone(),
        };
        let context = skill.vertical().context();
        let operation = format!("skill:{}", name);

        let scan = engine.scan(&ctx.input, &ScanOptions::new(context));
        let verdict = engine.validate(&ctx.input, &ValidateOptions::new(context));

        if verdict.recommendation == Recommendation::BlockTransmission {
            let row = AuditRow::from_scan(&ctx.tenant_id, &operation, context, &ctx.input, &scan);
            log_best_effort(self.store.as_ref(), row).await;

            let types: Vec<&str> = verdict.blockers.iter().map(|f| f.pattern_type.as_str()).collect();
            tracing::info!(skill = %name, tenant = %ctx.tenant_id, "Skill input blocked");
            return Err(Error::Skill(format!(
                "Input to skill '{}' blocked: {}",
                name,
                types.join(", ")
            )));
        }

        let mut output = skill.execute(ctx).await?;

        let redacted = engine.redact(
            &output.text,
            &RedactOptions::new(context, RedactionStyle::Mask),
        );
        let redactions = redacted.redaction_count();
        output.text = redacted.text;

        let row = AuditRow::from_scan(&ctx.tenant_id, &operation, context, &ctx.input, &scan)
            .with_response(&output.text);
        let audit_id = log_best_effort(self.store.as_ref(), row).await;

        tracing::debug!(
            skill = %name,
            tenant = %ctx.tenant_id,
            redactions,
            "Skill run complete"
        );

        Ok(SkillRun {
            skill: name.to_string(),
            output,
            warnings: verdict.warnings,
            redactions,
            audit_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::FailingStore;
    use crate::audit::{AuditFilter, MemoryAuditStore};

    struct EchoSkill {
        vertical: Vertical,
    }

    #[async_trait]
    impl Skill for EchoSkill {
        fn name(&self) -> &str {
            "echo"
        }

        fn vertical(&self) -> Vertical {
            self.vertical
        }

        fn tier(&self) -> SkillTier {
            SkillTier::Standard
        }

        async fn execute(&self, ctx: &SkillContext) -> Result<SkillOutput> {
            Ok(SkillOutput::text(format!("echo: {}", ctx.input)))
        }
    }

    struct LeakySkill;

    #[async_trait]
    impl Skill for LeakySkill {
        fn name(&self) -> &str {
            "leaky"
        }

        fn vertical(&self) -> Vertical {
            Vertical::Healthcare
        }

        fn tier(&self) -> SkillTier {
            SkillTier::Enterprise
        }

        async fn execute(&self, _ctx: &SkillContext) -> Result<SkillOutput> {
            Ok(SkillOutput::text("Found chart for MRN: ABC123"))
        }
    }

    fn registry() -> Arc<SkillRegistry> {
        let mut registry = SkillRegistry::new();
        registry
            .register(Arc::new(EchoSkill {
                vertical: Vertical::General,
            }))
            .unwrap();
        registry.register(Arc::new(LeakySkill)).unwrap();
        Arc::new(registry)
    }

    fn runner(store: Arc<dyn AuditStore>) -> SkillRunner {
        SkillRunner::new(DlpEngine::new(false).unwrap(), registry(), store)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = SkillRegistry::new();
        registry
            .register(Arc::new(EchoSkill {
                vertical: Vertical::General,
            }))
            .unwrap();
        let err = registry
            .register(Arc::new(EchoSkill {
                vertical: Vertical::Finance,
            }))
            .unwrap_err();
        assert!(matches!(err, Error::Skill(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().vertical(), Vertical::General);
    }

    #[test]
    fn test_list_is_sorted_by_name() {
        let names: Vec<String> = registry().list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "leaky"]);
    }

    #[tokio::test]
    async fn test_clean_run_is_audited() {
        let store = Arc::new(MemoryAuditStore::new());
        let runner = runner(store.clone());
        let run = runner
            .run("echo", &SkillContext::new("t1", "hello there"))
            .await
            .unwrap();
        assert_eq!(run.output.text, "echo: hello there");
        assert_eq!(run.redactions, 0);
        assert!(run.audit_id.is_some());

        let rows = store.search(&AuditFilter::tenant("t1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].operation, "skill:echo");
        assert!(rows[0].response_hash.is_some());
    }

    #[tokio::test]
    async fn test_blocked_input_aborts() {
        let store = Arc::new(MemoryAuditStore::new());
        let runner = runner(store.clone());
        let err = runner
            .run("leaky", &SkillContext::new("t1", "Patient SSN: 555-12-3456"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ssn"));

        let rows = store.search(&AuditFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].blocked);
        assert!(rows[0].response_hash.is_none());
    }

    #[tokio::test]
    async fn test_output_is_redacted() {
        let runner = runner(Arc::new(MemoryAuditStore::new()));
        let run = runner
            .run("leaky", &SkillContext::new("t1", "summarize the visit"))
            .await
            .unwrap();
        assert!(!run.output.text.contains("ABC123"));
        assert!(run.output.text.contains("[MRN_REDACTED]"));
        assert_eq!(run.redactions, 1);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_run() {
        let runner = runner(Arc::new(FailingStore));
        let run = runner
            .run("echo", &SkillContext::new("t1", "hello"))
            .await
            .unwrap();
        assert_eq!(run.output.text, "echo: hello");
        assert!(run.audit_id.is_none());
    }

    #[tokio::test]
    async fn test_unknown_skill() {
        let runner = runner(Arc::new(MemoryAuditStore::new()));
        let err = runner.run("nope", &SkillContext::new("t1", "x")).await.unwrap_err();
        assert!(matches!(err, Error::Skill(_)));
    }

    #[test]
    fn test_warnings_surface_redactable_input() {
        let runner = runner(Arc::new(MemoryAuditStore::new()));
        let run = tokio_test::block_on(
            runner.run("echo", &SkillContext::new("t1", "ping jo@example.com")),
        )
        .unwrap();
        assert_eq!(run.warnings.len(), 1);
        assert_eq!(run.warnings[0].pattern_type, "email");
        assert_eq!(run.output.text, "echo: ping [EMAIL_REDACTED]");
    }

    #[test]
    fn test_vertical_contexts() {
        assert_eq!(Vertical::Healthcare.context(), "healthcare");
        assert_eq!(Vertical::General.context(), "general");
        assert!(SkillTier::Enterprise > SkillTier::Standard);
    }
}
