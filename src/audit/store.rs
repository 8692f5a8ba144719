//! Append-only audit persistence
//!
//! Directory layout of the file-backed store:
//! ```text
//! ~/.safedlp/audit/
//! ├── rows/
//! │   ├── row-<uuid>.json
//! │   └── ...
//! └── chains/
//!     ├── chain-<uuid>.json
//!     └── ...
//! ```
//!
//! Rows carry SHA-256 digests of request and response bodies plus booleans
//! derived from finding categories. Raw payloads are never written.

use super::chain::{build_chain, hex, AuditChain, AuditRecord};
use crate::dlp::{Category, ScanResult};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// One routine audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    /// Assigned by the store on append
    #[serde(default)]
    pub id: String,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub context: String,
    pub request_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_hash: Option<String>,
    pub phi_present: bool,
    pub pii_present: bool,
    pub pci_present: bool,
    pub finding_types: Vec<String>,
    pub blocked: bool,
    pub total_matches: usize,
}

impl AuditRow {
    /// Row describing a scan of `request`; only its digest is kept
    pub fn from_scan(
        tenant_id: impl Into<String>,
        operation: impl Into<String>,
        context: impl Into<String>,
        request: &str,
        scan: &ScanResult,
    ) -> Self {
        Self {
            id: String::new(),
            tenant_id: tenant_id.into(),
            timestamp: Utc::now(),
            operation: operation.into(),
            context: context.into(),
            request_hash: sha256_hex(request),
            response_hash: None,
            phi_present: scan.has_category(Category::Phi),
            pii_present: scan.has_category(Category::Pii),
            pci_present: scan.has_category(Category::Pci),
            finding_types: scan.findings.iter().map(|f| f.pattern_type.clone()).collect(),
            blocked: scan.blockers().next().is_some(),
            total_matches: scan.total_matches,
        }
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.response_hash = Some(sha256_hex(response));
        self
    }
}

/// Lowercase hex SHA-256 of a UTF-8 body
pub fn sha256_hex(body: &str) -> String {
    hex(&Sha256::digest(body.as_bytes()))
}

/// Row search criteria; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    #[serde(default, alias = "tenant")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub blocked_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, row: &AuditRow) -> bool {
        if let Some(tenant) = &self.tenant_id {
            if &row.tenant_id != tenant {
                return false;
            }
        }
        if let Some(since) = self.since {
            if row.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if row.timestamp > until {
                return false;
            }
        }
        if let Some(op) = &self.operation {
            if &row.operation != op {
                return false;
            }
        }
        !self.blocked_only || row.blocked
    }

    /// Filter, order newest first and truncate
    fn apply<'a>(&self, rows: impl Iterator<Item = &'a AuditRow>) -> Vec<AuditRow> {
        let mut matched: Vec<AuditRow> = rows.filter(|r| self.matches(r)).cloned().collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}

/// Durable, append-only audit persistence
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a row and return its assigned id
    async fn append(&self, row: AuditRow) -> Result<String>;

    /// Rows matching the filter, newest first
    async fn search(&self, filter: &AuditFilter) -> Result<Vec<AuditRow>>;

    /// Persist a sealed chain; an existing chain id is never overwritten
    async fn append_chain(&self, chain: &AuditChain) -> Result<()>;

    async fn get_chain(&self, chain_id: &str) -> Result<Option<AuditChain>>;
}

fn new_row_id() -> String {
    format!("row-{}", uuid::Uuid::new_v4())
}

// =============================================================================
// In-memory store
// =============================================================================

/// Volatile store for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    rows: RwLock<Vec<AuditRow>>,
    chains: RwLock<HashMap<String, AuditChain>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, mut row: AuditRow) -> Result<String> {
        row.id = new_row_id();
        let id = row.id.clone();
        self.rows.write().await.push(row);
        Ok(id)
    }

    async fn search(&self, filter: &AuditFilter) -> Result<Vec<AuditRow>> {
        let rows = self.rows.read().await;
        Ok(filter.apply(rows.iter()))
    }

    async fn append_chain(&self, chain: &AuditChain) -> Result<()> {
        let mut chains = self.chains.write().await;
        if chains.contains_key(&chain.chain_id) {
            return Err(Error::Store(format!("Chain {} already exists", chain.chain_id)));
        }
        chains.insert(chain.chain_id.clone(), chain.clone());
        Ok(())
    }

    async fn get_chain(&self, chain_id: &str) -> Result<Option<AuditChain>> {
        Ok(self.chains.read().await.get(chain_id).cloned())
    }
}

// =============================================================================
// File-backed store
// =============================================================================

/// Store writing one JSON file per row and per chain
pub struct FileAuditStore {
    rows_dir: PathBuf,
    chains_dir: PathBuf,
    rows: Arc<RwLock<Vec<AuditRow>>>,
}

impl FileAuditStore {
    /// Open (or create) a store at the given base directory
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        let rows_dir = base_dir.join("rows");
        let chains_dir = base_dir.join("chains");

        tokio::fs::create_dir_all(&rows_dir).await?;
        tokio::fs::create_dir_all(&chains_dir).await?;

        let rows = load_json_files::<AuditRow>(&rows_dir);
        tracing::info!(
            dir = %base_dir.display(),
            rows = rows.len(),
            "Opened audit store"
        );

        Ok(Self {
            rows_dir,
            chains_dir,
            rows: Arc::new(RwLock::new(rows)),
        })
    }

    fn chain_path(&self, chain_id: &str) -> Option<PathBuf> {
        let safe = !chain_id.is_empty()
            && chain_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.chains_dir.join(format!("{}.json", chain_id)))
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn append(&self, mut row: AuditRow) -> Result<String> {
        row.id = new_row_id();
        let path = self.rows_dir.join(format!("{}.json", row.id));
        write_new(&path, &serde_json::to_string_pretty(&row)?).await?;

        let id = row.id.clone();
        self.rows.write().await.push(row);
        Ok(id)
    }

    async fn search(&self, filter: &AuditFilter) -> Result<Vec<AuditRow>> {
        let rows = self.rows.read().await;
        Ok(filter.apply(rows.iter()))
    }

    async fn append_chain(&self, chain: &AuditChain) -> Result<()> {
        let path = self
            .chain_path(&chain.chain_id)
            .ok_or_else(|| Error::Store(format!("Invalid chain id '{}'", chain.chain_id)))?;
        write_new(&path, &serde_json::to_string_pretty(chain)?).await
    }

    async fn get_chain(&self, chain_id: &str) -> Result<Option<AuditChain>> {
        let Some(path) = self.chain_path(chain_id) else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Create a file that must not already exist
async fn write_new(path: &Path, json: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => {
                Error::Store(format!("{} already exists", path.display()))
            }
            _ => Error::Io(e),
        })?;
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Load all JSON files from a directory into a Vec
fn load_json_files<T: serde::de::DeserializeOwned>(dir: &Path) -> Vec<T> {
    let mut items = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
            }
            return items;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
            }
        }
    }

    items
}

// =============================================================================
// Logging policies
// =============================================================================

/// Append a routine row; a store failure is logged and swallowed
pub async fn log_best_effort(store: &dyn AuditStore, row: AuditRow) -> Option<String> {
    let operation = row.operation.clone();
    match store.append(row).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(operation = %operation, "Audit logging failed, continuing: {}", e);
            None
        }
    }
}

/// Build a chain from `records` and persist it; the chain is the deliverable,
/// so a store failure fails the whole operation
pub async fn generate_trail(
    store: &dyn AuditStore,
    records: &[AuditRecord],
    genesis: Option<&str>,
) -> Result<AuditChain> {
    let chain = build_chain(records, genesis)?;
    if let Err(e) = store.append_chain(&chain).await {
        tracing::error!(chain_id = %chain.chain_id, "Failed to persist audit trail: {}", e);
        return Err(e);
    }
    tracing::info!(
        chain_id = %chain.chain_id,
        entries = chain.len(),
        "Audit trail generated"
    );
    Ok(chain)
}

/// Store whose every write fails
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
#[async_trait]
impl AuditStore for FailingStore {
    async fn append(&self, _row: AuditRow) -> Result<String> {
        Err(Error::Store("disk full".to_string()))
    }

    async fn search(&self, _filter: &AuditFilter) -> Result<Vec<AuditRow>> {
        Ok(Vec::new())
    }

    async fn append_chain(&self, _chain: &AuditChain) -> Result<()> {
        Err(Error::Store("disk full".to_string()))
    }

    async fn get_chain(&self, _chain_id: &str) -> Result<Option<AuditChain>> {
        Ok(None)
    }
}
