//! Tamper-evident audit hash chain
//!
//! Each entry commits to its own canonical bytes and to the hash of the entry
//! before it, so editing, dropping or reordering any entry breaks every hash
//! from that point on. The canonical layout is positional and fixed so that
//! a verifier in any language can reproduce it byte for byte:
//!
//! ```text
//! "SAFEDLP-AUDIT-V1"                 16 bytes, ASCII
//! sequence                           u64, big-endian
//! record_id                          u32 BE length ++ UTF-8
//! record_type                        u32 BE length ++ UTF-8
//! tenant_id                          u32 BE length ++ UTF-8
//! action                             u32 BE length ++ UTF-8
//! actor                              u32 BE length ++ UTF-8 (empty when absent)
//! occurred_at                        u32 BE length ++ RFC 3339, millis, "Z"
//! attributes                         u32 BE length ++ JSON, keys sorted recursively
//!
//! block_hash = hex(SHA-256(canonical ++ previous_hash as ASCII hex))
//! trail_hash = hex(SHA-256(for each entry: canonical ++ previous_hash ++ block_hash))
//! ```

use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Version tag prefixed to every canonical encoding
pub const CANONICAL_TAG: &[u8] = b"SAFEDLP-AUDIT-V1";

/// Previous hash of the first entry when the caller supplies none
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A domain record to be sealed into a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    #[serde(default)]
    pub record_id: String,
    #[serde(default)]
    pub record_type: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl AuditRecord {
    pub fn new(
        record_id: impl Into<String>,
        record_type: impl Into<String>,
        tenant_id: impl Into<String>,
        action: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            record_type: record_type.into(),
            tenant_id: tenant_id.into(),
            action: action.into(),
            actor: None,
            occurred_at,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn check(&self, index: usize) -> Result<()> {
        let required = [
            ("record_id", &self.record_id),
            ("record_type", &self.record_type),
            ("tenant_id", &self.tenant_id),
            ("action", &self.action),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Validation { index, field });
            }
        }
        Ok(())
    }
}

/// A sealed chain entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// 1-based position within the chain
    pub sequence: u64,
    #[serde(flatten)]
    pub record: AuditRecord,
    pub previous_hash: String,
    pub block_hash: String,
}

/// An ordered, sealed set of audit entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditChain {
    pub chain_id: String,
    pub genesis_hash: String,
    pub entries: Vec<AuditEntry>,
    pub trail_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditChain {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of re-verifying a stored chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    /// Sequence position of the first entry that fails to verify
    pub first_divergence: Option<u64>,
    /// Entries examined, including a failing one
    pub entries_checked: usize,
    pub trail_hash_valid: bool,
}

/// Canonical byte encoding of one entry's content, excluding its hashes
pub fn canonical_bytes(sequence: u64, record: &AuditRecord) -> Vec<u8> {
    let occurred_at = record.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let attributes = canonical_json(&record.attributes);

    let mut buf = Vec::with_capacity(128 + attributes.len());
    buf.extend_from_slice(CANONICAL_TAG);
    buf.extend_from_slice(&sequence.to_be_bytes());
    for field in [
        record.record_id.as_str(),
        record.record_type.as_str(),
        record.tenant_id.as_str(),
        record.action.as_str(),
        record.actor.as_deref().unwrap_or(""),
        occurred_at.as_str(),
        attributes.as_str(),
    ] {
        put_field(&mut buf, field.as_bytes());
    }
    buf
}

fn put_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// JSON text with object keys sorted at every depth
fn canonical_json(attributes: &BTreeMap<String, serde_json::Value>) -> String {
    let sorted: serde_json::Map<String, serde_json::Value> = attributes
        .iter()
        .map(|(k, v)| (k.clone(), sort_keys(v)))
        .collect();
    serde_json::Value::Object(sorted).to_string()
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted = keys
                .into_iter()
                .map(|k| (k.clone(), sort_keys(&map[k])))
                .collect();
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

fn block_hash(canonical: &[u8], previous_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    hasher.update(previous_hash.as_bytes());
    hex(&hasher.finalize())
}

fn trail_hash(entries: &[AuditEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(canonical_bytes(entry.sequence, &entry.record));
        hasher.update(entry.previous_hash.as_bytes());
        hasher.update(entry.block_hash.as_bytes());
    }
    hex(&hasher.finalize())
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn is_hash(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Seal records, in the given order, into a new chain.
///
/// Every record is checked before anything is hashed; a missing identifying
/// field fails the whole build. Stored timestamps are truncated to the
/// millisecond, the precision the canonical encoding commits to.
pub fn build_chain(records: &[AuditRecord], genesis: Option<&str>) -> Result<AuditChain> {
    for (index, record) in records.iter().enumerate() {
        record.check(index)?;
    }

    let genesis_hash = match genesis {
        Some(hash) if is_hash(hash) => hash.to_string(),
        Some(hash) => {
            return Err(Error::Audit(format!(
                "Genesis hash must be 64 lowercase hex characters, got '{}'",
                hash
            )))
        }
        None => GENESIS_HASH.to_string(),
    };

    let mut entries = Vec::with_capacity(records.len());
    let mut previous = genesis_hash.clone();
    for (i, record) in records.iter().enumerate() {
        let sequence = i as u64 + 1;
        let mut record = record.clone();
        record.occurred_at = record.occurred_at.trunc_subsecs(3);
        let hash = block_hash(&canonical_bytes(sequence, &record), &previous);
        entries.push(AuditEntry {
            sequence,
            record,
            previous_hash: std::mem::replace(&mut previous, hash.clone()),
            block_hash: hash,
        });
    }

    let chain = AuditChain {
        chain_id: format!("chain-{}", uuid::Uuid::new_v4()),
        trail_hash: trail_hash(&entries),
        genesis_hash,
        entries,
        created_at: Utc::now(),
    };

    tracing::debug!(
        chain_id = %chain.chain_id,
        entries = chain.entries.len(),
        "Built audit chain"
    );

    Ok(chain)
}

/// Recompute every link of a stored chain, starting at its genesis
pub fn verify_chain(chain: &AuditChain) -> ChainVerification {
    let mut previous = chain.genesis_hash.as_str();
    let mut first_divergence = None;
    let mut entries_checked = 0;

    for (i, entry) in chain.entries.iter().enumerate() {
        let position = i as u64 + 1;
        entries_checked += 1;

        // Sub-millisecond digits are outside the hash, so any present were
        // added after sealing
        let intact = entry.sequence == position
            && entry.record.occurred_at == entry.record.occurred_at.trunc_subsecs(3)
            && entry.previous_hash == previous
            && block_hash(&canonical_bytes(entry.sequence, &entry.record), previous)
                == entry.block_hash;
        if !intact {
            first_divergence = Some(position);
            break;
        }
        previous = entry.block_hash.as_str();
    }

    let trail_hash_valid = trail_hash(&chain.entries) == chain.trail_hash;
    let valid = first_divergence.is_none() && trail_hash_valid;

    if !valid {
        tracing::warn!(
            chain_id = %chain.chain_id,
            first_divergence = ?first_divergence,
            trail_hash_valid,
            "Audit chain failed verification"
        );
    }

    ChainVerification {
        valid,
        first_divergence,
        entries_checked,
        trail_hash_valid,
    }
}
