//! Audit trail: tamper-evident hash chains and append-only persistence

pub mod chain;
pub mod store;

pub use chain::{
    build_chain, canonical_bytes, verify_chain, AuditChain, AuditEntry, AuditRecord,
    ChainVerification, GENESIS_HASH,
};
pub use store::{
    generate_trail, log_best_effort, sha256_hex, AuditFilter, AuditRow, AuditStore,
    FileAuditStore, MemoryAuditStore,
};
