//! SafeDLP - Sensitive Data Governance Engine
//!
//! SafeDLP classifies text for regulated data (health, payment, personal,
//! credential), decides a policy action per finding, redacts or blocks
//! accordingly, and keeps a tamper-evident record of what happened.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           DlpEngine                               │
//! │  ┌────────────────┐   ┌────────────────┐                         │
//! │  │ PatternRegistry│   │ PolicyResolver │   (immutable, Arc-shared)│
//! │  └───────┬────────┘   └───────┬────────┘                         │
//! │          └─────────┬──────────┘                                   │
//! │               ┌────▼────┐                                         │
//! │  text ──────→ │ Scanner │ ──→ Findings (severity + action)        │
//! │               └────┬────┘                                         │
//! │          ┌─────────┴──────────┐                                   │
//! │     ┌────▼─────┐        ┌─────▼─────┐                             │
//! │     │ Redactor │        │ Validator │                             │
//! │     └──────────┘        └───────────┘                             │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                │ outcome
//! ┌──────────────────────────────▼───────────────────────────────────┐
//! │  Audit: rows (hashes + derived flags) and SHA-256 hash chains     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`dlp`]: Pattern registry, policy resolver, scanner, redactor, validator
//! - [`audit`]: Hash chain builder/verifier and append-only audit stores
//! - [`crypto`]: AES-256-GCM field encryption
//! - [`skills`]: Guarded execution of vertical skills
//! - [`api`]: HTTP API
//! - [`config`]: Configuration management

pub mod api;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod dlp;
pub mod error;
pub mod skills;

pub use config::SafeDlpConfig;
pub use dlp::DlpEngine;
pub use error::{Error, Result};
