//! SafeDLP - Sensitive Data Governance Engine
//!
//! Command-line front end: scan, redact and validate text, build and verify
//! audit chains, and serve the HTTP API.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use safedlp::{
    api::{self, AppState, RedactResponse},
    audit::{build_chain, generate_trail, verify_chain, AuditChain, AuditRecord, FileAuditStore},
    config::SafeDlpConfig,
    crypto::{seal_tokens, AesGcmCipher, FieldCipher, FieldKey},
    dlp::{Category, DlpEngine, RedactOptions, RedactionStyle, ScanOptions, ValidateOptions},
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the base64 field encryption key
const FIELD_KEY_ENV: &str = "SAFEDLP_FIELD_KEY";

#[derive(Parser)]
#[command(name = "safedlp")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Sensitive data classification, redaction and audit")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SAFEDLP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Arguments shared by the text commands
#[derive(clap::Args)]
struct TextArgs {
    /// Text to process (read from stdin when omitted)
    #[arg(short, long)]
    text: Option<String>,

    /// Policy context (healthcare, finance, legal, ...)
    #[arg(long)]
    context: Option<String>,

    /// Tenant whose overrides apply
    #[arg(long)]
    tenant: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify text and print findings
    Scan {
        #[command(flatten)]
        input: TextArgs,

        /// Only run patterns in these categories
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<Category>>,

        /// Include raw matched values in the output
        #[arg(long)]
        include_matches: bool,
    },

    /// Redact sensitive spans
    Redact {
        #[command(flatten)]
        input: TextArgs,

        /// mask, remove, hash or tokenize
        #[arg(long, default_value = "mask")]
        style: RedactionStyle,

        /// Keep punctuation and length when masking
        #[arg(long)]
        preserve_format: bool,
    },

    /// Decide whether text may be transmitted
    Validate {
        #[command(flatten)]
        input: TextArgs,

        /// Categories the caller may transmit
        #[arg(long, value_delimiter = ',')]
        allow: Vec<Category>,
    },

    /// Build or verify audit hash chains
    Chain {
        #[command(subcommand)]
        command: ChainCommands,
    },

    /// Start the HTTP API
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand)]
enum ChainCommands {
    /// Seal a JSON array of records into a chain
    Build {
        /// Records file
        #[arg(short, long)]
        input: PathBuf,

        /// Genesis hash (64 hex chars); all zeros when omitted
        #[arg(long)]
        genesis: Option<String>,

        /// Also persist the chain to the audit store
        #[arg(long)]
        persist: bool,
    },

    /// Verify a chain JSON file
    Verify {
        /// Chain file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr, so stdout stays machine-readable)
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("safedlp={},tower_http={}", log_level, log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // Load configuration
    let config = match &cli.config {
        Some(path) => SafeDlpConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SafeDlpConfig::default(),
    };

    match cli.command {
        Commands::Scan {
            input,
            categories,
            include_matches,
        } => {
            let (engine, context, text) = prepare(&config, &input)?;
            let mut options = ScanOptions::new(context).include_matches(include_matches);
            if let Some(categories) = categories {
                options = options.categories(categories);
            }
            print_json(&engine.scan(&text, &options))?;
        }
        Commands::Redact {
            input,
            style,
            preserve_format,
        } => {
            let (engine, context, text) = prepare(&config, &input)?;
            let cipher = if style == RedactionStyle::Tokenize {
                Some(field_cipher()?.with_context(|| {
                    format!("Tokenize requires {} to be set", FIELD_KEY_ENV)
                })?)
            } else {
                None
            };

            let options = RedactOptions::new(context, style).preserve_format(preserve_format);
            let result = engine.redact(&text, &options);
            let sealed_tokens = match &cipher {
                Some(cipher) if !result.tokens.is_empty() => Some(seal_tokens(
                    cipher.as_ref(),
                    &result.tokens,
                    input.tenant.as_deref().unwrap_or(""),
                )?),
                _ => None,
            };
            print_json(&RedactResponse {
                text: result.text,
                redactions: result.redactions,
                timestamp: result.timestamp,
                sealed_tokens,
            })?;
        }
        Commands::Validate { input, allow } => {
            let (engine, context, text) = prepare(&config, &input)?;
            let result = engine.validate(&text, &ValidateOptions::new(context).allow(allow));
            print_json(&result)?;
            if !result.is_valid {
                std::process::exit(2);
            }
        }
        Commands::Chain { command } => run_chain(&config, command).await?,
        Commands::Serve { host, port } => {
            run_server(config, host, port).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

/// Engine, context and input text for a text command
fn prepare(config: &SafeDlpConfig, input: &TextArgs) -> Result<(DlpEngine, String, String)> {
    let base = DlpEngine::from_config(config)?;
    let engine = match &input.tenant {
        Some(tenant) => base.for_tenant(&config.tenant(tenant)),
        None => base,
    };
    let context = input
        .context
        .clone()
        .unwrap_or_else(|| config.context_for(input.tenant.as_deref()));

    let text = match &input.text {
        Some(text) => text.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read text from stdin")?;
            buf
        }
    };
    if text.len() > config.engine.max_input_bytes {
        bail!(
            "Input is {} bytes; limit is {}",
            text.len(),
            config.engine.max_input_bytes
        );
    }

    Ok((engine, context, text))
}

/// Cipher from `SAFEDLP_FIELD_KEY`, if set
fn field_cipher() -> Result<Option<Arc<dyn FieldCipher>>> {
    match std::env::var(FIELD_KEY_ENV) {
        Ok(encoded) => {
            let key = FieldKey::from_base64(&encoded)?;
            let cipher: Arc<dyn FieldCipher> = Arc::new(AesGcmCipher::new(&key)?);
            Ok(Some(cipher))
        }
        Err(_) => Ok(None),
    }
}

async fn run_chain(config: &SafeDlpConfig, command: ChainCommands) -> Result<()> {
    match command {
        ChainCommands::Build {
            input,
            genesis,
            persist,
        } => {
            let records: Vec<AuditRecord> = read_json(&input)?;
            let chain = if persist {
                let store = FileAuditStore::new(config.storage.audit_dir()).await?;
                generate_trail(&store, &records, genesis.as_deref()).await?
            } else {
                build_chain(&records, genesis.as_deref())?
            };
            print_json(&chain)?;
        }
        ChainCommands::Verify { input } => {
            let chain: AuditChain = read_json(&input)?;
            let verification = verify_chain(&chain);
            print_json(&verification)?;
            if !verification.valid {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

async fn run_server(config: SafeDlpConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let engine = DlpEngine::from_config(&config)?;
    let store = Arc::new(FileAuditStore::new(config.storage.audit_dir()).await?);
    let mut state = AppState::new(engine, config, store);
    match field_cipher()? {
        Some(cipher) => state = state.with_cipher(cipher),
        None => tracing::info!("{} not set; tokenize redaction disabled", FIELD_KEY_ENV),
    }

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("SafeDLP API listening on {}", addr);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down...");
        })
        .await?;

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_config(config: Option<&SafeDlpConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
