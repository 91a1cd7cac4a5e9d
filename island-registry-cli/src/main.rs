// island-registry-cli/src/main.rs
// ============================================================================
// Module: Island Registry CLI Entry Point
// Description: Command dispatcher for the registry server and token tooling.
// Purpose: Run the registry and mint API tokens from one binary.
// Dependencies: clap, island-registry-server, rand, tokio
// ============================================================================

//! ## Overview
//! `island-registry serve` runs the HTTP server from a TOML config file.
//! `island-registry token generate` mints an API token, stores only its
//! SHA-256 fingerprint, and prints the plaintext exactly once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use island_registry_core::ApiTokenRecord;
use island_registry_core::PrincipalId;
use island_registry_core::RegistryStore;
use island_registry_core::digest::to_hex;
use island_registry_core::now_millis;
use island_registry_server::API_TOKEN_PREFIX;
use island_registry_server::RegistryConfig;
use island_registry_server::RegistryServer;
use island_registry_server::StoreType;
use island_registry_server::token_fingerprint;
use island_registry_store_sqlite::SqliteRegistryStore;
use island_registry_store_sqlite::SqliteStoreConfig;
use rand::RngCore;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Random bytes of entropy behind each API token.
const TOKEN_ENTROPY_BYTES: usize = 24;
/// Milliseconds per day, for token expiry math.
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1_000;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "island-registry", version, about = "Island package registry")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the registry HTTP server.
    Serve {
        /// Config file path; falls back to ISLAND_REGISTRY_CONFIG.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// API token management.
    Token {
        /// Selected token subcommand.
        #[command(subcommand)]
        command: TokenCommand,
    },
}

/// Token management subcommands.
#[derive(Subcommand, Debug)]
enum TokenCommand {
    /// Mint a new API token for a principal.
    Generate {
        /// Principal the token is bound to.
        #[arg(long)]
        principal: String,
        /// Config file path; falls back to ISLAND_REGISTRY_CONFIG.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Optional expiry in days from now.
        #[arg(long)]
        expires_days: Option<i64>,
    },
    /// Revoke an API token by its fingerprint.
    Revoke {
        /// Fingerprint printed at generation time.
        #[arg(long)]
        fingerprint: String,
        /// Config file path; falls back to ISLAND_REGISTRY_CONFIG.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failure.
    #[error("config error: {0}")]
    Config(String),
    /// Server failure.
    #[error("server error: {0}")]
    Server(String),
    /// Store failure.
    #[error("store error: {0}")]
    Store(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("island-registry: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Serve { config } => serve(config.as_deref()).await,
        Commands::Token { command } => match command {
            TokenCommand::Generate { principal, config, expires_days } => {
                generate_token(&principal, config.as_deref(), expires_days)
            }
            TokenCommand::Revoke { fingerprint, config } => {
                revoke_token(&fingerprint, config.as_deref())
            }
        },
    }
}

/// Runs the registry server until the process exits.
async fn serve(config_path: Option<&std::path::Path>) -> Result<(), CliError> {
    let config = RegistryConfig::load(config_path)
        .map_err(|err| CliError::Config(err.to_string()))?;
    let max_body_bytes = config.server.max_body_bytes;
    let server =
        RegistryServer::from_config(&config).map_err(|err| CliError::Server(err.to_string()))?;
    eprintln!("island-registry: listening on {}", config.server.bind);
    server.serve(max_body_bytes).await.map_err(|err| CliError::Server(err.to_string()))
}

/// Mints a token, stores its fingerprint, and prints the plaintext once.
fn generate_token(
    principal: &str,
    config_path: Option<&std::path::Path>,
    expires_days: Option<i64>,
) -> Result<(), CliError> {
    let store = open_token_store(config_path)?;
    let mut entropy = [0u8; TOKEN_ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut entropy);
    let token = format!("{API_TOKEN_PREFIX}{}", to_hex(&entropy));
    let fingerprint = token_fingerprint(&token);
    let now = now_millis();
    store
        .insert_token(ApiTokenRecord {
            fingerprint: fingerprint.clone(),
            principal: PrincipalId::new(principal),
            created_at: now,
            expires_at: expires_days.map(|days| now + days * MILLIS_PER_DAY),
        })
        .map_err(|err| CliError::Store(err.to_string()))?;
    println!("token: {token}");
    println!("fingerprint: {fingerprint}");
    println!("The token is shown once; only the fingerprint is stored.");
    Ok(())
}

/// Revokes a token by deleting its fingerprint.
fn revoke_token(fingerprint: &str, config_path: Option<&std::path::Path>) -> Result<(), CliError> {
    let store = open_token_store(config_path)?;
    store.revoke_token(fingerprint).map_err(|err| CliError::Store(err.to_string()))?;
    println!("revoked {fingerprint}");
    Ok(())
}

/// Opens the durable store for token management.
fn open_token_store(
    config_path: Option<&std::path::Path>,
) -> Result<Arc<dyn RegistryStore>, CliError> {
    let config = RegistryConfig::load(config_path)
        .map_err(|err| CliError::Config(err.to_string()))?;
    if config.store.store_type != StoreType::Sqlite {
        return Err(CliError::Config(
            "token management requires the sqlite store backend".to_string(),
        ));
    }
    let path = config
        .store
        .path
        .ok_or_else(|| CliError::Config("store.path is required for sqlite".to_string()))?;
    let store = SqliteRegistryStore::new(SqliteStoreConfig {
        path,
        busy_timeout_ms: config.store.busy_timeout_ms,
        journal_mode: config.store.journal_mode,
        sync_mode: config.store.sync_mode,
    })
    .map_err(|err| CliError::Store(err.to_string()))?;
    Ok(Arc::new(store))
}
