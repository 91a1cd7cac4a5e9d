// island-registry-server/src/config.rs
// ============================================================================
// Module: Registry Configuration
// Description: Configuration loading and validation for the registry server.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: island-registry-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed: the server refuses to start
//! rather than fall back to permissive defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use island_registry_store_sqlite::SqliteStoreMode;
use island_registry_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "island-registry.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "ISLAND_REGISTRY_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Default bind address.
const DEFAULT_BIND: &str = "127.0.0.1:8319";
/// Default maximum request body size in bytes.
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
/// Maximum allowed request body size in bytes.
const MAX_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
/// Default artifact size ceiling in bytes (256 MiB).
const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 256 * 1024 * 1024;
/// Default per-artifact fetch timeout in milliseconds.
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 60_000;
/// Default whole-publish deadline in milliseconds.
const DEFAULT_PUBLISH_DEADLINE_MS: u64 = 300_000;
/// Default redirect hop limit for artifact fetches.
const DEFAULT_REDIRECT_LIMIT: u32 = 5;
/// Maximum allowed redirect hop limit.
const MAX_REDIRECT_LIMIT: u32 = 10;
/// Default bound on concurrent fetches within one publish.
const DEFAULT_MAX_PARALLEL_FETCHES: usize = 8;
/// Default user agent for outbound fetches.
const DEFAULT_USER_AGENT: &str = "island-registry/0.1";
/// Default refill rate for the rate limiter (requests per minute).
const DEFAULT_RATE_PER_MINUTE: u32 = 100;
/// Default burst capacity for the rate limiter.
const DEFAULT_RATE_BURST: u32 = 20;
/// Default token cost of a publish request.
const DEFAULT_PUBLISH_COST: u32 = 10;
/// Default bound on tracked rate-limit buckets.
const DEFAULT_RATE_MAX_ENTRIES: usize = 4_096;
/// Maximum allowed tracked rate-limit buckets.
const MAX_RATE_MAX_ENTRIES: usize = 65_536;
/// Default signing-key cache TTL in milliseconds.
const DEFAULT_KEY_CACHE_TTL_MS: u64 = 300_000;
/// Default negative TTL after a failed key fetch, in milliseconds.
const DEFAULT_KEY_CACHE_NEGATIVE_TTL_MS: u64 = 30_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file I/O failure.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Island registry server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Store backend configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Artifact fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Rate limiter configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Federated identity provider configuration.
    #[serde(default)]
    pub federated: Option<FederatedProviderConfig>,
    /// Audit sink configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (`host:port`).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// In-memory store (non-durable; tests and experiments).
    #[default]
    Memory,
    /// Durable `SQLite` store.
    Sqlite,
}

/// Store backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Selected store backend.
    #[serde(default)]
    pub store_type: StoreType,
    /// Database path, required for the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// `SQLite` busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Artifact fetch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    /// Artifact size ceiling in bytes.
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,
    /// Per-artifact fetch timeout in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Whole-publish deadline in milliseconds.
    #[serde(default = "default_publish_deadline_ms")]
    pub publish_deadline_ms: u64,
    /// Redirect hop limit; each hop is re-checked for HTTPS.
    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: u32,
    /// Bound on concurrent fetches within one publish.
    #[serde(default = "default_max_parallel_fetches")]
    pub max_parallel_fetches: usize,
    /// User agent for outbound requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_artifact_bytes: default_max_artifact_bytes(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            publish_deadline_ms: default_publish_deadline_ms(),
            redirect_limit: default_redirect_limit(),
            max_parallel_fetches: default_max_parallel_fetches(),
            user_agent: default_user_agent(),
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Token refill rate in requests per minute.
    #[serde(default = "default_rate_per_minute")]
    pub requests_per_minute: u32,
    /// Burst capacity of each bucket.
    #[serde(default = "default_rate_burst")]
    pub burst: u32,
    /// Token cost of a publish request; reads cost one.
    #[serde(default = "default_publish_cost")]
    pub publish_cost: u32,
    /// Bound on tracked buckets; idle buckets are evicted past this.
    #[serde(default = "default_rate_max_entries")]
    pub max_entries: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rate_per_minute(),
            burst: default_rate_burst(),
            publish_cost: default_publish_cost(),
            max_entries: default_rate_max_entries(),
        }
    }
}

/// Federated identity provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FederatedProviderConfig {
    /// Provider name used in principal identifiers (e.g. `github`).
    pub provider: String,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Expected audience for this registry.
    pub audience: String,
    /// URL of the provider's published signing-key set.
    pub keys_url: String,
    /// Signing-key cache TTL in milliseconds.
    #[serde(default = "default_key_cache_ttl_ms")]
    pub key_cache_ttl_ms: u64,
    /// Negative TTL after a failed key fetch, in milliseconds.
    #[serde(default = "default_key_cache_negative_ttl_ms")]
    pub key_cache_negative_ttl_ms: u64,
}

/// Audit sink configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    /// Optional audit log file; stderr when absent.
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

const fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_max_artifact_bytes() -> u64 {
    DEFAULT_MAX_ARTIFACT_BYTES
}

const fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

const fn default_publish_deadline_ms() -> u64 {
    DEFAULT_PUBLISH_DEADLINE_MS
}

const fn default_redirect_limit() -> u32 {
    DEFAULT_REDIRECT_LIMIT
}

const fn default_max_parallel_fetches() -> usize {
    DEFAULT_MAX_PARALLEL_FETCHES
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

const fn default_rate_per_minute() -> u32 {
    DEFAULT_RATE_PER_MINUTE
}

const fn default_rate_burst() -> u32 {
    DEFAULT_RATE_BURST
}

const fn default_publish_cost() -> u32 {
    DEFAULT_PUBLISH_COST
}

const fn default_rate_max_entries() -> usize {
    DEFAULT_RATE_MAX_ENTRIES
}

const fn default_key_cache_ttl_ms() -> u64 {
    DEFAULT_KEY_CACHE_TTL_MS
}

const fn default_key_cache_negative_ttl_ms() -> u64 {
    DEFAULT_KEY_CACHE_NEGATIVE_TTL_MS
}

const fn default_audit_enabled() -> bool {
    true
}

// ============================================================================
// SECTION: Loading and Validation
// ============================================================================

impl RegistryConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// Resolution: explicit path, then `ISLAND_REGISTRY_CONFIG`, then
    /// `island-registry.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Parse("config file is not utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration, failing closed on every violation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid("server.bind is not a socket address".to_string()))?;
        if self.server.max_body_bytes == 0 || self.server.max_body_bytes > MAX_MAX_BODY_BYTES {
            return Err(ConfigError::Invalid(format!(
                "server.max_body_bytes must be 1..={MAX_MAX_BODY_BYTES}"
            )));
        }
        if self.store.store_type == StoreType::Sqlite && self.store.path.is_none() {
            return Err(ConfigError::Invalid("store.path is required for sqlite".to_string()));
        }
        if self.fetch.max_artifact_bytes == 0 {
            return Err(ConfigError::Invalid("fetch.max_artifact_bytes must be > 0".to_string()));
        }
        if self.fetch.fetch_timeout_ms == 0 || self.fetch.publish_deadline_ms == 0 {
            return Err(ConfigError::Invalid("fetch timeouts must be > 0".to_string()));
        }
        if self.fetch.redirect_limit > MAX_REDIRECT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "fetch.redirect_limit must be <= {MAX_REDIRECT_LIMIT}"
            )));
        }
        if self.fetch.max_parallel_fetches == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_parallel_fetches must be > 0".to_string(),
            ));
        }
        if self.rate_limit.requests_per_minute == 0 || self.rate_limit.burst == 0 {
            return Err(ConfigError::Invalid("rate_limit rate and burst must be > 0".to_string()));
        }
        if self.rate_limit.publish_cost == 0 || self.rate_limit.publish_cost > self.rate_limit.burst
        {
            return Err(ConfigError::Invalid(
                "rate_limit.publish_cost must be 1..=burst".to_string(),
            ));
        }
        if self.rate_limit.max_entries == 0 || self.rate_limit.max_entries > MAX_RATE_MAX_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.max_entries must be 1..={MAX_RATE_MAX_ENTRIES}"
            )));
        }
        if let Some(federated) = &self.federated {
            if federated.provider.is_empty()
                || federated.issuer.is_empty()
                || federated.audience.is_empty()
            {
                return Err(ConfigError::Invalid(
                    "federated provider, issuer, and audience must be set".to_string(),
                ));
            }
            if !federated.keys_url.starts_with("https://") {
                return Err(ConfigError::Invalid(
                    "federated.keys_url must be https".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Resolves the config path from argument, environment, or default.
fn resolve_path(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path {
        return path.to_path_buf();
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR)
        && !env_path.is_empty()
    {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONFIG_NAME)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn default_config_validates() {
        RegistryConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_minimal_toml() {
        let config: RegistryConfig = toml::from_str(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [store]
            store_type = "sqlite"
            path = "/tmp/registry.sqlite"

            [federated]
            provider = "github"
            issuer = "https://token.actions.githubusercontent.com"
            audience = "island-registry"
            keys_url = "https://token.actions.githubusercontent.com/.well-known/jwks"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.store.store_type, StoreType::Sqlite);
    }

    #[test]
    fn sqlite_without_path_fails_closed() {
        let config: RegistryConfig = toml::from_str(
            r#"
            [store]
            store_type = "sqlite"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_sections() {
        let parsed = toml::from_str::<RegistryConfig>(
            r#"
            [surprise]
            value = 1
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn rejects_http_keys_url() {
        let config: RegistryConfig = toml::from_str(
            r#"
            [federated]
            provider = "github"
            issuer = "https://issuer"
            audience = "aud"
            keys_url = "http://insecure/jwks"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
