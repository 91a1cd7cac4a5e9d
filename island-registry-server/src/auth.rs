// island-registry-server/src/auth.rs
// ============================================================================
// Module: Registry Identity Service
// Description: Credential resolution for API tokens and federated identity.
// Purpose: Provide strict, fail-closed authentication for publish requests.
// Dependencies: base64, ed25519-dalek, island-registry-core, reqwest, sha2
// ============================================================================

//! ## Overview
//! A publish request carries `Authorization: Bearer <credential>`. Three
//! dot-separated base64url segments mean a federated identity token; anything
//! else is treated as an opaque API token. API tokens resolve through their
//! SHA-256 fingerprint; the plaintext never touches the store. Federated
//! tokens are EdDSA JWTs verified against the provider's published key set,
//! cached with a TTL, a negative TTL on failure, and a stale fallback so a
//! flaky key server cannot block publishes that a cached key can serve.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as Base64Url;
use ed25519_dalek::Signature;
use ed25519_dalek::VerifyingKey;
use island_registry_core::PrincipalId;
use island_registry_core::RegistryError;
use island_registry_core::RegistryStore;
use island_registry_core::constant_time_eq_str;
use island_registry_core::hash_bytes;
use island_registry_core::hashing::HashAlgorithm;
use island_registry_core::now_millis;
use serde::Deserialize;
use thiserror::Error;

use crate::config::FederatedProviderConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted Authorization header length.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;
/// Timeout for provider key set fetches.
const KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Prefix carried by registry API tokens.
pub const API_TOKEN_PREFIX: &str = "isl_";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credential absent or malformed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Credential present but invalid.
    #[error("token invalid: {0}")]
    TokenInvalid(String),
    /// Credential expired.
    #[error("token expired")]
    TokenExpired,
    /// Store failure during token lookup.
    #[error("auth store failure: {0}")]
    Store(String),
}

impl From<AuthError> for RegistryError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unauthenticated(message) => Self::Unauthenticated(message),
            AuthError::TokenInvalid(message) => Self::TokenInvalid(message),
            AuthError::TokenExpired => Self::TokenExpired,
            AuthError::Store(message) => Self::Internal(message),
        }
    }
}

// ============================================================================
// SECTION: Principal
// ============================================================================

/// Federated identity extracted from a verified provider token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    /// Provider name from configuration.
    pub provider: String,
    /// Source repository asserted by the token.
    pub repository: String,
    /// Workflow reference asserted by the token.
    pub workflow: String,
    /// Commit SHA asserted by the token.
    pub commit: String,
    /// Environment asserted by the token, when present.
    pub environment: Option<String>,
}

/// Resolved caller identity for an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    /// Principal identifier.
    pub principal: PrincipalId,
    /// API token fingerprint, present for token auth.
    pub token_fingerprint: Option<String>,
    /// Federated identity, present for federated auth.
    pub federated: Option<FederatedIdentity>,
}

// ============================================================================
// SECTION: Bearer Parsing
// ============================================================================

/// Extracts the bearer credential from an Authorization header.
///
/// # Errors
///
/// Returns [`AuthError::Unauthenticated`] when the header is absent,
/// oversized, or not a bearer credential.
pub fn parse_bearer_token(auth_header: Option<&str>) -> Result<String, AuthError> {
    let header = auth_header
        .ok_or_else(|| AuthError::Unauthenticated("missing authorization".to_string()))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::Unauthenticated("authorization header too large".to_string()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Unauthenticated("invalid authorization header".to_string()));
    }
    Ok(token.to_string())
}

/// Returns true when the credential has JWT compact form.
#[must_use]
pub fn looks_like_jwt(credential: &str) -> bool {
    let segments: Vec<&str> = credential.split('.').collect();
    segments.len() == 3 && segments.iter().all(|segment| !segment.is_empty())
}

/// Returns the SHA-256 fingerprint of a bearer token.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    hash_bytes(HashAlgorithm::Sha256, token.as_bytes()).value
}

// ============================================================================
// SECTION: Identity Service
// ============================================================================

/// Resolves inbound credentials to principals.
pub struct IdentityService {
    /// Store used for API token lookup.
    store: Arc<dyn RegistryStore>,
    /// Federated verifier, present when a provider is configured.
    federated: Option<FederatedVerifier>,
}

impl IdentityService {
    /// Creates an identity service over the store and optional provider.
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, federated: Option<FederatedVerifier>) -> Self {
        Self {
            store,
            federated,
        }
    }

    /// Authenticates a request's Authorization header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the credential is absent or invalid.
    pub async fn authenticate(
        &self,
        auth_header: Option<&str>,
    ) -> Result<AuthenticatedPrincipal, AuthError> {
        let credential = parse_bearer_token(auth_header)?;
        if looks_like_jwt(&credential) {
            let Some(verifier) = &self.federated else {
                return Err(AuthError::TokenInvalid(
                    "no federated identity provider configured".to_string(),
                ));
            };
            let identity = verifier.verify(&credential).await?;
            let principal = PrincipalId::federated(&identity.provider, &identity.repository);
            return Ok(AuthenticatedPrincipal {
                principal,
                token_fingerprint: None,
                federated: Some(identity),
            });
        }

        let fingerprint = token_fingerprint(&credential);
        let record = self
            .store
            .lookup_token(&fingerprint)
            .map_err(|err| AuthError::Store(err.to_string()))?
            .ok_or_else(|| AuthError::TokenInvalid("unknown api token".to_string()))?;
        if !constant_time_eq_str(&record.fingerprint, &fingerprint) {
            return Err(AuthError::TokenInvalid("unknown api token".to_string()));
        }
        if record.is_expired_at(now_millis()) {
            return Err(AuthError::TokenExpired);
        }
        Ok(AuthenticatedPrincipal {
            principal: record.principal,
            token_fingerprint: Some(fingerprint),
            federated: None,
        })
    }
}

// ============================================================================
// SECTION: Federated Verification
// ============================================================================

/// JWT header fields the verifier inspects.
#[derive(Debug, Deserialize)]
struct JwtHeader {
    /// Signature algorithm.
    alg: String,
    /// Signing key identifier.
    kid: String,
}

/// Audience claim: providers emit a string or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    /// Single audience.
    One(String),
    /// Multiple audiences.
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Self::One(value) => value == expected,
            Self::Many(values) => values.iter().any(|value| value == expected),
        }
    }
}

/// Claims the verifier extracts from a federated token.
#[derive(Debug, Deserialize)]
struct FederatedClaims {
    /// Issuer.
    iss: String,
    /// Audience(s).
    aud: Audience,
    /// Expiry (unix seconds).
    exp: i64,
    /// Not-before (unix seconds), when present.
    nbf: Option<i64>,
    /// Source repository.
    repository: String,
    /// Workflow reference.
    workflow_ref: String,
    /// Commit SHA.
    sha: String,
    /// Deployment environment, when present.
    environment: Option<String>,
}

/// One entry in the provider's published key set.
#[derive(Debug, Deserialize)]
struct PublishedKey {
    /// Key identifier.
    kid: String,
    /// Base64-encoded 32-byte ed25519 public key.
    key: String,
}

/// Provider key set document.
#[derive(Debug, Deserialize)]
struct PublishedKeySet {
    /// Published keys.
    keys: Vec<PublishedKey>,
}

/// Cached provider signing keys.
#[derive(Default)]
struct KeyCache {
    /// Verified keys by key identifier.
    keys: HashMap<String, VerifyingKey>,
    /// When the keys were last refreshed.
    refreshed_at: Option<Instant>,
    /// When the last fetch failed.
    failed_at: Option<Instant>,
}

/// Verifies federated identity tokens against a configured provider.
pub struct FederatedVerifier {
    /// Provider configuration.
    config: FederatedProviderConfig,
    /// HTTP client for key set fetches.
    client: reqwest::Client,
    /// Signing key cache.
    cache: Mutex<KeyCache>,
}

impl FederatedVerifier {
    /// Creates a verifier for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the HTTP client cannot be built.
    pub fn new(config: FederatedProviderConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(KEY_FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| AuthError::Store(format!("key client build failed: {err}")))?;
        Ok(Self {
            config,
            client,
            cache: Mutex::new(KeyCache::default()),
        })
    }

    /// Creates a verifier with a fixed key set and no key server.
    ///
    /// Used for deployments that pin provider keys and for tests.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the HTTP client cannot be built.
    pub fn with_static_keys(
        config: FederatedProviderConfig,
        keys: Vec<(String, VerifyingKey)>,
    ) -> Result<Self, AuthError> {
        let verifier = Self::new(config)?;
        {
            let mut cache = verifier.lock_cache()?;
            cache.keys = keys.into_iter().collect();
            cache.refreshed_at = Some(Instant::now());
        }
        Ok(verifier)
    }

    /// Verifies a federated token and extracts its identity claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenInvalid`] on signature or claim failures and
    /// [`AuthError::TokenExpired`] on expiry.
    pub async fn verify(&self, token: &str) -> Result<FederatedIdentity, AuthError> {
        let mut segments = token.split('.');
        let (Some(header_raw), Some(payload_raw), Some(signature_raw), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return Err(AuthError::TokenInvalid("malformed token structure".to_string()));
        };

        let header: JwtHeader = decode_segment(header_raw)?;
        if header.alg != "EdDSA" {
            return Err(AuthError::TokenInvalid(format!(
                "unsupported signature algorithm: {}",
                header.alg
            )));
        }
        let claims: FederatedClaims = decode_segment(payload_raw)?;

        if claims.iss != self.config.issuer {
            return Err(AuthError::TokenInvalid("issuer mismatch".to_string()));
        }
        if !claims.aud.contains(&self.config.audience) {
            return Err(AuthError::TokenInvalid("audience mismatch".to_string()));
        }
        let now_secs = now_millis() / 1_000;
        if claims.exp <= now_secs {
            return Err(AuthError::TokenExpired);
        }
        if let Some(nbf) = claims.nbf
            && nbf > now_secs
        {
            return Err(AuthError::TokenInvalid("token not yet valid".to_string()));
        }

        let signature_bytes = Base64Url
            .decode(signature_raw)
            .map_err(|_| AuthError::TokenInvalid("invalid signature encoding".to_string()))?;
        let signature_bytes: [u8; 64] = signature_bytes
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::TokenInvalid("invalid signature length".to_string()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        let key = self.signing_key(&header.kid).await?;
        let signing_input = format!("{header_raw}.{payload_raw}");
        key.verify_strict(signing_input.as_bytes(), &signature)
            .map_err(|_| AuthError::TokenInvalid("signature verification failed".to_string()))?;

        Ok(FederatedIdentity {
            provider: self.config.provider.clone(),
            repository: claims.repository,
            workflow: claims.workflow_ref,
            commit: claims.sha,
            environment: claims.environment,
        })
    }

    /// Resolves a signing key, refreshing the cache when stale.
    async fn signing_key(&self, kid: &str) -> Result<VerifyingKey, AuthError> {
        let ttl = Duration::from_millis(self.config.key_cache_ttl_ms);
        let negative_ttl = Duration::from_millis(self.config.key_cache_negative_ttl_ms);
        let now = Instant::now();

        {
            let cache = self.lock_cache()?;
            let fresh = cache
                .refreshed_at
                .is_some_and(|refreshed| now.duration_since(refreshed) < ttl);
            if fresh && let Some(key) = cache.keys.get(kid) {
                return Ok(*key);
            }
            let backing_off = cache
                .failed_at
                .is_some_and(|failed| now.duration_since(failed) < negative_ttl);
            if backing_off {
                // Within the negative TTL, serve stale keys rather than hammer
                // the provider.
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(*key);
                }
                return Err(AuthError::TokenInvalid("unknown signing key".to_string()));
            }
        }

        match self.fetch_key_set().await {
            Ok(keys) => {
                let mut cache = self.lock_cache()?;
                cache.keys = keys;
                cache.refreshed_at = Some(Instant::now());
                cache.failed_at = None;
                cache
                    .keys
                    .get(kid)
                    .copied()
                    .ok_or_else(|| AuthError::TokenInvalid("unknown signing key".to_string()))
            }
            Err(err) => {
                let mut cache = self.lock_cache()?;
                cache.failed_at = Some(Instant::now());
                // Transient provider failure: fall back to the prior key set.
                if let Some(key) = cache.keys.get(kid) {
                    return Ok(*key);
                }
                Err(err)
            }
        }
    }

    /// Fetches and decodes the provider's key set document.
    async fn fetch_key_set(&self) -> Result<HashMap<String, VerifyingKey>, AuthError> {
        let response = self
            .client
            .get(&self.config.keys_url)
            .send()
            .await
            .map_err(|err| AuthError::TokenInvalid(format!("key fetch failed: {err}")))?;
        if !response.status().is_success() {
            return Err(AuthError::TokenInvalid(format!(
                "key fetch failed: status {}",
                response.status()
            )));
        }
        let key_set: PublishedKeySet = response
            .json()
            .await
            .map_err(|err| AuthError::TokenInvalid(format!("key set decode failed: {err}")))?;
        let mut keys = HashMap::new();
        for entry in key_set.keys {
            let key = decode_public_key(&entry.key)?;
            keys.insert(entry.kid, key);
        }
        Ok(keys)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, KeyCache>, AuthError> {
        self.cache.lock().map_err(|_| AuthError::Store("key cache poisoned".to_string()))
    }
}

/// Decodes one base64url JWT segment into a JSON value.
fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = Base64Url
        .decode(segment)
        .map_err(|_| AuthError::TokenInvalid("invalid token encoding".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| AuthError::TokenInvalid("invalid token payload".to_string()))
}

/// Decodes a base64 ed25519 public key.
fn decode_public_key(raw: &str) -> Result<VerifyingKey, AuthError> {
    let bytes = Base64
        .decode(raw.trim())
        .or_else(|_| Base64Url.decode(raw.trim()))
        .map_err(|_| AuthError::TokenInvalid("invalid public key encoding".to_string()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| AuthError::TokenInvalid("invalid public key length".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| AuthError::TokenInvalid("invalid ed25519 public key".to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use ed25519_dalek::Signer;
    use ed25519_dalek::SigningKey;
    use island_registry_core::ApiTokenRecord;
    use island_registry_core::InMemoryRegistryStore;
    use serde_json::json;

    use super::*;

    fn provider_config() -> FederatedProviderConfig {
        FederatedProviderConfig {
            provider: "github".to_string(),
            issuer: "https://token.actions.example".to_string(),
            audience: "island-registry".to_string(),
            keys_url: "https://token.actions.example/.well-known/jwks".to_string(),
            key_cache_ttl_ms: 300_000,
            key_cache_negative_ttl_ms: 30_000,
        }
    }

    fn sign_token(key: &SigningKey, kid: &str, claims: &serde_json::Value) -> String {
        let header = json!({ "alg": "EdDSA", "kid": kid });
        let header = Base64Url.encode(serde_json::to_vec(&header).unwrap());
        let payload = Base64Url.encode(serde_json::to_vec(claims).unwrap());
        let signing_input = format!("{header}.{payload}");
        let signature = key.sign(signing_input.as_bytes());
        format!("{signing_input}.{}", Base64Url.encode(signature.to_bytes()))
    }

    fn valid_claims() -> serde_json::Value {
        json!({
            "iss": "https://token.actions.example",
            "aud": "island-registry",
            "exp": now_millis() / 1_000 + 600,
            "repository": "alice/pokemon-emerald",
            "workflow_ref": "alice/pokemon-emerald/.github/workflows/release.yml@refs/tags/v1",
            "sha": "0123456789abcdef",
        })
    }

    #[test]
    fn bearer_parsing_rejects_malformed_headers() {
        assert!(parse_bearer_token(None).is_err());
        assert!(parse_bearer_token(Some("Basic abc")).is_err());
        assert!(parse_bearer_token(Some("Bearer ")).is_err());
        assert_eq!(parse_bearer_token(Some("Bearer isl_abc")).unwrap(), "isl_abc");
        assert_eq!(parse_bearer_token(Some("bearer isl_abc")).unwrap(), "isl_abc");
    }

    #[test]
    fn jwt_shape_detection() {
        assert!(looks_like_jwt("aaa.bbb.ccc"));
        assert!(!looks_like_jwt("isl_token"));
        assert!(!looks_like_jwt("aaa.bbb"));
        assert!(!looks_like_jwt("aaa..ccc"));
    }

    #[tokio::test]
    async fn api_token_resolves_to_principal() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let token = format!("{API_TOKEN_PREFIX}sekrit");
        store
            .insert_token(ApiTokenRecord {
                fingerprint: token_fingerprint(&token),
                principal: PrincipalId::new("alice"),
                created_at: now_millis(),
                expires_at: None,
            })
            .unwrap();
        let identity = IdentityService::new(store, None);
        let principal =
            identity.authenticate(Some(&format!("Bearer {token}"))).await.unwrap();
        assert_eq!(principal.principal.as_str(), "alice");
        assert!(principal.federated.is_none());
    }

    #[tokio::test]
    async fn expired_api_token_is_rejected() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let token = format!("{API_TOKEN_PREFIX}old");
        store
            .insert_token(ApiTokenRecord {
                fingerprint: token_fingerprint(&token),
                principal: PrincipalId::new("alice"),
                created_at: 0,
                expires_at: Some(1),
            })
            .unwrap();
        let identity = IdentityService::new(store, None);
        let err = identity.authenticate(Some(&format!("Bearer {token}"))).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn unknown_api_token_is_rejected() {
        let identity = IdentityService::new(Arc::new(InMemoryRegistryStore::new()), None);
        let err = identity.authenticate(Some("Bearer isl_ghost")).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid(_)));
    }

    #[tokio::test]
    async fn federated_token_verifies_and_extracts_claims() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = FederatedVerifier::with_static_keys(provider_config(), vec![(
            "k1".to_string(),
            key.verifying_key(),
        )])
        .unwrap();
        let token = sign_token(&key, "k1", &valid_claims());
        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.repository, "alice/pokemon-emerald");
        assert_eq!(identity.commit, "0123456789abcdef");
        assert!(identity.environment.is_none());
    }

    #[tokio::test]
    async fn federated_token_with_wrong_audience_is_rejected() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = FederatedVerifier::with_static_keys(provider_config(), vec![(
            "k1".to_string(),
            key.verifying_key(),
        )])
        .unwrap();
        let mut claims = valid_claims();
        claims["aud"] = json!("someone-else");
        let err = verifier.verify(&sign_token(&key, "k1", &claims)).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid(_)));
    }

    #[tokio::test]
    async fn expired_federated_token_is_rejected() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let verifier = FederatedVerifier::with_static_keys(provider_config(), vec![(
            "k1".to_string(),
            key.verifying_key(),
        )])
        .unwrap();
        let mut claims = valid_claims();
        claims["exp"] = json!(1);
        let err = verifier.verify(&sign_token(&key, "k1", &claims)).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn tampered_federated_token_is_rejected() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let verifier = FederatedVerifier::with_static_keys(provider_config(), vec![(
            "k1".to_string(),
            key.verifying_key(),
        )])
        .unwrap();
        let err = verifier.verify(&sign_token(&other, "k1", &valid_claims())).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid(_)));
    }
}
