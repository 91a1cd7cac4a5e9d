// island-registry-server/src/fetcher.rs
// ============================================================================
// Module: Artifact Fetcher
// Description: Verifying HTTPS fetch of externally hosted artifacts.
// Purpose: Stream artifact bytes through digest and size verification.
// Dependencies: async-trait, island-registry-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! The fetcher performs a HEAD probe then a GET against a registered URL with
//! HTTPS-only scheme enforcement, a response-size ceiling, a total-time
//! deadline, and a bounded manual redirect chain where every hop is
//! re-checked for HTTPS. The body streams into the digest service; nothing is
//! buffered whole and nothing partial ever reaches the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use island_registry_core::RegistryError;
use island_registry_core::StreamingDigest;
use island_registry_core::digest_error_for_url;
use island_registry_core::verify_digest;
use reqwest::Url;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;

use crate::config::FetchConfig;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Verifying fetch of one externally hosted artifact.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetches the URL and verifies digest and size against declared values.
    ///
    /// # Errors
    ///
    /// Returns fetch-kind [`RegistryError`] variants, or digest/size
    /// mismatches carrying the offending URL.
    async fn fetch_and_verify(
        &self,
        url: &str,
        declared_sha256: &str,
        declared_size: u64,
    ) -> Result<(), RegistryError>;
}

// ============================================================================
// SECTION: HTTP Implementation
// ============================================================================

/// Production fetcher over reqwest with redirects disabled.
pub struct HttpArtifactFetcher {
    /// Fetch limits and policy.
    config: FetchConfig,
    /// HTTP client; redirects are followed manually so every hop is checked.
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    /// Creates a fetcher with the given limits.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Internal`] when the HTTP client cannot be
    /// built.
    pub fn new(config: FetchConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .connect_timeout(Duration::from_millis(config.fetch_timeout_ms.min(10_000)))
            .build()
            .map_err(|err| RegistryError::Internal(format!("fetch client build failed: {err}")))?;
        Ok(Self {
            config,
            client,
        })
    }

    /// Runs the fetch pipeline without the enclosing deadline.
    async fn fetch_inner(
        &self,
        original_url: &str,
        declared_sha256: &str,
        declared_size: u64,
    ) -> Result<(), RegistryError> {
        if declared_size > self.config.max_artifact_bytes {
            return Err(RegistryError::SizeLimitExceeded {
                url: original_url.to_string(),
                limit: self.config.max_artifact_bytes,
            });
        }

        let mut url = parse_https_url(original_url)?;
        self.head_probe(original_url, &url).await?;

        let mut hops = 0u32;
        loop {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|err| unreachable_error(original_url, &err))?;

            if response.status().is_redirection() {
                hops += 1;
                if hops > self.config.redirect_limit {
                    return Err(RegistryError::UrlRedirectLimit(original_url.to_string()));
                }
                url = redirect_target(original_url, &url, &response)?;
                continue;
            }
            if !response.status().is_success() {
                return Err(RegistryError::UrlUnreachable {
                    url: original_url.to_string(),
                    reason: format!("status {}", response.status()),
                });
            }

            if let Some(length) = response.content_length()
                && length > self.config.max_artifact_bytes
            {
                return Err(RegistryError::SizeLimitExceeded {
                    url: original_url.to_string(),
                    limit: self.config.max_artifact_bytes,
                });
            }

            let mut digest = StreamingDigest::new();
            let mut response = response;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|err| unreachable_error(original_url, &err))?
            {
                digest.update(&chunk);
                if digest.bytes_seen() > self.config.max_artifact_bytes {
                    return Err(RegistryError::SizeLimitExceeded {
                        url: original_url.to_string(),
                        limit: self.config.max_artifact_bytes,
                    });
                }
            }
            let (computed, size) = digest.finalize();
            verify_digest(&computed, size, declared_sha256, declared_size)
                .map_err(|err| digest_error_for_url(err, original_url))?;
            return Ok(());
        }
    }

    /// Issues the HEAD probe for early unreachability and size rejection.
    ///
    /// Hosts that reject HEAD with a client error are tolerated; only
    /// transport failures and an oversized Content-Length abort here.
    async fn head_probe(&self, original_url: &str, url: &Url) -> Result<(), RegistryError> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|err| unreachable_error(original_url, &err))?;
        if response.status().is_success()
            && let Some(length) = response.content_length()
            && length > self.config.max_artifact_bytes
        {
            return Err(RegistryError::SizeLimitExceeded {
                url: original_url.to_string(),
                limit: self.config.max_artifact_bytes,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch_and_verify(
        &self,
        url: &str,
        declared_sha256: &str,
        declared_size: u64,
    ) -> Result<(), RegistryError> {
        let deadline = Duration::from_millis(self.config.fetch_timeout_ms);
        tokio::time::timeout(deadline, self.fetch_inner(url, declared_sha256, declared_size))
            .await
            .map_err(|_| RegistryError::FetchTimeout(url.to_string()))?
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a URL and enforces the HTTPS-only policy.
fn parse_https_url(raw: &str) -> Result<Url, RegistryError> {
    let url = Url::parse(raw).map_err(|_| RegistryError::UrlUnreachable {
        url: raw.to_string(),
        reason: "unparseable url".to_string(),
    })?;
    if url.scheme() != "https" {
        return Err(RegistryError::UrlNotHttps(raw.to_string()));
    }
    Ok(url)
}

/// Resolves a redirect target, re-checking the HTTPS policy.
fn redirect_target(
    original_url: &str,
    current: &Url,
    response: &reqwest::Response,
) -> Result<Url, RegistryError> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| RegistryError::UrlUnreachable {
            url: original_url.to_string(),
            reason: "redirect without location".to_string(),
        })?;
    let target = current.join(location).map_err(|_| RegistryError::UrlUnreachable {
        url: original_url.to_string(),
        reason: "invalid redirect target".to_string(),
    })?;
    if target.scheme() != "https" {
        return Err(RegistryError::UrlNotHttps(original_url.to_string()));
    }
    Ok(target)
}

/// Maps a transport error onto the offending original URL.
fn unreachable_error(original_url: &str, error: &reqwest::Error) -> RegistryError {
    if error.is_timeout() {
        return RegistryError::FetchTimeout(original_url.to_string());
    }
    RegistryError::UrlUnreachable {
        url: original_url.to_string(),
        reason: error.to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[tokio::test]
    async fn http_scheme_is_rejected_without_a_fetch() {
        let fetcher = HttpArtifactFetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher
            .fetch_and_verify("http://example.invalid/a.island", &"0".repeat(64), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UrlNotHttps(_)));
    }

    #[tokio::test]
    async fn oversized_declared_size_is_rejected_without_a_fetch() {
        let config = FetchConfig {
            max_artifact_bytes: 1_000,
            ..FetchConfig::default()
        };
        let fetcher = HttpArtifactFetcher::new(config).unwrap();
        let err = fetcher
            .fetch_and_verify("https://example.invalid/a.island", &"0".repeat(64), 2_000)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::SizeLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn unparseable_url_is_unreachable() {
        let fetcher = HttpArtifactFetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher
            .fetch_and_verify("not a url", &"0".repeat(64), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::UrlUnreachable { .. }));
    }
}
