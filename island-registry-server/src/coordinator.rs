// island-registry-server/src/coordinator.rs
// ============================================================================
// Module: Registration Coordinator
// Description: Publish and yank orchestration over store, fetcher, and ACLs.
// Purpose: Drive a publish from validation to atomic commit, failing fast.
// Dependencies: island-registry-core, tokio
// ============================================================================

//! ## Overview
//! A publish moves through Received, Authenticated, Authorized, Validated,
//! Fetching, Verified, Committed; any non-terminal failure rejects the whole
//! request with no store effect. Distribution fetches fan out concurrently
//! under a bounded semaphore and a shared deadline; the first failure aborts
//! the siblings. A byte-identical replay from the same principal is
//! acknowledged as success instead of `version-exists`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use island_registry_core::DEFAULT_HASH_ALGORITHM;
use island_registry_core::DistributionRecord;
use island_registry_core::Manifest;
use island_registry_core::ManifestFieldError;
use island_registry_core::PackageName;
use island_registry_core::PackageRecord;
use island_registry_core::Provenance;
use island_registry_core::PublishCommit;
use island_registry_core::RegistryError;
use island_registry_core::RegistryStore;
use island_registry_core::StoreError;
use island_registry_core::UrlStatus;
use island_registry_core::Version;
use island_registry_core::VersionRecord;
use island_registry_core::hash_canonical_json;
use island_registry_core::is_well_formed_digest;
use island_registry_core::now_millis;
use island_registry_core::parse_filename;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::audit::AuditSink;
use crate::audit::RegistryAuditEvent;
use crate::auth::AuthenticatedPrincipal;
use crate::fetcher::ArtifactFetcher;
use crate::ownership::OwnershipRegistry;
use crate::ownership::PublishAuthorization;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Retry budget for transient store conflicts.
const COMMIT_RETRY_BUDGET: u32 = 3;
/// Backoff step between commit retries.
const COMMIT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// SECTION: Request Types
// ============================================================================

/// One distribution registration within a publish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRegistration {
    /// Distribution filename.
    pub filename: String,
    /// External artifact URL (HTTPS only).
    pub url: String,
    /// Declared SHA-256 digest, 64 lowercase hex characters.
    pub sha256: String,
    /// Declared artifact size in bytes.
    pub size: u64,
    /// Declared platform tag.
    pub platform_tag: String,
}

/// Wire body of a publish request: manifest fields plus distributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Manifest fields, unknown keys preserved.
    #[serde(flatten)]
    pub manifest: Manifest,
    /// Distributions to register for this version.
    pub distributions: Vec<DistributionRegistration>,
}

/// Successful publish acknowledgment.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// Normalized package name.
    pub package: String,
    /// Committed version.
    pub version: String,
    /// Number of distributions registered.
    pub distributions: usize,
    /// True when this acknowledged an idempotent replay.
    pub replayed: bool,
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Limits governing the publish pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PublishLimits {
    /// Bound on concurrent fetches within one publish.
    pub max_parallel_fetches: usize,
    /// Whole-publish deadline in milliseconds.
    pub publish_deadline_ms: u64,
}

/// Orchestrates publishes and yanks.
pub struct RegistrationCoordinator {
    /// Durable store.
    store: Arc<dyn RegistryStore>,
    /// Artifact fetcher.
    fetcher: Arc<dyn ArtifactFetcher>,
    /// Ownership decisions.
    ownership: OwnershipRegistry,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Publish pipeline limits.
    limits: PublishLimits,
}

impl RegistrationCoordinator {
    /// Creates a coordinator over its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistryStore>,
        fetcher: Arc<dyn ArtifactFetcher>,
        audit: Arc<dyn AuditSink>,
        limits: PublishLimits,
    ) -> Self {
        let ownership = OwnershipRegistry::new(Arc::clone(&store));
        Self {
            store,
            fetcher,
            ownership,
            audit,
            limits,
        }
    }

    /// Returns the ownership registry for administrative operations.
    #[must_use]
    pub const fn ownership(&self) -> &OwnershipRegistry {
        &self.ownership
    }

    /// Publishes one (name, version) with its distributions.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's [`RegistryError`]; no store effect
    /// occurs on failure.
    pub async fn publish(
        &self,
        principal: &AuthenticatedPrincipal,
        request: RegistrationRequest,
        request_id: &str,
    ) -> Result<PublishOutcome, RegistryError> {
        let result = self.publish_inner(principal, request, request_id).await;
        match &result {
            Ok(outcome) => self.audit.record(
                &RegistryAuditEvent::new("publish", request_id, "commit")
                    .with_principal(principal.principal.as_str())
                    .with_package(&outcome.package)
                    .with_version(&outcome.version),
            ),
            Err(err) => self.audit.record(
                &RegistryAuditEvent::new("publish", request_id, "reject")
                    .with_principal(principal.principal.as_str())
                    .with_error_kind(err.kind())
                    .with_reason(err.to_string()),
            ),
        }
        result
    }

    async fn publish_inner(
        &self,
        principal: &AuthenticatedPrincipal,
        request: RegistrationRequest,
        request_id: &str,
    ) -> Result<PublishOutcome, RegistryError> {
        // Validated.
        let validated = request.manifest.validate()?;
        let package_name = PackageName::new(&request.manifest.name);

        // Authorized.
        let authorization = self.ownership.authorize_publish(principal, &package_name)?;

        validate_distributions(&request)?;

        // Immutability and idempotent replay, checked before any fetch.
        if let Some(existing) = self.store.get_version(&package_name, &validated.version)? {
            return self.resolve_existing(principal, &request, &existing);
        }

        // Fetching and Verified.
        self.fetch_all(&request.distributions).await?;

        // Committed.
        let commit = self.assemble_commit(principal, &request, &validated, authorization)?;
        if commit.ownership.is_some() {
            self.audit.record(
                &RegistryAuditEvent::new("claim", request_id, "allow")
                    .with_principal(principal.principal.as_str())
                    .with_package(package_name.as_str()),
            );
        }
        let version_string = commit.version.version.to_string();
        let distribution_count = commit.version.distributions.len();
        match self.commit_with_retry(commit).await {
            Ok(()) => {}
            // A concurrent publish of the same version may have won the race
            // between our existence check and the commit.
            Err(RegistryError::VersionExists { .. }) => {
                let existing = self
                    .store
                    .get_version(&package_name, &validated.version)?
                    .ok_or_else(|| RegistryError::Internal("version vanished".to_string()))?;
                return self.resolve_existing(principal, &request, &existing);
            }
            Err(err) => return Err(err),
        }

        Ok(PublishOutcome {
            package: package_name.to_string(),
            version: version_string,
            distributions: distribution_count,
            replayed: false,
        })
    }

    /// Yanks an existing version.
    ///
    /// # Errors
    ///
    /// Returns not-found or forbidden errors; the version record otherwise
    /// only gains the yank flag.
    pub fn yank(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
        version: &Version,
        reason: &str,
        request_id: &str,
    ) -> Result<(), RegistryError> {
        let result = self.yank_inner(principal, package, version, reason);
        let decision = if result.is_ok() { "commit" } else { "reject" };
        let mut event = RegistryAuditEvent::new("yank", request_id, decision)
            .with_principal(principal.principal.as_str())
            .with_package(package.as_str())
            .with_version(version.to_string());
        if let Err(err) = &result {
            event = event.with_error_kind(err.kind());
        }
        self.audit.record(&event);
        result
    }

    fn yank_inner(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
        version: &Version,
        reason: &str,
    ) -> Result<(), RegistryError> {
        self.ownership.authorize_yank(principal, package)?;
        if self.store.get_version(package, version)?.is_none() {
            return Err(RegistryError::VersionNotFound {
                package: package.to_string(),
                version: version.to_string(),
            });
        }
        self.store.set_yanked(package, version, reason, now_millis())?;
        Ok(())
    }

    /// Resolves a publish against an already-committed version: idempotent
    /// replay succeeds, anything else is `version-exists`.
    fn resolve_existing(
        &self,
        principal: &AuthenticatedPrincipal,
        request: &RegistrationRequest,
        existing: &VersionRecord,
    ) -> Result<PublishOutcome, RegistryError> {
        if is_identical_replay(principal, request, existing)? {
            return Ok(PublishOutcome {
                package: existing.package.to_string(),
                version: existing.version.to_string(),
                distributions: existing.distributions.len(),
                replayed: true,
            });
        }
        Err(RegistryError::VersionExists {
            package: existing.package.to_string(),
            version: existing.version.to_string(),
        })
    }

    /// Fetches and verifies every distribution concurrently.
    ///
    /// The fan-out is bounded and shares one deadline; the first failure
    /// aborts the remaining fetches.
    async fn fetch_all(
        &self,
        distributions: &[DistributionRegistration],
    ) -> Result<(), RegistryError> {
        let first_url =
            distributions.first().map(|dist| dist.url.clone()).unwrap_or_default();
        let deadline = Duration::from_millis(self.limits.publish_deadline_ms);
        tokio::time::timeout(deadline, self.fetch_all_inner(distributions))
            .await
            .map_err(|_| RegistryError::FetchTimeout(first_url))?
    }

    async fn fetch_all_inner(
        &self,
        distributions: &[DistributionRegistration],
    ) -> Result<(), RegistryError> {
        let semaphore = Arc::new(Semaphore::new(self.limits.max_parallel_fetches));
        let mut tasks = JoinSet::new();
        for distribution in distributions {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let url = distribution.url.clone();
            let sha256 = distribution.sha256.clone();
            let size = distribution.size;
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| RegistryError::Internal("fetch semaphore closed".to_string()))?;
                fetcher.fetch_and_verify(&url, &sha256, size).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    tasks.abort_all();
                    return Err(RegistryError::Internal(format!("fetch task failed: {join_err}")));
                }
            }
        }
        Ok(())
    }

    /// Assembles the atomic commit payload after verification.
    fn assemble_commit(
        &self,
        principal: &AuthenticatedPrincipal,
        request: &RegistrationRequest,
        validated: &island_registry_core::ValidatedManifest,
        authorization: PublishAuthorization,
    ) -> Result<PublishCommit, RegistryError> {
        let now = now_millis();
        let package_name = PackageName::new(&request.manifest.name);
        let manifest_snapshot = request
            .manifest
            .snapshot()
            .map_err(|err| RegistryError::Internal(format!("manifest snapshot: {err}")))?;

        let (created_at, display_name) = match self.store.get_package(&package_name)? {
            Some(existing) => (existing.created_at, existing.display_name),
            None => (now, request.manifest.name.clone()),
        };

        let distributions = request
            .distributions
            .iter()
            .map(|registration| {
                let parsed = parse_filename(&registration.filename)?;
                Ok(DistributionRecord {
                    filename: registration.filename.clone(),
                    url: registration.url.clone(),
                    sha256: registration.sha256.clone(),
                    size: registration.size,
                    platform_tag: registration.platform_tag.clone(),
                    kind: parsed.kind,
                    url_status: UrlStatus::Active,
                })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        let provenance = principal.federated.as_ref().map(|identity| Provenance {
            publisher: identity.repository.clone(),
            workflow: identity.workflow.clone(),
            commit: identity.commit.clone(),
            build_time: None,
        });

        Ok(PublishCommit {
            package: PackageRecord {
                name: package_name.clone(),
                display_name,
                game: request.manifest.game.clone(),
                description: request.manifest.description.clone(),
                authors: request.manifest.authors.clone(),
                homepage: request.manifest.homepage.clone(),
                repository: request.manifest.repository.clone(),
                keywords: request.manifest.keywords.clone(),
                created_at,
                updated_at: now,
            },
            ownership: match authorization {
                PublishAuthorization::Claim(record) => Some(record),
                PublishAuthorization::Existing => None,
            },
            version: VersionRecord {
                package: package_name,
                version: validated.version.clone(),
                game: request.manifest.game.clone(),
                manifest: manifest_snapshot,
                entry_points: request.manifest.entry_points.clone(),
                minimum_ap_version: validated.minimum_ap_version.clone(),
                maximum_ap_version: validated.maximum_ap_version.clone(),
                yanked: false,
                yank_reason: None,
                yanked_at: None,
                created_at: now,
                publisher: principal.principal.clone(),
                provenance,
                distributions,
            },
        })
    }

    /// Commits, retrying transient store contention.
    async fn commit_with_retry(&self, commit: PublishCommit) -> Result<(), RegistryError> {
        let mut attempts = 0u32;
        loop {
            match self.store.commit_publish(commit.clone()) {
                Ok(()) => return Ok(()),
                Err(StoreError::Busy(_)) if attempts < COMMIT_RETRY_BUDGET => {
                    attempts += 1;
                    tokio::time::sleep(COMMIT_RETRY_BACKOFF * attempts).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Validates the distribution list before any network activity.
fn validate_distributions(request: &RegistrationRequest) -> Result<(), RegistryError> {
    if request.distributions.is_empty() {
        return Err(RegistryError::InvalidManifest {
            details: vec![ManifestFieldError::new(
                "distributions",
                "at least one distribution is required",
            )],
        });
    }
    let mut seen = std::collections::BTreeSet::new();
    for (index, registration) in request.distributions.iter().enumerate() {
        if !seen.insert(registration.filename.as_str()) {
            return Err(RegistryError::InvalidFilename {
                filename: registration.filename.clone(),
                reason: "duplicate filename in request".to_string(),
            });
        }
        let parsed = parse_filename(&registration.filename)?;
        parsed.check_agreement(
            &request.manifest.name,
            &request.manifest.version,
            &registration.platform_tag,
        )?;
        if !registration.url.starts_with("https://") {
            return Err(RegistryError::UrlNotHttps(registration.url.clone()));
        }
        if !is_well_formed_digest(DEFAULT_HASH_ALGORITHM, &registration.sha256) {
            return Err(RegistryError::InvalidManifest {
                details: vec![ManifestFieldError::with_value(
                    format!("distributions[{index}].sha256"),
                    "must be 64 lowercase hex characters",
                    registration.sha256.clone(),
                )],
            });
        }
    }
    Ok(())
}

/// Returns true when the request is a byte-identical replay of the existing
/// version from the same principal.
fn is_identical_replay(
    principal: &AuthenticatedPrincipal,
    request: &RegistrationRequest,
    existing: &VersionRecord,
) -> Result<bool, RegistryError> {
    if existing.publisher != principal.principal {
        return Ok(false);
    }
    let snapshot = request
        .manifest
        .snapshot()
        .map_err(|err| RegistryError::Internal(format!("manifest snapshot: {err}")))?;
    let requested = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &snapshot)
        .map_err(|err| RegistryError::Internal(err.to_string()))?;
    let committed = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &existing.manifest)
        .map_err(|err| RegistryError::Internal(err.to_string()))?;
    if requested != committed {
        return Ok(false);
    }
    if request.distributions.len() != existing.distributions.len() {
        return Ok(false);
    }
    let mut requested: Vec<_> = request
        .distributions
        .iter()
        .map(|dist| (&dist.filename, &dist.url, &dist.sha256, dist.size, &dist.platform_tag))
        .collect();
    let mut committed: Vec<_> = existing
        .distributions
        .iter()
        .map(|dist| (&dist.filename, &dist.url, &dist.sha256, dist.size, &dist.platform_tag))
        .collect();
    requested.sort();
    committed.sort();
    Ok(requested == committed)
}
