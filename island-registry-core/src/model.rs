// island-registry-core/src/model.rs
// ============================================================================
// Module: Registry Data Model
// Description: Package, version, distribution, ownership, and token records.
// Purpose: Define the durable records every store implementation persists.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Versions are immutable once committed: the manifest snapshot, entry-point
//! map, and distribution set never change; only the yank flag may. Ownership
//! is one authoritative record per package; trusted-publisher rules extend it
//! for federated publishers without standing secrets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::filename::ArtifactKind;
use crate::identifiers::PackageName;
use crate::identifiers::PrincipalId;
use crate::version::Version;

// ============================================================================
// SECTION: Time
// ============================================================================

/// Returns the current unix epoch in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// SECTION: Package
// ============================================================================

/// Display metadata for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Normalized unique name.
    pub name: PackageName,
    /// Name as submitted by the first publisher.
    pub display_name: String,
    /// Game title from the latest accepted manifest.
    pub game: String,
    /// Short description.
    pub description: Option<String>,
    /// Author list.
    pub authors: Vec<String>,
    /// Project homepage URL.
    pub homepage: Option<String>,
    /// Source repository URL.
    pub repository: Option<String>,
    /// Keywords for discovery.
    pub keywords: Vec<String>,
    /// Creation timestamp (unix millis).
    pub created_at: i64,
    /// Last successful publish timestamp (unix millis).
    pub updated_at: i64,
}

// ============================================================================
// SECTION: Version
// ============================================================================

/// Publisher provenance recorded for federated registrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Source repository that published the version.
    pub publisher: String,
    /// Workflow reference within the repository.
    pub workflow: String,
    /// Commit SHA the workflow ran against.
    pub commit: String,
    /// Build timestamp reported by the provider (unix millis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time: Option<i64>,
}

/// One immutable published version of a package.
///
/// # Invariants
/// - `manifest` is the verbatim accepted snapshot including unknown keys.
/// - Only `yanked`, `yank_reason`, and `yanked_at` may change after commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Owning package name.
    pub package: PackageName,
    /// Semantic version.
    pub version: Version,
    /// Game title declared by this version.
    pub game: String,
    /// Verbatim accepted manifest snapshot.
    pub manifest: Value,
    /// Entry-point map: identifier to opaque target reference.
    pub entry_points: BTreeMap<String, String>,
    /// Minimum compatible host version.
    pub minimum_ap_version: Version,
    /// Maximum compatible host version, open-ended when absent.
    pub maximum_ap_version: Option<Version>,
    /// Whether this version has been yanked.
    pub yanked: bool,
    /// Yank reason, present when yanked.
    pub yank_reason: Option<String>,
    /// Yank timestamp (unix millis), present when yanked.
    pub yanked_at: Option<i64>,
    /// Commit timestamp (unix millis).
    pub created_at: i64,
    /// Publishing principal.
    pub publisher: PrincipalId,
    /// Provenance, present iff registered via federated identity.
    pub provenance: Option<Provenance>,
    /// Distributions belonging to this version (at least one).
    pub distributions: Vec<DistributionRecord>,
}

// ============================================================================
// SECTION: Distribution
// ============================================================================

/// Reachability state of a registered artifact URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UrlStatus {
    /// URL served the artifact at last verification.
    Active,
    /// URL failed its last reachability check.
    Unreachable {
        /// When the failing check ran (unix millis).
        last_checked_at: i64,
    },
}

/// One externally hosted artifact for one version.
///
/// # Invariants
/// - `url` is HTTPS; `sha256` is 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecord {
    /// Distribution filename.
    pub filename: String,
    /// External artifact URL.
    pub url: String,
    /// SHA-256 digest of the artifact bytes.
    pub sha256: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Declared platform tag (`python-abi-platform` or `source`).
    pub platform_tag: String,
    /// Binary or source artifact.
    pub kind: ArtifactKind,
    /// URL reachability state.
    pub url_status: UrlStatus,
}

// ============================================================================
// SECTION: Ownership
// ============================================================================

/// Trusted-publisher rule permitting federated claims to publish a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedPublisherRule {
    /// Identity provider name.
    pub provider: String,
    /// Source repository the token must assert.
    pub repository: String,
    /// Workflow path the token must assert.
    pub workflow: String,
    /// Optional environment the token must assert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// Authoritative ownership record for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// Package this record governs.
    pub package: PackageName,
    /// Primary owner principal.
    pub owner: PrincipalId,
    /// Collaborator principals authorized to publish and yank.
    pub collaborators: Vec<PrincipalId>,
    /// Trusted-publisher rules for federated publishing.
    pub trusted_publishers: Vec<TrustedPublisherRule>,
}

// ============================================================================
// SECTION: Tokens
// ============================================================================

/// Stored API token record. Only the fingerprint is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTokenRecord {
    /// SHA-256 fingerprint of the bearer token, lowercase hex.
    pub fingerprint: String,
    /// Principal the token is bound to.
    pub principal: PrincipalId,
    /// Creation timestamp (unix millis).
    pub created_at: i64,
    /// Optional expiry timestamp (unix millis).
    pub expires_at: Option<i64>,
}

impl ApiTokenRecord {
    /// Returns true when the token is expired at the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}
