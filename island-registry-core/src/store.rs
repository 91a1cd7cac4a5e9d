// island-registry-core/src/store.rs
// ============================================================================
// Module: Registry Store Contract
// Description: Transactional store trait and the in-memory reference store.
// Purpose: Define atomic commit semantics every backend must honor.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! `commit_publish` is the single write path for registrations: version,
//! distributions, and (on a claim) the package and ownership records land in
//! one atomic commit or not at all. Uniqueness of the package name and of
//! `(package, version)` is enforced at commit so concurrent claims and
//! duplicate publishes lose deterministically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::identifiers::PackageName;
use crate::model::ApiTokenRecord;
use crate::model::OwnershipRecord;
use crate::model::PackageRecord;
use crate::model::VersionRecord;
use crate::version::Version;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store failures surfaced to the coordinator and discovery engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A different publisher claimed the package name first.
    #[error("package name already claimed: {0}")]
    NameClaimed(String),
    /// The (package, version) pair already exists.
    #[error("version already exists: {package} {version}")]
    VersionExists {
        /// Package name.
        package: String,
        /// Version string.
        version: String,
    },
    /// Referenced package or version is absent.
    #[error("not found: {0}")]
    NotFound(String),
    /// Transient contention; the caller may retry.
    #[error("store busy: {0}")]
    Busy(String),
    /// Backend I/O failure.
    #[error("store io error: {0}")]
    Io(String),
    /// Backend engine failure.
    #[error("store engine error: {0}")]
    Db(String),
    /// Invalid stored data.
    #[error("store invalid data: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Commit Payloads
// ============================================================================

/// Atomic payload for one publish.
#[derive(Debug, Clone)]
pub struct PublishCommit {
    /// Package metadata; inserted on claim, refreshed otherwise.
    pub package: PackageRecord,
    /// Ownership record, present iff this publish claims the name.
    pub ownership: Option<OwnershipRecord>,
    /// The new immutable version with its distributions.
    pub version: VersionRecord,
}

/// Consistent point-in-time view of the whole registry.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// All packages with their versions, name-ascending.
    pub packages: Vec<PackageSnapshot>,
}

/// One package with every committed version.
#[derive(Debug, Clone)]
pub struct PackageSnapshot {
    /// Package metadata.
    pub package: PackageRecord,
    /// All versions including yanked ones.
    pub versions: Vec<VersionRecord>,
}

// ============================================================================
// SECTION: Store Trait
// ============================================================================

/// Durable, transactional persistence for the registry.
pub trait RegistryStore: Send + Sync {
    /// Commits one publish atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NameClaimed`] when the commit carries an
    /// ownership record but the name exists, [`StoreError::VersionExists`]
    /// when the (package, version) pair exists, and backend errors otherwise.
    fn commit_publish(&self, commit: PublishCommit) -> Result<(), StoreError>;

    /// Sets the yank flag on an existing version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the version is absent.
    fn set_yanked(
        &self,
        package: &PackageName,
        version: &Version,
        reason: &str,
        yanked_at: i64,
    ) -> Result<(), StoreError>;

    /// Looks up a package by normalized name.
    ///
    /// # Errors
    ///
    /// Returns backend errors only; absence is `Ok(None)`.
    fn get_package(&self, package: &PackageName) -> Result<Option<PackageRecord>, StoreError>;

    /// Looks up one version of a package.
    ///
    /// # Errors
    ///
    /// Returns backend errors only; absence is `Ok(None)`.
    fn get_version(
        &self,
        package: &PackageName,
        version: &Version,
    ) -> Result<Option<VersionRecord>, StoreError>;

    /// Lists every version of a package, unordered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the package is absent.
    fn list_versions(&self, package: &PackageName) -> Result<Vec<VersionRecord>, StoreError>;

    /// Lists every package, unordered.
    ///
    /// # Errors
    ///
    /// Returns backend errors only.
    fn list_packages(&self) -> Result<Vec<PackageRecord>, StoreError>;

    /// Looks up the ownership record for a package.
    ///
    /// # Errors
    ///
    /// Returns backend errors only; absence is `Ok(None)`.
    fn get_ownership(&self, package: &PackageName)
    -> Result<Option<OwnershipRecord>, StoreError>;

    /// Replaces the ownership record for an existing package.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the package is absent.
    fn update_ownership(&self, record: OwnershipRecord) -> Result<(), StoreError>;

    /// Inserts a long-lived API token record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the fingerprint already exists.
    fn insert_token(&self, record: ApiTokenRecord) -> Result<(), StoreError>;

    /// Looks up an API token by its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns backend errors only; absence is `Ok(None)`.
    fn lookup_token(&self, fingerprint: &str) -> Result<Option<ApiTokenRecord>, StoreError>;

    /// Deletes an API token. Revocation is deletion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the fingerprint is unknown.
    fn revoke_token(&self, fingerprint: &str) -> Result<(), StoreError>;

    /// Returns a consistent snapshot of all packages and versions.
    ///
    /// # Errors
    ///
    /// Returns backend errors only.
    fn snapshot(&self) -> Result<RegistrySnapshot, StoreError>;
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// One package entry in the in-memory store.
#[derive(Debug, Clone)]
struct PackageEntry {
    /// Package metadata.
    package: PackageRecord,
    /// Ownership record.
    ownership: OwnershipRecord,
    /// Versions keyed by canonical version string.
    versions: BTreeMap<String, VersionRecord>,
}

/// Mutable state behind the store mutex.
#[derive(Debug, Default)]
struct InMemoryState {
    /// Packages keyed by normalized name.
    packages: BTreeMap<PackageName, PackageEntry>,
    /// API tokens keyed by fingerprint.
    tokens: HashMap<String, ApiTokenRecord>,
}

/// Non-durable registry store for tests and small deployments.
#[derive(Debug, Default)]
pub struct InMemoryRegistryStore {
    /// Guarded store state; one lock is the transaction boundary.
    state: Mutex<InMemoryState>,
}

impl InMemoryRegistryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Db("store mutex poisoned".to_string()))
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn commit_publish(&self, commit: PublishCommit) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let name = commit.package.name.clone();
        let version_key = commit.version.version.to_string();
        if !state.packages.contains_key(&name) {
            let Some(ownership) = commit.ownership else {
                return Err(StoreError::NotFound(format!(
                    "package disappeared before commit: {name}"
                )));
            };
            let mut versions = BTreeMap::new();
            versions.insert(version_key, commit.version);
            state.packages.insert(name, PackageEntry {
                package: commit.package,
                ownership,
                versions,
            });
            return Ok(());
        }
        if commit.ownership.is_some() {
            // The claim lost a race with another first publish.
            return Err(StoreError::NameClaimed(name.to_string()));
        }
        let entry = state
            .packages
            .get_mut(&name)
            .ok_or_else(|| StoreError::Db(format!("package entry vanished: {name}")))?;
        if entry.versions.contains_key(&version_key) {
            return Err(StoreError::VersionExists {
                package: name.to_string(),
                version: version_key,
            });
        }
        entry.versions.insert(version_key, commit.version);
        entry.package.updated_at = commit.package.updated_at;
        entry.package.game = commit.package.game;
        entry.package.description = commit.package.description;
        entry.package.authors = commit.package.authors;
        entry.package.homepage = commit.package.homepage;
        entry.package.repository = commit.package.repository;
        entry.package.keywords = commit.package.keywords;
        Ok(())
    }

    fn set_yanked(
        &self,
        package: &PackageName,
        version: &Version,
        reason: &str,
        yanked_at: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let entry = state
            .packages
            .get_mut(package)
            .ok_or_else(|| StoreError::NotFound(format!("package {package}")))?;
        let record = entry
            .versions
            .get_mut(&version.to_string())
            .ok_or_else(|| StoreError::NotFound(format!("version {package} {version}")))?;
        record.yanked = true;
        record.yank_reason = Some(reason.to_string());
        record.yanked_at = Some(yanked_at);
        Ok(())
    }

    fn get_package(&self, package: &PackageName) -> Result<Option<PackageRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.packages.get(package).map(|entry| entry.package.clone()))
    }

    fn get_version(
        &self,
        package: &PackageName,
        version: &Version,
    ) -> Result<Option<VersionRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .packages
            .get(package)
            .and_then(|entry| entry.versions.get(&version.to_string()).cloned()))
    }

    fn list_versions(&self, package: &PackageName) -> Result<Vec<VersionRecord>, StoreError> {
        let state = self.lock()?;
        let entry = state
            .packages
            .get(package)
            .ok_or_else(|| StoreError::NotFound(format!("package {package}")))?;
        Ok(entry.versions.values().cloned().collect())
    }

    fn list_packages(&self) -> Result<Vec<PackageRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.packages.values().map(|entry| entry.package.clone()).collect())
    }

    fn get_ownership(
        &self,
        package: &PackageName,
    ) -> Result<Option<OwnershipRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.packages.get(package).map(|entry| entry.ownership.clone()))
    }

    fn update_ownership(&self, record: OwnershipRecord) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let entry = state
            .packages
            .get_mut(&record.package)
            .ok_or_else(|| StoreError::NotFound(format!("package {}", record.package)))?;
        entry.ownership = record;
        Ok(())
    }

    fn insert_token(&self, record: ApiTokenRecord) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.tokens.contains_key(&record.fingerprint) {
            return Err(StoreError::Invalid("token fingerprint already exists".to_string()));
        }
        state.tokens.insert(record.fingerprint.clone(), record);
        Ok(())
    }

    fn lookup_token(&self, fingerprint: &str) -> Result<Option<ApiTokenRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state.tokens.get(fingerprint).cloned())
    }

    fn revoke_token(&self, fingerprint: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .tokens
            .remove(fingerprint)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound("token".to_string()))
    }

    fn snapshot(&self) -> Result<RegistrySnapshot, StoreError> {
        let state = self.lock()?;
        let packages = state
            .packages
            .values()
            .map(|entry| PackageSnapshot {
                package: entry.package.clone(),
                versions: entry.versions.values().cloned().collect(),
            })
            .collect();
        Ok(RegistrySnapshot {
            packages,
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::filename::ArtifactKind;
    use crate::identifiers::PrincipalId;
    use crate::model::DistributionRecord;
    use crate::model::UrlStatus;

    fn sample_commit(name: &str, version: &str, claim: bool) -> PublishCommit {
        let package_name = PackageName::new(name);
        let version = Version::parse(version).unwrap();
        PublishCommit {
            package: PackageRecord {
                name: package_name.clone(),
                display_name: name.to_string(),
                game: "Sample Game".to_string(),
                description: None,
                authors: Vec::new(),
                homepage: None,
                repository: None,
                keywords: Vec::new(),
                created_at: 1,
                updated_at: 1,
            },
            ownership: claim.then(|| OwnershipRecord {
                package: package_name.clone(),
                owner: PrincipalId::new("alice"),
                collaborators: Vec::new(),
                trusted_publishers: Vec::new(),
            }),
            version: VersionRecord {
                package: package_name,
                version: version.clone(),
                game: "Sample Game".to_string(),
                manifest: json!({}),
                entry_points: BTreeMap::new(),
                minimum_ap_version: Version::parse("0.5.0").unwrap(),
                maximum_ap_version: None,
                yanked: false,
                yank_reason: None,
                yanked_at: None,
                created_at: 1,
                publisher: PrincipalId::new("alice"),
                provenance: None,
                distributions: vec![DistributionRecord {
                    filename: "sample_game-1.0.0-py3-none-any.island".to_string(),
                    url: "https://example.invalid/a.island".to_string(),
                    sha256: "0".repeat(64),
                    size: 1,
                    platform_tag: "py3-none-any".to_string(),
                    kind: ArtifactKind::Binary,
                    url_status: UrlStatus::Active,
                }],
            },
        }
    }

    #[test]
    fn claim_then_duplicate_version_is_rejected() {
        let store = InMemoryRegistryStore::new();
        store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
        let err = store.commit_publish(sample_commit("sample-game", "1.0.0", false)).unwrap_err();
        assert!(matches!(err, StoreError::VersionExists { .. }));
    }

    #[test]
    fn losing_claim_race_reports_name_claimed() {
        let store = InMemoryRegistryStore::new();
        store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
        let err = store.commit_publish(sample_commit("sample-game", "1.0.1", true)).unwrap_err();
        assert!(matches!(err, StoreError::NameClaimed(_)));
    }

    #[test]
    fn yank_flags_existing_version() {
        let store = InMemoryRegistryStore::new();
        store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
        let name = PackageName::new("sample-game");
        let version = Version::parse("1.0.0").unwrap();
        store.set_yanked(&name, &version, "broken seed", 99).unwrap();
        let record = store.get_version(&name, &version).unwrap().unwrap();
        assert!(record.yanked);
        assert_eq!(record.yank_reason.as_deref(), Some("broken seed"));
        assert_eq!(record.yanked_at, Some(99));
    }

    #[test]
    fn token_lifecycle() {
        let store = InMemoryRegistryStore::new();
        let record = ApiTokenRecord {
            fingerprint: "f".repeat(64),
            principal: PrincipalId::new("alice"),
            created_at: 1,
            expires_at: None,
        };
        store.insert_token(record.clone()).unwrap();
        assert_eq!(store.lookup_token(&record.fingerprint).unwrap(), Some(record.clone()));
        store.revoke_token(&record.fingerprint).unwrap();
        assert_eq!(store.lookup_token(&record.fingerprint).unwrap(), None);
    }
}
