// island-registry-server/src/discovery.rs
// ============================================================================
// Module: Discovery Engine
// Description: Read-only list, lookup, search, and snapshot queries.
// Purpose: Serve committed registry state with version-aware filtering.
// Dependencies: island-registry-core, serde
// ============================================================================

//! ## Overview
//! Discovery reads consistent store snapshots and does its filtering in
//! process: semantic-version comparison cannot be pushed into SQL, and the
//! registry's working set is small enough that recompute-on-read stays
//! simple. Yanked versions remain visible everywhere, carrying their flag;
//! the snapshot export reflects every write that returned success.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use island_registry_core::PackageName;
use island_registry_core::PackageSnapshot;
use island_registry_core::RegistryError;
use island_registry_core::RegistryStore;
use island_registry_core::StoreError;
use island_registry_core::Version;
use island_registry_core::VersionRecord;
use island_registry_core::now_millis;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default page size for package listings.
const DEFAULT_PER_PAGE: usize = 20;
/// Maximum page size for package listings.
const MAX_PER_PAGE: usize = 100;

// ============================================================================
// SECTION: Response Types
// ============================================================================

/// Pagination envelope for list responses.
#[derive(Debug, Clone, Serialize)]
pub struct PaginationInfo {
    /// Requested page (1-based).
    pub page: usize,
    /// Page size in effect.
    pub per_page: usize,
    /// Total matching items.
    pub total: usize,
    /// Total pages at this page size.
    pub total_pages: usize,
}

/// One package in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct PackageListItem {
    /// Normalized package name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Game title.
    pub game: String,
    /// Short description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Highest non-yanked version, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    /// Last publish timestamp (unix millis).
    pub updated_at: i64,
}

/// Paginated package listing.
#[derive(Debug, Clone, Serialize)]
pub struct PackageListResponse {
    /// Packages on this page.
    pub packages: Vec<PackageListItem>,
    /// Pagination envelope.
    pub pagination: PaginationInfo,
}

/// One version in a collapsed version list.
#[derive(Debug, Clone, Serialize)]
pub struct VersionListItem {
    /// Version string.
    pub version: String,
    /// Commit timestamp (unix millis).
    pub created_at: i64,
    /// Whether the version is yanked.
    pub yanked: bool,
}

/// Full package metadata with its collapsed version list.
#[derive(Debug, Clone, Serialize)]
pub struct PackageResponse {
    /// Normalized package name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Game title.
    pub game: String,
    /// Short description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Author list.
    pub authors: Vec<String>,
    /// Project homepage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Source repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Keywords.
    pub keywords: Vec<String>,
    /// Owner principal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Creation timestamp (unix millis).
    pub created_at: i64,
    /// Last publish timestamp (unix millis).
    pub updated_at: i64,
    /// Highest non-yanked version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    /// All versions, version-descending.
    pub versions: Vec<VersionListItem>,
}

/// Version list for one package.
#[derive(Debug, Clone, Serialize)]
pub struct VersionListResponse {
    /// Package name.
    pub package: String,
    /// Versions, version-descending.
    pub versions: Vec<VersionListItem>,
    /// Number of versions returned.
    pub total: usize,
}

/// One distribution in a version response.
#[derive(Debug, Clone, Serialize)]
pub struct DistributionResponse {
    /// Distribution filename.
    pub filename: String,
    /// External artifact URL.
    pub url: String,
    /// SHA-256 digest.
    pub sha256: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Platform tag.
    pub platform_tag: String,
    /// URL reachability state.
    pub url_status: island_registry_core::UrlStatus,
}

/// Full version record response.
#[derive(Debug, Clone, Serialize)]
pub struct VersionResponse {
    /// Package name.
    pub package: String,
    /// Version string.
    pub version: String,
    /// Game title.
    pub game: String,
    /// Verbatim accepted manifest snapshot.
    pub manifest: Value,
    /// Entry-point map.
    pub entry_points: BTreeMap<String, String>,
    /// Minimum compatible host version.
    pub minimum_ap_version: String,
    /// Maximum compatible host version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_ap_version: Option<String>,
    /// Whether the version is yanked.
    pub yanked: bool,
    /// Yank reason, when yanked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yank_reason: Option<String>,
    /// Commit timestamp (unix millis).
    pub created_at: i64,
    /// Federated provenance, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<island_registry_core::Provenance>,
    /// Distributions with URLs and digests.
    pub distributions: Vec<DistributionResponse>,
}

/// Search predicates, combined with implicit AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    /// Free-text match over name, game, description, and keywords.
    #[serde(default)]
    pub q: Option<String>,
    /// Exact match on game title.
    #[serde(default)]
    pub game: Option<String>,
    /// Exact match on any entry-point identifier.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Host version the package must be compatible with.
    #[serde(default)]
    pub compatible_with: Option<String>,
    /// Platform tag suffix any distribution must match.
    #[serde(default)]
    pub platform: Option<String>,
}

/// One matching version in a search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Package name.
    pub package: String,
    /// Version string.
    pub version: String,
    /// Game title.
    pub game: String,
    /// Short description from the package.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the version is yanked.
    pub yanked: bool,
}

/// Search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    /// Matching versions, relevance then recency.
    pub results: Vec<SearchResult>,
    /// Number of matches.
    pub total: usize,
}

/// One distribution in the index export.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDistribution {
    /// Distribution filename.
    pub filename: String,
    /// External artifact URL.
    pub url: String,
    /// SHA-256 digest.
    pub sha256: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Platform tag.
    pub platform_tag: String,
}

/// One version in the index export.
#[derive(Debug, Clone, Serialize)]
pub struct IndexVersion {
    /// Version string.
    pub version: String,
    /// Game title.
    pub game: String,
    /// Minimum compatible host version.
    pub minimum_ap_version: String,
    /// Maximum compatible host version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_ap_version: Option<String>,
    /// Whether the version is yanked.
    pub yanked: bool,
    /// Commit timestamp (unix millis).
    pub created_at: i64,
    /// Distributions with URL and digest.
    pub distributions: Vec<IndexDistribution>,
}

/// One package entry in the index export.
#[derive(Debug, Clone, Serialize)]
pub struct IndexPackage {
    /// Display name.
    pub display_name: String,
    /// Game title.
    pub game: String,
    /// Short description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Highest non-yanked version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    /// Versions, version-descending.
    pub versions: Vec<IndexVersion>,
}

/// The single-document index export.
#[derive(Debug, Clone, Serialize)]
pub struct IndexResponse {
    /// Packages keyed by name.
    pub packages: BTreeMap<String, IndexPackage>,
    /// Export timestamp (unix millis).
    pub generated_at: i64,
    /// Package count.
    pub total_packages: usize,
    /// Version count.
    pub total_versions: usize,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Read-only query engine over committed registry state.
pub struct DiscoveryEngine {
    /// Backing store.
    store: Arc<dyn RegistryStore>,
}

impl DiscoveryEngine {
    /// Creates a discovery engine over the store.
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
        }
    }

    /// Lists packages, paginated, last-updated descending.
    ///
    /// # Errors
    ///
    /// Returns store failures as [`RegistryError::Internal`].
    pub fn list_packages(
        &self,
        page: Option<usize>,
        per_page: Option<usize>,
    ) -> Result<PackageListResponse, RegistryError> {
        let page = page.unwrap_or(1).max(1);
        let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
        let snapshot = self.store.snapshot()?;
        let mut entries: Vec<&PackageSnapshot> = snapshot.packages.iter().collect();
        entries.sort_by(|a, b| b.package.updated_at.cmp(&a.package.updated_at));

        let total = entries.len();
        let total_pages = total.div_ceil(per_page);
        let packages = entries
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .map(|entry| PackageListItem {
                name: entry.package.name.to_string(),
                display_name: entry.package.display_name.clone(),
                game: entry.package.game.clone(),
                description: entry.package.description.clone(),
                latest_version: latest_version(&entry.versions),
                updated_at: entry.package.updated_at,
            })
            .collect();
        Ok(PackageListResponse {
            packages,
            pagination: PaginationInfo {
                page,
                per_page,
                total,
                total_pages,
            },
        })
    }

    /// Returns one package with its collapsed version list.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::PackageNotFound`] for unknown names.
    pub fn get_package(&self, name: &PackageName) -> Result<PackageResponse, RegistryError> {
        let package = self
            .store
            .get_package(name)?
            .ok_or_else(|| RegistryError::PackageNotFound(name.to_string()))?;
        let mut versions = self.store.list_versions(name).map_err(not_found_package(name))?;
        sort_versions_descending(&mut versions);
        let owner = self.store.get_ownership(name)?.map(|record| record.owner.to_string());
        Ok(PackageResponse {
            name: package.name.to_string(),
            display_name: package.display_name,
            game: package.game,
            description: package.description,
            authors: package.authors,
            homepage: package.homepage,
            repository: package.repository,
            keywords: package.keywords,
            owner,
            created_at: package.created_at,
            updated_at: package.updated_at,
            latest_version: latest_version(&versions),
            versions: versions.iter().map(version_list_item).collect(),
        })
    }

    /// Lists versions of a package, version-descending.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::PackageNotFound`] for unknown names.
    pub fn list_versions(
        &self,
        name: &PackageName,
        include_yanked: bool,
    ) -> Result<VersionListResponse, RegistryError> {
        let mut versions = self.store.list_versions(name).map_err(not_found_package(name))?;
        sort_versions_descending(&mut versions);
        if !include_yanked {
            versions.retain(|record| !record.yanked);
        }
        Ok(VersionListResponse {
            package: name.to_string(),
            total: versions.len(),
            versions: versions.iter().map(version_list_item).collect(),
        })
    }

    /// Returns one full version record.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::PackageNotFound`] or
    /// [`RegistryError::VersionNotFound`].
    pub fn get_version(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<VersionResponse, RegistryError> {
        let Some(record) = self.store.get_version(name, version)? else {
            if self.store.get_package(name)?.is_none() {
                return Err(RegistryError::PackageNotFound(name.to_string()));
            }
            return Err(RegistryError::VersionNotFound {
                package: name.to_string(),
                version: version.to_string(),
            });
        };
        Ok(version_response(&record))
    }

    /// Searches committed versions with implicit-AND predicates.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidVersion`] for a malformed
    /// `compatible_with` value.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResponse, RegistryError> {
        let compatible_with =
            query.compatible_with.as_deref().map(Version::parse).transpose()?;
        let needle = query.q.as_deref().map(str::to_ascii_lowercase);
        let snapshot = self.store.snapshot()?;

        let mut scored: Vec<(u32, i64, SearchResult)> = Vec::new();
        for entry in &snapshot.packages {
            for record in &entry.versions {
                if !matches_filters(record, query, compatible_with.as_ref()) {
                    continue;
                }
                let relevance = match &needle {
                    None => 0,
                    Some(needle) => match relevance(entry, record, needle) {
                        Some(score) => score,
                        None => continue,
                    },
                };
                scored.push((relevance, record.created_at, SearchResult {
                    package: entry.package.name.to_string(),
                    version: record.version.to_string(),
                    game: record.game.clone(),
                    description: entry.package.description.clone(),
                    yanked: record.yanked,
                }));
            }
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        let results: Vec<SearchResult> = scored.into_iter().map(|(_, _, result)| result).collect();
        Ok(SearchResponse {
            total: results.len(),
            results,
        })
    }

    /// Exports the whole live index as one document.
    ///
    /// # Errors
    ///
    /// Returns store failures as [`RegistryError::Internal`].
    pub fn index(&self) -> Result<IndexResponse, RegistryError> {
        let snapshot = self.store.snapshot()?;
        let mut packages = BTreeMap::new();
        let mut total_versions = 0;
        for entry in &snapshot.packages {
            let mut versions = entry.versions.clone();
            sort_versions_descending(&mut versions);
            total_versions += versions.len();
            packages.insert(entry.package.name.to_string(), IndexPackage {
                display_name: entry.package.display_name.clone(),
                game: entry.package.game.clone(),
                description: entry.package.description.clone(),
                latest_version: latest_version(&versions),
                versions: versions
                    .iter()
                    .map(|record| IndexVersion {
                        version: record.version.to_string(),
                        game: record.game.clone(),
                        minimum_ap_version: record.minimum_ap_version.to_string(),
                        maximum_ap_version: record
                            .maximum_ap_version
                            .as_ref()
                            .map(ToString::to_string),
                        yanked: record.yanked,
                        created_at: record.created_at,
                        distributions: record
                            .distributions
                            .iter()
                            .map(|dist| IndexDistribution {
                                filename: dist.filename.clone(),
                                url: dist.url.clone(),
                                sha256: dist.sha256.clone(),
                                size: dist.size,
                                platform_tag: dist.platform_tag.clone(),
                            })
                            .collect(),
                    })
                    .collect(),
            });
        }
        Ok(IndexResponse {
            total_packages: packages.len(),
            total_versions,
            packages,
            generated_at: now_millis(),
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps store not-found onto package-not-found for the given name.
fn not_found_package(name: &PackageName) -> impl FnOnce(StoreError) -> RegistryError {
    let name = name.to_string();
    move |error| match error {
        StoreError::NotFound(_) => RegistryError::PackageNotFound(name),
        other => other.into(),
    }
}

/// Sorts version records by version order, descending.
fn sort_versions_descending(versions: &mut [VersionRecord]) {
    versions.sort_by(|a, b| b.version.cmp(&a.version));
}

/// Returns the highest non-yanked version string.
fn latest_version(versions: &[VersionRecord]) -> Option<String> {
    versions
        .iter()
        .filter(|record| !record.yanked)
        .map(|record| &record.version)
        .max()
        .map(ToString::to_string)
}

/// Builds a collapsed version list item.
fn version_list_item(record: &VersionRecord) -> VersionListItem {
    VersionListItem {
        version: record.version.to_string(),
        created_at: record.created_at,
        yanked: record.yanked,
    }
}

/// Builds the full version response body.
fn version_response(record: &VersionRecord) -> VersionResponse {
    VersionResponse {
        package: record.package.to_string(),
        version: record.version.to_string(),
        game: record.game.clone(),
        manifest: record.manifest.clone(),
        entry_points: record.entry_points.clone(),
        minimum_ap_version: record.minimum_ap_version.to_string(),
        maximum_ap_version: record.maximum_ap_version.as_ref().map(ToString::to_string),
        yanked: record.yanked,
        yank_reason: record.yank_reason.clone(),
        created_at: record.created_at,
        provenance: record.provenance.clone(),
        distributions: record
            .distributions
            .iter()
            .map(|dist| DistributionResponse {
                filename: dist.filename.clone(),
                url: dist.url.clone(),
                sha256: dist.sha256.clone(),
                size: dist.size,
                platform_tag: dist.platform_tag.clone(),
                url_status: dist.url_status,
            })
            .collect(),
    }
}

/// Applies the exact-match and range filters (everything except `q`).
fn matches_filters(
    record: &VersionRecord,
    query: &SearchQuery,
    compatible_with: Option<&Version>,
) -> bool {
    if let Some(game) = &query.game
        && &record.game != game
    {
        return false;
    }
    if let Some(entry_point) = &query.entry_point
        && !record.entry_points.contains_key(entry_point)
    {
        return false;
    }
    if let Some(host) = compatible_with {
        if host < &record.minimum_ap_version {
            return false;
        }
        if let Some(maximum) = &record.maximum_ap_version
            && host > maximum
        {
            return false;
        }
    }
    if let Some(platform) = &query.platform
        && !record
            .distributions
            .iter()
            .any(|dist| dist.platform_tag.ends_with(platform.as_str()))
    {
        return false;
    }
    true
}

/// Scores a free-text match; `None` means no match.
fn relevance(entry: &PackageSnapshot, record: &VersionRecord, needle: &str) -> Option<u32> {
    let name = entry.package.name.as_str();
    if name == needle {
        return Some(4);
    }
    if name.contains(needle) {
        return Some(3);
    }
    if record.game.to_ascii_lowercase().contains(needle) {
        return Some(2);
    }
    let in_description = entry
        .package
        .description
        .as_deref()
        .is_some_and(|description| description.to_ascii_lowercase().contains(needle));
    let in_keywords = entry
        .package
        .keywords
        .iter()
        .any(|keyword| keyword.to_ascii_lowercase().contains(needle));
    (in_description || in_keywords).then_some(1)
}
