// island-registry-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Registry Store
// Description: Durable RegistryStore backed by SQLite WAL.
// Purpose: Enforce registry uniqueness invariants at transaction commit.
// Dependencies: island-registry-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`RegistryStore`] using `SQLite`. Package
//! metadata, ownership, versions, distributions, and API tokens live in
//! normalized tables; the manifest snapshot is stored verbatim as a JSON blob
//! inside the version row. All writes for one publish share one transaction,
//! and primary keys enforce the claim race and version immutability.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use island_registry_core::ApiTokenRecord;
use island_registry_core::ArtifactKind;
use island_registry_core::DistributionRecord;
use island_registry_core::OwnershipRecord;
use island_registry_core::PackageName;
use island_registry_core::PackageRecord;
use island_registry_core::PackageSnapshot;
use island_registry_core::PrincipalId;
use island_registry_core::Provenance;
use island_registry_core::PublishCommit;
use island_registry_core::RegistrySnapshot;
use island_registry_core::RegistryStore;
use island_registry_core::StoreError;
use island_registry_core::TrustedPublisherRule;
use island_registry_core::UrlStatus;
use island_registry_core::Version;
use island_registry_core::VersionRecord;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` registry store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Transient lock contention.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Package name already claimed.
    #[error("sqlite store name claimed: {0}")]
    NameClaimed(String),
    /// Version already committed.
    #[error("sqlite store version exists: {package} {version}")]
    VersionExists {
        /// Package name.
        package: String,
        /// Version string.
        version: String,
    },
    /// Referenced row is absent.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Db(message),
            SqliteStoreError::Busy(message) => Self::Busy(message),
            SqliteStoreError::Invalid(message) | SqliteStoreError::VersionMismatch(message) => {
                Self::Invalid(message)
            }
            SqliteStoreError::NameClaimed(name) => Self::NameClaimed(name),
            SqliteStoreError::VersionExists { package, version } => Self::VersionExists {
                package,
                version,
            },
            SqliteStoreError::NotFound(what) => Self::NotFound(what),
        }
    }
}

/// Maps a rusqlite error, distinguishing transient lock contention.
fn db_error(error: &rusqlite::Error) -> SqliteStoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = error
        && matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    {
        return SqliteStoreError::Busy(error.to_string());
    }
    SqliteStoreError::Db(error.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed registry store with WAL support.
#[derive(Clone)]
pub struct SqliteRegistryStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRegistryStore {
    /// Opens an `SQLite`-backed registry store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))
    }
}

impl RegistryStore for SqliteRegistryStore {
    fn commit_publish(&self, commit: PublishCommit) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_error(&err))?;
        commit_publish_tx(&tx, &commit)?;
        tx.commit().map_err(|err| db_error(&err))?;
        Ok(())
    }

    fn set_yanked(
        &self,
        package: &PackageName,
        version: &Version,
        reason: &str,
        yanked_at: i64,
    ) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let updated = guard
            .execute(
                "UPDATE versions SET yanked = 1, yank_reason = ?3, yanked_at = ?4 WHERE \
                 package_name = ?1 AND version = ?2",
                params![package.as_str(), version.to_string(), reason, yanked_at],
            )
            .map_err(|err| db_error(&err))?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("version {package} {version}")));
        }
        Ok(())
    }

    fn get_package(&self, package: &PackageName) -> Result<Option<PackageRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(load_package(&guard, package)?)
    }

    fn get_version(
        &self,
        package: &PackageName,
        version: &Version,
    ) -> Result<Option<VersionRecord>, StoreError> {
        let guard = self.lock()?;
        Ok(load_version(&guard, package, &version.to_string())?)
    }

    fn list_versions(&self, package: &PackageName) -> Result<Vec<VersionRecord>, StoreError> {
        let guard = self.lock()?;
        if load_package(&guard, package)?.is_none() {
            return Err(StoreError::NotFound(format!("package {package}")));
        }
        Ok(load_versions(&guard, package)?)
    }

    fn list_packages(&self) -> Result<Vec<PackageRecord>, StoreError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT name, display_name, game, description, authors_json, homepage, \
                 repository, keywords_json, created_at, updated_at FROM packages ORDER BY name",
            )
            .map_err(|err| db_error(&err))?;
        let rows = statement
            .query_map(params![], package_from_row)
            .map_err(|err| db_error(&err))?;
        let mut packages = Vec::new();
        for row in rows {
            packages.push(row.map_err(|err| db_error(&err))??);
        }
        Ok(packages)
    }

    fn get_ownership(
        &self,
        package: &PackageName,
    ) -> Result<Option<OwnershipRecord>, StoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT owner, collaborators_json, trusted_publishers_json FROM owners WHERE \
                 package_name = ?1",
                params![package.as_str()],
                |row| {
                    let owner: String = row.get(0)?;
                    let collaborators: String = row.get(1)?;
                    let trusted: String = row.get(2)?;
                    Ok((owner, collaborators, trusted))
                },
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        let Some((owner, collaborators, trusted)) = row else {
            return Ok(None);
        };
        let collaborators: Vec<PrincipalId> = decode_json("owners.collaborators", &collaborators)?;
        let trusted_publishers: Vec<TrustedPublisherRule> =
            decode_json("owners.trusted_publishers", &trusted)?;
        Ok(Some(OwnershipRecord {
            package: package.clone(),
            owner: PrincipalId::new(owner),
            collaborators,
            trusted_publishers,
        }))
    }

    fn update_ownership(&self, record: OwnershipRecord) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let collaborators = encode_json(&record.collaborators)?;
        let trusted = encode_json(&record.trusted_publishers)?;
        let updated = guard
            .execute(
                "UPDATE owners SET owner = ?2, collaborators_json = ?3, trusted_publishers_json \
                 = ?4 WHERE package_name = ?1",
                params![record.package.as_str(), record.owner.as_str(), collaborators, trusted],
            )
            .map_err(|err| db_error(&err))?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("package {}", record.package)));
        }
        Ok(())
    }

    fn insert_token(&self, record: ApiTokenRecord) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let inserted = guard
            .execute(
                "INSERT OR IGNORE INTO tokens (fingerprint, principal, created_at, expires_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.fingerprint,
                    record.principal.as_str(),
                    record.created_at,
                    record.expires_at
                ],
            )
            .map_err(|err| db_error(&err))?;
        if inserted == 0 {
            return Err(StoreError::Invalid("token fingerprint already exists".to_string()));
        }
        Ok(())
    }

    fn lookup_token(&self, fingerprint: &str) -> Result<Option<ApiTokenRecord>, StoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT fingerprint, principal, created_at, expires_at FROM tokens WHERE \
                 fingerprint = ?1",
                params![fingerprint],
                |row| {
                    Ok(ApiTokenRecord {
                        fingerprint: row.get(0)?,
                        principal: PrincipalId::new(row.get::<_, String>(1)?),
                        created_at: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        Ok(row)
    }

    fn revoke_token(&self, fingerprint: &str) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let deleted = guard
            .execute("DELETE FROM tokens WHERE fingerprint = ?1", params![fingerprint])
            .map_err(|err| db_error(&err))?;
        if deleted == 0 {
            return Err(StoreError::NotFound("token".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<RegistrySnapshot, StoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| db_error(&err))?;
        let packages = {
            let mut statement = tx
                .prepare(
                    "SELECT name, display_name, game, description, authors_json, homepage, \
                     repository, keywords_json, created_at, updated_at FROM packages ORDER BY \
                     name",
                )
                .map_err(|err| db_error(&err))?;
            let rows = statement
                .query_map(params![], package_from_row)
                .map_err(|err| db_error(&err))?;
            let mut packages = Vec::new();
            for row in rows {
                let package = row.map_err(|err| db_error(&err))??;
                let versions = load_versions(&tx, &package.name)?;
                packages.push(PackageSnapshot {
                    package,
                    versions,
                });
            }
            packages
        };
        tx.commit().map_err(|err| db_error(&err))?;
        Ok(RegistrySnapshot {
            packages,
        })
    }
}

// ============================================================================
// SECTION: Publish Transaction
// ============================================================================

/// Applies one publish inside an open transaction.
fn commit_publish_tx(tx: &Transaction<'_>, commit: &PublishCommit) -> Result<(), StoreError> {
    let name = commit.package.name.as_str();
    let package_exists: bool = tx
        .query_row("SELECT 1 FROM packages WHERE name = ?1", params![name], |_| Ok(()))
        .optional()
        .map_err(|err| db_error(&err))?
        .is_some();

    match (&commit.ownership, package_exists) {
        (Some(ownership), false) => {
            insert_package(tx, &commit.package)?;
            insert_ownership(tx, ownership)?;
        }
        (Some(_), true) => {
            // The claim lost a race with another first publish.
            return Err(StoreError::NameClaimed(name.to_string()));
        }
        (None, false) => {
            return Err(StoreError::NotFound(format!("package disappeared before commit: {name}")));
        }
        (None, true) => refresh_package(tx, &commit.package)?,
    }

    let version_key = commit.version.version.to_string();
    let version_exists: bool = tx
        .query_row(
            "SELECT 1 FROM versions WHERE package_name = ?1 AND version = ?2",
            params![name, version_key],
            |_| Ok(()),
        )
        .optional()
        .map_err(|err| db_error(&err))?
        .is_some();
    if version_exists {
        return Err(StoreError::VersionExists {
            package: name.to_string(),
            version: version_key,
        });
    }

    insert_version(tx, &commit.version)?;
    for distribution in &commit.version.distributions {
        insert_distribution(tx, name, &version_key, distribution)?;
    }
    Ok(())
}

/// Inserts a new package row.
fn insert_package(tx: &Transaction<'_>, package: &PackageRecord) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO packages (name, display_name, game, description, authors_json, homepage, \
         repository, keywords_json, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, \
         ?8, ?9, ?10)",
        params![
            package.name.as_str(),
            package.display_name,
            package.game,
            package.description,
            encode_json(&package.authors)?,
            package.homepage,
            package.repository,
            encode_json(&package.keywords)?,
            package.created_at,
            package.updated_at
        ],
    )
    .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Refreshes mutable package metadata after a non-claim publish.
fn refresh_package(tx: &Transaction<'_>, package: &PackageRecord) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE packages SET game = ?2, description = ?3, authors_json = ?4, homepage = ?5, \
         repository = ?6, keywords_json = ?7, updated_at = ?8 WHERE name = ?1",
        params![
            package.name.as_str(),
            package.game,
            package.description,
            encode_json(&package.authors)?,
            package.homepage,
            package.repository,
            encode_json(&package.keywords)?,
            package.updated_at
        ],
    )
    .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Inserts the ownership row for a claimed package.
fn insert_ownership(tx: &Transaction<'_>, ownership: &OwnershipRecord) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO owners (package_name, owner, collaborators_json, trusted_publishers_json) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            ownership.package.as_str(),
            ownership.owner.as_str(),
            encode_json(&ownership.collaborators)?,
            encode_json(&ownership.trusted_publishers)?
        ],
    )
    .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Inserts an immutable version row.
fn insert_version(tx: &Transaction<'_>, version: &VersionRecord) -> Result<(), StoreError> {
    let manifest = serde_json::to_string(&version.manifest)
        .map_err(|err| StoreError::Invalid(err.to_string()))?;
    let provenance = version
        .provenance
        .as_ref()
        .map(encode_json::<Provenance>)
        .transpose()?;
    tx.execute(
        "INSERT INTO versions (package_name, version, game, manifest_json, entry_points_json, \
         minimum_ap_version, maximum_ap_version, yanked, yank_reason, yanked_at, created_at, \
         publisher, provenance_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
         ?13)",
        params![
            version.package.as_str(),
            version.version.to_string(),
            version.game,
            manifest,
            encode_json(&version.entry_points)?,
            version.minimum_ap_version.to_string(),
            version.maximum_ap_version.as_ref().map(ToString::to_string),
            version.yanked,
            version.yank_reason,
            version.yanked_at,
            version.created_at,
            version.publisher.as_str(),
            provenance
        ],
    )
    .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Inserts one distribution row, unique on (package, version, filename).
fn insert_distribution(
    tx: &Transaction<'_>,
    package: &str,
    version: &str,
    distribution: &DistributionRecord,
) -> Result<(), StoreError> {
    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO distributions (package_name, version, filename, url, sha256, \
             size, platform_tag, kind, url_status_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
             ?9)",
            params![
                package,
                version,
                distribution.filename,
                distribution.url,
                distribution.sha256,
                i64::try_from(distribution.size)
                    .map_err(|_| StoreError::Invalid("distribution size overflow".to_string()))?,
                distribution.platform_tag,
                kind_label(distribution.kind),
                encode_json(&distribution.url_status)?
            ],
        )
        .map_err(|err| db_error(&err))?;
    if inserted == 0 {
        return Err(StoreError::Invalid(format!(
            "duplicate distribution filename: {}",
            distribution.filename
        )));
    }
    Ok(())
}

// ============================================================================
// SECTION: Row Loading
// ============================================================================

/// Builds a package record from a SELECT row, deferring JSON decode errors.
fn package_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<PackageRecord, StoreError>> {
    let name: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let game: String = row.get(2)?;
    let description: Option<String> = row.get(3)?;
    let authors_json: String = row.get(4)?;
    let homepage: Option<String> = row.get(5)?;
    let repository: Option<String> = row.get(6)?;
    let keywords_json: String = row.get(7)?;
    let created_at: i64 = row.get(8)?;
    let updated_at: i64 = row.get(9)?;
    Ok((|| {
        Ok(PackageRecord {
            name: PackageName::new(name),
            display_name,
            game,
            description,
            authors: decode_json("packages.authors", &authors_json)?,
            homepage,
            repository,
            keywords: decode_json("packages.keywords", &keywords_json)?,
            created_at,
            updated_at,
        })
    })())
}

/// Loads one package by name.
fn load_package(
    conn: &Connection,
    package: &PackageName,
) -> Result<Option<PackageRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT name, display_name, game, description, authors_json, homepage, repository, \
             keywords_json, created_at, updated_at FROM packages WHERE name = ?1",
            params![package.as_str()],
            package_from_row,
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    row.transpose()
}

/// Loads one version with its distributions.
fn load_version(
    conn: &Connection,
    package: &PackageName,
    version: &str,
) -> Result<Option<VersionRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT game, manifest_json, entry_points_json, minimum_ap_version, \
             maximum_ap_version, yanked, yank_reason, yanked_at, created_at, publisher, \
             provenance_json FROM versions WHERE package_name = ?1 AND version = ?2",
            params![package.as_str(), version],
            version_columns,
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    let Some(columns) = row else {
        return Ok(None);
    };
    let distributions = load_distributions(conn, package.as_str(), version)?;
    Ok(Some(version_from_columns(package, version, columns, distributions)?))
}

/// Loads every version of a package with distributions, unordered.
fn load_versions(
    conn: &Connection,
    package: &PackageName,
) -> Result<Vec<VersionRecord>, StoreError> {
    let mut statement = conn
        .prepare("SELECT version FROM versions WHERE package_name = ?1")
        .map_err(|err| db_error(&err))?;
    let rows = statement
        .query_map(params![package.as_str()], |row| row.get::<_, String>(0))
        .map_err(|err| db_error(&err))?;
    let mut versions = Vec::new();
    for row in rows {
        let key = row.map_err(|err| db_error(&err))?;
        if let Some(record) = load_version(conn, package, &key)? {
            versions.push(record);
        }
    }
    Ok(versions)
}

/// Raw column tuple for one version row.
type VersionColumns = (
    String,
    String,
    String,
    String,
    Option<String>,
    bool,
    Option<String>,
    Option<i64>,
    i64,
    String,
    Option<String>,
);

/// Extracts the version column tuple from a SELECT row.
fn version_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

/// Builds a version record from raw columns and loaded distributions.
fn version_from_columns(
    package: &PackageName,
    version: &str,
    columns: VersionColumns,
    distributions: Vec<DistributionRecord>,
) -> Result<VersionRecord, StoreError> {
    let (
        game,
        manifest_json,
        entry_points_json,
        minimum,
        maximum,
        yanked,
        yank_reason,
        yanked_at,
        created_at,
        publisher,
        provenance_json,
    ) = columns;
    let entry_points: BTreeMap<String, String> =
        decode_json("versions.entry_points", &entry_points_json)?;
    let provenance = provenance_json
        .as_deref()
        .map(|raw| decode_json::<Provenance>("versions.provenance", raw))
        .transpose()?;
    Ok(VersionRecord {
        package: package.clone(),
        version: parse_stored_version(version)?,
        game,
        manifest: serde_json::from_str(&manifest_json)
            .map_err(|err| StoreError::Invalid(format!("versions.manifest: {err}")))?,
        entry_points,
        minimum_ap_version: parse_stored_version(&minimum)?,
        maximum_ap_version: maximum.as_deref().map(parse_stored_version).transpose()?,
        yanked,
        yank_reason,
        yanked_at,
        created_at,
        publisher: PrincipalId::new(publisher),
        provenance,
        distributions,
    })
}

/// Loads all distributions of one version, filename-ascending.
fn load_distributions(
    conn: &Connection,
    package: &str,
    version: &str,
) -> Result<Vec<DistributionRecord>, StoreError> {
    let mut statement = conn
        .prepare(
            "SELECT filename, url, sha256, size, platform_tag, kind, url_status_json FROM \
             distributions WHERE package_name = ?1 AND version = ?2 ORDER BY filename",
        )
        .map_err(|err| db_error(&err))?;
    let rows = statement
        .query_map(params![package, version], |row| {
            let filename: String = row.get(0)?;
            let url: String = row.get(1)?;
            let sha256: String = row.get(2)?;
            let size: i64 = row.get(3)?;
            let platform_tag: String = row.get(4)?;
            let kind: String = row.get(5)?;
            let url_status: String = row.get(6)?;
            Ok((filename, url, sha256, size, platform_tag, kind, url_status))
        })
        .map_err(|err| db_error(&err))?;
    let mut distributions = Vec::new();
    for row in rows {
        let (filename, url, sha256, size, platform_tag, kind, url_status) =
            row.map_err(|err| db_error(&err))?;
        distributions.push(DistributionRecord {
            filename,
            url,
            sha256,
            size: u64::try_from(size)
                .map_err(|_| StoreError::Invalid("negative distribution size".to_string()))?,
            platform_tag,
            kind: parse_kind_label(&kind)?,
            url_status: decode_json::<UrlStatus>("distributions.url_status", &url_status)?,
        });
    }
    Ok(distributions)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a stored version string, failing closed on corruption.
fn parse_stored_version(raw: &str) -> Result<Version, StoreError> {
    Version::parse(raw).map_err(|err| StoreError::Invalid(format!("stored version: {err}")))
}

/// Serializes a value for a JSON column.
fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Invalid(err.to_string()))
}

/// Deserializes a JSON column, naming the column in the error.
fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Invalid(format!("{column}: {err}")))
}

/// Returns the stored label for an artifact kind.
const fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Binary => "binary",
        ArtifactKind::Source => "source",
    }
}

/// Parses a stored artifact kind label.
fn parse_kind_label(label: &str) -> Result<ArtifactKind, StoreError> {
    match label {
        "binary" => Ok(ArtifactKind::Binary),
        "source" => Ok(ArtifactKind::Source),
        other => Err(StoreError::Invalid(format!("unsupported artifact kind: {other}"))),
    }
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS packages (
                    name TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    game TEXT NOT NULL,
                    description TEXT,
                    authors_json TEXT NOT NULL,
                    homepage TEXT,
                    repository TEXT,
                    keywords_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS owners (
                    package_name TEXT PRIMARY KEY,
                    owner TEXT NOT NULL,
                    collaborators_json TEXT NOT NULL,
                    trusted_publishers_json TEXT NOT NULL,
                    FOREIGN KEY (package_name) REFERENCES packages(name) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS versions (
                    package_name TEXT NOT NULL,
                    version TEXT NOT NULL,
                    game TEXT NOT NULL,
                    manifest_json TEXT NOT NULL,
                    entry_points_json TEXT NOT NULL,
                    minimum_ap_version TEXT NOT NULL,
                    maximum_ap_version TEXT,
                    yanked INTEGER NOT NULL DEFAULT 0,
                    yank_reason TEXT,
                    yanked_at INTEGER,
                    created_at INTEGER NOT NULL,
                    publisher TEXT NOT NULL,
                    provenance_json TEXT,
                    PRIMARY KEY (package_name, version),
                    FOREIGN KEY (package_name) REFERENCES packages(name) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS distributions (
                    package_name TEXT NOT NULL,
                    version TEXT NOT NULL,
                    filename TEXT NOT NULL,
                    url TEXT NOT NULL,
                    sha256 TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    platform_tag TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    url_status_json TEXT NOT NULL,
                    PRIMARY KEY (package_name, version, filename),
                    FOREIGN KEY (package_name, version)
                        REFERENCES versions(package_name, version) ON DELETE CASCADE
                );
                CREATE TABLE IF NOT EXISTS tokens (
                    fingerprint TEXT PRIMARY KEY,
                    principal TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_versions_package
                    ON versions (package_name);
                CREATE INDEX IF NOT EXISTS idx_distributions_version
                    ON distributions (package_name, version);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}
