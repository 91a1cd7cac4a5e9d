// island-registry-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Registry Store Tests
// Description: Validate SQLite RegistryStore behavior.
// Purpose: Ensure durable persistence and commit-time uniqueness.
// Dependencies: island-registry-store-sqlite, island-registry-core, tempfile
// ============================================================================

//! Conformance tests for the SQLite-backed registry store: publish commit
//! atomicity, claim races, yank persistence across reopen, and token
//! lifecycle.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use island_registry_core::ApiTokenRecord;
use island_registry_core::ArtifactKind;
use island_registry_core::DistributionRecord;
use island_registry_core::OwnershipRecord;
use island_registry_core::PackageName;
use island_registry_core::PackageRecord;
use island_registry_core::PrincipalId;
use island_registry_core::Provenance;
use island_registry_core::PublishCommit;
use island_registry_core::RegistryStore;
use island_registry_core::StoreError;
use island_registry_core::TrustedPublisherRule;
use island_registry_core::UrlStatus;
use island_registry_core::Version;
use island_registry_core::VersionRecord;
use island_registry_store_sqlite::SqliteRegistryStore;
use island_registry_store_sqlite::SqliteStoreConfig;
use island_registry_store_sqlite::SqliteStoreMode;
use island_registry_store_sqlite::SqliteSyncMode;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn store_for(path: &std::path::Path) -> SqliteRegistryStore {
    let config = SqliteStoreConfig {
        path: path.to_path_buf(),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    };
    SqliteRegistryStore::new(config).expect("store init")
}

fn sample_commit(name: &str, version: &str, claim: bool) -> PublishCommit {
    let package_name = PackageName::new(name);
    let parsed = Version::parse(version).unwrap();
    let mut entry_points = BTreeMap::new();
    entry_points.insert("sample_game".to_string(), "sample_game.world:World".to_string());
    PublishCommit {
        package: PackageRecord {
            name: package_name.clone(),
            display_name: name.to_string(),
            game: "Sample Game".to_string(),
            description: Some("a sample world".to_string()),
            authors: vec!["alice".to_string()],
            homepage: None,
            repository: Some("https://github.com/alice/sample-game".to_string()),
            keywords: vec!["sample".to_string()],
            created_at: 10,
            updated_at: 10,
        },
        ownership: claim.then(|| OwnershipRecord {
            package: package_name.clone(),
            owner: PrincipalId::new("alice"),
            collaborators: vec![PrincipalId::new("bob")],
            trusted_publishers: vec![TrustedPublisherRule {
                provider: "github".to_string(),
                repository: "alice/sample-game".to_string(),
                workflow: ".github/workflows/release.yml".to_string(),
                environment: None,
            }],
        }),
        version: VersionRecord {
            package: package_name,
            version: parsed,
            game: "Sample Game".to_string(),
            manifest: json!({
                "name": name,
                "version": version,
                "game": "Sample Game",
                "future_field": {"nested": true},
            }),
            entry_points,
            minimum_ap_version: Version::parse("0.5.0").unwrap(),
            maximum_ap_version: Some(Version::parse("0.6.99").unwrap()),
            yanked: false,
            yank_reason: None,
            yanked_at: None,
            created_at: 10,
            publisher: PrincipalId::new("alice"),
            provenance: Some(Provenance {
                publisher: "alice/sample-game".to_string(),
                workflow: ".github/workflows/release.yml".to_string(),
                commit: "deadbeef".to_string(),
                build_time: Some(9),
            }),
            distributions: vec![DistributionRecord {
                filename: format!("sample_game-{version}-py3-none-any.island"),
                url: format!("https://example.invalid/{version}/a.island"),
                sha256: "a".repeat(64),
                size: 123,
                platform_tag: "py3-none-any".to_string(),
                kind: ArtifactKind::Binary,
                url_status: UrlStatus::Active,
            }],
        },
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn publish_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    let commit = sample_commit("sample-game", "1.0.0", true);
    store.commit_publish(commit.clone()).unwrap();

    let name = PackageName::new("sample-game");
    let version = Version::parse("1.0.0").unwrap();
    let loaded = store.get_version(&name, &version).unwrap().expect("version stored");
    assert_eq!(loaded, commit.version);

    let package = store.get_package(&name).unwrap().expect("package stored");
    assert_eq!(package, commit.package);

    let ownership = store.get_ownership(&name).unwrap().expect("ownership stored");
    assert_eq!(Some(ownership), commit.ownership);
}

#[test]
fn duplicate_version_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
    let err = store.commit_publish(sample_commit("sample-game", "1.0.0", false)).unwrap_err();
    assert!(matches!(err, StoreError::VersionExists { .. }));
}

#[test]
fn losing_claim_race_reports_name_claimed() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
    let err = store.commit_publish(sample_commit("sample-game", "1.0.1", true)).unwrap_err();
    assert!(matches!(err, StoreError::NameClaimed(_)));
}

#[test]
fn second_version_refreshes_package_metadata() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
    let mut second = sample_commit("sample-game", "1.1.0", false);
    second.package.updated_at = 20;
    second.package.description = Some("updated".to_string());
    store.commit_publish(second).unwrap();

    let package = store.get_package(&PackageName::new("sample-game")).unwrap().unwrap();
    assert_eq!(package.updated_at, 20);
    assert_eq!(package.description.as_deref(), Some("updated"));
    let versions = store.list_versions(&PackageName::new("sample-game")).unwrap();
    assert_eq!(versions.len(), 2);
}

#[test]
fn yank_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.sqlite");
    let name = PackageName::new("sample-game");
    let version = Version::parse("1.0.0").unwrap();
    {
        let store = store_for(&path);
        store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
        store.set_yanked(&name, &version, "broken seed", 42).unwrap();
    }
    let store = store_for(&path);
    let record = store.get_version(&name, &version).unwrap().unwrap();
    assert!(record.yanked);
    assert_eq!(record.yank_reason.as_deref(), Some("broken seed"));
    assert_eq!(record.yanked_at, Some(42));
}

#[test]
fn yank_of_missing_version_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    let err = store
        .set_yanked(&PackageName::new("ghost"), &Version::parse("1.0.0").unwrap(), "x", 1)
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn ownership_update_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
    let name = PackageName::new("sample-game");
    let mut ownership = store.get_ownership(&name).unwrap().unwrap();
    ownership.collaborators.push(PrincipalId::new("carol"));
    store.update_ownership(ownership.clone()).unwrap();
    assert_eq!(store.get_ownership(&name).unwrap(), Some(ownership));
}

#[test]
fn token_lifecycle_persists() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("registry.sqlite");
    let record = ApiTokenRecord {
        fingerprint: "f".repeat(64),
        principal: PrincipalId::new("alice"),
        created_at: 1,
        expires_at: Some(1_000),
    };
    {
        let store = store_for(&path);
        store.insert_token(record.clone()).unwrap();
        let err = store.insert_token(record.clone()).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }
    let store = store_for(&path);
    assert_eq!(store.lookup_token(&record.fingerprint).unwrap(), Some(record.clone()));
    store.revoke_token(&record.fingerprint).unwrap();
    assert_eq!(store.lookup_token(&record.fingerprint).unwrap(), None);
    assert!(matches!(
        store.revoke_token(&record.fingerprint).unwrap_err(),
        StoreError::NotFound(_)
    ));
}

#[test]
fn snapshot_contains_every_committed_version() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    store.commit_publish(sample_commit("sample-game", "1.0.0", true)).unwrap();
    store.commit_publish(sample_commit("sample-game", "1.1.0", false)).unwrap();
    store.commit_publish(sample_commit("other-game", "2.0.0", true)).unwrap();

    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.packages.len(), 2);
    let names: Vec<&str> =
        snapshot.packages.iter().map(|entry| entry.package.name.as_str()).collect();
    assert_eq!(names, vec!["other-game", "sample-game"]);
    let sample = snapshot
        .packages
        .iter()
        .find(|entry| entry.package.name.as_str() == "sample-game")
        .unwrap();
    assert_eq!(sample.versions.len(), 2);
    for version in &sample.versions {
        assert!(!version.distributions.is_empty());
    }
}

#[test]
fn list_versions_of_unknown_package_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("registry.sqlite"));
    let err = store.list_versions(&PackageName::new("ghost")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
