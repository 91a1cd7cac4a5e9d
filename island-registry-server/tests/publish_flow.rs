// island-registry-server/tests/publish_flow.rs
// ============================================================================
// Module: Publish Flow Tests
// Description: End-to-end registration and discovery scenarios.
// Purpose: Exercise claim, immutability, verification, and yank semantics.
// Dependencies: island-registry-server, island-registry-core, tokio
// ============================================================================

//! End-to-end scenarios over the coordinator and discovery engine with the
//! in-memory store and a scripted fetcher: first-publish claims, duplicate
//! versions, digest enforcement, HTTPS-only URLs, compatibility filtering,
//! and yanks.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use island_registry_core::ForbiddenReason;
use island_registry_core::InMemoryRegistryStore;
use island_registry_core::PackageName;
use island_registry_core::PrincipalId;
use island_registry_core::RegistryError;
use island_registry_core::RegistryStore;
use island_registry_core::StreamingDigest;
use island_registry_core::Version;
use island_registry_core::digest_error_for_url;
use island_registry_core::verify_digest;
use island_registry_server::ArtifactFetcher;
use island_registry_server::AuthenticatedPrincipal;
use island_registry_server::DiscoveryEngine;
use island_registry_server::DistributionRegistration;
use island_registry_server::FederatedIdentity;
use island_registry_server::NoopAuditSink;
use island_registry_server::PublishLimits;
use island_registry_server::RegistrationCoordinator;
use island_registry_server::RegistrationRequest;
use island_registry_server::SearchQuery;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// SHA-256 of the empty byte string.
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Scripted fetcher serving fixed bodies per URL.
struct ScriptedFetcher {
    /// Served bytes by URL.
    bodies: HashMap<String, Vec<u8>>,
    /// Number of fetches attempted.
    fetches: AtomicU32,
}

impl ScriptedFetcher {
    fn new(bodies: &[(&str, &[u8])]) -> Self {
        Self {
            bodies: bodies
                .iter()
                .map(|(url, bytes)| ((*url).to_string(), bytes.to_vec()))
                .collect(),
            fetches: AtomicU32::new(0),
        }
    }

    fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for ScriptedFetcher {
    async fn fetch_and_verify(
        &self,
        url: &str,
        declared_sha256: &str,
        declared_size: u64,
    ) -> Result<(), RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let Some(bytes) = self.bodies.get(url) else {
            return Err(RegistryError::UrlUnreachable {
                url: url.to_string(),
                reason: "no such fixture".to_string(),
            });
        };
        let mut digest = StreamingDigest::new();
        digest.update(bytes);
        let (computed, size) = digest.finalize();
        verify_digest(&computed, size, declared_sha256, declared_size)
            .map_err(|err| digest_error_for_url(err, url))
    }
}

struct Harness {
    store: Arc<InMemoryRegistryStore>,
    fetcher: Arc<ScriptedFetcher>,
    coordinator: RegistrationCoordinator,
    discovery: DiscoveryEngine,
}

fn harness(bodies: &[(&str, &[u8])]) -> Harness {
    let store = Arc::new(InMemoryRegistryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::new(bodies));
    let coordinator = RegistrationCoordinator::new(
        Arc::clone(&store) as Arc<dyn RegistryStore>,
        Arc::clone(&fetcher) as Arc<dyn ArtifactFetcher>,
        Arc::new(NoopAuditSink),
        PublishLimits {
            max_parallel_fetches: 8,
            publish_deadline_ms: 5_000,
        },
    );
    let discovery = DiscoveryEngine::new(Arc::clone(&store) as Arc<dyn RegistryStore>);
    Harness {
        store,
        fetcher,
        coordinator,
        discovery,
    }
}

fn alice() -> AuthenticatedPrincipal {
    AuthenticatedPrincipal {
        principal: PrincipalId::new("alice"),
        token_fingerprint: Some("a".repeat(64)),
        federated: None,
    }
}

fn bob() -> AuthenticatedPrincipal {
    AuthenticatedPrincipal {
        principal: PrincipalId::new("bob"),
        token_fingerprint: Some("b".repeat(64)),
        federated: None,
    }
}

fn ci_bot() -> AuthenticatedPrincipal {
    AuthenticatedPrincipal {
        principal: PrincipalId::federated("github", "alice/pokemon-emerald"),
        token_fingerprint: None,
        federated: Some(FederatedIdentity {
            provider: "github".to_string(),
            repository: "alice/pokemon-emerald".to_string(),
            workflow: ".github/workflows/release.yml".to_string(),
            commit: "c0ffee".to_string(),
            environment: None,
        }),
    }
}

fn emerald_request(version: &str, url: &str, sha256: &str, size: u64) -> RegistrationRequest {
    request_with_compat(version, url, sha256, size, "0.5.0", None)
}

fn request_with_compat(
    version: &str,
    url: &str,
    sha256: &str,
    size: u64,
    minimum: &str,
    maximum: Option<&str>,
) -> RegistrationRequest {
    let encoded = version.replace('-', "_");
    let mut body = serde_json::json!({
        "name": "pokemon-emerald",
        "version": version,
        "game": "Pokemon Emerald",
        "minimum_ap_version": minimum,
        "entry_points": {"pokemon_emerald": "pokemon_emerald.world:World"},
        "distributions": [{
            "filename": format!("pokemon_emerald-{encoded}-py3-none-any.island"),
            "url": url,
            "sha256": sha256,
            "size": size,
            "platform_tag": "py3-none-any",
        }],
    });
    if let Some(maximum) = maximum {
        body["maximum_ap_version"] = serde_json::json!(maximum);
    }
    serde_json::from_value(body).unwrap()
}

// ============================================================================
// SECTION: Scenarios
// ============================================================================

#[tokio::test]
async fn s1_first_publish_claims_the_package() {
    let url = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let harness = harness(&[(url, b"")]);
    let outcome = harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.0", url, EMPTY_SHA256, 0), "req-1")
        .await
        .unwrap();
    assert_eq!(outcome.package, "pokemon-emerald");
    assert_eq!(outcome.version, "1.0.0");
    assert!(!outcome.replayed);

    let package = harness.discovery.get_package(&PackageName::new("pokemon-emerald")).unwrap();
    assert_eq!(package.owner.as_deref(), Some("alice"));
    assert_eq!(package.latest_version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn s2_duplicate_version_is_rejected() {
    let url = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let other = "https://mirror.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let harness = harness(&[(url, b""), (other, b"")]);
    harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.0", url, EMPTY_SHA256, 0), "req-1")
        .await
        .unwrap();
    let err = harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.0", other, EMPTY_SHA256, 0), "req-2")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::VersionExists { .. }));
    assert_eq!(err.kind(), "version-exists");
}

#[tokio::test]
async fn s3_digest_mismatch_commits_nothing() {
    let url = "https://releases.example/pokemon_emerald-1.0.1-py3-none-any.island";
    let harness = harness(&[(url, b"actual bytes")]);
    let err = harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.1", url, &"0".repeat(64), 12), "req-1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "digest-mismatch");

    let lookup = harness.discovery.get_version(
        &PackageName::new("pokemon-emerald"),
        &Version::parse("1.0.1").unwrap(),
    );
    assert!(matches!(lookup, Err(RegistryError::PackageNotFound(_))));
    assert!(harness.store.get_package(&PackageName::new("pokemon-emerald")).unwrap().is_none());
}

#[tokio::test]
async fn s4_non_https_url_is_rejected_before_any_fetch() {
    let harness = harness(&[]);
    let err = harness
        .coordinator
        .publish(
            &alice(),
            emerald_request(
                "1.0.0",
                "http://releases.example/pokemon_emerald-1.0.0-py3-none-any.island",
                EMPTY_SHA256,
                0,
            ),
            "req-1",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "url-not-https");
    assert_eq!(harness.fetcher.fetch_count(), 0);
}

#[tokio::test]
async fn s5_compatibility_filter_matches_version_ranges() {
    let v1 = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let v2 = "https://releases.example/pokemon_emerald-2.0.0-py3-none-any.island";
    let harness = harness(&[(v1, b""), (v2, b"")]);
    harness
        .coordinator
        .publish(
            &alice(),
            request_with_compat("1.0.0", v1, EMPTY_SHA256, 0, "0.5.0", Some("0.6.99")),
            "req-1",
        )
        .await
        .unwrap();
    harness
        .coordinator
        .publish(
            &alice(),
            request_with_compat("2.0.0", v2, EMPTY_SHA256, 0, "0.6.0", None),
            "req-2",
        )
        .await
        .unwrap();

    let narrow = harness
        .discovery
        .search(&SearchQuery {
            compatible_with: Some("0.5.5".to_string()),
            ..SearchQuery::default()
        })
        .unwrap();
    let versions: Vec<&str> = narrow.results.iter().map(|r| r.version.as_str()).collect();
    assert_eq!(versions, vec!["1.0.0"]);

    let wide = harness
        .discovery
        .search(&SearchQuery {
            compatible_with: Some("0.6.50".to_string()),
            ..SearchQuery::default()
        })
        .unwrap();
    let mut versions: Vec<&str> = wide.results.iter().map(|r| r.version.as_str()).collect();
    versions.sort_unstable();
    assert_eq!(versions, vec!["1.0.0", "2.0.0"]);
}

#[tokio::test]
async fn s6_yank_flags_but_keeps_the_version() {
    let url = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let harness = harness(&[(url, b"")]);
    harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.0", url, EMPTY_SHA256, 0), "req-1")
        .await
        .unwrap();
    let name = PackageName::new("pokemon-emerald");
    let version = Version::parse("1.0.0").unwrap();
    harness.coordinator.yank(&alice(), &name, &version, "bad item pool", "req-2").unwrap();

    let record = harness.discovery.get_version(&name, &version).unwrap();
    assert!(record.yanked);
    assert_eq!(record.yank_reason.as_deref(), Some("bad item pool"));

    let index = harness.discovery.index().unwrap();
    let entry = index.packages.get("pokemon-emerald").unwrap();
    let indexed = entry.versions.iter().find(|v| v.version == "1.0.0").unwrap();
    assert!(indexed.yanked);
    // The yanked version no longer counts as latest.
    assert_eq!(entry.latest_version, None);
}

// ============================================================================
// SECTION: Properties
// ============================================================================

#[tokio::test]
async fn claim_excludes_unrelated_publishers() {
    let v1 = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let v2 = "https://releases.example/pokemon_emerald-1.1.0-py3-none-any.island";
    let harness = harness(&[(v1, b""), (v2, b"")]);
    harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.0", v1, EMPTY_SHA256, 0), "req-1")
        .await
        .unwrap();
    let err = harness
        .coordinator
        .publish(&bob(), emerald_request("1.1.0", v2, EMPTY_SHA256, 0), "req-2")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Forbidden {
            reason: ForbiddenReason::NotOwner
        }
    ));
}

#[tokio::test]
async fn identical_replay_is_acknowledged() {
    let url = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let harness = harness(&[(url, b"")]);
    let request = emerald_request("1.0.0", url, EMPTY_SHA256, 0);
    harness.coordinator.publish(&alice(), request.clone(), "req-1").await.unwrap();

    let replay = harness.coordinator.publish(&alice(), request.clone(), "req-2").await.unwrap();
    assert!(replay.replayed);

    // The same bytes replayed by a different principal are not a replay.
    let err = harness.coordinator.publish(&bob(), request, "req-3").await.unwrap_err();
    assert!(matches!(err, RegistryError::Forbidden { .. }));
}

#[tokio::test]
async fn federated_publish_records_provenance_and_trusted_publisher() {
    let url = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let harness = harness(&[(url, b"")]);
    harness
        .coordinator
        .publish(&ci_bot(), emerald_request("1.0.0", url, EMPTY_SHA256, 0), "req-1")
        .await
        .unwrap();

    let name = PackageName::new("pokemon-emerald");
    let record = harness
        .discovery
        .get_version(&name, &Version::parse("1.0.0").unwrap())
        .unwrap();
    let provenance = record.provenance.expect("federated publish records provenance");
    assert_eq!(provenance.publisher, "alice/pokemon-emerald");
    assert_eq!(provenance.commit, "c0ffee");

    let ownership = harness.store.get_ownership(&name).unwrap().unwrap();
    assert_eq!(ownership.trusted_publishers.len(), 1);
    assert_eq!(ownership.trusted_publishers[0].repository, "alice/pokemon-emerald");
}

#[tokio::test]
async fn snapshot_contains_everything_searchable() {
    let v1 = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let v2 = "https://releases.example/pokemon_emerald-2.0.0-py3-none-any.island";
    let harness = harness(&[(v1, b""), (v2, b"")]);
    harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.0", v1, EMPTY_SHA256, 0), "req-1")
        .await
        .unwrap();
    harness
        .coordinator
        .publish(&alice(), emerald_request("2.0.0", v2, EMPTY_SHA256, 0), "req-2")
        .await
        .unwrap();
    harness
        .coordinator
        .yank(
            &alice(),
            &PackageName::new("pokemon-emerald"),
            &Version::parse("1.0.0").unwrap(),
            "superseded",
            "req-3",
        )
        .unwrap();

    let results = harness
        .discovery
        .search(&SearchQuery {
            q: Some("pokemon".to_string()),
            ..SearchQuery::default()
        })
        .unwrap();
    assert_eq!(results.total, 2);

    let index = harness.discovery.index().unwrap();
    for result in &results.results {
        let entry = index.packages.get(&result.package).expect("package in index");
        let version = entry
            .versions
            .iter()
            .find(|version| version.version == result.version)
            .expect("version in index");
        assert_eq!(version.yanked, result.yanked);
        assert!(!version.distributions.is_empty());
    }
}

#[tokio::test]
async fn entry_point_search_includes_yanked_versions() {
    let url = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let harness = harness(&[(url, b"")]);
    harness
        .coordinator
        .publish(&alice(), emerald_request("1.0.0", url, EMPTY_SHA256, 0), "req-1")
        .await
        .unwrap();
    harness
        .coordinator
        .yank(
            &alice(),
            &PackageName::new("pokemon-emerald"),
            &Version::parse("1.0.0").unwrap(),
            "testing",
            "req-2",
        )
        .unwrap();

    let results = harness
        .discovery
        .search(&SearchQuery {
            entry_point: Some("pokemon_emerald".to_string()),
            ..SearchQuery::default()
        })
        .unwrap();
    assert_eq!(results.total, 1);
    assert!(results.results[0].yanked);
}

#[tokio::test]
async fn tag_disagreement_is_rejected() {
    let url = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let harness = harness(&[(url, b"")]);
    let mut request = emerald_request("1.0.0", url, EMPTY_SHA256, 0);
    request.distributions[0].platform_tag = "cp311-cp311-win_amd64".to_string();
    let err = harness.coordinator.publish(&alice(), request, "req-1").await.unwrap_err();
    assert_eq!(err.kind(), "tag-mismatch");
    assert_eq!(harness.fetcher.fetch_count(), 0);
}

#[tokio::test]
async fn one_failing_distribution_aborts_the_whole_publish() {
    let good = "https://releases.example/pokemon_emerald-1.0.0-py3-none-any.island";
    let bad = "https://releases.example/pokemon_emerald-1.0.0.tar.gz";
    let harness = harness(&[(good, b"")]);

    let mut request = emerald_request("1.0.0", good, EMPTY_SHA256, 0);
    request.distributions.push(DistributionRegistration {
        filename: "pokemon_emerald-1.0.0.tar.gz".to_string(),
        url: bad.to_string(),
        sha256: EMPTY_SHA256.to_string(),
        size: 0,
        platform_tag: "source".to_string(),
    });
    let err = harness.coordinator.publish(&alice(), request, "req-1").await.unwrap_err();
    assert_eq!(err.kind(), "url-unreachable");
    assert!(harness.store.get_package(&PackageName::new("pokemon-emerald")).unwrap().is_none());
}
