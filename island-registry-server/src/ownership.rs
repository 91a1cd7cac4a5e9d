// island-registry-server/src/ownership.rs
// ============================================================================
// Module: Ownership Registry
// Description: Publish and yank authorization over ownership records.
// Purpose: Enforce claim, collaborator, and trusted-publisher rules.
// Dependencies: island-registry-core
// ============================================================================

//! ## Overview
//! For a (principal, package) pair the registry answers one question:
//! authorized to publish? An absent package makes the request a claim and the
//! requester the owner; otherwise the principal must be owner, collaborator,
//! or a federated identity satisfying a stored trusted-publisher rule. Yank
//! authority follows the same rules. Mutating the ownership record itself is
//! owner-only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use island_registry_core::ForbiddenReason;
use island_registry_core::OwnershipRecord;
use island_registry_core::PackageName;
use island_registry_core::PrincipalId;
use island_registry_core::RegistryError;
use island_registry_core::RegistryStore;
use island_registry_core::TrustedPublisherRule;

use crate::auth::AuthenticatedPrincipal;
use crate::auth::FederatedIdentity;

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Outcome of a publish authorization check.
#[derive(Debug, Clone)]
pub enum PublishAuthorization {
    /// The package does not exist; the publish claims it with this record.
    Claim(OwnershipRecord),
    /// The package exists and the principal may publish to it.
    Existing,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Authorization over package ownership records.
pub struct OwnershipRegistry {
    /// Backing store for ownership lookups.
    store: Arc<dyn RegistryStore>,
}

impl OwnershipRegistry {
    /// Creates an ownership registry over the store.
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
        }
    }

    /// Answers whether the principal may publish to the package.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Forbidden`] when denied.
    pub fn authorize_publish(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
    ) -> Result<PublishAuthorization, RegistryError> {
        let Some(ownership) = self.store.get_ownership(package)? else {
            return Ok(PublishAuthorization::Claim(claim_record(principal, package)));
        };
        self.check_existing(principal, &ownership)?;
        Ok(PublishAuthorization::Existing)
    }

    /// Answers whether the principal may yank a version of the package.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::PackageNotFound`] for unknown packages and
    /// [`RegistryError::Forbidden`] when denied.
    pub fn authorize_yank(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
    ) -> Result<(), RegistryError> {
        let Some(ownership) = self.store.get_ownership(package)? else {
            return Err(RegistryError::PackageNotFound(package.to_string()));
        };
        self.check_existing(principal, &ownership)
    }

    /// Adds a collaborator. Owner-only.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Forbidden`] when the caller is not the owner.
    pub fn add_collaborator(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
        collaborator: PrincipalId,
    ) -> Result<(), RegistryError> {
        let mut ownership = self.owned_record(principal, package)?;
        if ownership.owner == collaborator || ownership.collaborators.contains(&collaborator) {
            return Ok(());
        }
        ownership.collaborators.push(collaborator);
        self.store.update_ownership(ownership)?;
        Ok(())
    }

    /// Removes a collaborator. Owner-only; the owner cannot be removed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Forbidden`] when the caller is not the owner
    /// or attempts to remove the owner.
    pub fn remove_collaborator(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
        collaborator: &PrincipalId,
    ) -> Result<(), RegistryError> {
        let mut ownership = self.owned_record(principal, package)?;
        if &ownership.owner == collaborator {
            return Err(RegistryError::Forbidden {
                reason: ForbiddenReason::NotOwner,
            });
        }
        ownership.collaborators.retain(|entry| entry != collaborator);
        self.store.update_ownership(ownership)?;
        Ok(())
    }

    /// Adds a trusted-publisher rule. Owner-only.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Forbidden`] when the caller is not the owner.
    pub fn add_trusted_publisher(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
        rule: TrustedPublisherRule,
    ) -> Result<(), RegistryError> {
        let mut ownership = self.owned_record(principal, package)?;
        if !ownership.trusted_publishers.contains(&rule) {
            ownership.trusted_publishers.push(rule);
        }
        self.store.update_ownership(ownership)?;
        Ok(())
    }

    /// Checks owner/collaborator/trusted-publisher rules for an existing
    /// package.
    fn check_existing(
        &self,
        principal: &AuthenticatedPrincipal,
        ownership: &OwnershipRecord,
    ) -> Result<(), RegistryError> {
        if ownership.owner == principal.principal
            || ownership.collaborators.contains(&principal.principal)
        {
            return Ok(());
        }
        if let Some(identity) = &principal.federated {
            if ownership
                .trusted_publishers
                .iter()
                .any(|rule| rule_matches(rule, identity))
            {
                return Ok(());
            }
            return Err(RegistryError::Forbidden {
                reason: ForbiddenReason::NoMatchingTrustedPublisher,
            });
        }
        Err(RegistryError::Forbidden {
            reason: ForbiddenReason::NotOwner,
        })
    }

    /// Loads the ownership record, requiring the caller to be owner.
    fn owned_record(
        &self,
        principal: &AuthenticatedPrincipal,
        package: &PackageName,
    ) -> Result<OwnershipRecord, RegistryError> {
        let Some(ownership) = self.store.get_ownership(package)? else {
            return Err(RegistryError::PackageNotFound(package.to_string()));
        };
        if ownership.owner != principal.principal {
            return Err(RegistryError::Forbidden {
                reason: ForbiddenReason::NotOwner,
            });
        }
        Ok(ownership)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the ownership record created by a claim.
fn claim_record(principal: &AuthenticatedPrincipal, package: &PackageName) -> OwnershipRecord {
    // A federated claim records its source repository as the implicit initial
    // trusted publisher.
    let trusted_publishers = principal
        .federated
        .as_ref()
        .map(|identity| {
            vec![TrustedPublisherRule {
                provider: identity.provider.clone(),
                repository: identity.repository.clone(),
                workflow: identity.workflow.clone(),
                environment: None,
            }]
        })
        .unwrap_or_default();
    OwnershipRecord {
        package: package.clone(),
        owner: principal.principal.clone(),
        collaborators: Vec::new(),
        trusted_publishers,
    }
}

/// Returns true when a federated identity satisfies a stored rule.
fn rule_matches(rule: &TrustedPublisherRule, identity: &FederatedIdentity) -> bool {
    rule.provider == identity.provider
        && rule.repository == identity.repository
        && rule.workflow == identity.workflow
        && rule
            .environment
            .as_ref()
            .is_none_or(|required| identity.environment.as_ref() == Some(required))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::panic,
        reason = "Test-only assertions are permitted."
    )]

    use island_registry_core::InMemoryRegistryStore;

    use super::*;

    fn token_principal(id: &str) -> AuthenticatedPrincipal {
        AuthenticatedPrincipal {
            principal: PrincipalId::new(id),
            token_fingerprint: Some("f".repeat(64)),
            federated: None,
        }
    }

    fn federated_principal(repository: &str, workflow: &str) -> AuthenticatedPrincipal {
        AuthenticatedPrincipal {
            principal: PrincipalId::federated("github", repository),
            token_fingerprint: None,
            federated: Some(FederatedIdentity {
                provider: "github".to_string(),
                repository: repository.to_string(),
                workflow: workflow.to_string(),
                commit: "deadbeef".to_string(),
                environment: None,
            }),
        }
    }

    fn registry_with_owner(owner: &str) -> (OwnershipRegistry, Arc<InMemoryRegistryStore>) {
        let store = Arc::new(InMemoryRegistryStore::new());
        let registry = OwnershipRegistry::new(Arc::clone(&store) as Arc<dyn RegistryStore>);
        seed_package(&store, owner);
        (registry, store)
    }

    fn seed_package(store: &Arc<InMemoryRegistryStore>, owner: &str) {
        use std::collections::BTreeMap;

        use island_registry_core::PackageRecord;
        use island_registry_core::PublishCommit;
        use island_registry_core::Version;
        use island_registry_core::VersionRecord;
        use serde_json::json;

        let name = PackageName::new("sample-game");
        store
            .commit_publish(PublishCommit {
                package: PackageRecord {
                    name: name.clone(),
                    display_name: "sample-game".to_string(),
                    game: "Sample Game".to_string(),
                    description: None,
                    authors: Vec::new(),
                    homepage: None,
                    repository: None,
                    keywords: Vec::new(),
                    created_at: 1,
                    updated_at: 1,
                },
                ownership: Some(OwnershipRecord {
                    package: name.clone(),
                    owner: PrincipalId::new(owner),
                    collaborators: vec![PrincipalId::new("bob")],
                    trusted_publishers: vec![TrustedPublisherRule {
                        provider: "github".to_string(),
                        repository: "alice/sample-game".to_string(),
                        workflow: ".github/workflows/release.yml".to_string(),
                        environment: None,
                    }],
                }),
                version: VersionRecord {
                    package: name,
                    version: Version::parse("1.0.0").unwrap(),
                    game: "Sample Game".to_string(),
                    manifest: json!({}),
                    entry_points: BTreeMap::new(),
                    minimum_ap_version: Version::parse("0.5.0").unwrap(),
                    maximum_ap_version: None,
                    yanked: false,
                    yank_reason: None,
                    yanked_at: None,
                    created_at: 1,
                    publisher: PrincipalId::new(owner),
                    provenance: None,
                    distributions: Vec::new(),
                },
            })
            .unwrap();
    }

    #[test]
    fn absent_package_is_a_claim() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let registry = OwnershipRegistry::new(store);
        let decision = registry
            .authorize_publish(&token_principal("alice"), &PackageName::new("new-game"))
            .unwrap();
        let PublishAuthorization::Claim(record) = decision else {
            panic!("expected claim");
        };
        assert_eq!(record.owner.as_str(), "alice");
        assert!(record.trusted_publishers.is_empty());
    }

    #[test]
    fn federated_claim_records_implicit_trusted_publisher() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let registry = OwnershipRegistry::new(store);
        let principal =
            federated_principal("alice/new-game", ".github/workflows/release.yml");
        let decision = registry
            .authorize_publish(&principal, &PackageName::new("new-game"))
            .unwrap();
        let PublishAuthorization::Claim(record) = decision else {
            panic!("expected claim");
        };
        assert_eq!(record.trusted_publishers.len(), 1);
        assert_eq!(record.trusted_publishers[0].repository, "alice/new-game");
    }

    #[test]
    fn owner_and_collaborator_may_publish() {
        let (registry, _store) = registry_with_owner("alice");
        let package = PackageName::new("sample-game");
        assert!(matches!(
            registry.authorize_publish(&token_principal("alice"), &package).unwrap(),
            PublishAuthorization::Existing
        ));
        assert!(matches!(
            registry.authorize_publish(&token_principal("bob"), &package).unwrap(),
            PublishAuthorization::Existing
        ));
    }

    #[test]
    fn stranger_is_forbidden() {
        let (registry, _store) = registry_with_owner("alice");
        let err = registry
            .authorize_publish(&token_principal("mallory"), &PackageName::new("sample-game"))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Forbidden {
                reason: ForbiddenReason::NotOwner
            }
        ));
    }

    #[test]
    fn trusted_publisher_rule_admits_matching_claims() {
        let (registry, _store) = registry_with_owner("alice");
        let package = PackageName::new("sample-game");
        let matching =
            federated_principal("alice/sample-game", ".github/workflows/release.yml");
        assert!(matches!(
            registry.authorize_publish(&matching, &package).unwrap(),
            PublishAuthorization::Existing
        ));
        let wrong_workflow =
            federated_principal("alice/sample-game", ".github/workflows/other.yml");
        let err = registry.authorize_publish(&wrong_workflow, &package).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Forbidden {
                reason: ForbiddenReason::NoMatchingTrustedPublisher
            }
        ));
    }

    #[test]
    fn environment_scoped_rule_requires_environment() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let registry = OwnershipRegistry::new(Arc::clone(&store) as Arc<dyn RegistryStore>);
        seed_package(&store, "alice");
        let package = PackageName::new("sample-game");
        let owner = token_principal("alice");
        registry
            .add_trusted_publisher(&owner, &package, TrustedPublisherRule {
                provider: "github".to_string(),
                repository: "org/deploys".to_string(),
                workflow: ".github/workflows/publish.yml".to_string(),
                environment: Some("release".to_string()),
            })
            .unwrap();

        let mut principal = federated_principal("org/deploys", ".github/workflows/publish.yml");
        let err = registry.authorize_publish(&principal, &package).unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden { .. }));

        if let Some(identity) = principal.federated.as_mut() {
            identity.environment = Some("release".to_string());
        }
        assert!(matches!(
            registry.authorize_publish(&principal, &package).unwrap(),
            PublishAuthorization::Existing
        ));
    }

    #[test]
    fn ownership_mutation_is_owner_only() {
        let (registry, store) = registry_with_owner("alice");
        let package = PackageName::new("sample-game");
        let err = registry
            .add_collaborator(&token_principal("bob"), &package, PrincipalId::new("carol"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden { .. }));

        registry
            .add_collaborator(&token_principal("alice"), &package, PrincipalId::new("carol"))
            .unwrap();
        let ownership = store.get_ownership(&package).unwrap().unwrap();
        assert!(ownership.collaborators.contains(&PrincipalId::new("carol")));

        registry
            .remove_collaborator(&token_principal("alice"), &package, &PrincipalId::new("carol"))
            .unwrap();
        let ownership = store.get_ownership(&package).unwrap().unwrap();
        assert!(!ownership.collaborators.contains(&PrincipalId::new("carol")));
    }

    #[test]
    fn owner_cannot_be_removed() {
        let (registry, _store) = registry_with_owner("alice");
        let err = registry
            .remove_collaborator(
                &token_principal("alice"),
                &PackageName::new("sample-game"),
                &PrincipalId::new("alice"),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden { .. }));
    }

    #[test]
    fn panics_are_not_used_for_missing_packages() {
        let store = Arc::new(InMemoryRegistryStore::new());
        let registry = OwnershipRegistry::new(store);
        let err = registry
            .authorize_yank(&token_principal("alice"), &PackageName::new("ghost"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::PackageNotFound(_)));
    }
}
