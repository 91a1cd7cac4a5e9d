// island-registry-core/src/lib.rs
// ============================================================================
// Module: Island Registry Core
// Description: Core types for the Island package registry.
// Purpose: Share versions, filenames, manifests, digests, and the store
//          contract across server and store backends.
// Dependencies: serde, serde_json, sha2, subtle, thiserror
// ============================================================================

//! ## Overview
//! This crate holds the pure, side-effect-free heart of the registry: the
//! version algebra, the distribution filename grammar, the manifest schema,
//! digest utilities, the durable data model, and the [`RegistryStore`]
//! contract with its in-memory reference implementation. Network and HTTP
//! concerns live in `island-registry-server`; durable persistence lives in
//! `island-registry-store-sqlite`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod digest;
pub mod error;
pub mod filename;
pub mod hashing;
pub mod identifiers;
pub mod manifest;
pub mod model;
pub mod store;
pub mod version;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use digest::DigestError;
pub use digest::StreamingDigest;
pub use digest::constant_time_eq;
pub use digest::constant_time_eq_str;
pub use digest::is_well_formed_digest;
pub use digest::verify_digest;
pub use error::ForbiddenReason;
pub use error::RegistryError;
pub use error::digest_error_for_url;
pub use filename::ArtifactKind;
pub use filename::FilenameError;
pub use filename::ParsedFilename;
pub use filename::PlatformTag;
pub use filename::build_island_filename;
pub use filename::build_sdist_filename;
pub use filename::encode_version;
pub use filename::normalize_name;
pub use filename::parse_filename;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::canonical_json_bytes;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use identifiers::PackageName;
pub use identifiers::PrincipalId;
pub use manifest::Manifest;
pub use manifest::ManifestError;
pub use manifest::ManifestFieldError;
pub use manifest::ValidatedManifest;
pub use model::ApiTokenRecord;
pub use model::DistributionRecord;
pub use model::OwnershipRecord;
pub use model::PackageRecord;
pub use model::Provenance;
pub use model::TrustedPublisherRule;
pub use model::UrlStatus;
pub use model::VersionRecord;
pub use model::now_millis;
pub use store::InMemoryRegistryStore;
pub use store::PackageSnapshot;
pub use store::PublishCommit;
pub use store::RegistrySnapshot;
pub use store::RegistryStore;
pub use store::StoreError;
pub use version::PrereleaseIdent;
pub use version::Version;
pub use version::VersionError;
