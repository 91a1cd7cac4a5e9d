// island-registry-core/src/error.rs
// ============================================================================
// Module: Registry Error Taxonomy
// Description: The wire-level error kinds shared by coordinator and surface.
// Purpose: Map every failure to a stable code with structured details.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! Every failure the registry can surface maps to one stable kind code.
//! Input and state errors pass through to the client unchanged; fetch and
//! verification errors carry the offending URL or filename in their details;
//! internal errors are returned opaquely and logged with a correlation id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::digest::DigestError;
use crate::filename::FilenameError;
use crate::manifest::ManifestError;
use crate::manifest::ManifestFieldError;
use crate::store::StoreError;
use crate::version::VersionError;

// ============================================================================
// SECTION: Forbidden Sub-Reasons
// ============================================================================

/// Sub-reason attached to authorization denials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForbiddenReason {
    /// Principal is neither owner nor collaborator.
    NotOwner,
    /// No trusted-publisher rule matched the federated claims.
    NoMatchingTrustedPublisher,
    /// The claim lost a race; the name now belongs to someone else.
    NameClaimed,
}

impl ForbiddenReason {
    /// Returns the stable sub-reason label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotOwner => "not-owner",
            Self::NoMatchingTrustedPublisher => "no-matching-trusted-publisher",
            Self::NameClaimed => "name-claimed",
        }
    }
}

// ============================================================================
// SECTION: Registry Error
// ============================================================================

/// Every error the registration pipeline and discovery engine can surface.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Ill-formed semantic version.
    #[error("invalid version: {0}")]
    InvalidVersion(String),
    /// Filename does not match a distribution shape.
    #[error("invalid filename {filename}: {reason}")]
    InvalidFilename {
        /// Offending filename.
        filename: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Manifest failed field validation.
    #[error("invalid manifest: {} field error(s)", details.len())]
    InvalidManifest {
        /// Field-level failures.
        details: Vec<ManifestFieldError>,
    },
    /// Filename name disagrees with the manifest.
    #[error("name mismatch: expected {expected}, found {found}")]
    NameMismatch {
        /// Normalized manifest name.
        expected: String,
        /// Name parsed from the filename.
        found: String,
    },
    /// Filename version disagrees with the manifest.
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Filename-encoded manifest version.
        expected: String,
        /// Version parsed from the filename.
        found: String,
    },
    /// Filename platform tag disagrees with the declared tag.
    #[error("tag mismatch: expected {expected}, found {found}")]
    TagMismatch {
        /// Declared platform tag.
        expected: String,
        /// Tag parsed from the filename.
        found: String,
    },
    /// Credential absent or malformed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Credential present but invalid.
    #[error("token invalid: {0}")]
    TokenInvalid(String),
    /// Credential expired.
    #[error("token expired")]
    TokenExpired,
    /// Principal is not authorized for the package.
    #[error("forbidden: {}", reason.label())]
    Forbidden {
        /// Denial sub-reason.
        reason: ForbiddenReason,
    },
    /// Package does not exist.
    #[error("package not found: {0}")]
    PackageNotFound(String),
    /// Version does not exist.
    #[error("version not found: {package} {version}")]
    VersionNotFound {
        /// Package name.
        package: String,
        /// Version string.
        version: String,
    },
    /// The (package, version) pair is already committed.
    #[error("version already exists: {package} {version}")]
    VersionExists {
        /// Package name.
        package: String,
        /// Version string.
        version: String,
    },
    /// The claim lost a race with another first publish.
    #[error("package name already claimed: {0}")]
    NameClaimed(String),
    /// Fetched artifact digest disagrees with the declared digest.
    #[error("digest mismatch for {url}: expected {expected}, actual {actual}")]
    DigestMismatch {
        /// Offending URL.
        url: String,
        /// Declared digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },
    /// Fetched artifact size disagrees with the declared size.
    #[error("size mismatch for {url}: expected {expected} bytes, actual {actual} bytes")]
    SizeMismatch {
        /// Offending URL.
        url: String,
        /// Declared size.
        expected: u64,
        /// Observed size.
        actual: u64,
    },
    /// Registered URL is not HTTPS.
    #[error("url is not https: {0}")]
    UrlNotHttps(String),
    /// Registered URL could not be fetched.
    #[error("url unreachable: {url}: {reason}")]
    UrlUnreachable {
        /// Offending URL.
        url: String,
        /// Transport-level reason.
        reason: String,
    },
    /// Redirect chain exceeded the configured hop limit.
    #[error("redirect limit exceeded for {0}")]
    UrlRedirectLimit(String),
    /// Fetch or publish deadline exceeded.
    #[error("fetch timed out for {0}")]
    FetchTimeout(String),
    /// Artifact exceeds the configured size ceiling.
    #[error("artifact exceeds size limit for {url}: {limit} bytes")]
    SizeLimitExceeded {
        /// Offending URL.
        url: String,
        /// Configured ceiling in bytes.
        limit: u64,
    },
    /// Principal exhausted its rate budget.
    #[error("rate limited")]
    RateLimited {
        /// Bucket capacity.
        limit: u32,
        /// Tokens remaining.
        remaining: u32,
        /// Epoch second at which a token becomes available.
        reset_epoch_seconds: u64,
    },
    /// Unexpected internal failure, returned opaquely.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Returns the stable wire-level kind code.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidVersion(_) => "invalid-version",
            Self::InvalidFilename { .. } => "invalid-filename",
            Self::InvalidManifest { .. } => "invalid-manifest",
            Self::NameMismatch { .. } => "name-mismatch",
            Self::VersionMismatch { .. } => "version-mismatch",
            Self::TagMismatch { .. } => "tag-mismatch",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::TokenInvalid(_) => "token-invalid",
            Self::TokenExpired => "token-expired",
            Self::Forbidden { .. } => "forbidden",
            Self::PackageNotFound(_) => "package-not-found",
            Self::VersionNotFound { .. } => "version-not-found",
            Self::VersionExists { .. } => "version-exists",
            Self::NameClaimed(_) => "name-claimed",
            Self::DigestMismatch { .. } => "digest-mismatch",
            Self::SizeMismatch { .. } => "size-mismatch",
            Self::UrlNotHttps(_) => "url-not-https",
            Self::UrlUnreachable { .. } => "url-unreachable",
            Self::UrlRedirectLimit(_) => "url-redirect-limit",
            Self::FetchTimeout(_) => "fetch-timeout",
            Self::SizeLimitExceeded { .. } => "size-limit-exceeded",
            Self::RateLimited { .. } => "rate-limited",
            Self::Internal(_) => "internal-error",
        }
    }

    /// Returns structured details for the wire error envelope.
    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidManifest { details } => serde_json::to_value(details).ok(),
            Self::Forbidden { reason } => Some(json!({ "reason": reason.label() })),
            Self::NameMismatch { expected, found }
            | Self::VersionMismatch { expected, found }
            | Self::TagMismatch { expected, found } => {
                Some(json!({ "expected": expected, "found": found }))
            }
            Self::DigestMismatch { url, expected, actual } => {
                Some(json!({ "url": url, "expected": expected, "actual": actual }))
            }
            Self::SizeMismatch { url, expected, actual } => {
                Some(json!({ "url": url, "expected": expected, "actual": actual }))
            }
            Self::UrlNotHttps(url) | Self::UrlRedirectLimit(url) | Self::FetchTimeout(url) => {
                Some(json!({ "url": url }))
            }
            Self::UrlUnreachable { url, reason } => Some(json!({ "url": url, "reason": reason })),
            Self::SizeLimitExceeded { url, limit } => Some(json!({ "url": url, "limit": limit })),
            Self::RateLimited { limit, remaining, reset_epoch_seconds } => Some(json!({
                "limit": limit,
                "remaining": remaining,
                "reset": reset_epoch_seconds,
            })),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

impl From<VersionError> for RegistryError {
    fn from(error: VersionError) -> Self {
        Self::InvalidVersion(error.to_string())
    }
}

impl From<ManifestError> for RegistryError {
    fn from(error: ManifestError) -> Self {
        match error {
            ManifestError::Invalid { details } => Self::InvalidManifest {
                details,
            },
        }
    }
}

impl From<FilenameError> for RegistryError {
    fn from(error: FilenameError) -> Self {
        match error {
            FilenameError::Invalid { filename, reason } => Self::InvalidFilename {
                filename,
                reason: reason.to_string(),
            },
            FilenameError::NameMismatch { expected, found } => Self::NameMismatch {
                expected,
                found,
            },
            FilenameError::VersionMismatch { expected, found } => Self::VersionMismatch {
                expected,
                found,
            },
            FilenameError::TagMismatch { expected, found } => Self::TagMismatch {
                expected,
                found,
            },
        }
    }
}

impl From<StoreError> for RegistryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NameClaimed(name) => Self::NameClaimed(name),
            StoreError::VersionExists { package, version } => Self::VersionExists {
                package,
                version,
            },
            StoreError::NotFound(what) => Self::PackageNotFound(what),
            StoreError::Busy(message)
            | StoreError::Io(message)
            | StoreError::Db(message)
            | StoreError::Invalid(message) => Self::Internal(message),
        }
    }
}

/// Attaches a URL to a digest verification failure.
#[must_use]
pub fn digest_error_for_url(error: DigestError, url: &str) -> RegistryError {
    match error {
        DigestError::Mismatch { expected, actual } => RegistryError::DigestMismatch {
            url: url.to_string(),
            expected,
            actual,
        },
        DigestError::SizeMismatch { expected, actual } => RegistryError::SizeMismatch {
            url: url.to_string(),
            expected,
            actual,
        },
    }
}
