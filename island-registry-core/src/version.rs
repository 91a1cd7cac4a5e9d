// island-registry-core/src/version.rs
// ============================================================================
// Module: Semantic Version Algebra
// Description: SemVer 2.0.0 parsing and total ordering for package versions.
// Purpose: Provide the comparison backbone for version lists and filters.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Package versions follow `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`. Ordering
//! is SemVer precedence: pre-release identifiers compare numerically when both
//! are all-digits, numeric sorts below alphanumeric, and a version with any
//! pre-release sorts below the same base without one. Build metadata is kept
//! for display but never participates in ordering or equality-for-ordering.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde::de;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Version parsing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// The string is not a valid semantic version.
    #[error("invalid semantic version {input:?}: {reason}")]
    Invalid {
        /// Offending input string.
        input: String,
        /// Human-readable reason.
        reason: &'static str,
    },
}

impl VersionError {
    fn invalid(input: &str, reason: &'static str) -> Self {
        Self::Invalid {
            input: input.to_string(),
            reason,
        }
    }
}

// ============================================================================
// SECTION: Pre-Release Identifiers
// ============================================================================

/// A single dot-separated pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrereleaseIdent {
    /// All-digit identifier, compared numerically.
    Numeric(u64),
    /// Alphanumeric identifier, compared lexically in ASCII order.
    Alpha(String),
}

impl PrereleaseIdent {
    fn parse(input: &str, segment: &str) -> Result<Self, VersionError> {
        if segment.is_empty() {
            return Err(VersionError::invalid(input, "empty pre-release segment"));
        }
        if !segment.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(VersionError::invalid(input, "invalid pre-release character"));
        }
        if segment.bytes().all(|b| b.is_ascii_digit()) {
            if segment.len() > 1 && segment.starts_with('0') {
                return Err(VersionError::invalid(input, "leading zero in pre-release number"));
            }
            let value = segment
                .parse::<u64>()
                .map_err(|_| VersionError::invalid(input, "pre-release number out of range"))?;
            return Ok(Self::Numeric(value));
        }
        Ok(Self::Alpha(segment.to_string()))
    }
}

impl Ord for PrereleaseIdent {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(a), Self::Numeric(b)) => a.cmp(b),
            // Numeric identifiers always have lower precedence than alphanumeric.
            (Self::Numeric(_), Self::Alpha(_)) => Ordering::Less,
            (Self::Alpha(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::Alpha(a), Self::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for PrereleaseIdent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PrereleaseIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => value.fmt(f),
            Self::Alpha(value) => value.fmt(f),
        }
    }
}

// ============================================================================
// SECTION: Version
// ============================================================================

/// A parsed semantic version.
///
/// # Invariants
/// - Equality and ordering ignore build metadata; two versions differing only
///   in build metadata are equal-for-ordering.
#[derive(Debug, Clone)]
pub struct Version {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
    /// Pre-release identifiers (empty for release versions).
    pub prerelease: Vec<PrereleaseIdent>,
    /// Build metadata, preserved verbatim but ignored for ordering.
    pub build: Option<String>,
}

impl Version {
    /// Parses a semantic version string.
    ///
    /// Rejects a leading `v`, missing components, extra dotted numerics,
    /// leading zeros, and empty pre-release or build segments.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Invalid`] when the string is ill-formed.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        if input.is_empty() {
            return Err(VersionError::invalid(input, "empty version string"));
        }
        if input.starts_with('v') || input.starts_with('V') {
            return Err(VersionError::invalid(input, "leading v prefix is not allowed"));
        }

        let (rest, build) = match input.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (input, None),
        };
        if let Some(build) = build {
            validate_build(input, build)?;
        }

        let (core, prerelease_raw) = match rest.split_once('-') {
            Some((core, prerelease)) => (core, Some(prerelease)),
            None => (rest, None),
        };

        let mut numerics = core.split('.');
        let major = parse_numeric(input, numerics.next())?;
        let minor = parse_numeric(input, numerics.next())?;
        let patch = parse_numeric(input, numerics.next())?;
        if numerics.next().is_some() {
            return Err(VersionError::invalid(input, "more than three numeric components"));
        }

        let prerelease = match prerelease_raw {
            None => Vec::new(),
            Some(raw) => raw
                .split('.')
                .map(|segment| PrereleaseIdent::parse(input, segment))
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build: build.map(str::to_string),
        })
    }

    /// Returns true when the version carries pre-release identifiers.
    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// Returns the `MAJOR.MINOR.PATCH` base without pre-release or build.
    #[must_use]
    pub fn base(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parses one numeric component, rejecting leading zeros.
fn parse_numeric(input: &str, segment: Option<&str>) -> Result<u64, VersionError> {
    let Some(segment) = segment else {
        return Err(VersionError::invalid(input, "expected major.minor.patch"));
    };
    if segment.is_empty() {
        return Err(VersionError::invalid(input, "empty numeric component"));
    }
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError::invalid(input, "non-digit in numeric component"));
    }
    if segment.len() > 1 && segment.starts_with('0') {
        return Err(VersionError::invalid(input, "leading zero in numeric component"));
    }
    segment.parse::<u64>().map_err(|_| VersionError::invalid(input, "numeric component too large"))
}

/// Validates build metadata segments.
fn validate_build(input: &str, build: &str) -> Result<(), VersionError> {
    if build.is_empty() {
        return Err(VersionError::invalid(input, "empty build metadata"));
    }
    for segment in build.split('.') {
        if segment.is_empty() {
            return Err(VersionError::invalid(input, "empty build segment"));
        }
        if !segment.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(VersionError::invalid(input, "invalid build character"));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Ordering
// ============================================================================

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| cmp_prerelease(&self.prerelease, &other.prerelease))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

/// Compares pre-release identifier lists with SemVer precedence.
fn cmp_prerelease(a: &[PrereleaseIdent], b: &[PrereleaseIdent]) -> Ordering {
    // A release outranks any pre-release of the same base.
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    for (left, right) in a.iter().zip(b.iter()) {
        let ordering = left.cmp(right);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

// ============================================================================
// SECTION: Display and Serde
// ============================================================================

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.prerelease.is_empty() {
            write!(f, "-")?;
            for (index, ident) in self.prerelease.iter().enumerate() {
                if index > 0 {
                    write!(f, ".")?;
                }
                write!(f, "{ident}")?;
            }
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn parses_plain_version() {
        let version = Version::parse("1.2.3").unwrap();
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 2);
        assert_eq!(version.patch, 3);
        assert!(version.prerelease.is_empty());
        assert!(version.build.is_none());
    }

    #[test]
    fn parses_prerelease_and_build() {
        let version = Version::parse("2.0.0-rc.1+build.456").unwrap();
        assert_eq!(version.prerelease.len(), 2);
        assert_eq!(version.build.as_deref(), Some("build.456"));
        assert_eq!(version.to_string(), "2.0.0-rc.1+build.456");
        assert_eq!(version.base(), "2.0.0");
        assert!(version.is_prerelease());
        assert!(!Version::parse("2.0.0").unwrap().is_prerelease());
    }

    #[test]
    fn rejects_malformed_inputs() {
        for input in ["", "1.0", "v1.0.0", "1.0.0.0", "01.0.0", "1.0.0-", "1.0.0-a..b", "1.0.0+"] {
            assert!(Version::parse(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn prerelease_sorts_below_release() {
        let pre = Version::parse("1.0.0-alpha").unwrap();
        let release = Version::parse("1.0.0").unwrap();
        assert!(pre < release);
    }

    #[test]
    fn semver_precedence_chain() {
        let ordered = [
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
            "1.0.0",
        ];
        for pair in ordered.windows(2) {
            let a = Version::parse(pair[0]).unwrap();
            let b = Version::parse(pair[1]).unwrap();
            assert!(a < b, "{} should sort below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn build_metadata_is_ignored_for_ordering() {
        let a = Version::parse("1.0.0+build.1").unwrap();
        let b = Version::parse("1.0.0+build.2").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }
}
