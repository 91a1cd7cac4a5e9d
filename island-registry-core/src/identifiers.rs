// island-registry-core/src/identifiers.rs
// ============================================================================
// Module: Registry Identifiers
// Description: Canonical identifiers for packages and publishing principals.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Package names are normalized to lowercase at the identity boundary; the
//! stricter underscore normalization used inside filenames lives in
//! [`crate::filename`]. Principals are opaque strings with well-known prefixes
//! for federated and anonymous callers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Package Name
// ============================================================================

/// Normalized package name: the registry-wide unique identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Creates a package name, lowercasing the input.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_ascii_lowercase())
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for PackageName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PackageName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Principal
// ============================================================================

/// Prefix for federated identity principals.
const FEDERATED_PREFIX: &str = "federated:";
/// Prefix for anonymous read principals.
const ANONYMOUS_PREFIX: &str = "anonymous:";

/// Identifier of a publishing or reading principal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Creates a principal identifier from an opaque string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a federated principal: `federated:{provider}:{repository}`.
    #[must_use]
    pub fn federated(provider: &str, repository: &str) -> Self {
        Self(format!("{FEDERATED_PREFIX}{provider}:{repository}"))
    }

    /// Creates an anonymous principal bucketed by source address.
    #[must_use]
    pub fn anonymous(source: &str) -> Self {
        Self(format!("{ANONYMOUS_PREFIX}{source}"))
    }

    /// Returns true for federated identity principals.
    #[must_use]
    pub fn is_federated(&self) -> bool {
        self.0.starts_with(FEDERATED_PREFIX)
    }

    /// Returns true for anonymous read principals.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with(ANONYMOUS_PREFIX)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for PrincipalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PrincipalId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_names_are_lowercased() {
        assert_eq!(PackageName::new(" Pokemon-Emerald ").as_str(), "pokemon-emerald");
    }

    #[test]
    fn principal_prefixes_classify_callers() {
        let federated = PrincipalId::federated("github", "alice/pokemon-emerald");
        assert_eq!(federated.as_str(), "federated:github:alice/pokemon-emerald");
        assert!(federated.is_federated());
        assert!(!federated.is_anonymous());

        let anonymous = PrincipalId::anonymous("203.0.113.7");
        assert!(anonymous.is_anonymous());
        assert!(!anonymous.is_federated());

        assert!(!PrincipalId::new("alice").is_federated());
    }
}
