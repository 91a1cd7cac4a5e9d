// island-registry-core/src/manifest.rs
// ============================================================================
// Module: Registration Manifest Schema
// Description: Typed manifest for publish requests with field-path validation.
// Purpose: Validate registrations while preserving unknown keys verbatim.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! The manifest is the structured metadata accompanying a registration. Typed
//! fields are validated strictly; unknown keys are captured in a flattened map
//! and stored verbatim in the version snapshot, so future clients reading old
//! versions still see their original fields.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::version::Version;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum length of the game title.
pub const MAX_GAME_LENGTH: usize = 100;
/// Maximum length of the description field.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;
/// Maximum length of a single keyword.
pub const MAX_KEYWORD_LENGTH: usize = 50;
/// Operating systems accepted in the platforms list.
pub const KNOWN_PLATFORMS: [&str; 3] = ["windows", "macos", "linux"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFieldError {
    /// Dotted path of the offending field.
    pub field: String,
    /// Human-readable message.
    pub message: String,
    /// Offending value, when representable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ManifestFieldError {
    /// Creates a field error without an offending value.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    /// Creates a field error carrying the offending value.
    #[must_use]
    pub fn with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: Some(value.into()),
        }
    }
}

/// Manifest validation failure carrying every field error found.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// One or more fields failed validation.
    #[error("invalid manifest: {} field error(s)", details.len())]
    Invalid {
        /// Field-level failures.
        details: Vec<ManifestFieldError>,
    },
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Structured metadata for one package version.
///
/// # Invariants
/// - `extra` holds every key the typed fields do not model; serializing a
///   deserialized manifest reproduces the original object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Package name as submitted by the publisher.
    pub name: String,
    /// Semantic version of the package.
    pub version: String,
    /// Display title of the game this package implements.
    pub game: String,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Package authors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Minimum compatible host version.
    pub minimum_ap_version: String,
    /// Maximum compatible host version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_ap_version: Option<String>,
    /// SPDX license identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Project homepage URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Source repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Keywords for discovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Supported operating systems.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    /// Maturity tag (e.g. stable, beta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maturity: Option<String>,
    /// Entry points declared by the package: identifier to target reference.
    pub entry_points: BTreeMap<String, String>,
    /// Unknown keys preserved verbatim for forward compatibility.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Manifest {
    /// Validates the manifest, collecting every field error.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Invalid`] listing each failing field.
    pub fn validate(&self) -> Result<ValidatedManifest, ManifestError> {
        let mut details = Vec::new();

        if self.name.trim().is_empty() {
            details.push(ManifestFieldError::new("name", "name must not be empty"));
        }

        let version = match Version::parse(&self.version) {
            Ok(version) => Some(version),
            Err(err) => {
                details.push(ManifestFieldError::with_value(
                    "version",
                    err.to_string(),
                    self.version.clone(),
                ));
                None
            }
        };

        if self.game.is_empty() || self.game.len() > MAX_GAME_LENGTH {
            details.push(ManifestFieldError::with_value(
                "game",
                format!("game must be 1..={MAX_GAME_LENGTH} characters"),
                self.game.clone(),
            ));
        }

        if let Some(description) = &self.description
            && description.len() > MAX_DESCRIPTION_LENGTH
        {
            details.push(ManifestFieldError::new(
                "description",
                format!("description exceeds {MAX_DESCRIPTION_LENGTH} characters"),
            ));
        }

        let minimum = match Version::parse(&self.minimum_ap_version) {
            Ok(version) => Some(version),
            Err(err) => {
                details.push(ManifestFieldError::with_value(
                    "minimum_ap_version",
                    err.to_string(),
                    self.minimum_ap_version.clone(),
                ));
                None
            }
        };

        let maximum = match &self.maximum_ap_version {
            None => None,
            Some(raw) => match Version::parse(raw) {
                Ok(version) => Some(version),
                Err(err) => {
                    details.push(ManifestFieldError::with_value(
                        "maximum_ap_version",
                        err.to_string(),
                        raw.clone(),
                    ));
                    None
                }
            },
        };
        if let (Some(minimum), Some(maximum)) = (&minimum, &maximum)
            && maximum < minimum
        {
            details.push(ManifestFieldError::new(
                "maximum_ap_version",
                "maximum_ap_version must not be below minimum_ap_version",
            ));
        }

        for (index, author) in self.authors.iter().enumerate() {
            if author.trim().is_empty() {
                details.push(ManifestFieldError::new(format!("authors[{index}]"), "empty author"));
            }
        }

        for (index, keyword) in self.keywords.iter().enumerate() {
            if keyword.is_empty() || keyword.len() > MAX_KEYWORD_LENGTH {
                details.push(ManifestFieldError::with_value(
                    format!("keywords[{index}]"),
                    format!("keywords must be 1..={MAX_KEYWORD_LENGTH} characters"),
                    keyword.clone(),
                ));
            }
        }

        for (index, platform) in self.platforms.iter().enumerate() {
            if !KNOWN_PLATFORMS.contains(&platform.as_str()) {
                details.push(ManifestFieldError::with_value(
                    format!("platforms[{index}]"),
                    "unknown platform",
                    platform.clone(),
                ));
            }
        }

        if self.entry_points.is_empty() {
            details.push(ManifestFieldError::new(
                "entry_points",
                "at least one entry point is required",
            ));
        }
        for (identifier, target) in &self.entry_points {
            if !is_valid_entry_point_identifier(identifier) {
                details.push(ManifestFieldError::with_value(
                    format!("entry_points.{identifier}"),
                    "identifier must match [A-Za-z_][A-Za-z0-9_]*",
                    identifier.clone(),
                ));
            }
            if target.trim().is_empty() {
                details.push(ManifestFieldError::new(
                    format!("entry_points.{identifier}"),
                    "entry point target must not be empty",
                ));
            }
        }

        if let Some((version, minimum)) = version.zip(minimum)
            && details.is_empty()
        {
            return Ok(ValidatedManifest {
                version,
                minimum_ap_version: minimum,
                maximum_ap_version: maximum,
            });
        }
        Err(ManifestError::Invalid {
            details,
        })
    }

    /// Returns the manifest serialized as the verbatim snapshot object.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error, which only occurs when an
    /// `extra` value cannot be represented.
    pub fn snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Parsed version fields produced by a successful validation.
#[derive(Debug, Clone)]
pub struct ValidatedManifest {
    /// Parsed package version.
    pub version: Version,
    /// Parsed minimum host version.
    pub minimum_ap_version: Version,
    /// Parsed maximum host version.
    pub maximum_ap_version: Option<Version>,
}

/// Returns true for identifiers matching `[A-Za-z_][A-Za-z0-9_]*`.
fn is_valid_entry_point_identifier(identifier: &str) -> bool {
    let mut bytes = identifier.bytes();
    let valid_head = bytes.next().is_some_and(|b| b.is_ascii_alphabetic() || b == b'_');
    valid_head && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
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

    use serde_json::json;

    use super::*;

    fn sample_manifest() -> Manifest {
        serde_json::from_value(json!({
            "name": "pokemon-emerald",
            "version": "1.0.0",
            "game": "Pokemon Emerald",
            "minimum_ap_version": "0.5.0",
            "entry_points": {"pokemon_emerald": "pokemon_emerald.world:World"},
        }))
        .unwrap()
    }

    #[test]
    fn validates_minimal_manifest() {
        let validated = sample_manifest().validate().unwrap();
        assert_eq!(validated.version.to_string(), "1.0.0");
        assert!(validated.maximum_ap_version.is_none());
    }

    #[test]
    fn collects_multiple_field_errors() {
        let manifest: Manifest = serde_json::from_value(json!({
            "name": "",
            "version": "not-a-version",
            "game": "",
            "minimum_ap_version": "0.5.0",
            "entry_points": {"9bad": "x"},
        }))
        .unwrap();
        let Err(ManifestError::Invalid { details }) = manifest.validate() else {
            panic!("expected validation failure");
        };
        let fields: Vec<&str> = details.iter().map(|d| d.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"version"));
        assert!(fields.contains(&"game"));
        assert!(fields.contains(&"entry_points.9bad"));
    }

    #[test]
    fn rejects_inverted_compatibility_bounds() {
        let mut manifest = sample_manifest();
        manifest.minimum_ap_version = "0.6.0".to_string();
        manifest.maximum_ap_version = Some("0.5.0".to_string());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn unknown_keys_round_trip() {
        let raw = json!({
            "name": "pokemon-emerald",
            "version": "1.0.0",
            "game": "Pokemon Emerald",
            "minimum_ap_version": "0.5.0",
            "entry_points": {"pokemon_emerald": "pokemon_emerald.world:World"},
            "vendored_dependencies": {"requests": "2.32.0"},
            "future_field": [1, 2, 3],
        });
        let manifest: Manifest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(manifest.extra.len(), 2);
        assert_eq!(manifest.snapshot().unwrap(), raw);
    }

    #[test]
    fn requires_entry_points() {
        let mut manifest = sample_manifest();
        manifest.entry_points.clear();
        let Err(ManifestError::Invalid { details }) = manifest.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(details[0].field, "entry_points");
    }
}
