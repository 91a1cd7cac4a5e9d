// island-registry-core/src/filename.rs
// ============================================================================
// Module: Distribution Filename Grammar
// Description: Build and parse island and source-archive filenames.
// Purpose: Keep filenames, manifests, and platform tags in agreement.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Two filename shapes exist on the wire:
//! binary `{dist}-{ver}(-{build})?-{py}-{abi}-{plat}.island` and source
//! `{dist}-{ver}.tar.gz`. Distribution names are normalized (lowercase, runs
//! of non-alphanumerics collapsed to one underscore) and versions encode `-`
//! as `_` while preserving `+`, so every hyphen in a filename is a field
//! separator. Platform tags are PEP-425-shape triples compared only for
//! equality; `py3-none-any` designates platform-independent packages.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Extension for binary island distributions.
pub const ISLAND_EXTENSION: &str = ".island";
/// Extension for source archives.
pub const SDIST_EXTENSION: &str = ".tar.gz";
/// Platform tag string used for source archives in registration payloads.
pub const SOURCE_PLATFORM_TAG: &str = "source";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Filename parsing and agreement failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilenameError {
    /// The filename does not match either distribution shape.
    #[error("invalid distribution filename {filename:?}: {reason}")]
    Invalid {
        /// Offending filename.
        filename: String,
        /// Human-readable reason.
        reason: &'static str,
    },
    /// Parsed name disagrees with the manifest name.
    #[error("filename name {found:?} does not match manifest name {expected:?}")]
    NameMismatch {
        /// Normalized manifest name.
        expected: String,
        /// Name parsed from the filename.
        found: String,
    },
    /// Parsed version disagrees with the manifest version.
    #[error("filename version {found:?} does not match manifest version {expected:?}")]
    VersionMismatch {
        /// Filename-encoded manifest version.
        expected: String,
        /// Version parsed from the filename.
        found: String,
    },
    /// Parsed platform tag disagrees with the declared tag.
    #[error("filename platform tag {found:?} does not match declared tag {expected:?}")]
    TagMismatch {
        /// Declared platform tag.
        expected: String,
        /// Tag parsed from the filename.
        found: String,
    },
}

impl FilenameError {
    fn invalid(filename: &str, reason: &'static str) -> Self {
        Self::Invalid {
            filename: filename.to_string(),
            reason,
        }
    }
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Normalizes a package name for filenames and registry identity.
///
/// Lowercases, collapses runs of non-alphanumerics to one underscore, and
/// strips leading/trailing underscores.
///
/// # Errors
///
/// Returns [`FilenameError::Invalid`] when nothing remains after
/// normalization.
pub fn normalize_name(name: &str) -> Result<String, FilenameError> {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        return Err(FilenameError::invalid(name, "name has no alphanumeric characters"));
    }
    Ok(out)
}

/// Encodes a version string for use inside a filename.
///
/// Hyphens become underscores so the pre-release separator cannot collide
/// with filename field separators; `+` build metadata is preserved.
#[must_use]
pub fn encode_version(version: &str) -> String {
    version.replace('-', "_")
}

// ============================================================================
// SECTION: Platform Tag
// ============================================================================

/// PEP-425-shape platform compatibility tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformTag {
    /// Interpreter tag (e.g. `py3`, `cp311`).
    pub python: String,
    /// ABI tag (e.g. `none`, `cp311`).
    pub abi: String,
    /// Platform tag (e.g. `any`, `win_amd64`).
    pub platform: String,
}

impl PlatformTag {
    /// Returns the universal tag for platform-independent packages.
    #[must_use]
    pub fn universal() -> Self {
        Self {
            python: "py3".to_string(),
            abi: "none".to_string(),
            platform: "any".to_string(),
        }
    }

    /// Parses a `python-abi-platform` triple.
    ///
    /// # Errors
    ///
    /// Returns [`FilenameError::Invalid`] when the triple is malformed.
    pub fn parse(raw: &str) -> Result<Self, FilenameError> {
        let mut parts = raw.split('-');
        let python = parts.next().unwrap_or_default();
        let (Some(abi), Some(plat), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(FilenameError::invalid(raw, "platform tag must have three parts"));
        };
        if !is_tag_part(python) || !is_tag_part(abi) || !is_tag_part(plat) {
            return Err(FilenameError::invalid(raw, "invalid platform tag characters"));
        }
        Ok(Self {
            python: python.to_string(),
            abi: abi.to_string(),
            platform: plat.to_string(),
        })
    }

    /// Returns true for platform-independent tags.
    #[must_use]
    pub fn is_universal(&self) -> bool {
        self.abi == "none" && self.platform == "any"
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.python, self.abi, self.platform)
    }
}

/// Returns true for a valid lowercase tag component.
fn is_tag_part(part: &str) -> bool {
    !part.is_empty()
        && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

// ============================================================================
// SECTION: Parsed Filenames
// ============================================================================

/// Distribution artifact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Binary island distribution.
    Binary,
    /// Source archive.
    Source,
}

/// Components recovered from a distribution filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    /// Normalized distribution name.
    pub name: String,
    /// Filename-encoded version.
    pub version: String,
    /// Optional all-digit build tag (binary only).
    pub build_tag: Option<String>,
    /// Platform tag (binary only).
    pub tag: Option<PlatformTag>,
    /// Artifact kind implied by the extension.
    pub kind: ArtifactKind,
}

impl ParsedFilename {
    /// Checks the parsed components against manifest fields and the declared
    /// platform tag from the registration payload.
    ///
    /// # Errors
    ///
    /// Returns the first disagreement as a [`FilenameError`].
    pub fn check_agreement(
        &self,
        manifest_name: &str,
        manifest_version: &str,
        declared_tag: &str,
    ) -> Result<(), FilenameError> {
        let expected_name = normalize_name(manifest_name)?;
        if self.name != expected_name {
            return Err(FilenameError::NameMismatch {
                expected: expected_name,
                found: self.name.clone(),
            });
        }
        let expected_version = encode_version(manifest_version);
        if self.version != expected_version {
            return Err(FilenameError::VersionMismatch {
                expected: expected_version,
                found: self.version.clone(),
            });
        }
        let found_tag = match &self.tag {
            Some(tag) => tag.to_string(),
            None => SOURCE_PLATFORM_TAG.to_string(),
        };
        if found_tag != declared_tag {
            return Err(FilenameError::TagMismatch {
                expected: declared_tag.to_string(),
                found: found_tag,
            });
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Building
// ============================================================================

/// Builds a binary island filename from raw parts, normalizing as needed.
///
/// # Errors
///
/// Returns [`FilenameError::Invalid`] when the name cannot be normalized.
pub fn build_island_filename(
    name: &str,
    version: &str,
    build_tag: Option<&str>,
    tag: &PlatformTag,
) -> Result<String, FilenameError> {
    let name = normalize_name(name)?;
    let version = encode_version(version);
    Ok(match build_tag {
        Some(build) => format!("{name}-{version}-{build}-{tag}{ISLAND_EXTENSION}"),
        None => format!("{name}-{version}-{tag}{ISLAND_EXTENSION}"),
    })
}

/// Builds a source archive filename from raw parts.
///
/// # Errors
///
/// Returns [`FilenameError::Invalid`] when the name cannot be normalized.
pub fn build_sdist_filename(name: &str, version: &str) -> Result<String, FilenameError> {
    let name = normalize_name(name)?;
    let version = encode_version(version);
    Ok(format!("{name}-{version}{SDIST_EXTENSION}"))
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses either distribution filename shape.
///
/// # Errors
///
/// Returns [`FilenameError::Invalid`] when neither shape matches.
pub fn parse_filename(filename: &str) -> Result<ParsedFilename, FilenameError> {
    if let Some(stem) = filename.strip_suffix(ISLAND_EXTENSION) {
        return parse_island_stem(filename, stem);
    }
    if let Some(stem) = filename.strip_suffix(SDIST_EXTENSION) {
        return parse_sdist_stem(filename, stem);
    }
    Err(FilenameError::invalid(filename, "unknown distribution extension"))
}

/// Parses the hyphen-separated fields of an island filename stem.
fn parse_island_stem(filename: &str, stem: &str) -> Result<ParsedFilename, FilenameError> {
    let fields: Vec<&str> = stem.split('-').collect();
    let (name, version, build_tag, tag_fields) = match fields.as_slice() {
        [name, version, py, abi, plat] => (*name, *version, None, [*py, *abi, *plat]),
        [name, version, build, py, abi, plat] => {
            if build.is_empty() || !build.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FilenameError::invalid(filename, "build tag must be numeric"));
            }
            (*name, *version, Some((*build).to_string()), [*py, *abi, *plat])
        }
        _ => return Err(FilenameError::invalid(filename, "wrong number of filename fields")),
    };
    validate_parsed_name(filename, name)?;
    validate_parsed_version(filename, version)?;
    let [python, abi, plat] = tag_fields;
    if !is_tag_part(python) || !is_tag_part(abi) || !is_tag_part(plat) {
        return Err(FilenameError::invalid(filename, "invalid platform tag characters"));
    }
    Ok(ParsedFilename {
        name: name.to_string(),
        version: version.to_string(),
        build_tag,
        tag: Some(PlatformTag {
            python: python.to_string(),
            abi: abi.to_string(),
            platform: plat.to_string(),
        }),
        kind: ArtifactKind::Binary,
    })
}

/// Parses the `{name}-{version}` stem of a source archive.
fn parse_sdist_stem(filename: &str, stem: &str) -> Result<ParsedFilename, FilenameError> {
    let Some((name, version)) = stem.split_once('-') else {
        return Err(FilenameError::invalid(filename, "missing version field"));
    };
    if version.contains('-') {
        return Err(FilenameError::invalid(filename, "too many filename fields"));
    }
    validate_parsed_name(filename, name)?;
    validate_parsed_version(filename, version)?;
    Ok(ParsedFilename {
        name: name.to_string(),
        version: version.to_string(),
        build_tag: None,
        tag: None,
        kind: ArtifactKind::Source,
    })
}

/// Validates a normalized distribution name field.
fn validate_parsed_name(filename: &str, name: &str) -> Result<(), FilenameError> {
    let mut bytes = name.bytes();
    let valid_head = bytes.next().is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    let valid_tail = bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if !valid_head || !valid_tail {
        return Err(FilenameError::invalid(filename, "invalid distribution name field"));
    }
    Ok(())
}

/// Validates a filename-encoded version field.
fn validate_parsed_version(filename: &str, version: &str) -> Result<(), FilenameError> {
    if version.is_empty() {
        return Err(FilenameError::invalid(filename, "empty version field"));
    }
    let valid = version
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'+');
    if !valid {
        return Err(FilenameError::invalid(filename, "invalid version field"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize_name("Pokemon-Emerald").unwrap(), "pokemon_emerald");
        assert_eq!(normalize_name("my.game.world").unwrap(), "my_game_world");
        assert_eq!(normalize_name("__trim__").unwrap(), "trim");
        assert!(normalize_name("---").is_err());
    }

    #[test]
    fn encodes_versions() {
        assert_eq!(encode_version("1.0.0-alpha.1"), "1.0.0_alpha.1");
        assert_eq!(encode_version("2.0.0+build.123"), "2.0.0+build.123");
    }

    #[test]
    fn builds_and_parses_island_filename() {
        let tag = PlatformTag::universal();
        let filename = build_island_filename("Pokemon-Emerald", "1.0.0", None, &tag).unwrap();
        assert_eq!(filename, "pokemon_emerald-1.0.0-py3-none-any.island");
        let parsed = parse_filename(&filename).unwrap();
        assert_eq!(parsed.name, "pokemon_emerald");
        assert_eq!(parsed.version, "1.0.0");
        assert_eq!(parsed.kind, ArtifactKind::Binary);
        assert_eq!(parsed.tag, Some(tag));
    }

    #[test]
    fn parses_platform_tags() {
        let universal = PlatformTag::parse("py3-none-any").unwrap();
        assert!(universal.is_universal());
        let native = PlatformTag::parse("cp311-cp311-win_amd64").unwrap();
        assert!(!native.is_universal());
        assert_eq!(native.to_string(), "cp311-cp311-win_amd64");
        assert!(PlatformTag::parse("py3-none").is_err());
        assert!(PlatformTag::parse("py3-none-any-extra").is_err());
    }

    #[test]
    fn parses_build_tag() {
        let parsed = parse_filename("my_game-2.0.0-1-cp311-cp311-win_amd64.island").unwrap();
        assert_eq!(parsed.build_tag.as_deref(), Some("1"));
        assert_eq!(parsed.tag.as_ref().map(ToString::to_string).unwrap(), "cp311-cp311-win_amd64");
    }

    #[test]
    fn parses_sdist_filename() {
        let filename = build_sdist_filename("pokemon-emerald", "1.0.0").unwrap();
        assert_eq!(filename, "pokemon_emerald-1.0.0.tar.gz");
        let parsed = parse_filename(&filename).unwrap();
        assert_eq!(parsed.kind, ArtifactKind::Source);
        assert!(parsed.tag.is_none());
    }

    #[test]
    fn rejects_malformed_filenames() {
        for filename in [
            "my_game.island",
            "my_game-1.0.0.island",
            "my_game-1.0.0-py3-none.island",
            "My_Game-1.0.0-py3-none-any.island",
            "my_game-1.0.0-x-py3-none-any.island",
            "my_game-1.0.0-1-2-py3-none-any.island",
            "my_game.zip",
            "my_game.tar.gz",
        ] {
            assert!(parse_filename(filename).is_err(), "accepted {filename:?}");
        }
    }

    #[test]
    fn agreement_detects_mismatches() {
        let parsed = parse_filename("pokemon_emerald-1.0.0-py3-none-any.island").unwrap();
        parsed.check_agreement("Pokemon-Emerald", "1.0.0", "py3-none-any").unwrap();
        assert!(matches!(
            parsed.check_agreement("other-game", "1.0.0", "py3-none-any"),
            Err(FilenameError::NameMismatch { .. })
        ));
        assert!(matches!(
            parsed.check_agreement("Pokemon-Emerald", "1.0.1", "py3-none-any"),
            Err(FilenameError::VersionMismatch { .. })
        ));
        assert!(matches!(
            parsed.check_agreement("Pokemon-Emerald", "1.0.0", "cp311-cp311-win_amd64"),
            Err(FilenameError::TagMismatch { .. })
        ));
    }
}
