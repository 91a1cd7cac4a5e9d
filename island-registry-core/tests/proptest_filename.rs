// island-registry-core/tests/proptest_filename.rs
// ============================================================================
// Module: Filename Round-Trip Property Tests
// Description: Property tests for the distribution filename grammar.
// Purpose: Guarantee parse(build(...)) recovers the normalized components.
// ============================================================================

//! Property-based tests for filename build/parse round-trips.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use island_registry_core::ArtifactKind;
use island_registry_core::PlatformTag;
use island_registry_core::build_island_filename;
use island_registry_core::build_sdist_filename;
use island_registry_core::encode_version;
use island_registry_core::normalize_name;
use island_registry_core::parse_filename;
use proptest::prelude::*;

/// Strategy producing raw (un-normalized) package names.
fn raw_name_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9 ._-]{0,20}[A-Za-z0-9]"
}

/// Strategy producing version strings with optional pre-release and build.
fn version_strategy() -> impl Strategy<Value = String> {
    (0u64..50, 0u64..50, 0u64..50, prop::option::of("[a-z]{1,5}"), prop::option::of("[a-z0-9]{1,5}"))
        .prop_map(|(major, minor, patch, prerelease, build)| {
            let mut out = format!("{major}.{minor}.{patch}");
            if let Some(prerelease) = prerelease {
                out.push('-');
                out.push_str(&prerelease);
            }
            if let Some(build) = build {
                out.push('+');
                out.push_str(&build);
            }
            out
        })
}

/// Strategy producing platform tags.
fn tag_strategy() -> impl Strategy<Value = PlatformTag> {
    prop_oneof![
        Just(PlatformTag::universal()),
        ("[a-z][a-z0-9]{1,5}", "[a-z][a-z0-9_]{1,8}", "[a-z][a-z0-9_]{1,12}").prop_map(
            |(python, abi, platform)| PlatformTag {
                python,
                abi,
                platform,
            }
        ),
    ]
}

proptest! {
    #[test]
    fn island_round_trip(
        name in raw_name_strategy(),
        version in version_strategy(),
        build in prop::option::of(1u32..100),
        tag in tag_strategy(),
    ) {
        let build = build.map(|b| b.to_string());
        let filename =
            build_island_filename(&name, &version, build.as_deref(), &tag).unwrap();
        let parsed = parse_filename(&filename).unwrap();
        prop_assert_eq!(parsed.kind, ArtifactKind::Binary);
        prop_assert_eq!(parsed.name, normalize_name(&name).unwrap());
        prop_assert_eq!(parsed.version, encode_version(&version));
        prop_assert_eq!(parsed.build_tag, build);
        prop_assert_eq!(parsed.tag, Some(tag));
    }

    #[test]
    fn sdist_round_trip(name in raw_name_strategy(), version in version_strategy()) {
        let filename = build_sdist_filename(&name, &version).unwrap();
        let parsed = parse_filename(&filename).unwrap();
        prop_assert_eq!(parsed.kind, ArtifactKind::Source);
        prop_assert_eq!(parsed.name, normalize_name(&name).unwrap());
        prop_assert_eq!(parsed.version, encode_version(&version));
        prop_assert!(parsed.tag.is_none());
    }

    #[test]
    fn normalization_is_idempotent(name in raw_name_strategy()) {
        let once = normalize_name(&name).unwrap();
        let twice = normalize_name(&once).unwrap();
        prop_assert_eq!(once, twice);
    }
}
