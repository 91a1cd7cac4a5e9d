// island-registry-core/tests/proptest_version.rs
// ============================================================================
// Module: Version Order Property Tests
// Description: Property tests for the semantic version total order.
// Purpose: Detect ordering invariant violations across wide input ranges.
// ============================================================================

//! Property-based tests for version ordering invariants.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::cmp::Ordering;

use island_registry_core::Version;
use proptest::prelude::*;

/// Strategy producing a valid pre-release identifier string.
fn prerelease_ident_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u64..100).prop_map(|n| n.to_string()),
        "[a-z]{1,5}",
        "[a-z]{1,3}[0-9]{1,2}",
    ]
}

/// Strategy producing a valid semantic version string.
fn version_strategy() -> impl Strategy<Value = String> {
    (
        0u64..20,
        0u64..20,
        0u64..20,
        prop::collection::vec(prerelease_ident_strategy(), 0..3),
        prop::option::of("[a-z0-9]{1,6}"),
    )
        .prop_map(|(major, minor, patch, prerelease, build)| {
            let mut out = format!("{major}.{minor}.{patch}");
            if !prerelease.is_empty() {
                out.push('-');
                out.push_str(&prerelease.join("."));
            }
            if let Some(build) = build {
                out.push('+');
                out.push_str(&build);
            }
            out
        })
}

proptest! {
    #[test]
    fn parse_display_round_trip(raw in version_strategy()) {
        let version = Version::parse(&raw).unwrap();
        let reparsed = Version::parse(&version.to_string()).unwrap();
        prop_assert_eq!(version.cmp(&reparsed), Ordering::Equal);
        prop_assert_eq!(version.to_string(), reparsed.to_string());
    }

    #[test]
    fn ordering_is_transitive(
        a in version_strategy(),
        b in version_strategy(),
        c in version_strategy(),
    ) {
        let a = Version::parse(&a).unwrap();
        let b = Version::parse(&b).unwrap();
        let c = Version::parse(&c).unwrap();
        if a <= b && b <= c {
            prop_assert!(a <= c, "{a} <= {b} <= {c} but {a} > {c}");
        }
    }

    #[test]
    fn ordering_is_antisymmetric(a in version_strategy(), b in version_strategy()) {
        let a = Version::parse(&a).unwrap();
        let b = Version::parse(&b).unwrap();
        if a <= b && b <= a {
            prop_assert_eq!(a.cmp(&b), Ordering::Equal);
        }
    }

    #[test]
    fn build_metadata_never_affects_order(
        raw in version_strategy(),
        build_a in "[a-z0-9]{1,6}",
        build_b in "[a-z0-9]{1,6}",
    ) {
        let base = Version::parse(&raw).unwrap();
        let with_a = Version::parse(&format!("{}+{build_a}", base.base_and_prerelease())).unwrap();
        let with_b = Version::parse(&format!("{}+{build_b}", base.base_and_prerelease())).unwrap();
        prop_assert_eq!(with_a.cmp(&with_b), Ordering::Equal);
    }
}

/// Extension used only by these tests to strip build metadata.
trait BaseAndPrerelease {
    fn base_and_prerelease(&self) -> String;
}

impl BaseAndPrerelease for Version {
    fn base_and_prerelease(&self) -> String {
        let rendered = self.to_string();
        match rendered.split_once('+') {
            Some((head, _)) => head.to_string(),
            None => rendered,
        }
    }
}
