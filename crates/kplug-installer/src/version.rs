//! Plugin version parsing and ordering.
//!
//! Versions are semver strings with a mandatory leading `v`. Ordering
//! follows semver precedence and ignores build metadata.

use std::cmp::Ordering;
use std::fmt;

use crate::error::InstallError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    inner: semver::Version,
}

impl Version {
    /// Parse `vMAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`.
    ///
    /// Rejects a missing `v`, leading zeros, and empty pre-release or
    /// build segments.
    pub fn parse(s: &str) -> Result<Self, InstallError> {
        let rest = s.strip_prefix('v').ok_or_else(|| {
            InstallError::InvalidVersion(format!("version '{s}' must start with 'v'"))
        })?;

        let inner = semver::Version::parse(rest)
            .map_err(|e| InstallError::InvalidVersion(format!("'{s}': {e}")))?;
        Ok(Self { inner })
    }

    /// Semver precedence: `true` when `self` sorts strictly before `other`.
    pub fn less(&self, other: &Version) -> bool {
        self.cmp_precedence(other) == Ordering::Less
    }

    pub fn cmp_precedence(&self, other: &Version) -> Ordering {
        let mut a = self.inner.clone();
        let mut b = other.inner.clone();
        a.build = semver::BuildMetadata::EMPTY;
        b.build = semver::BuildMetadata::EMPTY;
        a.cmp(&b)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.inner)
    }
}

impl std::str::FromStr for Version {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

/// Parse both strings and report whether `a` precedes `b`.
pub fn less(a: &str, b: &str) -> Result<bool, InstallError> {
    Ok(Version::parse(a)?.less(&Version::parse(b)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_valid() {
        assert_eq!(v("v1.2.3").to_string(), "v1.2.3");
        assert_eq!(v("v0.0.1-alpha.1+build.5").to_string(), "v0.0.1-alpha.1+build.5");
    }

    #[test]
    fn test_parse_requires_prefix() {
        let err = Version::parse("1.2.3").unwrap_err();
        assert!(matches!(err, InstallError::InvalidVersion(_)));
        assert!(err.to_string().contains("must start with 'v'"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "", "v", "v1", "v1.2", "va.b.c", "v01.2.3", "v1.02.3", "v1.2.3-", "v1.2.3+",
            "v1.2.3-alpha..1", "V1.2.3",
        ] {
            assert!(
                matches!(Version::parse(bad), Err(InstallError::InvalidVersion(_))),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_less_numeric_components() {
        assert!(v("v1.0.0").less(&v("v1.1.0")));
        assert!(v("v1.9.0").less(&v("v1.10.0")));
        assert!(v("v1.1.9").less(&v("v2.0.0")));
        assert!(!v("v2.0.0").less(&v("v1.99.99")));
    }

    #[test]
    fn test_less_prerelease() {
        assert!(v("v1.0.0-alpha").less(&v("v1.0.0")));
        assert!(v("v1.0.0-alpha").less(&v("v1.0.0-alpha.1")));
        assert!(v("v1.0.0-alpha.1").less(&v("v1.0.0-alpha.beta")));
        assert!(v("v1.0.0-beta.2").less(&v("v1.0.0-beta.11")));
        assert!(v("v1.0.0-rc.1").less(&v("v1.0.0")));
    }

    #[test]
    fn test_build_metadata_ignored() {
        assert!(!v("v1.0.0+a").less(&v("v1.0.0+b")));
        assert!(!v("v1.0.0+b").less(&v("v1.0.0+a")));
        assert_eq!(v("v1.0.0+a").cmp_precedence(&v("v1.0.0")), Ordering::Equal);
    }

    #[test]
    fn test_less_helper() {
        assert!(less("v1.0.0", "v1.1.0").unwrap());
        assert!(!less("v1.1.0", "v1.1.0").unwrap());
        assert!(less("1.0.0", "v1.1.0").is_err());
    }

    fn arb_version() -> impl Strategy<Value = Version> {
        (
            0u64..4,
            0u64..4,
            0u64..4,
            prop::option::of(prop::sample::select(vec!["alpha", "alpha.1", "beta", "rc.2", "1"])),
            prop::option::of(prop::sample::select(vec!["b1", "sha.abc"])),
        )
            .prop_map(|(major, minor, patch, pre, build)| {
                let mut s = format!("v{major}.{minor}.{patch}");
                if let Some(pre) = pre {
                    s.push('-');
                    s.push_str(pre);
                }
                if let Some(build) = build {
                    s.push('+');
                    s.push_str(build);
                }
                Version::parse(&s).unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_less_is_irreflexive(a in arb_version()) {
            prop_assert!(!a.less(&a));
        }

        #[test]
        fn prop_less_is_transitive(a in arb_version(), b in arb_version(), c in arb_version()) {
            if a.less(&b) && b.less(&c) {
                prop_assert!(a.less(&c));
            }
        }

        #[test]
        fn prop_less_is_total(a in arb_version(), b in arb_version()) {
            let equal = a.cmp_precedence(&b) == Ordering::Equal;
            prop_assert_eq!(a.less(&b) || b.less(&a) || equal, true);
            prop_assert!(!(a.less(&b) && b.less(&a)));
        }
    }
}
