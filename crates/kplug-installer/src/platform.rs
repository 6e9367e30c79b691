//! Platform selection.
//!
//! Picks the first descriptor in a manifest whose selector matches the
//! target `os`/`arch` labels. Labels use Go-style names (`linux`,
//! `darwin`, `amd64`, `arm64`) because published manifests do.

use std::collections::BTreeMap;

use kplug_index::{PlatformDescriptor, Selector, SelectorOperator};

use crate::error::InstallError;

/// Target platform for an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTarget {
    pub os: String,
    pub arch: String,
}

impl PlatformTarget {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Host platform, with explicit overrides taking precedence.
    pub fn resolve(os_override: Option<&str>, arch_override: Option<&str>) -> Self {
        let host = Self::host();
        Self {
            os: os_override
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or(host.os),
            arch: arch_override
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or(host.arch),
        }
    }

    /// Platform of the running binary.
    pub fn host() -> Self {
        Self::new(
            os_label(std::env::consts::OS),
            arch_label(std::env::consts::ARCH),
        )
    }

    fn labels(&self) -> BTreeMap<&str, &str> {
        BTreeMap::from([("os", self.os.as_str()), ("arch", self.arch.as_str())])
    }
}

impl std::fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

fn os_label(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn arch_label(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Selects descriptors for a fixed target platform.
#[derive(Debug, Clone)]
pub struct PlatformMatcher {
    target: PlatformTarget,
}

impl PlatformMatcher {
    pub fn new(target: PlatformTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &PlatformTarget {
        &self.target
    }

    /// First descriptor, in manifest order, whose selector matches.
    ///
    /// `Ok(None)` when nothing matches; a malformed selector is an error.
    pub fn find<'a>(
        &self,
        descriptors: &'a [PlatformDescriptor],
    ) -> Result<Option<&'a PlatformDescriptor>, InstallError> {
        let labels = self.target.labels();
        for (i, descriptor) in descriptors.iter().enumerate() {
            if selector_matches(&descriptor.selector, &labels)? {
                tracing::debug!(
                    platform = %self.target,
                    index = i,
                    uri = %descriptor.uri,
                    "matched platform descriptor"
                );
                return Ok(Some(descriptor));
            }
        }
        tracing::debug!(platform = %self.target, "no platform descriptor matched");
        Ok(None)
    }
}

fn validate_label(kind: &str, value: &str) -> Result<(), InstallError> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(InstallError::InvalidSelector(format!(
            "invalid label {kind} '{value}'"
        )));
    }
    Ok(())
}

/// Evaluate a selector against a label set.
pub fn selector_matches(
    selector: &Selector,
    labels: &BTreeMap<&str, &str>,
) -> Result<bool, InstallError> {
    for (key, value) in &selector.match_labels {
        validate_label("key", key)?;
        validate_label("value", value)?;
    }
    for req in &selector.match_expressions {
        validate_label("key", &req.key)?;
        match req.operator {
            SelectorOperator::In | SelectorOperator::NotIn => {
                if req.values.is_empty() {
                    return Err(InstallError::InvalidSelector(format!(
                        "operator {:?} on '{}' requires values",
                        req.operator, req.key
                    )));
                }
                for value in &req.values {
                    validate_label("value", value)?;
                }
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist => {
                if !req.values.is_empty() {
                    return Err(InstallError::InvalidSelector(format!(
                        "operator {:?} on '{}' takes no values",
                        req.operator, req.key
                    )));
                }
            }
        }
    }

    let labels_ok = selector
        .match_labels
        .iter()
        .all(|(key, value)| labels.get(key.as_str()) == Some(&value.as_str()));

    let expressions_ok = selector.match_expressions.iter().all(|req| {
        let actual = labels.get(req.key.as_str());
        match req.operator {
            SelectorOperator::In => actual.is_some_and(|a| req.values.iter().any(|v| v == a)),
            SelectorOperator::NotIn => actual.map_or(true, |a| req.values.iter().all(|v| v != a)),
            SelectorOperator::Exists => actual.is_some(),
            SelectorOperator::DoesNotExist => actual.is_none(),
        }
    });

    Ok(labels_ok && expressions_ok)
}
