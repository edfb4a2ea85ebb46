//! Package naming: parsing, normalization, equivalence.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{Result, SchemaError};

/// A validated, normalized package name.
///
/// Two grammars are accepted:
///
/// * unscoped: `[a-z0-9][a-z0-9-]*`
/// * scoped: `@scope/name` where both halves are unscoped names
///
/// Normalization lowercases and trims the input, so two names are equivalent
/// iff their `PackageName`s compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageName(String);

impl PackageName {
    /// Parse and normalize a package name
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_ascii_lowercase();
        if let Some(rest) = normalized.strip_prefix('@') {
            let Some((scope, name)) = rest.split_once('/') else {
                return Err(SchemaError::InvalidPackageName {
                    name: input.to_owned(),
                });
            };
            if is_valid_segment(scope) && is_valid_segment(name) {
                return Ok(PackageName(normalized));
            }
        } else if is_valid_segment(&normalized) {
            return Ok(PackageName(normalized));
        }
        Err(SchemaError::InvalidPackageName {
            name: input.to_owned(),
        })
    }

    /// The normalized name as a str
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is an `@scope/name` style name
    pub fn is_scoped(&self) -> bool {
        self.0.starts_with('@')
    }

    /// The scope half of a scoped name, without the `@`
    pub fn scope(&self) -> Option<&str> {
        self.0.strip_prefix('@').and_then(|rest| {
            rest.split_once('/').map(|(scope, _)| scope)
        })
    }

    /// The unscoped half of the name (the whole name if unscoped)
    pub fn base_name(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    /// The path components this name occupies in a registry tree.
    ///
    /// `@scope/name` materializes as two nested directories.
    pub fn path_components(&self) -> Vec<&str> {
        self.0.split('/').collect()
    }
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PackageName {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self> {
        PackageName::parse(s)
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PackageName::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A `name[@version]` spec as typed on a command line or in an `--include`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// The package name
    pub name: PackageName,
    /// The version or range that followed the `@`, if any
    pub version: Option<String>,
}

impl PackageSpec {
    /// Parse a `name`, `name@1.2.3`, or `@scope/name@^1.0` spec.
    ///
    /// Only the last `@` past position zero splits name from version, so
    /// scoped names survive intact.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let split_at = trimmed.rfind('@').filter(|&idx| idx > 0);
        let (name_part, version) = match split_at {
            Some(idx) => {
                let version = trimmed[idx + 1..].to_owned();
                if version.is_empty() {
                    return Err(SchemaError::InvalidPackageSpec {
                        spec: input.to_owned(),
                    });
                }
                (&trimmed[..idx], Some(version))
            }
            None => (trimmed, None),
        };
        Ok(PackageSpec {
            name: PackageName::parse(name_part)?,
            version,
        })
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => self.name.fmt(f),
        }
    }
}
