#![deny(missing_docs)]

//! # openpackage-schema
//!
//! This crate exists to serialize and deserialize the `package.yml` and
//! `package.index.yml` files produced by openpackage. Ideally it should be
//! reasonably forward and backward compatible with different versions of
//! these formats.
//!
//! The root types of the schema are [`PackageManifest`][] and
//! [`PackageIndex`][].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod errors;
pub mod names;

pub use errors::SchemaError;
pub use names::{PackageName, PackageSpec};

use errors::Result;

/// A forward-slash path relative to a registry version root.
///
/// This is a String because it's a wire format shared across OSes.
pub type RegistryPath = String;
/// An absolute path where a registry file was materialized in a workspace.
///
/// This is a String because when deserializing this may be a path format
/// from a different OS!
pub type InstalledPath = String;

/// The version a freshly bootstrapped package starts from
pub const DEFAULT_VERSION: &str = "0.1.0";
/// Filename of a package manifest
pub const MANIFEST_FILE_NAME: &str = "package.yml";
/// Filename of a per-workspace package index
pub const INDEX_FILE_NAME: &str = "package.index.yml";

/// The `package.yml` manifest of one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Name of the package
    pub name: PackageName,
    /// Version of the package (semver, possibly with a WIP prerelease tag)
    pub version: String,
    /// A brief description of the package
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Keywords for registry search
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Runtime dependencies
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<DependencyEntry>,
    /// Dev dependencies; only honored when this manifest is the workspace root
    #[serde(default)]
    #[serde(rename = "dev-packages")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dev_packages: Vec<DependencyEntry>,
}

/// One `{name, version}` dependency row in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// Name of the dependency
    pub name: PackageName,
    /// The version range this package requires
    pub version: String,
}

impl PackageManifest {
    /// A fresh manifest with no deps
    pub fn new(name: PackageName, version: impl Into<String>) -> Self {
        PackageManifest {
            name,
            version: version.into(),
            description: None,
            keywords: vec![],
            packages: vec![],
            dev_packages: vec![],
        }
    }

    /// Parse a manifest out of YAML text
    pub fn from_yaml(origin: &str, contents: &str) -> Result<Self> {
        serde_yml::from_str(contents).map_err(|details| SchemaError::YamlParse {
            origin: origin.to_owned(),
            details,
        })
    }

    /// Serialize back to YAML text.
    ///
    /// Dependency rows are sorted by name first so output is deterministic.
    pub fn to_yaml(&self) -> Result<String> {
        let mut sorted = self.clone();
        sorted.packages.sort_by(|a, b| a.name.cmp(&b.name));
        sorted.dev_packages.sort_by(|a, b| a.name.cmp(&b.name));
        serde_yml::to_string(&sorted).map_err(|details| SchemaError::YamlSerialize {
            origin: MANIFEST_FILE_NAME.to_owned(),
            details,
        })
    }

    /// Look up a dependency row (runtime, then dev) by name
    pub fn dependency(&self, name: &PackageName) -> Option<&DependencyEntry> {
        self.packages
            .iter()
            .chain(self.dev_packages.iter())
            .find(|dep| &dep.name == name)
    }

    /// Insert or update a dependency row.
    ///
    /// A name already present in the other section is moved, not duplicated.
    pub fn upsert_dependency(&mut self, name: PackageName, range: String, dev: bool) {
        self.packages.retain(|dep| dep.name != name);
        self.dev_packages.retain(|dep| dep.name != name);
        let section = if dev {
            &mut self.dev_packages
        } else {
            &mut self.packages
        };
        section.push(DependencyEntry {
            name,
            version: range,
        });
    }

    /// Drop a dependency row from both sections; reports whether one existed
    pub fn remove_dependency(&mut self, name: &PackageName) -> bool {
        let before = self.packages.len() + self.dev_packages.len();
        self.packages.retain(|dep| &dep.name != name);
        self.dev_packages.retain(|dep| &dep.name != name);
        before != self.packages.len() + self.dev_packages.len()
    }
}

/// The `package.index.yml` record mapping registry paths to installed paths.
///
/// Keys ending in `/` denote directory mappings, everything else is a file
/// mapping. The map is a `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndex {
    /// Which workspace (and which version of the package) produced this index
    pub workspace: WorkspaceStamp,
    /// registry path (or `dir/` key) → installed absolute paths
    #[serde(default)]
    pub files: BTreeMap<RegistryPath, Vec<InstalledPath>>,
}

/// The workspace header of a [`PackageIndex`][]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceStamp {
    /// Deterministic hash of the absolute workspace path
    pub hash: String,
    /// The package version this index was written for
    pub version: String,
}

impl PackageIndex {
    /// A fresh empty index for a workspace
    pub fn new(hash: impl Into<String>, version: impl Into<String>) -> Self {
        PackageIndex {
            workspace: WorkspaceStamp {
                hash: hash.into(),
                version: version.into(),
            },
            files: BTreeMap::new(),
        }
    }

    /// Parse an index out of YAML text
    pub fn from_yaml(origin: &str, contents: &str) -> Result<Self> {
        serde_yml::from_str(contents).map_err(|details| SchemaError::YamlParse {
            origin: origin.to_owned(),
            details,
        })
    }

    /// Serialize back to YAML text, with every value array sorted
    pub fn to_yaml(&self) -> Result<String> {
        let mut sorted = self.clone();
        for targets in sorted.files.values_mut() {
            targets.sort();
            targets.dedup();
        }
        serde_yml::to_string(&sorted).map_err(|details| SchemaError::YamlSerialize {
            origin: INDEX_FILE_NAME.to_owned(),
            details,
        })
    }

    /// Record targets under a key, merging with any already present
    pub fn insert(&mut self, key: impl Into<String>, targets: Vec<InstalledPath>) {
        let entry = self.files.entry(key.into()).or_default();
        entry.extend(targets);
        entry.sort();
        entry.dedup();
    }

    /// Whether a key addresses a directory mapping
    pub fn is_dir_key(key: &str) -> bool {
        key.ends_with('/')
    }
}
