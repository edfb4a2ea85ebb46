//! The per-user registry at `$HOME/.openpackage`.
//!
//! Versions live at `registry/packages/<name>/<version>/` (scoped names
//! materialize as two nested dirs). Version writes are replace-style: the
//! version dir is removed wholesale and rewritten, so a failed save never
//! leaves a partially visible snapshot.

use axoasset::LocalAsset;
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use openpackage_schema::{PackageManifest, PackageName, MANIFEST_FILE_NAME};
use tracing::{debug, info};

use crate::errors::{OpkgError, OpkgResult};
use crate::version::parse_local_version;

/// One file inside a registry version snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Forward-slash path relative to the version root; never absolute,
    /// never contains `..`
    pub path: String,
    /// Raw bytes; root-file entries store only the section body, no markers
    pub content: Vec<u8>,
}

impl PackageFile {
    /// A file from utf8 text
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        PackageFile {
            path: path.into(),
            content: content.into().into_bytes(),
        }
    }
}

/// A loaded registry snapshot: manifest plus every other file
#[derive(Debug, Clone)]
pub struct PackageContents {
    /// The package's manifest
    pub manifest: PackageManifest,
    /// Every file except `package.yml` itself
    pub files: Vec<PackageFile>,
}

/// Handle to the per-user registry tree
#[derive(Debug, Clone)]
pub struct Registry {
    root: Utf8PathBuf,
}

impl Registry {
    /// The registry under `$HOME/.openpackage`
    pub fn default_location() -> OpkgResult<Self> {
        let home = home::home_dir().ok_or(OpkgError::NoHomeDir)?;
        let home = Utf8PathBuf::from_path_buf(home).map_err(|path| OpkgError::NonUtf8Path {
            path: path.display().to_string(),
        })?;
        Ok(Registry {
            root: home.join(".openpackage"),
        })
    }

    /// A registry rooted somewhere specific (tests, mostly)
    pub fn at(root: impl Into<Utf8PathBuf>) -> Self {
        Registry { root: root.into() }
    }

    /// The registry root dir
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// `registry/packages` under the root
    pub fn packages_dir(&self) -> Utf8PathBuf {
        self.root.join("registry").join("packages")
    }

    /// The dir holding every version of one package
    pub fn package_dir(&self, name: &PackageName) -> Utf8PathBuf {
        let mut dir = self.packages_dir();
        for component in name.path_components() {
            dir.push(component);
        }
        dir
    }

    /// The dir holding one version snapshot
    pub fn version_dir(&self, name: &PackageName, version: &str) -> Utf8PathBuf {
        self.package_dir(name).join(version)
    }

    /// Whether a version snapshot exists
    pub fn version_exists(&self, name: &PackageName, version: &str) -> bool {
        self.version_dir(name, version).is_dir()
    }

    /// Every version of a package present in the registry
    pub fn list_versions(&self, name: &PackageName) -> OpkgResult<Vec<String>> {
        let dir = self.package_dir(name);
        if !dir.is_dir() {
            return Ok(vec![]);
        }
        let entries = std::fs::read_dir(&dir).map_err(|details| OpkgError::RegistryIo {
            path: dir.clone(),
            details,
        })?;
        let mut versions = vec![];
        for entry in entries {
            let entry = entry.map_err(|details| OpkgError::RegistryIo {
                path: dir.clone(),
                details,
            })?;
            if entry.path().is_dir() {
                if let Some(version) = entry.file_name().to_str() {
                    versions.push(version.to_owned());
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// The semver-highest version present, preferring stables over WIPs
    pub fn latest_version(&self, name: &PackageName) -> OpkgResult<Option<String>> {
        let parsed: Vec<(semver::Version, String)> = self
            .list_versions(name)?
            .into_iter()
            .filter_map(|raw| semver::Version::parse(&raw).ok().map(|v| (v, raw)))
            .sorted()
            .collect();
        let stable = parsed
            .iter()
            .rev()
            .find(|(version, _)| version.pre.is_empty());
        Ok(stable
            .or_else(|| parsed.last())
            .map(|(_, raw)| raw.clone()))
    }

    /// Load just the manifest of a version snapshot
    pub fn load_manifest(&self, name: &PackageName, version: &str) -> OpkgResult<PackageManifest> {
        let path = self.version_dir(name, version).join(MANIFEST_FILE_NAME);
        let contents = LocalAsset::load_string(&path)?;
        Ok(PackageManifest::from_yaml(path.as_str(), &contents)?)
    }

    /// Load a full version snapshot (manifest + files)
    pub fn load_package(&self, name: &PackageName, version: &str) -> OpkgResult<PackageContents> {
        let dir = self.version_dir(name, version);
        let manifest = self.load_manifest(name, version)?;
        let mut files = vec![];
        for entry in walkdir::WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|details| OpkgError::RegistryIo {
                path: dir.clone(),
                details: details
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed")),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(abs) = Utf8Path::from_path(entry.path()) else {
                continue;
            };
            let Ok(rel) = abs.strip_prefix(&dir) else {
                continue;
            };
            if rel.as_str() == MANIFEST_FILE_NAME {
                continue;
            }
            files.push(PackageFile {
                path: rel.as_str().replace('\\', "/"),
                content: LocalAsset::load_bytes(abs)?,
            });
        }
        Ok(PackageContents { manifest, files })
    }

    /// Write a version snapshot, replacing any existing dir of the same
    /// version wholesale.
    pub fn write_version(
        &self,
        name: &PackageName,
        version: &str,
        manifest: &PackageManifest,
        files: &[PackageFile],
    ) -> OpkgResult<Utf8PathBuf> {
        let dir = self.version_dir(name, version);
        if dir.exists() {
            LocalAsset::remove_dir_all(&dir)?;
        }
        LocalAsset::create_dir_all(&dir)?;

        LocalAsset::write_new(&manifest.to_yaml()?, dir.join(MANIFEST_FILE_NAME))?;

        // group by parent dir so each dir is ensured exactly once
        let by_dir = files
            .iter()
            .into_group_map_by(|file| Utf8Path::new(&file.path).parent().map(ToOwned::to_owned));
        for (parent, group) in by_dir {
            let target_dir = match &parent {
                Some(parent) if !parent.as_str().is_empty() => {
                    let target = dir.join(parent);
                    LocalAsset::create_dir_all(&target)?;
                    target
                }
                _ => dir.clone(),
            };
            for file in group {
                let file_name = Utf8Path::new(&file.path)
                    .file_name()
                    .unwrap_or(file.path.as_str());
                LocalAsset::new(target_dir.join(file_name), file.content.clone())?
                    .write_to_dir(&target_dir)?;
            }
        }
        info!("wrote {name}@{version} ({} files)", files.len());
        Ok(dir)
    }

    /// Remove one version snapshot; removes the package dir too if it's now
    /// empty.
    pub fn remove_version(&self, name: &PackageName, version: &str) -> OpkgResult<()> {
        let dir = self.version_dir(name, version);
        if dir.exists() {
            LocalAsset::remove_dir_all(&dir)?;
        }
        let package_dir = self.package_dir(name);
        if package_dir.is_dir()
            && std::fs::read_dir(&package_dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false)
        {
            LocalAsset::remove_dir_all(&package_dir)?;
        }
        Ok(())
    }

    /// The next WIP counter for this workspace: one past the highest
    /// already-present counter for the same hash.
    pub fn next_wip_counter(&self, name: &PackageName, workspace_hash: &str) -> OpkgResult<u64> {
        let max = self
            .list_versions(name)?
            .iter()
            .filter_map(|version| parse_local_version(version))
            .filter(|(_, hash, _)| hash == workspace_hash)
            .map(|(_, _, counter)| counter)
            .max();
        Ok(max.map(|counter| counter + 1).unwrap_or(0))
    }

    /// Delete every WIP version of a package tagged with this workspace
    /// hash except `keep`. Returns what was pruned.
    pub fn prune_workspace_wips(
        &self,
        name: &PackageName,
        workspace_hash: &str,
        keep: &str,
    ) -> OpkgResult<Vec<String>> {
        let mut pruned = vec![];
        for candidate in self.list_versions(name)? {
            if candidate == keep {
                continue;
            }
            let Some((_, hash, _)) = parse_local_version(&candidate) else {
                continue;
            };
            if hash == workspace_hash {
                debug!("pruning stale WIP {name}@{candidate}");
                self.remove_version(name, &candidate)?;
                pruned.push(candidate);
            }
        }
        Ok(pruned)
    }

    /// Delete every version (stable or WIP) of a package whose WIP tag
    /// matches this workspace. Used by rename to disown the old name.
    pub fn remove_workspace_versions(
        &self,
        name: &PackageName,
        workspace_hash: &str,
    ) -> OpkgResult<Vec<String>> {
        let mut removed = vec![];
        for candidate in self.list_versions(name)? {
            let Some((_, hash, _)) = parse_local_version(&candidate) else {
                continue;
            };
            if hash == workspace_hash {
                self.remove_version(name, &candidate)?;
                removed.push(candidate);
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    fn test_registry() -> (TempDir, Registry) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
        (dir, Registry::at(root))
    }

    fn manifest(name: &str, version: &str) -> PackageManifest {
        PackageManifest::new(PackageName::parse(name).unwrap(), version)
    }

    #[test]
    fn write_then_load_round_trips() {
        let (_guard, registry) = test_registry();
        let name = PackageName::parse("tone-pkg").unwrap();
        let files = vec![
            PackageFile::text("ai/helpers/tone.md", "# tone\n"),
            PackageFile::text("commands/setup.md", "do setup\n"),
        ];
        registry
            .write_version(&name, "0.1.0", &manifest("tone-pkg", "0.1.0"), &files)
            .unwrap();

        let loaded = registry.load_package(&name, "0.1.0").unwrap();
        assert_eq!(loaded.manifest.version, "0.1.0");
        assert_eq!(loaded.files.len(), 2);
        let tone = loaded
            .files
            .iter()
            .find(|f| f.path == "ai/helpers/tone.md")
            .unwrap();
        assert_eq!(tone.content, b"# tone\n");
    }

    #[test]
    fn rewrite_replaces_wholesale() {
        let (_guard, registry) = test_registry();
        let name = PackageName::parse("pkg").unwrap();
        registry
            .write_version(
                &name,
                "0.1.0",
                &manifest("pkg", "0.1.0"),
                &[PackageFile::text("ai/old.md", "old")],
            )
            .unwrap();
        registry
            .write_version(
                &name,
                "0.1.0",
                &manifest("pkg", "0.1.0"),
                &[PackageFile::text("ai/new.md", "new")],
            )
            .unwrap();
        let loaded = registry.load_package(&name, "0.1.0").unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.files[0].path, "ai/new.md");
    }

    #[test]
    fn scoped_names_nest() {
        let (_guard, registry) = test_registry();
        let name = PackageName::parse("@acme/tools").unwrap();
        let dir = registry.version_dir(&name, "1.0.0");
        assert!(dir.as_str().ends_with("registry/packages/@acme/tools/1.0.0"));
    }

    #[test]
    fn wip_counters_and_pruning() {
        let (_guard, registry) = test_registry();
        let name = PackageName::parse("pkg").unwrap();
        let hash = "b07d58f1";
        assert_eq!(registry.next_wip_counter(&name, hash).unwrap(), 0);

        for counter in 0..2 {
            let version = crate::version::generate_local_version("0.1.0", hash, counter);
            registry
                .write_version(&name, &version, &manifest("pkg", &version), &[])
                .unwrap();
        }
        assert_eq!(registry.next_wip_counter(&name, hash).unwrap(), 2);
        // another workspace's WIP is invisible to this one
        assert_eq!(registry.next_wip_counter(&name, "deadbeef").unwrap(), 0);

        let keep = crate::version::generate_local_version("0.1.0", hash, 1);
        let pruned = registry.prune_workspace_wips(&name, hash, &keep).unwrap();
        assert_eq!(pruned, vec!["0.1.0-b07d58f1.0".to_owned()]);
        assert_eq!(registry.list_versions(&name).unwrap(), vec![keep]);
    }

    #[test]
    fn latest_prefers_stable() {
        let (_guard, registry) = test_registry();
        let name = PackageName::parse("pkg").unwrap();
        for version in ["0.9.0", "1.0.0", "1.1.0-b07d58f1.3"] {
            registry
                .write_version(&name, version, &manifest("pkg", version), &[])
                .unwrap();
        }
        assert_eq!(registry.latest_version(&name).unwrap().unwrap(), "1.0.0");
    }
}
