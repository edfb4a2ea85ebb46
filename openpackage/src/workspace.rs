//! The per-workspace `.openpackage/` tree: the root manifest, installed
//! package dirs, and their indexes.

use axoasset::LocalAsset;
use camino::{Utf8Path, Utf8PathBuf};
use openpackage_platforms::{detect_platforms, PlatformId};
use openpackage_schema::{
    PackageIndex, PackageManifest, PackageName, INDEX_FILE_NAME, MANIFEST_FILE_NAME,
};
use tracing::debug;

use crate::errors::{OpkgError, OpkgResult};
use crate::version::workspace_hash;

/// The name of the workspace metadata dir
pub const DOT_DIR: &str = ".openpackage";

/// Handle to one workspace (the user's cwd, captured once per command)
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
    detected: Vec<PlatformId>,
}

impl Workspace {
    /// Open the workspace rooted at the current working directory
    pub fn current() -> OpkgResult<Self> {
        Ok(Self::at(LocalAsset::current_dir()?))
    }

    /// Open a workspace rooted somewhere specific
    pub fn at(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        let detected = detect_platforms(&root);
        Workspace { root, detected }
    }

    /// The workspace root dir
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The platforms detected in this workspace
    pub fn detected_platforms(&self) -> &[PlatformId] {
        &self.detected
    }

    /// Re-run platform detection (after installs create new root dirs)
    pub fn refresh_platforms(&mut self) {
        self.detected = detect_platforms(&self.root);
    }

    /// The deterministic hash tagging this workspace's WIP versions
    pub fn hash(&self) -> String {
        workspace_hash(self.root.as_str())
    }

    /// `.openpackage/` under the root
    pub fn dot_dir(&self) -> Utf8PathBuf {
        self.root.join(DOT_DIR)
    }

    /// The workspace-root manifest path
    pub fn root_manifest_path(&self) -> Utf8PathBuf {
        self.dot_dir().join(MANIFEST_FILE_NAME)
    }

    /// `.openpackage/packages/`
    pub fn packages_dir(&self) -> Utf8PathBuf {
        self.dot_dir().join("packages")
    }

    /// One installed package's dir
    pub fn package_dir(&self, name: &PackageName) -> Utf8PathBuf {
        let mut dir = self.packages_dir();
        for component in name.path_components() {
            dir.push(component);
        }
        dir
    }

    /// One installed package's manifest path
    pub fn package_manifest_path(&self, name: &PackageName) -> Utf8PathBuf {
        self.package_dir(name).join(MANIFEST_FILE_NAME)
    }

    /// One installed package's index path
    pub fn package_index_path(&self, name: &PackageName) -> Utf8PathBuf {
        self.package_dir(name).join(INDEX_FILE_NAME)
    }

    /// Load the root manifest if the workspace has one
    pub fn load_root_manifest(&self) -> OpkgResult<Option<PackageManifest>> {
        load_manifest_at(&self.root_manifest_path())
    }

    /// Load the root manifest, bootstrapping a default one if missing
    pub fn ensure_root_manifest(&self) -> OpkgResult<PackageManifest> {
        if let Some(manifest) = self.load_root_manifest()? {
            return Ok(manifest);
        }
        let name = PackageName::parse(&normalize_dir_name(
            self.root.file_name().unwrap_or("workspace"),
        ))?;
        let manifest = PackageManifest::new(name, openpackage_schema::DEFAULT_VERSION);
        self.save_root_manifest(&manifest)?;
        Ok(manifest)
    }

    /// Persist the root manifest
    pub fn save_root_manifest(&self, manifest: &PackageManifest) -> OpkgResult<()> {
        LocalAsset::create_dir_all(self.dot_dir())?;
        LocalAsset::write_new(&manifest.to_yaml()?, self.root_manifest_path())?;
        Ok(())
    }

    /// Load one installed package's manifest
    pub fn load_package_manifest(
        &self,
        name: &PackageName,
    ) -> OpkgResult<Option<PackageManifest>> {
        load_manifest_at(&self.package_manifest_path(name))
    }

    /// Persist one installed package's manifest
    pub fn save_package_manifest(&self, manifest: &PackageManifest) -> OpkgResult<()> {
        let dir = self.package_dir(&manifest.name);
        LocalAsset::create_dir_all(&dir)?;
        LocalAsset::write_new(&manifest.to_yaml()?, dir.join(MANIFEST_FILE_NAME))?;
        Ok(())
    }

    /// Load one installed package's index
    pub fn load_package_index(&self, name: &PackageName) -> OpkgResult<Option<PackageIndex>> {
        let path = self.package_index_path(name);
        if !path.is_file() {
            return Ok(None);
        }
        let contents = LocalAsset::load_string(&path)?;
        Ok(Some(PackageIndex::from_yaml(path.as_str(), &contents)?))
    }

    /// Persist one installed package's index
    pub fn save_package_index(&self, name: &PackageName, index: &PackageIndex) -> OpkgResult<()> {
        let dir = self.package_dir(name);
        LocalAsset::create_dir_all(&dir)?;
        LocalAsset::write_new(&index.to_yaml()?, dir.join(INDEX_FILE_NAME))?;
        Ok(())
    }

    /// Add (or update) a dependency row in the root manifest
    pub fn add_package_to_root(
        &self,
        name: &PackageName,
        range: &str,
        dev: bool,
    ) -> OpkgResult<()> {
        let mut manifest = self.ensure_root_manifest()?;
        manifest.upsert_dependency(name.clone(), range.to_owned(), dev);
        self.save_root_manifest(&manifest)
    }

    /// Remove a dependency row from the root manifest
    pub fn remove_package_from_root(&self, name: &PackageName) -> OpkgResult<bool> {
        let Some(mut manifest) = self.load_root_manifest()? else {
            return Ok(false);
        };
        let removed = manifest.remove_dependency(name);
        if removed {
            self.save_root_manifest(&manifest)?;
        }
        Ok(removed)
    }

    /// Every package installed under `.openpackage/packages/`
    pub fn installed_packages(&self) -> OpkgResult<Vec<PackageName>> {
        let dir = self.packages_dir();
        if !dir.is_dir() {
            return Ok(vec![]);
        }
        let mut names = vec![];
        for entry in read_dir(&dir)? {
            let file_name = entry;
            if let Some(scope) = file_name.strip_prefix('@') {
                // scoped packages nest one level deeper
                let scope_dir = dir.join(format!("@{scope}"));
                for inner in read_dir(&scope_dir)? {
                    if let Ok(name) = PackageName::parse(&format!("@{scope}/{inner}")) {
                        names.push(name);
                    }
                }
            } else if let Ok(name) = PackageName::parse(&file_name) {
                if self.package_manifest_path(&name).is_file() {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// The version of a package this workspace already has, if any.
    ///
    /// Prefers the installed manifest; falls back to the index stamp.
    pub fn installed_version(&self, name: &PackageName) -> OpkgResult<Option<String>> {
        if let Some(manifest) = self.load_package_manifest(name)? {
            return Ok(Some(manifest.version));
        }
        Ok(self
            .load_package_index(name)?
            .map(|index| index.workspace.version))
    }

    /// Whether some other top-level dependency already pulls `name` in
    /// transitively, so the root manifest doesn't need its own row for it.
    pub fn is_package_transitively_covered(&self, name: &PackageName) -> OpkgResult<bool> {
        let Some(root) = self.load_root_manifest()? else {
            return Ok(false);
        };
        let mut queue: Vec<PackageName> = root
            .packages
            .iter()
            .chain(root.dev_packages.iter())
            .map(|dep| dep.name.clone())
            .filter(|dep| dep != name)
            .collect();
        let mut seen = vec![];
        while let Some(current) = queue.pop() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current.clone());
            let Some(manifest) = self.load_package_manifest(&current)? else {
                continue;
            };
            for dep in &manifest.packages {
                if &dep.name == name {
                    debug!("{name} is transitively covered via {current}");
                    return Ok(true);
                }
                queue.push(dep.name.clone());
            }
        }
        Ok(false)
    }
}

fn load_manifest_at(path: &Utf8Path) -> OpkgResult<Option<PackageManifest>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = LocalAsset::load_string(path)?;
    Ok(Some(PackageManifest::from_yaml(path.as_str(), &contents)?))
}

fn read_dir(dir: &Utf8Path) -> OpkgResult<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|details| OpkgError::Filesystem {
        path: dir.to_owned(),
        details,
    })?;
    let mut names = vec![];
    for entry in entries {
        let entry = entry.map_err(|details| OpkgError::Filesystem {
            path: dir.to_owned(),
            details,
        })?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Turn a directory name into something that passes name validation
pub fn normalize_dir_name(dir_name: &str) -> String {
    let mut out: String = dir_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    while out.starts_with('-') {
        out.remove(0);
    }
    if out.is_empty() {
        out.push_str("workspace");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    fn fixture() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
        (dir, Workspace::at(root))
    }

    #[test]
    fn bootstraps_a_root_manifest() {
        let (_guard, ws) = fixture();
        assert!(ws.load_root_manifest().unwrap().is_none());
        let manifest = ws.ensure_root_manifest().unwrap();
        assert_eq!(manifest.version, "0.1.0");
        assert!(ws.root_manifest_path().is_file());
        // second call loads the same thing
        assert_eq!(ws.ensure_root_manifest().unwrap(), manifest);
    }

    #[test]
    fn add_and_remove_root_deps() {
        let (_guard, ws) = fixture();
        let name = PackageName::parse("tone-pkg").unwrap();
        ws.add_package_to_root(&name, "^0.1.0", false).unwrap();
        let manifest = ws.load_root_manifest().unwrap().unwrap();
        assert_eq!(manifest.packages.len(), 1);
        assert_eq!(manifest.packages[0].version, "^0.1.0");

        assert!(ws.remove_package_from_root(&name).unwrap());
        assert!(ws.load_root_manifest().unwrap().unwrap().packages.is_empty());
    }

    #[test]
    fn transitive_cover() {
        let (_guard, ws) = fixture();
        let a = PackageName::parse("pkg-a").unwrap();
        let b = PackageName::parse("pkg-b").unwrap();

        ws.add_package_to_root(&a, "^1.0.0", false).unwrap();
        let mut a_manifest = PackageManifest::new(a.clone(), "1.0.0");
        a_manifest.upsert_dependency(b.clone(), "^1.0.0".to_owned(), false);
        ws.save_package_manifest(&a_manifest).unwrap();

        assert!(ws.is_package_transitively_covered(&b).unwrap());
        assert!(!ws.is_package_transitively_covered(&a).unwrap());
    }

    #[test]
    fn lists_installed_packages_including_scoped() {
        let (_guard, ws) = fixture();
        for name in ["plain", "@acme/scoped"] {
            let name = PackageName::parse(name).unwrap();
            ws.save_package_manifest(&PackageManifest::new(name, "0.1.0"))
                .unwrap();
        }
        let names = ws.installed_packages().unwrap();
        let rendered: Vec<_> = names.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["@acme/scoped", "plain"]);
    }

    #[test]
    fn dir_name_normalization() {
        assert_eq!(normalize_dir_name("My Project!"), "my-project-");
        assert_eq!(normalize_dir_name("--weird"), "weird");
        assert_eq!(normalize_dir_name("***"), "workspace");
    }
}
