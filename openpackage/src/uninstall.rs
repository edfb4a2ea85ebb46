//! Uninstall: reverse-map a package's installed files through its
//! `package.index.yml`, remove them, and optionally garbage-collect
//! dependencies left dangling.

use std::collections::BTreeMap;

use axoasset::LocalAsset;
use camino::{Utf8Path, Utf8PathBuf};
use openpackage_platforms::known_root_files;
use openpackage_schema::{PackageIndex, PackageManifest, PackageName};
use tracing::{debug, info};

use crate::errors::OpkgResult;
use crate::markers;
use crate::workspace::Workspace;

/// Settings for one uninstall run
#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallOptions {
    /// Also remove dependencies left dangling by this removal
    pub recursive: bool,
    /// Keep the canonical `.openpackage/packages/<name>/` data dir
    pub keep_data: bool,
    /// Plan only; remove nothing
    pub dry_run: bool,
}

/// What one uninstall run did (or would do, on a dry run)
#[derive(Debug, Default)]
pub struct UninstallReport {
    /// Packages removed, target first
    pub removed_packages: Vec<PackageName>,
    /// Workspace paths removed
    pub removed_paths: Vec<Utf8PathBuf>,
    /// Dangling dependencies found (removed only under `recursive`)
    pub dangling: Vec<PackageName>,
}

/// Remove one package (and, with `recursive`, its dangling deps) from the
/// workspace.
pub fn uninstall_package(
    workspace: &Workspace,
    name: &PackageName,
    options: &UninstallOptions,
) -> OpkgResult<UninstallReport> {
    let mut report = UninstallReport::default();
    let dangling = dangling_dependencies(workspace, name)?;
    report.dangling = dangling.clone();

    remove_one(workspace, name, options, &mut report)?;
    if options.recursive {
        for dep in dangling {
            remove_one(workspace, &dep, options, &mut report)?;
        }
    }
    Ok(report)
}

fn remove_one(
    workspace: &Workspace,
    name: &PackageName,
    options: &UninstallOptions,
    report: &mut UninstallReport,
) -> OpkgResult<()> {
    let root_files = known_root_files();
    if let Some(index) = workspace.load_package_index(name)? {
        for (key, targets) in &index.files {
            let is_root_key = root_files.contains(&key.as_str());
            for target in targets {
                let target = Utf8PathBuf::from(target);
                if is_root_key {
                    remove_root_section(&target, name, options.dry_run, report)?;
                } else if PackageIndex::is_dir_key(key) {
                    if target.is_dir() {
                        report.removed_paths.push(target.clone());
                        if !options.dry_run {
                            LocalAsset::remove_dir_all(&target)?;
                        }
                    }
                } else if target.is_file() {
                    report.removed_paths.push(target.clone());
                    if !options.dry_run {
                        LocalAsset::remove_file(&target)?;
                    }
                }
            }
        }
    }

    if !options.keep_data {
        let package_dir = workspace.package_dir(name);
        if package_dir.is_dir() {
            report.removed_paths.push(package_dir.clone());
            if !options.dry_run {
                LocalAsset::remove_dir_all(&package_dir)?;
            }
        }
    }
    if !options.dry_run {
        workspace.remove_package_from_root(name)?;
    }
    info!("uninstalled {name}");
    report.removed_packages.push(name.clone());
    Ok(())
}

fn remove_root_section(
    target: &Utf8Path,
    name: &PackageName,
    dry_run: bool,
    report: &mut UninstallReport,
) -> OpkgResult<()> {
    if !target.is_file() {
        return Ok(());
    }
    let existing = LocalAsset::load_string(target)?;
    let Some(updated) = markers::remove_package_section(&existing, name.as_str()) else {
        return Ok(());
    };
    report.removed_paths.push(target.to_owned());
    if dry_run {
        return Ok(());
    }
    if markers::is_effectively_empty(&updated) {
        debug!("{target} is empty after removing {name}, deleting it");
        LocalAsset::remove_file(target)?;
    } else {
        LocalAsset::write_new(&updated, target)?;
    }
    Ok(())
}

/// Dependencies of `target` that nothing else needs once it's gone.
///
/// A dependency dangles iff every installed package depending on it lies
/// inside the subtree being removed, and the root manifest doesn't protect
/// it with its own entry.
pub fn dangling_dependencies(
    workspace: &Workspace,
    target: &PackageName,
) -> OpkgResult<Vec<PackageName>> {
    let mut manifests: BTreeMap<PackageName, PackageManifest> = BTreeMap::new();
    for name in workspace.installed_packages()? {
        if let Some(manifest) = workspace.load_package_manifest(&name)? {
            manifests.insert(name, manifest);
        }
    }
    let protected: Vec<PackageName> = workspace
        .load_root_manifest()?
        .map(|root| {
            root.packages
                .iter()
                .chain(root.dev_packages.iter())
                .map(|dep| dep.name.clone())
                .collect()
        })
        .unwrap_or_default();

    let mut removal: Vec<PackageName> = vec![target.clone()];
    // grow the removal set to a fixpoint
    loop {
        let mut grew = false;
        let candidates: Vec<PackageName> = removal
            .iter()
            .filter_map(|name| manifests.get(name))
            .flat_map(|manifest| manifest.packages.iter().map(|dep| dep.name.clone()))
            .collect();
        for candidate in candidates {
            if removal.contains(&candidate) || protected.contains(&candidate) {
                continue;
            }
            let externally_needed = manifests.iter().any(|(name, manifest)| {
                !removal.contains(name)
                    && manifest.packages.iter().any(|dep| dep.name == candidate)
            });
            if !externally_needed {
                removal.push(candidate);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    Ok(removal.into_iter().skip(1).collect())
}
