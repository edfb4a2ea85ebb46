//! The save pipeline: snapshot a package version into the local registry.
//!
//! Steps, in order: pre-save includes, name resolution, manifest
//! bootstrap, dependency injection, discovery, conflict arbitration, file
//! materialization (markers stripped, front matter split), the
//! replace-style registry write, root marker sync, the exact-path index
//! update, workspace linking, and WIP pruning. Failures abort without
//! partial registry exposure because the version dir is rewritten
//! wholesale.

use std::collections::BTreeMap;

use axoasset::LocalAsset;
use camino::{Utf8Path, Utf8PathBuf};
use openpackage_platforms::mapper::{map_universal_to_platform, split_platform_suffix};
use openpackage_platforms::{PlatformId, UniversalSubdir};
use openpackage_schema::{PackageManifest, PackageName, PackageSpec};
use tracing::{debug, info};

use crate::arbitrate::{self, Arbitration, Chooser};
use crate::discovery::{self, DiscoverySource, ROOT_REGISTRY_PATH};
use crate::errors::{OpkgError, OpkgResult};
use crate::index;
use crate::markers;
use crate::registry::{PackageFile, Registry};
use crate::sync;
use crate::version::{
    extract_base_version, is_local_version, select_target_version, BumpKind, VersionHints,
};
use crate::workspace::Workspace;

/// Settings for one save run
#[derive(Debug, Default)]
pub struct SaveOptions {
    /// Source directory override (defaults to the workspace root)
    pub directory: Option<Utf8PathBuf>,
    /// The literal word `stable` was passed
    pub stable: bool,
    /// A `-b/--bump` kind
    pub bump: Option<BumpKind>,
    /// Overwrite an existing stable version
    pub force: bool,
    /// Rename the package as part of the save (`newName[@version]`)
    pub rename: Option<String>,
    /// Packages to save first and depend on
    pub include: Vec<String>,
    /// Packages to save first and depend on as dev deps
    pub include_dev: Vec<String>,
    /// Don't add this package to the workspace root manifest
    pub skip_project_link: bool,
}

/// What one save run produced
#[derive(Debug)]
pub struct SaveReport {
    /// The (possibly renamed) package
    pub name: PackageName,
    /// The version written
    pub version: String,
    /// Where the snapshot landed
    pub registry_dir: Utf8PathBuf,
    /// How many files the snapshot holds (manifest excluded)
    pub file_count: usize,
    /// Stale WIP versions pruned at the end
    pub pruned_wips: Vec<String>,
}

/// Snapshot a package into the registry.
///
/// `input` is the CLI positional: `name` or `name@version`. `chooser`
/// enables the interactive arbitration escalation for stable targets.
pub fn save_package(
    registry: &Registry,
    workspace: &Workspace,
    input: &str,
    options: &SaveOptions,
    chooser: Option<&Chooser<'_>>,
) -> OpkgResult<SaveReport> {
    // pre-save includes; failures short-circuit the whole save. An
    // already-installed include re-saves from its own package dir.
    for include in options.include.iter().chain(options.include_dev.iter()) {
        let include_name = PackageSpec::parse(include)?.name;
        let include_dir = workspace.package_dir(&include_name);
        let sub_options = SaveOptions {
            skip_project_link: true,
            directory: include_dir.is_dir().then_some(include_dir),
            ..Default::default()
        };
        save_package(registry, workspace, include, &sub_options, chooser)?;
    }

    let spec = PackageSpec::parse(input)?;
    let mut name = spec.name;
    let mut explicit_version = spec.version;

    if let Some(rename) = &options.rename {
        let (new_name, rename_version) = apply_rename(registry, workspace, &name, rename)?;
        name = new_name;
        if rename_version.is_some() {
            explicit_version = rename_version;
        }
    }

    let source_dir = match &options.directory {
        Some(dir) => {
            let dir = if dir.is_relative() {
                workspace.root().join(dir)
            } else {
                dir.clone()
            };
            if !dir.is_dir() {
                return Err(OpkgError::InvalidDirectory { path: dir });
            }
            dir
        }
        None => workspace.root().to_owned(),
    };

    // a save of the workspace root package never links itself as a dep
    let root_manifest = workspace.load_root_manifest()?;
    let is_root_save = root_manifest
        .as_ref()
        .is_some_and(|manifest| manifest.name == name);

    // manifest bootstrap
    let existing_manifest = if is_root_save {
        root_manifest.clone()
    } else {
        workspace.load_package_manifest(&name)?
    };
    let mut manifest = existing_manifest
        .clone()
        .unwrap_or_else(|| PackageManifest::new(name.clone(), openpackage_schema::DEFAULT_VERSION));
    manifest.name = name.clone();

    let workspace_hash = workspace.hash();
    let counter = registry.next_wip_counter(&name, &workspace_hash)?;
    let current = existing_manifest.as_ref().map(|m| m.version.as_str());
    let target_version = select_target_version(
        &VersionHints {
            explicit: explicit_version.as_deref(),
            stable: options.stable,
            bump: options.bump,
            current,
        },
        &workspace_hash,
        counter,
    );
    if registry.version_exists(&name, &target_version)
        && !options.force
        && !is_local_version(&target_version)
    {
        return Err(OpkgError::VersionExists {
            name: name.to_string(),
            version: target_version,
        });
    }

    // dependency injection for includes
    for (include, dev) in options
        .include
        .iter()
        .map(|inc| (inc, false))
        .chain(options.include_dev.iter().map(|inc| (inc, true)))
    {
        let dep_name = PackageSpec::parse(include)?.name;
        let dep_version = match workspace.installed_version(&dep_name)? {
            Some(version) => Some(version),
            None => registry.latest_version(&dep_name)?,
        };
        let Some(dep_version) = dep_version else {
            return Err(OpkgError::PackageNotFound {
                name: dep_name.to_string(),
                chain: vec![name.to_string()],
            });
        };
        let range = format!("^{}", extract_base_version(&dep_version));
        manifest.upsert_dependency(dep_name, range, dev);
    }

    // discovery + arbitration
    let discovered = discovery::discover_files(
        workspace.root(),
        &source_dir,
        workspace.detected_platforms(),
    )?;
    let stable_target = !is_local_version(&target_version);
    let arbitration = arbitrate::arbitrate(discovered, stable_target, chooser)?;

    // materialization
    let (files, root_entries) = materialize(&name, &arbitration)?;
    if files.is_empty() {
        return Err(OpkgError::NothingToSave {
            name: name.to_string(),
        });
    }

    manifest.version = target_version.clone();

    // the replace-style registry write
    let registry_dir = registry.write_version(&name, &target_version, &manifest, &files)?;

    // chooser-elected synchronization of unmarked workspace copies
    for sync_back in &arbitration.sync_backs {
        let bytes = LocalAsset::load_bytes(&sync_back.content_source)?;
        LocalAsset::new(&sync_back.target, bytes)?.write_to_dir(
            sync_back
                .target
                .parent()
                .expect("discovered files have parent dirs"),
        )?;
        debug!("synchronized {} to the elected copy", sync_back.target);
    }

    // the canonical package dir mirrors the manifest and ai/ files
    let package_dir = workspace.package_dir(&name);
    if is_root_save {
        workspace.save_root_manifest(&manifest)?;
    } else {
        workspace.save_package_manifest(&manifest)?;
    }
    for file in &files {
        if file.path.starts_with("ai/") {
            let target = package_dir.join(&file.path);
            if let Some(parent) = target.parent() {
                LocalAsset::create_dir_all(parent)?;
            }
            LocalAsset::new(&target, file.content.clone())?
                .write_to_dir(target.parent().expect("ai files have parent dirs"))?;
        }
    }

    // root marker sync across detected platforms
    sync::propagate_root_sections(workspace, name.as_str(), &root_entries)?;

    // exact-path index
    let entries = exact_entries(workspace, &package_dir, &files);
    let prior = workspace.load_package_index(&name)?;
    let package_index =
        index::exact_index(&workspace_hash, &target_version, entries, prior.as_ref());
    workspace.save_package_index(&name, &package_index)?;

    // workspace linking
    if !options.skip_project_link
        && !is_root_save
        && !workspace.is_package_transitively_covered(&name)?
    {
        let range = format!("^{}", extract_base_version(&target_version));
        workspace.add_package_to_root(&name, &range, false)?;
    }

    // WIP cleanup
    let pruned_wips = registry.prune_workspace_wips(&name, &workspace_hash, &target_version)?;

    info!("saved {name}@{target_version}");
    Ok(SaveReport {
        name,
        version: target_version,
        registry_dir,
        file_count: files.len(),
        pruned_wips,
    })
}

/// Turn arbitration output into registry files.
///
/// Root outcomes go through the marker engine (bodies stored without
/// markers; ids minted into the workspace file when missing).
/// Platform-origin universal emissions attempt the front-matter split.
/// Duplicates collapse by path: last `.yml` wins, first `.md` wins.
fn materialize(
    name: &PackageName,
    arbitration: &Arbitration,
) -> OpkgResult<(Vec<PackageFile>, Vec<(String, String)>)> {
    let mut files: Vec<PackageFile> = vec![];
    let mut root_entries: Vec<(String, String)> = vec![];

    for outcome in &arbitration.files {
        if outcome.file.is_root_file {
            let contents = LocalAsset::load_string(&outcome.file.full_path)?;
            let Some(section) = markers::ensure_marker_id_and_extract(&contents, name.as_str())
            else {
                debug!(
                    "{} has no section for {name}, skipping",
                    outcome.file.full_path
                );
                continue;
            };
            if let Some(updated) = section.updated_content {
                LocalAsset::write_new(&updated, &outcome.file.full_path)?;
            }
            push_deduped(
                &mut files,
                PackageFile::text(outcome.registry_path.clone(), section.body.clone()),
            );
            root_entries.push((outcome.registry_path.clone(), section.body));
            continue;
        }

        let content = LocalAsset::load_bytes(&outcome.file.full_path)?;
        let platform_origin = matches!(outcome.file.source, DiscoverySource::Platform(_));
        if platform_origin && outcome.platform.is_none() {
            if let Some(split) = sync::split_platform_front_matter(&outcome.registry_path, &content)
            {
                for file in split {
                    push_deduped(&mut files, file);
                }
                continue;
            }
        }
        push_deduped(
            &mut files,
            PackageFile {
                path: outcome.registry_path.clone(),
                content,
            },
        );
    }

    Ok((files, root_entries))
}

fn push_deduped(files: &mut Vec<PackageFile>, file: PackageFile) {
    if let Some(existing) = files.iter_mut().find(|seen| seen.path == file.path) {
        // last .yml wins, first .md wins
        if file.path.ends_with(".yml") {
            existing.content = file.content;
        }
        return;
    }
    files.push(file);
}

/// Exact-path index entries: every registry file maps to the installed
/// paths that materialize it under the detected platforms. A suffixed key
/// claims its platform's target away from the universal key.
fn exact_entries(
    workspace: &Workspace,
    package_dir: &Utf8Path,
    files: &[PackageFile],
) -> BTreeMap<String, Vec<String>> {
    let detected = workspace.detected_platforms();
    let mut claimed: BTreeMap<String, Vec<PlatformId>> = BTreeMap::new();
    for file in files {
        if let Some((platform, base)) = split_platform_suffix(&file.path) {
            claimed.entry(base).or_default().push(platform);
        }
    }

    let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for file in files {
        if sync::is_override_file(&file.path) {
            continue;
        }
        if file.path.starts_with("ai/") {
            entries.insert(
                file.path.clone(),
                vec![package_dir.join(&file.path).to_string()],
            );
            continue;
        }
        if file.path == ROOT_REGISTRY_PATH
            || openpackage_platforms::known_root_files().contains(&file.path.as_str())
        {
            let targets = sync::root_targets(workspace, detected, &file.path)
                .into_iter()
                .map(|path| path.to_string())
                .collect();
            entries.insert(file.path.clone(), targets);
            continue;
        }
        if let Some((platform, base)) = split_platform_suffix(&file.path) {
            if !detected.contains(&platform) {
                continue;
            }
            if let Some((subdir, rel)) = UniversalSubdir::split_registry_path(&base) {
                if let Ok(target) = map_universal_to_platform(
                    workspace.root(),
                    platform,
                    subdir,
                    Utf8Path::new(rel),
                ) {
                    entries.insert(file.path.clone(), vec![target.abs_file.to_string()]);
                }
            }
            continue;
        }
        if let Some((subdir, rel)) = UniversalSubdir::split_registry_path(&file.path) {
            let claimed_platforms = claimed.get(&file.path);
            let mut targets = vec![];
            for &platform in detected {
                if claimed_platforms.is_some_and(|list| list.contains(&platform)) {
                    continue;
                }
                if let Ok(target) = map_universal_to_platform(
                    workspace.root(),
                    platform,
                    subdir,
                    Utf8Path::new(rel),
                ) {
                    targets.push(target.abs_file.to_string());
                }
            }
            if !targets.is_empty() {
                entries.insert(file.path.clone(), targets);
            }
        }
    }
    entries
}

/// Rename on save: move the package dir, rewrite its manifest name, and
/// disown the old name's registry versions for this workspace.
fn apply_rename(
    registry: &Registry,
    workspace: &Workspace,
    old_name: &PackageName,
    rename: &str,
) -> OpkgResult<(PackageName, Option<String>)> {
    let spec = PackageSpec::parse(rename)?;
    let new_name = spec.name;
    if &new_name == old_name {
        return Ok((new_name, spec.version));
    }

    let old_dir = workspace.package_dir(old_name);
    let new_dir = workspace.package_dir(&new_name);
    if old_dir.is_dir() {
        if let Some(parent) = new_dir.parent() {
            LocalAsset::create_dir_all(parent)?;
        }
        std::fs::rename(&old_dir, &new_dir).map_err(|details| OpkgError::Filesystem {
            path: old_dir.clone(),
            details,
        })?;
    }
    if let Some(mut manifest) = workspace.load_package_manifest(&new_name)? {
        manifest.name = new_name.clone();
        workspace.save_package_manifest(&manifest)?;
    }
    workspace.remove_package_from_root(old_name)?;

    let removed = registry.remove_workspace_versions(old_name, &workspace.hash())?;
    info!(
        "renamed {old_name} to {new_name} (disowned {} registry versions)",
        removed.len()
    );
    Ok((new_name, spec.version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    struct Fixture {
        _registry_guard: TempDir,
        _workspace_guard: TempDir,
        registry: Registry,
        workspace: Workspace,
    }

    fn fixture_with(dirs: &[&str], files: &[(&str, &str)]) -> Fixture {
        let registry_guard = TempDir::new().unwrap();
        let workspace_guard = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(workspace_guard.path().to_owned()).unwrap();
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        for (rel, contents) in files {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        Fixture {
            registry: Registry::at(
                Utf8PathBuf::from_path_buf(registry_guard.path().to_owned()).unwrap(),
            ),
            workspace: Workspace::at(root),
            _registry_guard: registry_guard,
            _workspace_guard: workspace_guard,
        }
    }

    #[test]
    fn saves_a_fresh_package_from_ai() {
        let fx = fixture_with(&[], &[("ai/helpers/tone.md", "# tone\n")]);
        let report = save_package(
            &fx.registry,
            &fx.workspace,
            "tone-pkg",
            &SaveOptions::default(),
            None,
        )
        .unwrap();

        let name = PackageName::parse("tone-pkg").unwrap();
        assert!(report.version.starts_with("0.1.0-"));
        assert!(is_local_version(&report.version));
        assert!(report.registry_dir.join("package.yml").is_file());
        assert!(report.registry_dir.join("ai/helpers/tone.md").is_file());

        // workspace side effects: package dir + index + root manifest link
        assert!(fx.workspace.package_dir(&name).join("ai/helpers/tone.md").is_file());
        let index = fx.workspace.load_package_index(&name).unwrap().unwrap();
        assert!(index.files.contains_key("ai/helpers/tone.md"));
        let root = fx.workspace.load_root_manifest().unwrap().unwrap();
        assert_eq!(root.packages[0].version, "^0.1.0");
    }

    #[test]
    fn second_save_prunes_the_first_wip() {
        let fx = fixture_with(&[], &[("ai/tone.md", "# tone\n")]);
        let first = save_package(
            &fx.registry,
            &fx.workspace,
            "pkg",
            &SaveOptions::default(),
            None,
        )
        .unwrap();
        let second = save_package(
            &fx.registry,
            &fx.workspace,
            "pkg",
            &SaveOptions::default(),
            None,
        )
        .unwrap();

        assert_ne!(first.version, second.version);
        assert_eq!(second.pruned_wips, vec![first.version]);
        let name = PackageName::parse("pkg").unwrap();
        assert_eq!(
            fx.registry.list_versions(&name).unwrap(),
            vec![second.version]
        );
    }

    #[test]
    fn existing_stable_needs_force() {
        let fx = fixture_with(&[], &[("ai/tone.md", "# tone\n")]);
        save_package(
            &fx.registry,
            &fx.workspace,
            "pkg@1.0.0",
            &SaveOptions::default(),
            None,
        )
        .unwrap();
        let err = save_package(
            &fx.registry,
            &fx.workspace,
            "pkg@1.0.0",
            &SaveOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OpkgError::VersionExists { .. }));

        save_package(
            &fx.registry,
            &fx.workspace,
            "pkg@1.0.0",
            &SaveOptions {
                force: true,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    }

    #[test]
    fn platform_files_are_canonicalized() {
        let fx = fixture_with(
            &[],
            &[(".cursor/rules/style.mdc", "cursor style\n")],
        );
        let report = save_package(
            &fx.registry,
            &fx.workspace,
            "pkg",
            &SaveOptions::default(),
            None,
        )
        .unwrap();
        assert!(report.registry_dir.join("rules/style.md").is_file());
    }

    #[test]
    fn root_file_section_is_extracted_and_id_minted() {
        let fx = fixture_with(
            &[".claude"],
            &[("CLAUDE.md", "<!-- package: pkg -->\nthe body\n<!-- -->\n")],
        );
        let report = save_package(
            &fx.registry,
            &fx.workspace,
            "pkg",
            &SaveOptions::default(),
            None,
        )
        .unwrap();

        // stored without markers
        let stored =
            std::fs::read_to_string(report.registry_dir.join(ROOT_REGISTRY_PATH)).unwrap();
        assert_eq!(stored, "the body");
        // the workspace file gained an id
        let updated = std::fs::read_to_string(fx.workspace.root().join("CLAUDE.md")).unwrap();
        let section = markers::extract_package_section(&updated, "pkg").unwrap();
        assert!(section.id.is_some());
    }

    #[test]
    fn front_matter_splits_on_save() {
        let fx = fixture_with(
            &[],
            &[(
                ".claude/commands/setup.md",
                "---\nplatforms:\n  cursor:\n    globs: \"*.ts\"\n---\nsetup body\n",
            )],
        );
        let report = save_package(
            &fx.registry,
            &fx.workspace,
            "pkg",
            &SaveOptions::default(),
            None,
        )
        .unwrap();
        let universal =
            std::fs::read_to_string(report.registry_dir.join("commands/setup.md")).unwrap();
        assert_eq!(universal, "setup body\n");
        assert!(report
            .registry_dir
            .join("commands/setup.cursor.yml")
            .is_file());
    }

    #[test]
    fn empty_workspace_has_nothing_to_save() {
        let fx = fixture_with(&[], &[]);
        let err = save_package(
            &fx.registry,
            &fx.workspace,
            "pkg",
            &SaveOptions::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OpkgError::NothingToSave { .. }));
    }

    #[test]
    fn include_injects_a_caret_dep() {
        let fx = fixture_with(
            &[],
            &[
                ("ai/app.md", "app\n"),
                ("helpers/ai/util.md", "util\n"),
            ],
        );
        // save util-pkg from its own dir first, then include it
        save_package(
            &fx.registry,
            &fx.workspace,
            "util-pkg",
            &SaveOptions {
                directory: Some(Utf8PathBuf::from("helpers")),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let report = save_package(
            &fx.registry,
            &fx.workspace,
            "app-pkg",
            &SaveOptions {
                include: vec!["util-pkg".to_owned()],
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let manifest = fx
            .registry
            .load_manifest(&report.name, &report.version)
            .unwrap();
        assert_eq!(manifest.packages.len(), 1);
        assert_eq!(manifest.packages[0].version, "^0.1.0");
    }

    #[test]
    fn rename_moves_the_package() {
        let fx = fixture_with(&[], &[("ai/tone.md", "# tone\n")]);
        save_package(
            &fx.registry,
            &fx.workspace,
            "old-name",
            &SaveOptions::default(),
            None,
        )
        .unwrap();

        let report = save_package(
            &fx.registry,
            &fx.workspace,
            "old-name",
            &SaveOptions {
                rename: Some("new-name".to_owned()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(report.name.as_str(), "new-name");

        let old = PackageName::parse("old-name").unwrap();
        let new = PackageName::parse("new-name").unwrap();
        assert!(fx.registry.list_versions(&old).unwrap().is_empty());
        assert!(!fx.registry.list_versions(&new).unwrap().is_empty());
        assert!(!fx.workspace.package_dir(&old).exists());
        assert!(fx.workspace.package_dir(&new).is_dir());
        let root = fx.workspace.load_root_manifest().unwrap().unwrap();
        assert_eq!(root.packages.len(), 1);
        assert_eq!(root.packages[0].name, new);
    }
}
