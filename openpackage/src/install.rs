//! The index-driven installer: materialize resolved packages across every
//! detected platform, byte-idempotently.
//!
//! For each package: `ai/` files land verbatim under
//! `.openpackage/packages/<name>/ai/`, universal subdir files fan out to
//! every detected platform that supports the subdir, platform-suffixed
//! files go only to their platform, and root-file section bodies are
//! re-wrapped in markers and merged into the matching root files. The
//! per-workspace `package.index.yml` is rewritten in directory-collapsing
//! mode afterwards.

use std::collections::{BTreeMap, BTreeSet};

use axoasset::LocalAsset;
use camino::{Utf8Path, Utf8PathBuf};
use openpackage_platforms::mapper::{
    map_universal_to_platform, split_platform_suffix, UNIVERSAL_EXT,
};
use openpackage_platforms::{known_root_files, PlatformId, UniversalSubdir};
use openpackage_schema::PackageName;
use tracing::{debug, info};

use crate::errors::{OpkgError, OpkgResult};
use crate::index;
use crate::markers;
use crate::prompt;
use crate::registry::{PackageContents, PackageFile};
use crate::resolve::{ConflictResolution, Resolution};
use crate::sync;
use crate::workspace::Workspace;

/// What to do when a target file exists with different contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// Replace the workspace copy
    Overwrite,
    /// Leave the workspace copy alone
    Keep,
    /// Prompt per file (keep / overwrite / cancel)
    #[default]
    Ask,
}

/// Settings for one install run
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Per-file conflict policy
    pub conflict_strategy: ConflictStrategy,
    /// Plan only; write nothing
    pub dry_run: bool,
}

/// What one install run did
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Packages materialized, with their versions
    pub installed: Vec<(PackageName, String)>,
    /// Packages left alone because the workspace already satisfied them
    pub kept: Vec<(PackageName, String)>,
    /// Files written (or, on a dry run, that would be)
    pub written: Vec<Utf8PathBuf>,
    /// Files skipped under the keep policy
    pub skipped: Vec<Utf8PathBuf>,
}

/// One planned write
struct PlannedWrite {
    /// registry-side key this write belongs to in the index
    index_key: String,
    target: Utf8PathBuf,
    content: Vec<u8>,
    /// root-file writes merge sections instead of replacing bytes
    root_file_package: Option<String>,
}

/// Materialize every resolved package into the workspace
pub fn install_packages(
    workspace: &Workspace,
    resolution: &Resolution,
    options: &InstallOptions,
) -> OpkgResult<InstallReport> {
    let mut report = InstallReport::default();
    for package in &resolution.packages {
        let Some(contents) = &package.contents else {
            report
                .kept
                .push((package.name.clone(), package.version.clone()));
            continue;
        };
        if package.conflict_resolution == Some(ConflictResolution::Skipped) {
            continue;
        }
        install_one(workspace, &package.name, contents, options, &mut report)?;
        report
            .installed
            .push((package.name.clone(), package.version.clone()));
    }
    Ok(report)
}

fn install_one(
    workspace: &Workspace,
    name: &PackageName,
    contents: &PackageContents,
    options: &InstallOptions,
    report: &mut InstallReport,
) -> OpkgResult<()> {
    let detected = workspace.detected_platforms().to_vec();
    let package_dir = workspace.package_dir(name);
    let root_files = known_root_files();

    // platforms claimed by a suffixed variant don't also receive the
    // universal copy
    let mut claimed: BTreeMap<String, BTreeSet<PlatformId>> = BTreeMap::new();
    for file in &contents.files {
        if let Some((platform, base)) = split_platform_suffix(&file.path) {
            claimed.entry(base).or_default().insert(platform);
        }
    }

    let mut writes: Vec<PlannedWrite> = vec![];
    for file in &contents.files {
        plan_file(
            workspace,
            name,
            contents,
            file,
            &detected,
            &package_dir,
            &root_files,
            &claimed,
            &mut writes,
        )?;
    }

    let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for write in &writes {
        entries
            .entry(write.index_key.clone())
            .or_default()
            .push(write.target.to_string());
    }

    for write in writes {
        apply_write(write, options, report)?;
    }

    if options.dry_run {
        return Ok(());
    }

    // the canonical package dir gets the manifest (and the index below)
    LocalAsset::create_dir_all(&package_dir)?;
    LocalAsset::write_new(
        &contents.manifest.to_yaml()?,
        package_dir.join(openpackage_schema::MANIFEST_FILE_NAME),
    )?;

    let prior = workspace.load_package_index(name)?;
    let mut package_index = index::exact_index(
        &workspace.hash(),
        &contents.manifest.version,
        entries,
        prior.as_ref(),
    );
    index::collapse_directories(&mut package_index, package_dir.as_str());
    workspace.save_package_index(name, &package_index)?;
    info!("installed {name}@{}", contents.manifest.version);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn plan_file(
    workspace: &Workspace,
    name: &PackageName,
    contents: &PackageContents,
    file: &PackageFile,
    detected: &[PlatformId],
    package_dir: &Utf8Path,
    root_files: &[&str],
    claimed: &BTreeMap<String, BTreeSet<PlatformId>>,
    writes: &mut Vec<PlannedWrite>,
) -> OpkgResult<()> {
    // ai/ files keep themselves, under the canonical package dir
    if file.path.starts_with("ai/") {
        writes.push(PlannedWrite {
            index_key: file.path.clone(),
            target: package_dir.join(&file.path),
            content: file.content.clone(),
            root_file_package: None,
        });
        return Ok(());
    }

    // per-platform override files ride along with their universal .md and
    // are consumed when attaching front matter, not installed on their own
    if sync::is_override_file(&file.path) {
        return Ok(());
    }

    // root-file section bodies (universal or platform-native)
    if root_files.contains(&file.path.as_str()) {
        let body = String::from_utf8_lossy(&file.content).into_owned();
        for target in sync::root_targets(workspace, detected, &file.path) {
            writes.push(PlannedWrite {
                index_key: file.path.clone(),
                target,
                content: body.clone().into_bytes(),
                root_file_package: Some(name.to_string()),
            });
        }
        return Ok(());
    }

    // platform-suffixed files go only to their platform
    if let Some((platform, base)) = split_platform_suffix(&file.path) {
        if !detected.contains(&platform) {
            return Ok(());
        }
        let Some((subdir, rel)) = UniversalSubdir::split_registry_path(&base) else {
            return Ok(());
        };
        if let Ok(target) =
            map_universal_to_platform(workspace.root(), platform, subdir, Utf8Path::new(rel))
        {
            writes.push(PlannedWrite {
                index_key: file.path.clone(),
                target: target.abs_file,
                content: sync::content_for_platform(contents, &base, platform, &file.content),
                root_file_package: None,
            });
        }
        return Ok(());
    }

    // universal subdir files fan out to every supporting detected platform
    let Some((subdir, rel)) = UniversalSubdir::split_registry_path(&file.path) else {
        debug!("{} has no installable mapping, skipping", file.path);
        return Ok(());
    };
    let claimed_platforms = claimed.get(&file.path);
    for &platform in detected {
        if claimed_platforms.is_some_and(|set| set.contains(&platform)) {
            continue;
        }
        let Ok(target) =
            map_universal_to_platform(workspace.root(), platform, subdir, Utf8Path::new(rel))
        else {
            continue;
        };
        writes.push(PlannedWrite {
            index_key: file.path.clone(),
            target: target.abs_file,
            content: sync::content_for_platform(contents, &file.path, platform, &file.content),
            root_file_package: None,
        });
    }
    Ok(())
}

fn apply_write(
    write: PlannedWrite,
    options: &InstallOptions,
    report: &mut InstallReport,
) -> OpkgResult<()> {
    let desired: Vec<u8> = match &write.root_file_package {
        Some(package) => {
            let existing = if write.target.is_file() {
                LocalAsset::load_string(&write.target)?
            } else {
                String::new()
            };
            let body = String::from_utf8_lossy(&write.content).into_owned();
            let existing_id = markers::extract_package_section(&existing, package)
                .and_then(|section| section.id);
            markers::upsert_package_section(&existing, package, &body, existing_id.as_deref())
                .into_bytes()
        }
        None => write.content,
    };

    let existing = if write.target.is_file() {
        Some(LocalAsset::load_bytes(&write.target)?)
    } else {
        None
    };

    if existing.as_deref() == Some(desired.as_slice()) {
        return Ok(());
    }

    // a plain write into fresh space isn't a conflict; an existing
    // divergent non-root file consults the policy
    if existing.is_some() && write.root_file_package.is_none() {
        match options.conflict_strategy {
            ConflictStrategy::Overwrite => {}
            ConflictStrategy::Keep => {
                report.skipped.push(write.target);
                return Ok(());
            }
            ConflictStrategy::Ask => {
                if prompt::interactive() {
                    let choices = vec![
                        "overwrite".to_owned(),
                        "keep the workspace copy".to_owned(),
                        "cancel".to_owned(),
                    ];
                    match prompt::select(
                        &format!("{} differs from the package copy", write.target),
                        &choices,
                    )? {
                        Some(0) => {}
                        Some(1) => {
                            report.skipped.push(write.target);
                            return Ok(());
                        }
                        _ => return Err(OpkgError::UserCancellation),
                    }
                }
                // unattended asks default to overwrite
            }
        }
    }

    report.written.push(write.target.clone());
    if options.dry_run {
        return Ok(());
    }
    if let Some(parent) = write.target.parent() {
        LocalAsset::create_dir_all(parent)?;
    }
    LocalAsset::new(&write.target, desired)?.write_to_dir(
        write
            .target
            .parent()
            .expect("install targets always have a parent dir"),
    )?;
    Ok(())
}

/// The extension universal files carry; re-exported for convenience in
/// tests and the CLI.
pub const UNIVERSAL_EXTENSION: &str = UNIVERSAL_EXT;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PackageFile;
    use openpackage_schema::PackageManifest;
    use temp_dir::TempDir;

    fn workspace_with(dirs: &[&str]) -> (TempDir, Workspace) {
        let guard = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(guard.path().to_owned()).unwrap();
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        (guard, Workspace::at(root))
    }

    fn contents(name: &str, version: &str, files: Vec<PackageFile>) -> PackageContents {
        PackageContents {
            manifest: PackageManifest::new(PackageName::parse(name).unwrap(), version),
            files,
        }
    }

    fn resolution_of(contents: PackageContents) -> Resolution {
        Resolution {
            packages: vec![crate::resolve::ResolvedPackage {
                name: contents.manifest.name.clone(),
                version: contents.manifest.version.clone(),
                is_root: true,
                required_range: None,
                conflict_resolution: None,
                contents: Some(contents),
            }],
            missing: vec![],
        }
    }

    #[test]
    fn fans_out_to_detected_platforms() {
        let (_guard, ws) = workspace_with(&[".cursor", ".claude"]);
        let pkg = contents(
            "pkg",
            "1.0.0",
            vec![
                PackageFile::text("commands/setup.md", "do setup\n"),
                PackageFile::text("ai/notes.md", "notes\n"),
            ],
        );
        let report = install_packages(
            &ws,
            &resolution_of(pkg),
            &InstallOptions {
                conflict_strategy: ConflictStrategy::Overwrite,
                dry_run: false,
            },
        )
        .unwrap();

        // cursor + claude commands, plus the canonical ai copy
        assert_eq!(report.written.len(), 3);
        assert!(ws.root().join(".cursor/commands/setup.md").is_file());
        assert!(ws.root().join(".claude/commands/setup.md").is_file());
        let name = PackageName::parse("pkg").unwrap();
        assert!(ws.package_dir(&name).join("ai/notes.md").is_file());

        let index = ws.load_package_index(&name).unwrap().unwrap();
        // ai/ collapsed into a dir key
        assert!(index.files.contains_key("ai/"));
        assert_eq!(index.files["commands/setup.md"].len(), 2);
    }

    #[test]
    fn reinstall_is_a_byte_level_noop() {
        let (_guard, ws) = workspace_with(&[".claude"]);
        let make = || {
            resolution_of(contents(
                "pkg",
                "1.0.0",
                vec![PackageFile::text("commands/setup.md", "v1\n")],
            ))
        };
        let options = InstallOptions {
            conflict_strategy: ConflictStrategy::Ask,
            dry_run: false,
        };
        install_packages(&ws, &make(), &options).unwrap();
        let report = install_packages(&ws, &make(), &options).unwrap();
        // second run writes nothing (and never consults the Ask policy)
        assert!(report.written.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn keep_policy_preserves_workspace_edits() {
        let (_guard, ws) = workspace_with(&[".claude"]);
        let options = InstallOptions {
            conflict_strategy: ConflictStrategy::Keep,
            dry_run: false,
        };
        install_packages(
            &ws,
            &resolution_of(contents(
                "pkg",
                "1.0.0",
                vec![PackageFile::text("commands/setup.md", "original\n")],
            )),
            &options,
        )
        .unwrap();
        std::fs::write(ws.root().join(".claude/commands/setup.md"), "edited\n").unwrap();

        let report = install_packages(
            &ws,
            &resolution_of(contents(
                "pkg",
                "1.0.1",
                vec![PackageFile::text("commands/setup.md", "original\n")],
            )),
            &options,
        )
        .unwrap();
        assert_eq!(report.skipped.len(), 1);
        let kept = std::fs::read_to_string(ws.root().join(".claude/commands/setup.md")).unwrap();
        assert_eq!(kept, "edited\n");
    }

    #[test]
    fn suffixed_files_claim_their_platform() {
        let (_guard, ws) = workspace_with(&[".claude", ".cursor"]);
        let pkg = contents(
            "pkg",
            "1.0.0",
            vec![
                PackageFile::text("commands/setup.md", "universal\n"),
                PackageFile::text("commands/setup.claude.md", "claude flavor\n"),
            ],
        );
        install_packages(
            &ws,
            &resolution_of(pkg),
            &InstallOptions {
                conflict_strategy: ConflictStrategy::Overwrite,
                dry_run: false,
            },
        )
        .unwrap();

        let claude =
            std::fs::read_to_string(ws.root().join(".claude/commands/setup.md")).unwrap();
        assert_eq!(claude, "claude flavor\n");
        let cursor =
            std::fs::read_to_string(ws.root().join(".cursor/commands/setup.md")).unwrap();
        assert_eq!(cursor, "universal\n");

        // the universal key doesn't claim claude's target
        let index = ws
            .load_package_index(&PackageName::parse("pkg").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(index.files["commands/setup.md"].len(), 1);
        assert!(index.files["commands/setup.md"][0].contains(".cursor"));
        assert!(index.files["commands/setup.claude.md"][0].contains(".claude"));
    }

    #[test]
    fn root_bodies_merge_into_root_files() {
        let (_guard, ws) = workspace_with(&[".claude"]);
        std::fs::write(
            ws.root().join("CLAUDE.md"),
            "# mine\n\n<!-- package: other id:keep-this -->\nother body\n<!-- -->\n",
        )
        .unwrap();
        let pkg = contents(
            "pkg",
            "1.0.0",
            vec![PackageFile::text("AGENTS.md", "pkg section body")],
        );
        install_packages(
            &ws,
            &resolution_of(pkg),
            &InstallOptions {
                conflict_strategy: ConflictStrategy::Overwrite,
                dry_run: false,
            },
        )
        .unwrap();

        let claude = std::fs::read_to_string(ws.root().join("CLAUDE.md")).unwrap();
        let section = markers::extract_package_section(&claude, "pkg").unwrap();
        assert_eq!(section.body, "pkg section body");
        // the other package's section is untouched
        let other = markers::extract_package_section(&claude, "other").unwrap();
        assert_eq!(other.id.as_deref(), Some("keep-this"));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (_guard, ws) = workspace_with(&[".claude"]);
        let report = install_packages(
            &ws,
            &resolution_of(contents(
                "pkg",
                "1.0.0",
                vec![PackageFile::text("commands/setup.md", "x\n")],
            )),
            &InstallOptions {
                conflict_strategy: ConflictStrategy::Overwrite,
                dry_run: true,
            },
        )
        .unwrap();
        assert_eq!(report.written.len(), 1);
        assert!(!ws.root().join(".claude/commands/setup.md").exists());
        assert!(ws
            .load_package_index(&PackageName::parse("pkg").unwrap())
            .unwrap()
            .is_none());
    }
}
