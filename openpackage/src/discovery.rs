//! Discovery: walk a save source and emit records for every file that
//! could end up in a package snapshot.
//!
//! Three kinds of source feed one save:
//!
//! * the universal layout (`ai/` plus `rules/`, `commands/`, `agents/`,
//!   `skills/`) under the source dir,
//! * every detected platform's native subdirs, inverse-mapped back to
//!   universal registry paths,
//! * detected platform root files at the workspace root.
//!
//! Discovery never mutates source files.

use std::time::SystemTime;

use axoasset::LocalAsset;
use camino::{Utf8Path, Utf8PathBuf};
use openpackage_platforms::mapper::{map_platform_file_to_universal, split_platform_suffix};
use openpackage_platforms::{PlatformDefinition, PlatformId, UniversalSubdir, ALL_SUBDIRS};
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{OpkgError, OpkgResult};

/// The canonical registry path shared by every platform root file
pub const ROOT_REGISTRY_PATH: &str = "AGENTS.md";

/// Where a discovered file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiscoverySource {
    /// The free-form `ai/` tree
    Ai,
    /// A universal subdir (`rules/`, `commands/`, …) in the source dir
    Universal(UniversalSubdir),
    /// A platform's native subdir
    Platform(PlatformId),
    /// A root file at the workspace root
    RootFile(Option<PlatformId>),
}

impl DiscoverySource {
    /// A stable label used for deterministic tie-breaking
    pub fn label(&self) -> String {
        match self {
            DiscoverySource::Ai => "ai".to_owned(),
            DiscoverySource::Universal(subdir) => subdir.to_string(),
            DiscoverySource::Platform(platform) => platform.to_string(),
            DiscoverySource::RootFile(Some(platform)) => format!("root:{platform}"),
            DiscoverySource::RootFile(None) => "root".to_owned(),
        }
    }

    /// The platform this source belongs to, if any
    pub fn platform(&self) -> Option<PlatformId> {
        match self {
            DiscoverySource::Platform(platform) => Some(*platform),
            DiscoverySource::RootFile(platform) => *platform,
            _ => None,
        }
    }
}

/// A pre-arbitration record of one file found on disk
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Absolute path of the file
    pub full_path: Utf8PathBuf,
    /// Path relative to whichever root the file was found under
    pub relative_path: Utf8PathBuf,
    /// Which tree produced this record
    pub source: DiscoverySource,
    /// The path this file would occupy in the registry
    pub registry_path: String,
    /// Last modification time
    pub mtime: SystemTime,
    /// SHA-256 over the raw bytes, lowercase hex
    pub content_hash: String,
    /// Whether this is a workspace root file (marker-hosted)
    pub is_root_file: bool,
    /// Whether arbitration must keep this file platform-specific
    pub force_platform_specific: bool,
}

/// SHA-256 of raw bytes as lowercase hex
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn stat_mtime(path: &Utf8Path) -> OpkgResult<SystemTime> {
    let metadata = std::fs::metadata(path).map_err(|details| OpkgError::Filesystem {
        path: path.to_owned(),
        details,
    })?;
    metadata.modified().map_err(|details| OpkgError::Filesystem {
        path: path.to_owned(),
        details,
    })
}

fn record(
    full_path: Utf8PathBuf,
    relative_path: Utf8PathBuf,
    source: DiscoverySource,
    registry_path: String,
    is_root_file: bool,
) -> OpkgResult<DiscoveredFile> {
    let bytes = LocalAsset::load_bytes(&full_path)?;
    let force_platform_specific =
        !is_root_file && split_platform_suffix(&registry_path).is_some();
    Ok(DiscoveredFile {
        mtime: stat_mtime(&full_path)?,
        content_hash: content_hash(&bytes),
        full_path,
        relative_path,
        source,
        registry_path,
        is_root_file,
        force_platform_specific,
    })
}

fn walk_files(root: &Utf8Path) -> impl Iterator<Item = Utf8PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
}

/// Walk everything a save of this source should consider.
///
/// `source_dir` is the dir holding the universal layout (usually the
/// workspace root, or the `[dir]` override); root files are always read
/// from `workspace_dir` itself.
pub fn discover_files(
    workspace_dir: &Utf8Path,
    source_dir: &Utf8Path,
    detected: &[PlatformId],
) -> OpkgResult<Vec<DiscoveredFile>> {
    let mut found: Vec<DiscoveredFile> = vec![];

    // the free-form ai/ tree is kept as-is
    let ai_root = source_dir.join("ai");
    if ai_root.is_dir() {
        for full in walk_files(&ai_root) {
            let rel = full
                .strip_prefix(&ai_root)
                .expect("walked file is under its root")
                .to_owned();
            let registry_path = format!("ai/{}", rel.as_str().replace('\\', "/"));
            found.push(record(full, rel, DiscoverySource::Ai, registry_path, false)?);
        }
    }

    // universal subdirs in the source dir (present when re-saving a
    // package dir)
    for &subdir in ALL_SUBDIRS {
        let root = source_dir.join(subdir.as_str());
        if !root.is_dir() {
            continue;
        }
        for full in walk_files(&root) {
            let rel = full
                .strip_prefix(&root)
                .expect("walked file is under its root")
                .to_owned();
            let registry_path = format!("{subdir}/{}", rel.as_str().replace('\\', "/"));
            found.push(record(
                full,
                rel,
                DiscoverySource::Universal(subdir),
                registry_path,
                false,
            )?);
        }
    }

    // platform-native subdirs, inverse-mapped
    for &platform in detected {
        let def = platform.definition();
        for subdir_def in def.subdirs {
            let root = workspace_dir.join(def.root_dir).join(subdir_def.path);
            if !root.is_dir() {
                continue;
            }
            for full in walk_files(&root) {
                let Some(hit) = map_platform_file_to_universal(workspace_dir, &full) else {
                    continue;
                };
                if hit.platform != platform {
                    continue;
                }
                let rel = full
                    .strip_prefix(&root)
                    .expect("walked file is under its root")
                    .to_owned();
                found.push(record(
                    full,
                    rel,
                    DiscoverySource::Platform(platform),
                    hit.registry_path(),
                    false,
                )?);
            }
        }
    }

    // root files at the workspace root, deduped across platforms that
    // share AGENTS.md
    let mut seen_root_files = vec![];
    for &platform in detected {
        let def = PlatformDefinition::get(platform);
        let Some(root_file) = def.root_file else {
            continue;
        };
        if seen_root_files.contains(&root_file) {
            continue;
        }
        let full = workspace_dir.join(root_file);
        if !full.is_file() {
            continue;
        }
        seen_root_files.push(root_file);
        let source = if def.unique_root_file().is_some() {
            DiscoverySource::RootFile(Some(platform))
        } else {
            DiscoverySource::RootFile(None)
        };
        found.push(record(
            full,
            Utf8PathBuf::from(root_file),
            source,
            ROOT_REGISTRY_PATH.to_owned(),
            true,
        )?);
    }

    debug!("discovered {} files under {source_dir}", found.len());
    Ok(found)
}
