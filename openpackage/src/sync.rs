//! The sync engine: keep platform-native copies consistent with the
//! canonical registry content.
//!
//! Two concerns live here:
//!
//! * **platform front-matter splitting**: a source file whose YAML front
//!   matter carries a `platforms:` map is split into a clean universal
//!   `.md` plus one `<base>.<platform>.yml` override per platform; when a
//!   file is materialized for a platform, its override (if any) is
//!   re-attached as front matter.
//! * **root-section propagation**: after a save, the package's root-file
//!   section bodies are pushed back into every detected platform's root
//!   file, preserving marker ids.

use std::collections::BTreeSet;

use axoasset::LocalAsset;
use camino::Utf8PathBuf;
use openpackage_platforms::mapper::split_platform_suffix;
use openpackage_platforms::{PlatformDefinition, PlatformId};
use tracing::debug;

use crate::discovery::ROOT_REGISTRY_PATH;
use crate::errors::OpkgResult;
use crate::markers;
use crate::registry::{PackageContents, PackageFile};
use crate::workspace::Workspace;

const FRONT_MATTER_FENCE: &str = "---";

/// Whether a registry path names a per-platform override file
/// (`<base>.<platform>.yml`)
pub fn is_override_file(path: &str) -> bool {
    match split_platform_suffix(path) {
        Some((_, base)) => base.ends_with(".yml"),
        None => false,
    }
}

/// The override path riding along with a universal file:
/// `commands/foo.md` + claude → `commands/foo.claude.yml`
pub fn override_path_for(universal_path: &str, platform: PlatformId) -> String {
    let stem = universal_path
        .strip_suffix(".md")
        .unwrap_or(universal_path);
    format!("{stem}.{platform}.yml")
}

/// Re-attach an override as front matter
pub fn attach_override(body: &str, override_yaml: &str) -> String {
    let override_yaml = override_yaml.trim_end_matches('\n');
    format!("{FRONT_MATTER_FENCE}\n{override_yaml}\n{FRONT_MATTER_FENCE}\n{body}")
}

/// The bytes a universal file should have when materialized for one
/// platform: the override-front-mattered variant when an override file
/// exists in the snapshot, the plain body otherwise.
pub fn content_for_platform(
    contents: &PackageContents,
    universal_path: &str,
    platform: PlatformId,
    body: &[u8],
) -> Vec<u8> {
    let override_path = override_path_for(universal_path, platform);
    let Some(override_file) = contents.files.iter().find(|file| file.path == override_path)
    else {
        return body.to_vec();
    };
    let (Ok(body), Ok(override_yaml)) = (
        std::str::from_utf8(body),
        std::str::from_utf8(&override_file.content),
    ) else {
        return body.to_vec();
    };
    attach_override(body, override_yaml).into_bytes()
}

/// Split a source file with a `platforms:` front-matter block.
///
/// Returns the replacement files: the universal body (front matter
/// stripped) plus one override per platform key. Files without front
/// matter, or whose front matter has no `platforms:` key, return `None`
/// (emit unchanged).
pub fn split_platform_front_matter(
    registry_path: &str,
    content: &[u8],
) -> Option<Vec<PackageFile>> {
    let text = std::str::from_utf8(content).ok()?;
    let rest = text.strip_prefix("---\n")?;
    let fence_end = rest.find("\n---")?;
    let front = &rest[..fence_end];
    let mut body = &rest[fence_end + 4..];
    if body.starts_with('\n') {
        body = &body[1..];
    }

    let parsed: serde_yml::Value = serde_yml::from_str(front).ok()?;
    let platforms = parsed.get("platforms")?.as_mapping()?;

    let mut out = vec![PackageFile::text(registry_path, body)];
    for (key, value) in platforms {
        let Some(platform) = key.as_str().and_then(|raw| PlatformId::parse(raw).ok()) else {
            continue;
        };
        let Ok(override_yaml) = serde_yml::to_string(value) else {
            continue;
        };
        out.push(PackageFile::text(
            override_path_for(registry_path, platform),
            override_yaml,
        ));
    }
    debug!(
        "split {registry_path} into a universal body and {} overrides",
        out.len() - 1
    );
    Some(out)
}

/// Which workspace root files a registry root entry lands in.
///
/// The universal `AGENTS.md` body fans out to every detected platform's
/// root file (deduped); a platform-native entry like `CLAUDE.md` goes only
/// to that file, and only when its platform is detected.
pub fn root_targets(
    workspace: &Workspace,
    detected: &[PlatformId],
    registry_path: &str,
) -> Vec<Utf8PathBuf> {
    let mut targets = BTreeSet::new();
    for &platform in detected {
        let def = PlatformDefinition::get(platform);
        let Some(root_file) = def.root_file else {
            continue;
        };
        if registry_path == ROOT_REGISTRY_PATH || registry_path == root_file {
            targets.insert(workspace.root().join(root_file));
        }
    }
    targets.into_iter().collect()
}

/// Push a package's root-section bodies into the workspace root files,
/// preserving existing marker ids. Files are rewritten only when the
/// merged contents differ. Returns the paths actually touched.
pub fn propagate_root_sections(
    workspace: &Workspace,
    package: &str,
    entries: &[(String, String)],
) -> OpkgResult<Vec<Utf8PathBuf>> {
    let detected = workspace.detected_platforms().to_vec();
    let mut touched = vec![];
    for (registry_path, body) in entries {
        for target in root_targets(workspace, &detected, registry_path) {
            let existing = if target.is_file() {
                LocalAsset::load_string(&target)?
            } else {
                String::new()
            };
            let existing_id = markers::extract_package_section(&existing, package)
                .and_then(|section| section.id);
            let merged =
                markers::upsert_package_section(&existing, package, body, existing_id.as_deref());
            if merged != existing {
                LocalAsset::write_new(&merged, &target)?;
                touched.push(target);
            }
        }
    }
    Ok(touched)
}
