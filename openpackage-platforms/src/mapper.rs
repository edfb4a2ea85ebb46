//! Path translation between the universal layout and platform-native dirs.
//!
//! The mapping is total on the universal side (every `(subdir, rel_path)`
//! lands somewhere for every platform that supports the subdir) and
//! injective per platform: two distinct universal files never collide on a
//! platform target, and a platform file maps back to exactly one universal
//! path.

use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{PlatformError, Result};
use crate::{PlatformDefinition, PlatformId, UniversalSubdir};

/// The canonical extension of universal files
pub const UNIVERSAL_EXT: &str = "md";

/// Where a universal file lands for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTarget {
    /// The platform being mapped onto
    pub platform: PlatformId,
    /// The native dir that holds the file
    pub abs_dir: Utf8PathBuf,
    /// The native file path, extension already rewritten
    pub abs_file: Utf8PathBuf,
}

/// A platform file mapped back into the universal layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniversalHit {
    /// The platform whose layout the file was found in
    pub platform: PlatformId,
    /// The universal subdir the file belongs to
    pub subdir: UniversalSubdir,
    /// Path relative to the subdir, extension canonicalized to `.md`
    pub rel_path: Utf8PathBuf,
}

impl UniversalHit {
    /// The registry path this hit occupies, e.g. `commands/pkg/setup.md`
    pub fn registry_path(&self) -> String {
        format!("{}/{}", self.subdir.as_str(), self.rel_path)
    }
}

/// Translate a universal `(subdir, rel_path)` into a platform's native
/// `(abs_dir, abs_file)`.
///
/// The file's extension is replaced with the platform's write extension for
/// that subdir (a `.md` rules file becomes `.mdc` for Cursor, a `.md`
/// command becomes `.toml` for Gemini).
pub fn map_universal_to_platform(
    workspace_dir: &Utf8Path,
    platform: PlatformId,
    subdir: UniversalSubdir,
    rel_path: &Utf8Path,
) -> Result<PlatformTarget> {
    let def = platform.definition();
    let subdir_def = def
        .subdir(subdir)
        .ok_or(PlatformError::UnsupportedSubdir { platform, subdir })?;
    let abs_dir = workspace_dir.join(def.root_dir).join(subdir_def.path);
    let abs_file = abs_dir.join(rel_path).with_extension(subdir_def.write_ext);
    Ok(PlatformTarget {
        platform,
        abs_dir,
        abs_file,
    })
}

/// Translate a platform-native absolute path back into the universal layout.
///
/// Returns a hit only if the path lies inside exactly one recognized
/// `(root_dir, subdir.path)` pair and carries one of that subdir's read
/// extensions. The extension is canonicalized back to `.md`.
pub fn map_platform_file_to_universal(
    workspace_dir: &Utf8Path,
    abs_path: &Utf8Path,
) -> Option<UniversalHit> {
    let rel_to_workspace = abs_path.strip_prefix(workspace_dir).ok()?;
    let mut components = rel_to_workspace.components();
    let root_dir = components.next()?.as_str().to_owned();
    let def = PlatformDefinition::by_root_dir(&root_dir)?;

    let inside_root: Utf8PathBuf = components.as_path().to_owned();
    for subdir_def in def.subdirs {
        let Ok(rel) = inside_root.strip_prefix(subdir_def.path) else {
            continue;
        };
        if rel.as_str().is_empty() {
            continue;
        }
        let ext = rel.extension()?;
        if !subdir_def.read_exts.contains(&ext) {
            continue;
        }
        return Some(UniversalHit {
            platform: def.id,
            subdir: subdir_def.subdir,
            rel_path: rel.with_extension(UNIVERSAL_EXT),
        });
    }
    None
}

/// Every native location a universal file should materialize at, one per
/// detected platform that supports the file's subdir.
pub fn resolve_install_targets(
    workspace_dir: &Utf8Path,
    detected: &[PlatformId],
    subdir: UniversalSubdir,
    rel_path: &Utf8Path,
) -> Vec<PlatformTarget> {
    detected
        .iter()
        .filter_map(|&platform| {
            map_universal_to_platform(workspace_dir, platform, subdir, rel_path).ok()
        })
        .collect()
}

/// Suffix a registry path for one platform: `commands/pkg/foo.md` for
/// `claude` becomes `commands/pkg/foo.claude.md`.
pub fn platform_specific_registry_path(registry_path: &str, platform: PlatformId) -> String {
    let path = Utf8Path::new(registry_path);
    match path.extension() {
        Some(ext) => {
            let stem = registry_path
                .strip_suffix(&format!(".{ext}"))
                .unwrap_or(registry_path);
            format!("{stem}.{platform}.{ext}")
        }
        None => format!("{registry_path}.{platform}"),
    }
}

/// Undo [`platform_specific_registry_path`][]: `foo.claude.md` yields
/// `(claude, "foo.md")`. Paths without a platform infix return `None`.
pub fn split_platform_suffix(registry_path: &str) -> Option<(PlatformId, String)> {
    let path = Utf8Path::new(registry_path);
    let ext = path.extension()?;
    let stem = registry_path.strip_suffix(&format!(".{ext}"))?;
    let (base, infix) = stem.rsplit_once('.')?;
    let platform = PlatformId::parse(infix).ok()?;
    Some((platform, format!("{base}.{ext}")))
}
