//! The version model: semver parsing/comparison plus the WIP
//! (work-in-progress) scheme.
//!
//! A WIP version is `MAJOR.MINOR.PATCH-<workspace-hash>.<counter-base36>`:
//! a stable base tagged with a deterministic hash of the workspace path and
//! a monotonically increasing counter, so in-progress snapshots from
//! different workspaces never collide in the shared registry.

use semver::Version;
use sha2::{Digest, Sha256};

use crate::errors::{OpkgError, OpkgResult};

/// The version a freshly bootstrapped package starts from
pub use openpackage_schema::DEFAULT_VERSION;

/// Which semver component a bump advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BumpKind {
    Patch,
    Minor,
    Major,
}

impl BumpKind {
    /// Parse a bump kind off the CLI
    pub fn parse(input: &str) -> OpkgResult<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "patch" => Ok(BumpKind::Patch),
            "minor" => Ok(BumpKind::Minor),
            "major" => Ok(BumpKind::Major),
            _ => Err(OpkgError::InvalidBumpKind {
                input: input.to_owned(),
            }),
        }
    }
}

/// The deterministic lowercase token identifying a workspace.
///
/// Derived from the absolute workspace path; stable across runs.
pub fn workspace_hash(workspace_dir: &str) -> String {
    let digest = Sha256::digest(workspace_dir.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Render a counter in base36 (lowercase)
pub fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut out = vec![];
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}

/// Parse a base36 counter
pub fn from_base36(input: &str) -> Option<u64> {
    if input.is_empty() {
        return None;
    }
    u64::from_str_radix(input, 36).ok()
}

/// Whether a version carries a workspace-hash-style prerelease
pub fn is_local_version(version: &str) -> bool {
    parse_local_version(version).is_some()
}

/// Split a WIP version into `(base, workspace_hash, counter)`
pub fn parse_local_version(version: &str) -> Option<(String, String, u64)> {
    let parsed = Version::parse(version).ok()?;
    let pre = parsed.pre.as_str();
    let (hash, counter) = pre.split_once('.')?;
    let hash_ok = (6..=8).contains(&hash.len())
        && hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if !hash_ok {
        return None;
    }
    let counter = from_base36(counter)?;
    Some((extract_base_version(version), hash.to_owned(), counter))
}

/// Strip prerelease and build metadata down to `MAJOR.MINOR.PATCH`
pub fn extract_base_version(version: &str) -> String {
    match Version::parse(version) {
        Ok(parsed) => format!("{}.{}.{}", parsed.major, parsed.minor, parsed.patch),
        // lenient fallback for not-quite-semver strings
        Err(_) => {
            let end = version
                .find(['-', '+'])
                .unwrap_or(version.len());
            version[..end].to_owned()
        }
    }
}

/// Standard semver bumping, with lower components zeroed on non-patch bumps.
///
/// Lenient on shape: fewer than three numeric dot components returns the
/// input unchanged; extra components beyond three are dropped.
pub fn calculate_bumped_version(version: &str, bump: BumpKind) -> String {
    let base = extract_base_version(version);
    let parts: Vec<Option<u64>> = base.split('.').map(|part| part.parse().ok()).collect();
    let (Some(Some(major)), Some(Some(minor)), Some(Some(patch))) =
        (parts.first(), parts.get(1), parts.get(2))
    else {
        return version.to_owned();
    };
    match bump {
        BumpKind::Patch => format!("{major}.{minor}.{}", patch + 1),
        BumpKind::Minor => format!("{major}.{}.0", minor + 1),
        BumpKind::Major => format!("{}.0.0", major + 1),
    }
}

/// Tag a stable base with a workspace hash and counter
pub fn generate_local_version(base: &str, workspace_hash: &str, counter: u64) -> String {
    format!("{base}-{workspace_hash}.{}", to_base36(counter))
}

/// Whether a string is one exact semver version (not a range)
pub fn is_exact_version(input: &str) -> bool {
    Version::parse(input).is_ok()
}

/// Parse a version, mapping failures onto our error type
pub fn parse_version(input: &str) -> OpkgResult<Version> {
    Version::parse(input).map_err(|details| OpkgError::InvalidVersion {
        version: input.to_owned(),
        details,
    })
}

/// Parse a range, mapping failures onto our error type
pub fn parse_range(input: &str) -> OpkgResult<semver::VersionReq> {
    semver::VersionReq::parse(input).map_err(|details| OpkgError::InvalidRange {
        range: input.to_owned(),
        details,
    })
}

/// Inputs to [`select_target_version`][]
#[derive(Debug, Clone, Default)]
pub struct VersionHints<'a> {
    /// A version given verbatim (wins over everything)
    pub explicit: Option<&'a str>,
    /// The literal word `stable` was passed
    pub stable: bool,
    /// A `-b/--bump` kind
    pub bump: Option<BumpKind>,
    /// The version currently in the package's manifest, if any
    pub current: Option<&'a str>,
}

/// Decide the version a save should target.
///
/// Ordered selection, first match wins:
///
/// 1. explicit version
/// 2. no current version: fresh WIP on the default base
/// 3. bump + stable: bumped base
/// 4. bump: WIP on the bumped base
/// 5. stable, current is WIP: promote the base
/// 6. stable, current is stable: patch-bump
/// 7. current is WIP: fresh WIP on the same base
/// 8. otherwise: WIP on a patch-bumped base
pub fn select_target_version(hints: &VersionHints<'_>, workspace_hash: &str, counter: u64) -> String {
    if let Some(explicit) = hints.explicit {
        return explicit.to_owned();
    }
    let Some(current) = hints.current else {
        return generate_local_version(DEFAULT_VERSION, workspace_hash, counter);
    };
    if let Some(bump) = hints.bump {
        let bumped = calculate_bumped_version(&extract_base_version(current), bump);
        return if hints.stable {
            bumped
        } else {
            generate_local_version(&bumped, workspace_hash, counter)
        };
    }
    if hints.stable {
        return if is_local_version(current) {
            extract_base_version(current)
        } else {
            calculate_bumped_version(current, BumpKind::Patch)
        };
    }
    if is_local_version(current) {
        generate_local_version(&extract_base_version(current), workspace_hash, counter)
    } else {
        generate_local_version(
            &calculate_bumped_version(current, BumpKind::Patch),
            workspace_hash,
            counter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "b07d58f1";

    #[test]
    fn base36_round_trips() {
        for n in [0, 1, 35, 36, 1295, u64::MAX] {
            assert_eq!(from_base36(&to_base36(n)), Some(n));
        }
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn local_versions_are_recognized() {
        let wip = generate_local_version("1.2.3", HASH, 37);
        assert_eq!(wip, "1.2.3-b07d58f1.11");
        assert!(is_local_version(&wip));
        assert_eq!(
            parse_local_version(&wip),
            Some(("1.2.3".to_owned(), HASH.to_owned(), 37))
        );

        assert!(!is_local_version("1.2.3"));
        assert!(!is_local_version("1.2.3-alpha.1"));
        assert!(!is_local_version("1.2.3-prerelease.1"));
    }

    #[test]
    fn extract_base_strips_pre_and_build() {
        assert_eq!(extract_base_version("1.2.3-b07d58f1.4+build9"), "1.2.3");
        assert_eq!(extract_base_version("1.2.3"), "1.2.3");
    }

    #[test]
    fn extract_of_generate_is_identity() {
        for base in ["0.1.0", "1.2.3", "10.0.9"] {
            assert_eq!(extract_base_version(&generate_local_version(base, HASH, 3)), base);
        }
    }

    #[test]
    fn bumping() {
        assert_eq!(calculate_bumped_version("1.2.3", BumpKind::Patch), "1.2.4");
        assert_eq!(calculate_bumped_version("1.2.3", BumpKind::Minor), "1.3.0");
        assert_eq!(calculate_bumped_version("1.2.3", BumpKind::Major), "2.0.0");
        // too few parts is a no-op
        assert_eq!(calculate_bumped_version("1.2", BumpKind::Patch), "1.2");
        // extra parts are consumed and dropped
        assert_eq!(calculate_bumped_version("1.2.3.4", BumpKind::Patch), "1.2.4");
    }

    #[test]
    fn exactness() {
        assert!(is_exact_version("1.2.3"));
        for range in ["^1.2.3", "1.2.x", ">=1.2"] {
            assert!(!is_exact_version(range), "{range} should not be exact");
        }
    }

    #[test]
    fn version_selection_table() {
        let select = |explicit: Option<&str>, stable, bump, current: Option<&str>| {
            select_target_version(
                &VersionHints {
                    explicit,
                    stable,
                    bump,
                    current,
                },
                HASH,
                2,
            )
        };

        // explicit wins
        assert_eq!(select(Some("9.9.9"), true, Some(BumpKind::Major), Some("1.0.0")), "9.9.9");
        // no current: default WIP
        assert_eq!(select(None, false, None, None), "0.1.0-b07d58f1.2");
        // bump + stable
        assert_eq!(select(None, true, Some(BumpKind::Minor), Some("1.2.3-b07d58f1.5")), "1.3.0");
        // bump without stable
        assert_eq!(
            select(None, false, Some(BumpKind::Patch), Some("1.2.3")),
            "1.2.4-b07d58f1.2"
        );
        // stable promotes a WIP base
        assert_eq!(select(None, true, None, Some("1.2.3-b07d58f1.5")), "1.2.3");
        // stable patch-bumps a stable
        assert_eq!(select(None, true, None, Some("1.2.3")), "1.2.4");
        // WIP begets WIP on the same base
        assert_eq!(select(None, false, None, Some("1.2.3-b07d58f1.5")), "1.2.3-b07d58f1.2");
        // stable begets WIP on a patch-bumped base
        assert_eq!(select(None, false, None, Some("1.2.3")), "1.2.4-b07d58f1.2");
    }

    #[test]
    fn workspace_hash_is_deterministic() {
        let a = workspace_hash("/home/dev/project");
        let b = workspace_hash("/home/dev/project");
        let c = workspace_hash("/home/dev/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
    }
}
