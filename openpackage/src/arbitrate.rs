//! Conflict arbitration: given several workspace files that all claim the
//! same registry path, decide which become the universal copy and which
//! survive as platform-specific variants.
//!
//! The state machine (per group, in order):
//!
//! 1. all hashes identical → the mtime-latest file is the universal copy
//! 2. same mtime, divergent hashes → majority hash bucket(s) become
//!    universal, the rest platform-specific; no majority (all unique) →
//!    everything platform-specific
//! 3. divergent mtimes → a single latest file is universal; a tie at the
//!    latest mtime makes all of the tied files platform-specific
//!
//! For a *stable* target version in the all-unique-same-mtime case, an
//! interactive chooser may instead elect one universal file, mark a subset
//! platform-specific, and schedule the remaining source files to be
//! rewritten to match the elected copy. A cancelled chooser falls back to
//! rule 2.

use std::collections::BTreeMap;
use std::time::SystemTime;

use camino::Utf8PathBuf;
use openpackage_platforms::mapper::{platform_specific_registry_path, split_platform_suffix};
use openpackage_platforms::PlatformId;
use tracing::debug;

use crate::discovery::DiscoveredFile;
use crate::errors::OpkgResult;

/// What the interactive chooser decided for one problematic group
#[derive(Debug, Clone)]
pub enum ChooserOutcome {
    /// One file elected universal, a subset kept platform-specific, the
    /// rest synchronized to the elected contents
    Elected {
        /// Index of the elected universal file
        universal: usize,
        /// Indices kept as platform-specific variants
        platform_specific: Vec<usize>,
    },
    /// The user backed out; fall back to the non-interactive rule
    Cancelled,
}

/// A chooser for the problematic case; `None` disables escalation
pub type Chooser<'a> = dyn Fn(&str, &[DiscoveredFile]) -> OpkgResult<ChooserOutcome> + 'a;

/// One post-arbitration file
#[derive(Debug, Clone)]
pub struct ArbitratedFile {
    /// Where the file lands in the registry (suffixed when
    /// platform-specific)
    pub registry_path: String,
    /// The record providing the content
    pub file: DiscoveredFile,
    /// Set when this emission is a platform-specific variant
    pub platform: Option<PlatformId>,
}

/// A workspace file the chooser decided to overwrite with the elected
/// universal contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBack {
    /// The file to rewrite
    pub target: Utf8PathBuf,
    /// The file whose bytes it should match afterwards
    pub content_source: Utf8PathBuf,
}

/// The result of arbitrating every group
#[derive(Debug, Default)]
pub struct Arbitration {
    /// Files to materialize into the snapshot
    pub files: Vec<ArbitratedFile>,
    /// Workspace rewrites scheduled by the interactive chooser
    pub sync_backs: Vec<SyncBack>,
}

fn universal(file: &DiscoveredFile) -> ArbitratedFile {
    ArbitratedFile {
        registry_path: file.registry_path.clone(),
        file: file.clone(),
        platform: None,
    }
}

/// The platform-specific emission of one file.
///
/// Normal files gain a platform infix (`setup.md` → `setup.claude.md`).
/// Root-like files instead take their platform's native root filename, and
/// sources without a platform keep their universal path.
fn platform_specific(file: &DiscoveredFile) -> ArbitratedFile {
    let Some(platform) = file.source.platform() else {
        return universal(file);
    };
    let registry_path = if file.is_root_file {
        file.relative_path.as_str().to_owned()
    } else if split_platform_suffix(&file.registry_path).is_some() {
        // already carries its platform infix
        file.registry_path.clone()
    } else {
        platform_specific_registry_path(&file.registry_path, platform)
    };
    ArbitratedFile {
        registry_path,
        file: file.clone(),
        platform: Some(platform),
    }
}

/// Deterministic "newest first" ordering: mtime descending, then source
/// label ascending so equal-mtime groups always pick the same winner.
fn newest_first(files: &mut [&DiscoveredFile]) {
    files.sort_by(|a, b| {
        b.mtime
            .cmp(&a.mtime)
            .then_with(|| a.source.label().cmp(&b.source.label()))
    });
}

fn all_same_hash(files: &[&DiscoveredFile]) -> bool {
    files
        .windows(2)
        .all(|pair| pair[0].content_hash == pair[1].content_hash)
}

fn all_same_mtime(files: &[&DiscoveredFile]) -> bool {
    files.windows(2).all(|pair| pair[0].mtime == pair[1].mtime)
}

fn hash_buckets<'a>(files: &[&'a DiscoveredFile]) -> Vec<Vec<&'a DiscoveredFile>> {
    let mut buckets: BTreeMap<&str, Vec<&DiscoveredFile>> = BTreeMap::new();
    for &file in files {
        buckets.entry(&file.content_hash).or_default().push(file);
    }
    buckets.into_values().collect()
}

/// Rule 2: same mtime, divergent hashes
fn arbitrate_same_mtime(files: &[&DiscoveredFile], out: &mut Arbitration) {
    let buckets = hash_buckets(files);
    let max_count = buckets.iter().map(Vec::len).max().unwrap_or(0);
    if max_count >= 2 {
        for bucket in &buckets {
            if bucket.len() == max_count {
                let mut ordered: Vec<&DiscoveredFile> = bucket.clone();
                newest_first(&mut ordered);
                out.files.push(universal(ordered[0]));
            } else {
                for &file in bucket {
                    out.files.push(platform_specific(file));
                }
            }
        }
    } else {
        for &file in files {
            out.files.push(platform_specific(file));
        }
    }
}

fn arbitrate_group(
    registry_path: &str,
    group: &[DiscoveredFile],
    stable_target: bool,
    chooser: Option<&Chooser<'_>>,
    out: &mut Arbitration,
) -> OpkgResult<()> {
    // forced files never arbitrate
    let (forced, normal): (Vec<&DiscoveredFile>, Vec<&DiscoveredFile>) = group
        .iter()
        .partition(|file| file.force_platform_specific);
    for file in forced {
        out.files.push(platform_specific(file));
    }

    match normal.len() {
        0 => return Ok(()),
        1 => {
            out.files.push(universal(normal[0]));
            return Ok(());
        }
        _ => {}
    }

    if all_same_hash(&normal) {
        let mut ordered = normal.clone();
        newest_first(&mut ordered);
        out.files.push(universal(ordered[0]));
        return Ok(());
    }

    if all_same_mtime(&normal) {
        let all_unique = hash_buckets(&normal).iter().all(|bucket| bucket.len() == 1);
        if all_unique && stable_target {
            if let Some(chooser) = chooser {
                debug!("escalating {registry_path} to interactive arbitration");
                let owned: Vec<DiscoveredFile> =
                    normal.iter().map(|file| (*file).clone()).collect();
                match chooser(registry_path, &owned)? {
                    ChooserOutcome::Elected {
                        universal: elected,
                        platform_specific: keep_specific,
                    } => {
                        out.files.push(universal(normal[elected]));
                        for (idx, &file) in normal.iter().enumerate() {
                            if idx == elected {
                                continue;
                            }
                            if keep_specific.contains(&idx) {
                                out.files.push(platform_specific(file));
                            } else {
                                out.sync_backs.push(SyncBack {
                                    target: file.full_path.clone(),
                                    content_source: normal[elected].full_path.clone(),
                                });
                            }
                        }
                        return Ok(());
                    }
                    ChooserOutcome::Cancelled => {}
                }
            }
        }
        arbitrate_same_mtime(&normal, out);
        return Ok(());
    }

    // divergent mtimes: only the latest matter
    let latest = normal
        .iter()
        .map(|file| file.mtime)
        .max()
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let tied: Vec<&DiscoveredFile> = normal
        .iter()
        .copied()
        .filter(|file| file.mtime == latest)
        .collect();
    if tied.len() == 1 {
        out.files.push(universal(tied[0]));
    } else {
        for file in tied {
            out.files.push(platform_specific(file));
        }
    }
    Ok(())
}

/// Arbitrate every group of discovered files sharing a registry path.
///
/// `chooser` enables the interactive escalation for stable targets; pass
/// `None` under `--force` or when no terminal is attended.
pub fn arbitrate(
    files: Vec<DiscoveredFile>,
    stable_target: bool,
    chooser: Option<&Chooser<'_>>,
) -> OpkgResult<Arbitration> {
    let mut groups: BTreeMap<String, Vec<DiscoveredFile>> = BTreeMap::new();
    for file in files {
        groups.entry(file.registry_path.clone()).or_default().push(file);
    }

    let mut out = Arbitration::default();
    for (registry_path, group) in &groups {
        arbitrate_group(registry_path, group, stable_target, chooser, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoverySource;
    use std::time::Duration;

    fn file(
        registry_path: &str,
        source: DiscoverySource,
        hash: &str,
        mtime_secs: u64,
    ) -> DiscoveredFile {
        DiscoveredFile {
            full_path: Utf8PathBuf::from(format!("/ws/{}/{registry_path}", source.label())),
            relative_path: Utf8PathBuf::from(registry_path),
            source,
            registry_path: registry_path.to_owned(),
            mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs),
            content_hash: hash.to_owned(),
            is_root_file: false,
            force_platform_specific: false,
        }
    }

    const CURSOR: DiscoverySource = DiscoverySource::Platform(PlatformId::Cursor);
    const CLAUDE: DiscoverySource = DiscoverySource::Platform(PlatformId::Claude);
    const CODEX: DiscoverySource = DiscoverySource::Platform(PlatformId::Codex);

    #[test]
    fn singleton_passes_through() {
        let out = arbitrate(
            vec![file("commands/a.md", CURSOR, "h1", 10)],
            false,
            None,
        )
        .unwrap();
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].registry_path, "commands/a.md");
        assert!(out.files[0].platform.is_none());
    }

    #[test]
    fn identical_hashes_pick_latest() {
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 10),
                file("commands/a.md", CLAUDE, "h1", 20),
            ],
            false,
            None,
        )
        .unwrap();
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].file.source, CLAUDE);
    }

    #[test]
    fn identical_everything_breaks_ties_by_source() {
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 10),
                file("commands/a.md", CLAUDE, "h1", 10),
            ],
            false,
            None,
        )
        .unwrap();
        // "claude" sorts before "cursor"
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].file.source, CLAUDE);
    }

    #[test]
    fn same_mtime_majority_wins() {
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 10),
                file("commands/a.md", CLAUDE, "h1", 10),
                file("commands/a.md", CODEX, "h2", 10),
            ],
            false,
            None,
        )
        .unwrap();
        let universal: Vec<_> = out.files.iter().filter(|f| f.platform.is_none()).collect();
        let specific: Vec<_> = out.files.iter().filter(|f| f.platform.is_some()).collect();
        assert_eq!(universal.len(), 1);
        assert_eq!(universal[0].file.content_hash, "h1");
        assert_eq!(specific.len(), 1);
        assert_eq!(specific[0].registry_path, "commands/a.codex.md");
    }

    #[test]
    fn same_mtime_all_unique_goes_platform_specific() {
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 10),
                file("commands/a.md", CLAUDE, "h2", 10),
                file("commands/a.md", CODEX, "h3", 10),
            ],
            false,
            None,
        )
        .unwrap();
        assert_eq!(out.files.len(), 3);
        assert!(out.files.iter().all(|f| f.platform.is_some()));
        let mut paths: Vec<_> = out.files.iter().map(|f| f.registry_path.clone()).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                "commands/a.claude.md",
                "commands/a.codex.md",
                "commands/a.cursor.md"
            ]
        );
    }

    #[test]
    fn divergent_mtimes_latest_wins_alone() {
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 10),
                file("commands/a.md", CLAUDE, "h2", 30),
                file("commands/a.md", CODEX, "h3", 20),
            ],
            false,
            None,
        )
        .unwrap();
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].file.source, CLAUDE);
        assert!(out.files[0].platform.is_none());
    }

    #[test]
    fn divergent_mtimes_tie_goes_platform_specific() {
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 30),
                file("commands/a.md", CLAUDE, "h2", 30),
                file("commands/a.md", CODEX, "h3", 10),
            ],
            false,
            None,
        )
        .unwrap();
        assert_eq!(out.files.len(), 2);
        assert!(out.files.iter().all(|f| f.platform.is_some()));
    }

    #[test]
    fn chooser_elects_and_schedules_syncs() {
        let chooser = |_path: &str, _files: &[DiscoveredFile]| {
            Ok(ChooserOutcome::Elected {
                universal: 0,
                platform_specific: vec![1],
            })
        };
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 10),
                file("commands/a.md", CLAUDE, "h2", 10),
                file("commands/a.md", CODEX, "h3", 10),
            ],
            true,
            Some(&chooser),
        )
        .unwrap();
        let universal: Vec<_> = out.files.iter().filter(|f| f.platform.is_none()).collect();
        assert_eq!(universal.len(), 1);
        assert_eq!(universal[0].file.source, CURSOR);
        assert_eq!(out.files.len(), 2);
        // codex (index 2) gets synchronized to the cursor contents
        assert_eq!(out.sync_backs.len(), 1);
        assert!(out.sync_backs[0].target.as_str().contains("codex"));
    }

    #[test]
    fn cancelled_chooser_falls_back() {
        let chooser = |_path: &str, _files: &[DiscoveredFile]| Ok(ChooserOutcome::Cancelled);
        let out = arbitrate(
            vec![
                file("commands/a.md", CURSOR, "h1", 10),
                file("commands/a.md", CLAUDE, "h2", 10),
            ],
            true,
            Some(&chooser),
        )
        .unwrap();
        assert_eq!(out.files.len(), 2);
        assert!(out.files.iter().all(|f| f.platform.is_some()));
    }

    #[test]
    fn forced_files_bypass_arbitration() {
        let mut forced = file("commands/a.claude.md", CLAUDE, "h9", 50);
        forced.force_platform_specific = true;
        let out = arbitrate(vec![forced], false, None).unwrap();
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.files[0].registry_path, "commands/a.claude.md");
        assert_eq!(out.files[0].platform, Some(PlatformId::Claude));
    }
}
