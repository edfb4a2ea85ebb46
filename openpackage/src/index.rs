//! `package.index.yml` maintenance.
//!
//! The index is the single source of truth for "which workspace files
//! belong to which registry entry". Save writes it in exact-path mode (one
//! key per registry file); Install rewrites it in directory-collapsing mode
//! (file keys sharing a top-level dir collapse into one `dir/` key). Both
//! modes merge additively with the prior index and prune keys whose
//! registry path no longer exists.

use std::collections::{BTreeMap, BTreeSet};

use openpackage_schema::PackageIndex;
use tracing::debug;

/// Drop keys that no longer correspond to any current registry path.
///
/// A file key survives iff its exact path is current; a dir key survives
/// iff some current path lives under its prefix.
pub fn prune_stale(index: &mut PackageIndex, current_paths: &BTreeSet<String>) {
    index.files.retain(|key, _| {
        if PackageIndex::is_dir_key(key) {
            current_paths.iter().any(|path| path.starts_with(key.as_str()))
        } else {
            current_paths.contains(key)
        }
    });
}

/// Remove any dir key that has another dir key as a strict prefix
/// (parent-wins).
pub fn prune_nested_dir_keys(index: &mut PackageIndex) {
    let dir_keys: Vec<String> = index
        .files
        .keys()
        .filter(|key| PackageIndex::is_dir_key(key))
        .cloned()
        .collect();
    index.files.retain(|key, _| {
        !dir_keys
            .iter()
            .any(|parent| key != parent && key.starts_with(parent.as_str()))
    });
}

/// Merge a prior index's surviving keys into a fresh one, additively.
pub fn merge_prior(
    index: &mut PackageIndex,
    prior: &PackageIndex,
    current_paths: &BTreeSet<String>,
) {
    for (key, targets) in &prior.files {
        let survives = if PackageIndex::is_dir_key(key) {
            current_paths.iter().any(|path| path.starts_with(key.as_str()))
        } else {
            current_paths.contains(key)
        };
        if survives {
            index.insert(key.clone(), targets.clone());
        }
    }
    prune_nested_dir_keys(index);
}

/// Build an exact-path index: every registry file is its own key.
///
/// `entries` maps registry paths to the installed paths that materialize
/// them under the currently detected platforms. The caller is responsible
/// for platform-overlap pruning (a `setup.claude.md` key claims claude's
/// target away from the universal `setup.md` key) since only it knows
/// which target belongs to which platform.
pub fn exact_index(
    workspace_hash: &str,
    version: &str,
    entries: BTreeMap<String, Vec<String>>,
    prior: Option<&PackageIndex>,
) -> PackageIndex {
    let current_paths: BTreeSet<String> = entries.keys().cloned().collect();
    let mut index = PackageIndex::new(workspace_hash, version);
    for (key, targets) in entries {
        index.insert(key, targets);
    }
    if let Some(prior) = prior {
        merge_prior(&mut index, prior, &current_paths);
    }
    index
}

/// Collapse file keys that share a top-level directory into one `dir/` key.
///
/// A directory collapses only when every file key under it maps onto
/// targets that mirror the key's relative path AND every resulting
/// installed dir lies under `owned_prefix` (the package's own canonical
/// dir). Shared platform dirs never collapse, so removing a dir key can
/// never delete another package's files. Anything irregular stays
/// file-keyed.
pub fn collapse_directories(index: &mut PackageIndex, owned_prefix: &str) {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for key in index.files.keys() {
        if PackageIndex::is_dir_key(key) {
            continue;
        }
        if let Some((top, _)) = key.split_once('/') {
            grouped
                .entry(format!("{top}/"))
                .or_default()
                .push(key.clone());
        }
    }

    for (dir_key, keys) in grouped {
        let mut installed_dirs: BTreeSet<String> = BTreeSet::new();
        let mut collapsible = true;
        for key in &keys {
            let rel = &key[dir_key.len()..];
            let targets = &index.files[key];
            if targets.is_empty() {
                collapsible = false;
                break;
            }
            for target in targets {
                match target.strip_suffix(rel) {
                    Some(dir) if dir.ends_with('/') && dir.starts_with(owned_prefix) => {
                        installed_dirs.insert(dir.to_owned());
                    }
                    _ => {
                        collapsible = false;
                        break;
                    }
                }
            }
            if !collapsible {
                break;
            }
        }
        if !collapsible {
            continue;
        }
        debug!("collapsing {} file keys into {dir_key}", keys.len());
        for key in keys {
            index.files.remove(&key);
        }
        index.insert(dir_key, installed_dirs.into_iter().collect());
    }

    prune_nested_dir_keys(index);
}
