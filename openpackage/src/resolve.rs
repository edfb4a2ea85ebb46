//! Recursive dependency resolution with range intersection, cycle
//! detection, and WIP-aware version selection.
//!
//! The resolver threads a visited stack through recursion for cycle
//! detection, accumulates every range ever demanded of a package, and
//! memoizes loads in the `resolved` map. WIP (workspace-tagged prerelease)
//! versions are only ever selected under explicit prerelease intent: some
//! range literal containing a `-`.

use std::collections::BTreeMap;

use openpackage_schema::{PackageManifest, PackageName};
use semver::{Version, VersionReq};
use tracing::{debug, info};

use crate::errors::{OpkgError, OpkgResult};
use crate::prompt;
use crate::registry::{PackageContents, Registry};
use crate::version::{is_exact_version, parse_range};
use crate::workspace::Workspace;

/// Where the resolver is allowed to look for packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Only the local registry; a missing package is an error
    LocalOnly,
    /// Local registry first; misses are reported for a remote pull
    #[default]
    Default,
}

/// How an already-resolved or already-installed package was reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// The existing version stays
    Kept,
    /// A newer version replaced the existing one
    Overwritten,
    /// The package was skipped entirely
    Skipped,
}

/// One resolver output row
#[derive(Debug)]
pub struct ResolvedPackage {
    /// The package
    pub name: PackageName,
    /// The version chosen for it
    pub version: String,
    /// Whether this was a top-level request rather than a transitive dep
    pub is_root: bool,
    /// The range that demanded it, if any
    pub required_range: Option<String>,
    /// Set when an existing install or earlier resolution was reconciled
    pub conflict_resolution: Option<ConflictResolution>,
    /// The loaded snapshot; `None` when an installed copy is being kept
    pub contents: Option<PackageContents>,
}

impl ResolvedPackage {
    /// The manifest of the resolved snapshot, when loaded
    pub fn manifest(&self) -> Option<&PackageManifest> {
        self.contents.as_ref().map(|contents| &contents.manifest)
    }
}

/// The linearized result of one resolution
#[derive(Debug, Default)]
pub struct Resolution {
    /// Every package, in resolution order
    pub packages: Vec<ResolvedPackage>,
    /// Dependencies not found locally (candidates for a remote pull)
    pub missing: Vec<(PackageName, Option<String>)>,
}

impl Resolution {
    /// Find a resolved row by name
    pub fn get(&self, name: &PackageName) -> Option<&ResolvedPackage> {
        self.packages.iter().find(|pkg| &pkg.name == name)
    }
}

/// Settings for one resolver run
#[derive(Debug, Default)]
pub struct ResolveOptions {
    /// Resolution mode
    pub mode: ResolutionMode,
    /// Also resolve the root manifest's dev-packages
    pub include_dev: bool,
    /// Reinstall even when the workspace already satisfies a range, and
    /// answer overwrite prompts with yes
    pub force: bool,
}

pub(crate) struct Resolver<'a> {
    registry: &'a Registry,
    workspace: &'a Workspace,
    options: ResolveOptions,
    /// top-level `package.yml` entries, intersected with everything else
    root_overrides: BTreeMap<PackageName, String>,
    /// inherited constraints from the caller
    global_constraints: BTreeMap<PackageName, Vec<String>>,
    /// every range ever demanded per name
    required_versions: BTreeMap<PackageName, Vec<String>>,
    visited_stack: Vec<PackageName>,
    resolved: BTreeMap<PackageName, usize>,
    out: Resolution,
}

/// Resolve a set of top-level requests against the local registry.
///
/// `requests` pairs names with optional explicit ranges; the workspace's
/// root manifest contributes its own range for anything it lists.
pub fn resolve(
    registry: &Registry,
    workspace: &Workspace,
    requests: &[(PackageName, Option<String>)],
    global_constraints: BTreeMap<PackageName, Vec<String>>,
    options: ResolveOptions,
) -> OpkgResult<Resolution> {
    let root_overrides = workspace
        .load_root_manifest()?
        .map(|manifest| {
            let mut deps: Vec<_> = manifest.packages.iter().collect();
            if options.include_dev {
                deps.extend(manifest.dev_packages.iter());
            }
            deps.into_iter()
                .map(|dep| (dep.name.clone(), dep.version.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut resolver = Resolver {
        registry,
        workspace,
        options,
        root_overrides,
        global_constraints,
        required_versions: BTreeMap::new(),
        visited_stack: vec![],
        resolved: BTreeMap::new(),
        out: Resolution::default(),
    };
    for (name, range) in requests {
        resolver.resolve_node(name, range.clone(), true)?;
    }
    Ok(resolver.out)
}

impl Resolver<'_> {
    fn chain(&self) -> Vec<String> {
        self.visited_stack.iter().map(ToString::to_string).collect()
    }

    fn gather_ranges(&self, name: &PackageName, parent_range: &Option<String>) -> Vec<String> {
        let mut ranges = vec![];
        // the top-level manifest's own entry always participates, so the
        // chosen version satisfies the root's declared range as well as
        // every transitive demand
        if let Some(range) = self.root_overrides.get(name) {
            ranges.push(range.clone());
        }
        if let Some(range) = parent_range {
            ranges.push(range.clone());
        }
        if let Some(inherited) = self.global_constraints.get(name) {
            ranges.extend(inherited.iter().cloned());
        }
        if let Some(accumulated) = self.required_versions.get(name) {
            ranges.extend(accumulated.iter().cloned());
        }
        ranges.sort();
        ranges.dedup();
        ranges
    }

    fn select_version(
        &self,
        name: &PackageName,
        ranges: &[String],
        available: &[String],
    ) -> OpkgResult<String> {
        if ranges.is_empty() {
            if let Some(latest) = self.registry.latest_version(name)? {
                return Ok(latest);
            }
            return Err(OpkgError::PackageNotFound {
                name: name.to_string(),
                chain: self.chain(),
            });
        }

        if let [only] = ranges {
            if is_exact_version(only) {
                return Ok(only.clone());
            }
        }

        let reqs: Vec<VersionReq> = ranges
            .iter()
            .map(|range| parse_range(range))
            .collect::<OpkgResult<_>>()?;
        let prerelease_intent = ranges.iter().any(|range| range.contains('-'));

        let mut candidates: Vec<(Version, String)> = available
            .iter()
            .filter_map(|raw| Version::parse(raw).ok().map(|parsed| (parsed, raw.clone())))
            .filter(|(parsed, _)| parsed.pre.is_empty() || prerelease_intent)
            .filter(|(parsed, _)| reqs.iter().all(|req| req.matches(parsed)))
            .collect();
        candidates.sort();

        // stables outrank WIPs unless prerelease was asked for by name
        let winner = if prerelease_intent {
            candidates.last()
        } else {
            candidates
                .iter()
                .rev()
                .find(|(parsed, _)| parsed.pre.is_empty())
        };

        winner.map(|(_, raw)| raw.clone()).ok_or_else(|| {
            OpkgError::VersionConflict {
                name: name.to_string(),
                ranges: ranges.to_vec(),
                available: available.to_vec(),
            }
        })
    }

    fn resolve_node(
        &mut self,
        name: &PackageName,
        parent_range: Option<String>,
        is_root: bool,
    ) -> OpkgResult<()> {
        if let Some(pos) = self.visited_stack.iter().position(|seen| seen == name) {
            let mut cycle: Vec<String> = self.visited_stack[pos..]
                .iter()
                .map(ToString::to_string)
                .collect();
            cycle.push(name.to_string());
            return Err(OpkgError::CircularDependency { cycle });
        }

        let ranges = self.gather_ranges(name, &parent_range);
        if let Some(range) = &parent_range {
            self.required_versions
                .entry(name.clone())
                .or_default()
                .push(range.clone());
        }

        let available = self.registry.list_versions(name)?;
        if available.is_empty() {
            match self.options.mode {
                ResolutionMode::LocalOnly => {
                    return Err(OpkgError::PackageNotFound {
                        name: name.to_string(),
                        chain: self.chain(),
                    })
                }
                ResolutionMode::Default => {
                    debug!("{name} not in local registry, marking missing");
                    self.out.missing.push((name.clone(), parent_range));
                    return Ok(());
                }
            }
        }

        let version = self.select_version(name, &ranges, &available)?;
        if !available.contains(&version) {
            return Err(OpkgError::VersionNotFound {
                name: name.to_string(),
                ranges,
                available,
                chain: self.chain(),
            });
        }

        // reconcile against an earlier resolution of the same name
        if let Some(&existing_idx) = self.resolved.get(name) {
            let existing_version = self.out.packages[existing_idx].version.clone();
            let newer = Version::parse(&version)
                .and_then(|new| Version::parse(&existing_version).map(|old| new > old))
                .unwrap_or(false);
            if newer {
                let overwrite = if self.options.force || !prompt::interactive() {
                    true
                } else {
                    prompt::confirm(
                        &format!("{name} resolved at {existing_version}, overwrite with {version}?"),
                        true,
                    )?
                };
                if overwrite {
                    info!("{name}: {existing_version} overwritten by {version}");
                    let contents = self.registry.load_package(name, &version)?;
                    let row = &mut self.out.packages[existing_idx];
                    row.version = version;
                    row.contents = Some(contents);
                    row.conflict_resolution = Some(ConflictResolution::Overwritten);
                } else {
                    self.out.packages[existing_idx].conflict_resolution =
                        Some(ConflictResolution::Kept);
                }
            } else if self.out.packages[existing_idx].conflict_resolution.is_none() {
                self.out.packages[existing_idx].conflict_resolution =
                    Some(ConflictResolution::Kept);
            }
            return Ok(());
        }

        // an installed copy that already satisfies every range is kept
        if !self.options.force {
            if let Some(installed) = self.workspace.installed_version(name)? {
                let satisfied = match Version::parse(&installed) {
                    Ok(parsed) => {
                        installed == version
                            || ranges.iter().all(|range| {
                                VersionReq::parse(range)
                                    .map(|req| req.matches(&parsed))
                                    .unwrap_or(false)
                            })
                    }
                    Err(_) => false,
                };
                if satisfied && !ranges.is_empty() {
                    debug!("{name}@{installed} already satisfies {ranges:?}, keeping");
                    self.resolved.insert(name.clone(), self.out.packages.len());
                    self.out.packages.push(ResolvedPackage {
                        name: name.clone(),
                        version: installed,
                        is_root,
                        required_range: parent_range,
                        conflict_resolution: Some(ConflictResolution::Kept),
                        contents: None,
                    });
                    return Ok(());
                }
            }
        }

        let contents = self.registry.load_package(name, &version)?;
        let manifest = contents.manifest.clone();
        self.resolved.insert(name.clone(), self.out.packages.len());
        self.out.packages.push(ResolvedPackage {
            name: name.clone(),
            version: version.clone(),
            is_root,
            required_range: parent_range,
            conflict_resolution: None,
            contents: Some(contents),
        });

        self.visited_stack.push(name.clone());
        for dep in &manifest.packages {
            self.resolve_node(&dep.name, Some(dep.version.clone()), false)?;
        }
        if is_root && self.options.include_dev {
            for dep in &manifest.dev_packages {
                self.resolve_node(&dep.name, Some(dep.version.clone()), false)?;
            }
        }
        self.visited_stack.pop();
        Ok(())
    }
}
