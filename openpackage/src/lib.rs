#![deny(missing_docs)]
#![allow(clippy::result_large_err)]

//! # openpackage
//!
//! A workspace-level package manager for AI coding-assistant
//! configuration: prompt rules, commands, agents, and memory files that
//! each assistant expects in its own on-disk layout. Authors write content
//! once in a neutral layout; openpackage snapshots versioned packages into
//! a per-user registry, resolves dependency graphs, and keeps every
//! detected platform's native directory mirrored from the same canonical
//! content.
//!
//! The main entry points are [`do_save`][], [`do_install`][], and
//! [`do_uninstall`][]; the `opkg` binary is a thin clap wrapper over them.

pub mod arbitrate;
pub mod discovery;
pub mod errors;
pub mod index;
pub mod install;
pub mod markers;
pub mod prompt;
pub mod registry;
pub mod resolve;
pub mod save;
pub mod sync;
pub mod uninstall;
pub mod version;
pub mod workspace;

use std::collections::BTreeMap;

use openpackage_schema::{PackageName, PackageSpec};
use tracing::warn;

use errors::{OpkgError, OpkgResult};
use install::{ConflictStrategy, InstallOptions, InstallReport};
use registry::Registry;
use resolve::{ResolutionMode, ResolveOptions};
use save::{SaveOptions, SaveReport};
use uninstall::{UninstallOptions, UninstallReport};
use workspace::Workspace;

/// Save a package from the current workspace into the local registry.
///
/// Interactive arbitration is wired in automatically when a terminal is
/// attended and `--force` wasn't passed.
pub fn do_save(input: &str, options: &SaveOptions) -> OpkgResult<SaveReport> {
    let registry = Registry::default_location()?;
    let workspace = Workspace::current()?;
    let chooser = prompt::arbitration_chooser;
    if prompt::interactive() && !options.force {
        save_package_with_chooser(&registry, &workspace, input, options, Some(&chooser))
    } else {
        save_package_with_chooser(&registry, &workspace, input, options, None)
    }
}

fn save_package_with_chooser(
    registry: &Registry,
    workspace: &Workspace,
    input: &str,
    options: &SaveOptions,
    chooser: Option<&arbitrate::Chooser<'_>>,
) -> OpkgResult<SaveReport> {
    save::save_package(registry, workspace, input, options, chooser)
}

/// Settings for [`do_install`][]
#[derive(Debug, Clone, Default)]
pub struct InstallArgs {
    /// Resolve from the local registry only
    pub local: bool,
    /// Also install the root manifest's dev-packages
    pub dev: bool,
    /// Reinstall and overwrite without prompting
    pub force: bool,
    /// Plan only; write nothing
    pub dry_run: bool,
}

/// Install packages (the given specs, or everything the root manifest
/// declares when none are given) into the current workspace.
pub fn do_install(specs: &[String], args: &InstallArgs) -> OpkgResult<InstallReport> {
    let registry = Registry::default_location()?;
    let mut workspace = Workspace::current()?;

    let mut requests: Vec<(PackageName, Option<String>)> = vec![];
    if specs.is_empty() {
        let Some(root) = workspace.load_root_manifest()? else {
            warn!("no root package.yml and no packages requested, nothing to do");
            return Ok(InstallReport::default());
        };
        let mut deps: Vec<_> = root.packages.iter().collect();
        if args.dev {
            deps.extend(root.dev_packages.iter());
        }
        for dep in deps {
            requests.push((dep.name.clone(), Some(dep.version.clone())));
        }
    } else {
        for spec in specs {
            let spec = PackageSpec::parse(spec)?;
            requests.push((spec.name, spec.version));
        }
    }

    let resolution = resolve::resolve(
        &registry,
        &workspace,
        &requests,
        BTreeMap::new(),
        ResolveOptions {
            mode: if args.local {
                ResolutionMode::LocalOnly
            } else {
                ResolutionMode::Default
            },
            include_dev: args.dev,
            force: args.force,
        },
    )?;

    // the remote pull path is handled by an external collaborator; from
    // the core's point of view a missing dependency is simply not found
    if let Some((name, _)) = resolution.missing.first() {
        return Err(OpkgError::PackageNotFound {
            name: name.to_string(),
            chain: vec![],
        });
    }

    let report = install::install_packages(
        &workspace,
        &resolution,
        &InstallOptions {
            conflict_strategy: if args.force {
                ConflictStrategy::Overwrite
            } else {
                ConflictStrategy::Ask
            },
            dry_run: args.dry_run,
        },
    )?;

    // explicitly requested packages become root manifest entries
    if !args.dry_run {
        for (name, requested_range) in &requests {
            if !specs.is_empty() {
                if let Some(resolved) = resolution.get(name) {
                    let range = requested_range.clone().unwrap_or_else(|| {
                        format!("^{}", version::extract_base_version(&resolved.version))
                    });
                    workspace.add_package_to_root(name, &range, false)?;
                }
            }
        }
        workspace.refresh_platforms();
    }

    Ok(report)
}

/// Remove a package (and optionally its dangling deps) from the current
/// workspace.
pub fn do_uninstall(name: &str, options: &UninstallOptions) -> OpkgResult<UninstallReport> {
    let workspace = Workspace::current()?;
    let name = PackageName::parse(name)?;
    uninstall::uninstall_package(&workspace, &name, options)
}
