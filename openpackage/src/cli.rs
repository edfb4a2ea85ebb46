//! All the clap stuff for parsing/documenting the cli

use clap::{
    builder::{PossibleValuesParser, TypedValueParser},
    Args, Parser, Subcommand,
};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Clone, Debug)]
#[clap(version)]
#[clap(bin_name = "opkg")]
/// Author AI-assistant configuration once, install it everywhere.
///
/// See 'save' and 'install' for the two most important subcommands.
pub struct Cli {
    /// Subcommands
    #[clap(subcommand)]
    pub command: Commands,

    /// How verbose logging should be (log level)
    #[clap(long, short)]
    #[clap(default_value_t = LevelFilter::WARN)]
    #[clap(value_parser = PossibleValuesParser::new(["off", "error", "warn", "info", "debug", "trace"]).map(|s| s.parse::<LevelFilter>().expect("possible values are valid")))]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub verbose: LevelFilter,
}

/// The opkg subcommands
#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Snapshot a package version into the local registry
    ///
    /// Discovers files under ai/ and every detected platform's native
    /// directories, resolves conflicts between divergent platform copies,
    /// and writes a versioned snapshot. By default the snapshot gets a
    /// WIP (work-in-progress) version tagged with this workspace; pass
    /// the literal word 'stable' to promote or bump to a stable version.
    #[clap(disable_version_flag = true)]
    Save(SaveArgs),

    /// Resolve and install packages across every detected platform
    ///
    /// With no arguments, installs everything the workspace root
    /// package.yml declares. Each package's files are materialized into
    /// each detected platform's native layout, and a per-package
    /// package.index.yml records what went where.
    #[clap(disable_version_flag = true)]
    Install(InstallArgs),

    /// Remove a package's installed files from the workspace
    #[clap(disable_version_flag = true)]
    Uninstall(UninstallArgs),
}

/// Arguments to `opkg save`
#[derive(Args, Clone, Debug)]
pub struct SaveArgs {
    /// The package to save (`name` or `name@version`)
    pub package: String,

    /// Optional source directory, and/or the literal word `stable`
    #[clap(value_name = "DIR|stable")]
    #[clap(num_args = 0..=2)]
    pub rest: Vec<String>,

    /// Overwrite an existing stable version
    #[clap(long, short = 'f')]
    pub force: bool,

    /// Bump the version before saving
    #[clap(long, short = 'b', value_name = "patch|minor|major")]
    pub bump: Option<String>,

    /// Save these packages first and depend on them
    #[clap(long, num_args = 1..)]
    pub include: Vec<String>,

    /// Save these packages first and depend on them as dev deps
    #[clap(long = "include-dev", num_args = 1..)]
    pub include_dev: Vec<String>,

    /// Rename the package as part of this save (`newName[@version]`)
    #[clap(long, value_name = "NEW_NAME[@VERSION]")]
    pub rename: Option<String>,
}

/// Arguments to `opkg install`
#[derive(Args, Clone, Debug)]
pub struct InstallArgs {
    /// Packages to install (`name` or `name@range`); empty means
    /// everything in the root package.yml
    pub packages: Vec<String>,

    /// Resolve from the local registry only
    #[clap(long)]
    pub local: bool,

    /// Prefer the remote registry (requires a configured remote)
    #[clap(long, conflicts_with = "local")]
    pub remote: bool,

    /// Also install dev-packages
    #[clap(long)]
    pub dev: bool,

    /// Reinstall and overwrite workspace edits without prompting
    #[clap(long, short = 'f')]
    pub force: bool,

    /// Print the plan without writing anything
    #[clap(long)]
    pub dry_run: bool,
}

/// Arguments to `opkg uninstall`
#[derive(Args, Clone, Debug)]
pub struct UninstallArgs {
    /// The package to remove
    pub package: String,

    /// Also remove dependencies nothing else needs
    #[clap(long, short = 'r')]
    pub recursive: bool,

    /// Keep the canonical .openpackage/packages/<name>/ data
    #[clap(long)]
    pub keep_data: bool,

    /// Print the plan without removing anything
    #[clap(long)]
    pub dry_run: bool,
}
