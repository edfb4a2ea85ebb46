//! Errors!
//!
//! Every error kind the CLI needs to distinguish gets its own variant here;
//! errors from the schema and platforms crates fold in transparently.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// An alias for the common Result type for this crate
pub type OpkgResult<T> = std::result::Result<T, OpkgError>;

/// Errors opkg can have
#[derive(Debug, Error, Diagnostic)]
pub enum OpkgError {
    /// random i/o error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// random axoasset error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Asset(#[from] axoasset::AxoassetError),

    /// random schema error (bad names, bad yaml)
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] openpackage_schema::SchemaError),

    /// random platform mapping error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Platform(#[from] openpackage_platforms::PlatformError),

    /// random dialoguer error
    #[error(transparent)]
    DialoguerError(#[from] dialoguer::Error),

    /// A version string that isn't semver
    #[error("{version} is not a valid semver version")]
    InvalidVersion {
        /// The offending version string
        version: String,
        /// The underlying parse error
        #[source]
        details: semver::Error,
    },

    /// A range string that isn't a semver requirement
    #[error("{range} is not a valid version range")]
    InvalidRange {
        /// The offending range string
        range: String,
        /// The underlying parse error
        #[source]
        details: semver::Error,
    },

    /// A bump kind that isn't patch/minor/major
    #[error("{input} is not a recognized bump kind")]
    #[diagnostic(help("recognized values are: patch, minor, major"))]
    InvalidBumpKind {
        /// value provided
        input: String,
    },

    /// A save was pointed at a directory that doesn't exist
    #[error("{path} is not a directory")]
    InvalidDirectory {
        /// The path that was supposed to be the save source
        path: Utf8PathBuf,
    },

    /// A package that exists nowhere we looked
    #[error("package {name} was not found{chain_rendered}", chain_rendered = render_chain(.chain))]
    #[diagnostic(help("run 'opkg save {name}' to create it, or check the spelling"))]
    PackageNotFound {
        /// Name of the package
        name: String,
        /// Dependency chain that led here, when raised inside the resolver
        chain: Vec<String>,
    },

    /// A package that exists, but not at any acceptable version
    #[error("no version of {name} satisfies {ranges:?}{chain_rendered}", chain_rendered = render_chain(.chain))]
    #[diagnostic(help("available versions: {}", available.join(", ")))]
    VersionNotFound {
        /// Name of the package
        name: String,
        /// The ranges we tried to satisfy
        ranges: Vec<String>,
        /// Versions that do exist
        available: Vec<String>,
        /// Dependency chain that led here
        chain: Vec<String>,
    },

    /// Accumulated ranges with an empty intersection
    #[error("conflicting requirements for {name}: {ranges:?}")]
    #[diagnostic(help("available versions: {}", available.join(", ")))]
    VersionConflict {
        /// Name of the package
        name: String,
        /// The mutually unsatisfiable ranges
        ranges: Vec<String>,
        /// Versions that do exist
        available: Vec<String>,
    },

    /// Saving over an existing stable version without --force
    #[error("{name}@{version} already exists in the registry")]
    #[diagnostic(help("pass --force to overwrite, or bump with -b patch|minor|major"))]
    VersionExists {
        /// Name of the package
        name: String,
        /// The version that's already there
        version: String,
    },

    /// The resolver walked into its own tail
    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency {
        /// The cycle, starting and ending at the repeated package
        cycle: Vec<String>,
    },

    /// Disk failure under the per-user registry
    #[error("registry i/o failure at {path}")]
    RegistryIo {
        /// Where under $HOME/.openpackage things went wrong
        path: Utf8PathBuf,
        /// The underlying issue
        #[source]
        details: std::io::Error,
    },

    /// Disk failure inside the workspace
    #[error("workspace i/o failure at {path}")]
    Filesystem {
        /// The workspace path involved
        path: Utf8PathBuf,
        /// The underlying issue
        #[source]
        details: std::io::Error,
    },

    /// The user backed out of a prompt; the CLI exits 0 on this
    #[error("operation cancelled")]
    UserCancellation,

    /// We couldn't figure out where $HOME is
    #[error("couldn't determine a home directory for the registry")]
    #[diagnostic(help("set $HOME and try again"))]
    NoHomeDir,

    /// A save that found no files and no root-file section to snapshot
    #[error("nothing to save for {name}")]
    #[diagnostic(help(
        "add files under ai/ (or a platform dir), or add a '<!-- package: {name} -->' section to a root file"
    ))]
    NothingToSave {
        /// Name of the package
        name: String,
    },

    /// A workspace path that isn't valid UTF-8, which we don't support
    #[error("workspace path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// Lossy rendering of the path
        path: String,
    },
}

fn render_chain(chain: &[String]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" (required via {})", chain.join(" -> "))
    }
}

impl OpkgError {
    /// Whether this error is the user saying "no thanks" rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, OpkgError::UserCancellation)
    }
}
