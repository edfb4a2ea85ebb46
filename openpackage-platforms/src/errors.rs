//! Errors!

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::{PlatformId, UniversalSubdir};

/// A Result returned by openpackage-platforms
pub type Result<T> = std::result::Result<T, PlatformError>;

/// An Error/Diagnostic returned by openpackage-platforms
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum PlatformError {
    /// Asked to map a subdir the platform has no layout for
    #[error("{platform} has no native location for {subdir} files")]
    UnsupportedSubdir {
        /// The platform we were mapping onto
        platform: PlatformId,
        /// The universal subdir with no mapping
        subdir: UniversalSubdir,
    },

    /// A path that doesn't live inside any recognized platform layout
    #[error("{path} is not inside any recognized platform directory")]
    NotAPlatformPath {
        /// The path we failed to map back
        path: Utf8PathBuf,
    },

    /// A string that isn't the id of any known platform
    #[error("{input} is not a recognized platform")]
    #[diagnostic(help(
        "known platforms: augment, claude, codex, cursor, factory, gemini, kilo, kiro, opencode, qwen, roo, warp, windsurf"
    ))]
    UnknownPlatform {
        /// The string we failed to parse
        input: String,
    },
}
