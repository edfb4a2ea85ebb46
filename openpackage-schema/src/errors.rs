//! Errors!

use miette::Diagnostic;
use thiserror::Error;

/// A Result returned by openpackage-schema
pub type Result<T> = std::result::Result<T, SchemaError>;

/// An Error/Diagnostic returned by openpackage-schema
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum SchemaError {
    /// A package name that doesn't fit either the unscoped or scoped grammar
    #[error("{name} is not a valid package name")]
    #[diagnostic(help(
        "names are lowercase alphanumerics and dashes, optionally scoped as @scope/name"
    ))]
    InvalidPackageName {
        /// The offending name
        name: String,
    },

    /// A package spec whose version half failed to parse
    #[error("{spec} has an invalid version component")]
    #[diagnostic(help("specs look like name, name@1.2.3, or name@^1.0"))]
    InvalidPackageSpec {
        /// The full spec string
        spec: String,
    },

    /// A YAML document that didn't parse as the expected shape
    #[error("couldn't parse {origin}")]
    YamlParse {
        /// which file (or pseudo-file) we were parsing
        origin: String,
        /// The underlying issue
        #[source]
        details: serde_yml::Error,
    },

    /// A YAML document that didn't serialize (always a bug)
    #[error("couldn't serialize {origin}")]
    YamlSerialize {
        /// which file (or pseudo-file) we were producing
        origin: String,
        /// The underlying issue
        #[source]
        details: serde_yml::Error,
    },
}
