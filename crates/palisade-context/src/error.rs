//! Error types for the permission context engine.

use std::path::PathBuf;

/// Errors from parsing, loading, or saving a permission context.
///
/// Parse errors always carry the offending token. Unknown *conditions* are
/// never reported here: they are stored verbatim and evaluate as
/// unsatisfiable, since they may belong to a newer engine's vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A name is not part of a fixed family (share, feature, socket, device).
    #[error("unknown {family} type `{name}`, valid types are: {}", valid.join(", "))]
    UnknownName {
        /// Family the name was looked up in.
        family: &'static str,
        /// The rejected name.
        name: String,
        /// Every name the family accepts, in registry order.
        valid: Vec<&'static str>,
    },

    /// A specifier does not follow its grammar.
    #[error("invalid {what} `{input}`: {reason}")]
    MalformedSyntax {
        /// Kind of specifier being parsed (e.g. "filesystem", "usb rule").
        what: &'static str,
        /// The offending input.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A filesystem location contains a `..` segment.
    #[error("filesystem location `{0}` contains \"..\"")]
    PathTraversal(String),

    /// A filesystem location normalizes to the root directory.
    #[error("--filesystem=/ is not available, use --filesystem=host for a similar result (got `{0}`)")]
    ReservedPath(String),

    /// A D-Bus name fails the bus name grammar.
    #[error("invalid dbus name `{name}`: {reason}")]
    InvalidBusName {
        /// The rejected name.
        name: String,
        /// Which grammar rule it violates.
        reason: &'static str,
    },

    /// A metadata document is not valid TOML.
    #[error("invalid metadata `{path}`: {source}")]
    InvalidMetadata {
        /// Path or label of the document.
        path: String,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// A metadata value has the wrong shape (e.g. a number where a list is expected).
    #[error("metadata key `{group}.{key}` must be {expected}")]
    MetadataType {
        /// Group (TOML table) containing the key.
        group: String,
        /// The offending key.
        key: String,
        /// Shape the key must have.
        expected: &'static str,
    },

    /// A metadata document could not be rendered.
    #[error("failed to serialize metadata: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Reading an override layer or list file failed.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl ContextError {
    pub(crate) fn malformed(
        what: &'static str,
        input: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedSyntax {
            what,
            input: input.into(),
            reason: reason.into(),
        }
    }
}
