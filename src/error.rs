use std::path::PathBuf;

use thiserror::Error;

/// The errors produced while building, simulating, persisting and analyzing a reaction network.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing, conflicting or out-of-range configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A reaction or an initial count references a species key that was never registered.
    #[error("unknown species: {0:?}")]
    UnknownSpecies(String),
    /// An internal invariant failed, such as a negative propensity or a non-causal history.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Failed to read or write a persisted file.
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A persisted or textual input file is malformed.
    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Error {
        Error::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
