use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the pipeline and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("invalid recording at {}: {reason}", path.display())]
    Recording { path: PathBuf, reason: String },

    #[error("property `{0}` not found")]
    MissingProperty(String),

    #[error("property `{name}` is not of type {expected}")]
    PropertyType { name: String, expected: &'static str },

    #[error("property `{name}` value {value} outside {min}..={max}")]
    PropertyRange {
        name: String,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("end frame {end} precedes begin frame {begin}")]
    InvalidWindow { begin: u32, end: u32 },

    #[error("{0} worker has shut down")]
    Disconnected(&'static str),

    #[error("tracking ready notified but no tracking result is available")]
    MissingTracking,

    #[error("collaborator contract violated: {0}")]
    Contract(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(what: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Json {
            what: what.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
