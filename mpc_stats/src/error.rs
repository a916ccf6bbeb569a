use std::{io, path::PathBuf};

use mpc::ProtocolError;
use thiserror::Error;

/// Failures while loading a study, a query or a party's input files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{file}:{line}: {msg}")]
    Csv { file: String, line: usize, msg: String },
    #[error("lookup table {file}: {msg}")]
    Table { file: String, msg: String },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
