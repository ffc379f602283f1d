use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions that abort the whole run. Everything recoverable goes
/// through the warning sink instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {msg}")]
    Config { msg: String },

    #[error("analysis error: {msg}")]
    Analysis { msg: String },

    #[error("rewrite error: {msg}")]
    Rewrite { msg: String },

    #[error("error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config { msg: msg.into() }
    }

    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::Analysis { msg: msg.into() }
    }

    pub fn rewrite(msg: impl Into<String>) -> Self {
        Self::Rewrite { msg: msg.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
