//! Error kinds for the policy source analysis engine.
//!
//! Mirrors the propagation rules of the original `selint`: fatal setup
//! errors abort the analysis, recoverable parsing errors are logged and
//! the offending item is skipped (see each call site).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("subprocess \"{command}\" failed: {detail}")]
    Subprocess { command: String, detail: String },

    #[error("macro error at {file}:{line}: {detail}")]
    Macro {
        file: PathBuf,
        line: usize,
        detail: String,
    },

    #[error("mapping error: could not expand rule \"{rule}\": {detail}")]
    Mapping { rule: String, detail: String },

    #[error("plugin \"{plugin}\" failed: {detail}")]
    Plugin { plugin: String, detail: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PolicyError>;
