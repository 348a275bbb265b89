//! Error types for the engine shim.

use thiserror::Error;

/// Result type for shim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for shim operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The engine module failed to load or its runtime never became ready.
    /// Fatal for the instance: a new instance is required to retry.
    #[error("Engine initialization failed: {0}")]
    Initialization(String),

    /// An operation was attempted outside the Ready state.
    #[error("Engine not initialized. Call initialize() first.")]
    NotInitialized,

    /// The engine ran and reported failure.
    #[error("Engine exited with code {exit_code}: {}", summarize(.stderr))]
    EngineExecution {
        /// Exit code reported by the engine.
        exit_code: i32,
        /// Lines captured from the engine's stderr during the call.
        stderr: Vec<String>,
    },

    /// The loaded engine build lacks an entry point or allocation primitive
    /// this shim relies on.
    #[error("Incompatible engine build: {0}")]
    EnvironmentDefect(String),

    /// A virtual filesystem operation needed for the result failed.
    #[error(transparent)]
    Filesystem(#[from] FsError),

    /// Configuration could not be merged or parsed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Exit code of an engine failure, if this is one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::EngineExecution { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Failure reported by the engine's virtual filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op} '{path}' failed: {message}")]
pub struct FsError {
    /// Filesystem operation name (`mkdir`, `writeFile`, ...).
    pub op: &'static str,
    /// Path the operation targeted.
    pub path: String,
    /// Message reported by the engine.
    pub message: String,
}

impl FsError {
    /// Create a filesystem error.
    pub fn new(op: &'static str, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            message: message.into(),
        }
    }
}

fn summarize(stderr: &[String]) -> String {
    stderr
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())
        .cloned()
        .unwrap_or_else(|| "no diagnostic output".to_string())
}
