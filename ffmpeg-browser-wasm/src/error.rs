//! WASM error types.

use js_sys::Array;
use thiserror::Error;
use wasm_bindgen::prelude::*;

/// Error type for WASM operations. Rejected promises carry one of these.
#[wasm_bindgen]
#[derive(Debug, Clone, Error)]
#[error("[{code:?}] {message}")]
pub struct WasmError {
    message: String,
    code: ErrorCode,
    exit_code: Option<i32>,
    stderr: Vec<String>,
}

/// Error codes for categorizing errors.
#[wasm_bindgen]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unknown error.
    Unknown = 0,
    /// The engine failed to load.
    Initialization = 1,
    /// The engine is not loaded.
    NotInitialized = 2,
    /// The engine ran and reported failure.
    EngineExecution = 3,
    /// The engine build lacks a required entry point or allocator.
    EnvironmentDefect = 4,
    /// A filesystem operation failed.
    Filesystem = 5,
    /// Invalid configuration or options.
    InvalidConfig = 6,
    /// Another call is still running on this instance.
    Busy = 7,
    /// Browser feature not available.
    BrowserNotSupported = 8,
}

#[wasm_bindgen]
impl WasmError {
    /// Create a new error with message and code.
    #[wasm_bindgen(constructor)]
    pub fn new(message: &str, code: ErrorCode) -> Self {
        Self {
            message: message.to_string(),
            code,
            exit_code: None,
            stderr: Vec::new(),
        }
    }

    /// Get the error message.
    #[wasm_bindgen(getter)]
    pub fn message(&self) -> String {
        self.message.clone()
    }

    /// Get the error code.
    #[wasm_bindgen(getter)]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Engine exit code, for engine failures.
    #[wasm_bindgen(getter, js_name = exitCode)]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Engine stderr lines, for engine failures.
    #[wasm_bindgen(getter)]
    pub fn stderr(&self) -> Array {
        self.stderr.iter().map(|line| JsValue::from_str(line)).collect()
    }

    /// Create a busy error.
    pub(crate) fn busy() -> Self {
        Self::new(
            "Another operation is still running on this instance",
            ErrorCode::Busy,
        )
    }

    /// Create an invalid config error.
    pub(crate) fn invalid_config(msg: &str) -> Self {
        Self::new(msg, ErrorCode::InvalidConfig)
    }

    /// Create a browser not supported error.
    pub(crate) fn browser_not_supported(msg: &str) -> Self {
        Self::new(msg, ErrorCode::BrowserNotSupported)
    }
}

impl From<ffmpeg_browser::Error> for WasmError {
    fn from(err: ffmpeg_browser::Error) -> Self {
        use ffmpeg_browser::Error;

        let code = match &err {
            Error::Initialization(_) => ErrorCode::Initialization,
            Error::NotInitialized => ErrorCode::NotInitialized,
            Error::EngineExecution { .. } => ErrorCode::EngineExecution,
            Error::EnvironmentDefect(_) => ErrorCode::EnvironmentDefect,
            Error::Filesystem(_) => ErrorCode::Filesystem,
            Error::Config(_) => ErrorCode::InvalidConfig,
        };
        let mut wasm = Self::new(&err.to_string(), code);
        if let Error::EngineExecution { exit_code, stderr } = err {
            wasm.exit_code = Some(exit_code);
            wasm.stderr = stderr;
        }
        wasm
    }
}

impl From<serde_wasm_bindgen::Error> for WasmError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        Self::invalid_config(&err.to_string())
    }
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;
