//! Contract between the shim and a compiled engine build.
//!
//! An engine is consumed through three traits:
//!
//! - [`VirtualFs`] - the engine's in-process filesystem
//! - [`Engine`] - heap introspection, print sinks and the entry points used
//!   to run one command line
//! - [`EngineLoader`] - asynchronous instantiation with the hooks the shim
//!   needs wired in before the runtime starts
//!
//! The browser implementation lives in `ffmpeg-browser-wasm`; tests use an
//! in-process fake.

use crate::config::EngineConfig;
use crate::error::FsError;
use async_trait::async_trait;
use std::fmt;
use std::rc::Rc;

/// Receives one line of engine output.
pub type LineSink = Rc<dyn Fn(&str)>;

/// Result type for filesystem operations.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// The engine's virtual filesystem.
pub trait VirtualFs {
    /// Create a directory.
    fn mkdir(&mut self, path: &str) -> FsResult<()>;

    /// Mount origin-private persistent storage at `mount_point`.
    fn mount_persistent(&mut self, mount_point: &str) -> FsResult<()>;

    /// Unmount whatever is mounted at `mount_point`.
    fn unmount(&mut self, mount_point: &str) -> FsResult<()>;

    /// Write `data` to `path`, replacing any existing file.
    fn write_file(&mut self, path: &str, data: &[u8]) -> FsResult<()>;

    /// Read the whole file at `path`.
    fn read_file(&self, path: &str) -> FsResult<Vec<u8>>;

    /// Remove the file at `path`.
    fn unlink(&mut self, path: &str) -> FsResult<()>;

    /// Size in bytes of the file at `path`.
    fn file_size(&self, path: &str) -> FsResult<u64>;
}

/// How a call into the engine ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineException {
    /// The engine called `exit()`; carries the status.
    Exit(i32),
    /// Anything else the engine threw.
    Thrown(String),
}

impl fmt::Display for EngineException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineException::Exit(status) => write!(f, "ExitStatus({status})"),
            EngineException::Thrown(message) => f.write_str(message),
        }
    }
}

/// Outcome of one engine entry-point call.
pub type CallResult = std::result::Result<i32, EngineException>;

/// Entry points a loaded build exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryPointSupport {
    /// `callMain(args)` helper.
    pub call_main: bool,
    /// `arguments = args; run()` helper.
    pub set_arguments_and_run: bool,
    /// Raw `main(argc, argv)` export.
    pub raw_main: bool,
}

/// A loaded, initialized engine instance.
///
/// Only the entry points reported by [`entry_points`](Self::entry_points)
/// are ever called. The default bodies report the entry point as missing.
pub trait Engine: VirtualFs {
    /// Print sinks that were installed before a capture started.
    type Sinks;

    /// Entry points this build exposes.
    fn entry_points(&self) -> EntryPointSupport;

    /// Current length of the engine's heap in bytes.
    fn heap_size(&self) -> usize;

    /// Initial memory size the engine was built with, if it exposes one.
    fn initial_memory(&self) -> Option<usize>;

    /// Install new print sinks, returning the ones they replace.
    fn replace_sinks(&mut self, stdout: LineSink, stderr: LineSink) -> Self::Sinks;

    /// Reinstall sinks previously returned by [`replace_sinks`](Self::replace_sinks).
    fn restore_sinks(&mut self, previous: Self::Sinks);

    /// Run `main` through the `callMain` helper.
    fn call_main(&mut self, _args: &[String]) -> CallResult {
        Err(EngineException::Thrown("callMain is not available".into()))
    }

    /// Run `main` by setting the module arguments and calling `run`.
    fn run_with_arguments(&mut self, _args: &[String]) -> CallResult {
        Err(EngineException::Thrown("run is not available".into()))
    }

    /// Call the raw `main(argc, argv)` export.
    fn raw_main(&mut self, _argc: i32, _argv: u32) -> CallResult {
        Err(EngineException::Thrown("main is not exported".into()))
    }

    /// Allocate `size` bytes in linear memory. `None` when the build has no
    /// allocator or the allocation failed.
    fn malloc(&mut self, _size: usize) -> Option<u32> {
        None
    }

    /// Release memory obtained from [`malloc`](Self::malloc).
    fn free(&mut self, _ptr: u32) {}

    /// Write `value` NUL-terminated at `ptr`, writing at most `capacity` bytes.
    fn write_c_string(&mut self, _ptr: u32, _value: &str, _capacity: usize) {}

    /// Store a 32-bit little-endian integer at `ptr`.
    fn write_i32(&mut self, _ptr: u32, _value: i32) {}
}

/// Callbacks wired into the engine before instantiation.
pub struct LoadHooks<E> {
    /// Runs after the module exists but before its runtime starts.
    pub pre_run: Box<dyn FnOnce(&mut E)>,
    /// Receives stdout lines.
    pub print: LineSink,
    /// Receives stderr lines.
    pub print_err: LineSink,
    /// Signals that the runtime finished initializing.
    pub on_runtime_initialized: Box<dyn FnOnce()>,
}

impl<E> fmt::Debug for LoadHooks<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHooks").finish_non_exhaustive()
    }
}

/// Instantiates engines.
///
/// Implementations must never let the engine run `main` on startup, must call
/// `pre_run` before the runtime initializes and `on_runtime_initialized` once
/// it has, and resolve only after that.
#[async_trait(?Send)]
pub trait EngineLoader {
    /// Engine type produced by this loader.
    type Engine: Engine;

    /// Instantiate a fresh engine.
    async fn load(
        &self,
        config: &EngineConfig,
        hooks: LoadHooks<Self::Engine>,
    ) -> Result<Self::Engine, LoadError>;
}

/// Failure to obtain a running engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LoadError(pub String);

impl LoadError {
    /// Create a load error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
