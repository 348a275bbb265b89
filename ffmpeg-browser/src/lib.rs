//! Lifecycle, filesystem and invocation shim for Emscripten builds of FFmpeg.
//!
//! This crate drives an FFmpeg engine compiled to WebAssembly: it loads the
//! module, mounts storage, turns structured options into a command line,
//! runs it through whichever entry point the build exposes, and reads the
//! produced file back.
//!
//! # Features
//!
//! - One engine per [`BrowserFfmpeg`] with an explicit lifecycle
//! - Persistent storage with an in-memory fallback
//! - Entry-point selection across `callMain`, `run` and raw `main`
//! - Memory snapshots with a high-usage warning
//! - A worker smoke harness for validating engine builds
//!
//! The crate is host-agnostic. Engines are reached through the
//! [`Engine`] and [`EngineLoader`] traits; `ffmpeg-browser-wasm` implements
//! them over the Emscripten module object.
//!
//! # Example
//!
//! ```ignore
//! use ffmpeg_browser::{BrowserFfmpeg, ProcessOptions};
//!
//! let mut ffmpeg = BrowserFfmpeg::new(loader);
//! ffmpeg.initialize(None).await?;
//!
//! let options = ProcessOptions::new().with_format("webm").with_video_bitrate("1000k");
//! let output = ffmpeg.process_media(&input, "webm", &options).await?;
//! println!("{} bytes in {:.1} ms", output.data.len(), output.processing_time_ms());
//!
//! ffmpeg.terminate().await;
//! ```

#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs;
pub mod lifecycle;
pub mod runner;
pub mod smoke;
pub mod telemetry;

pub use command::{CommandBuilder, OutputPreset, ProcessOptions};
pub use config::EngineConfig;
pub use engine::{
    CallResult, Engine, EngineException, EngineLoader, EntryPointSupport, LineSink, LoadError,
    LoadHooks, VirtualFs,
};
pub use error::{Error, FsError, Result};
pub use fs::{FilesystemBridge, MountState};
pub use lifecycle::{BrowserFfmpeg, LifecycleState, ProcessOutput};
pub use runner::{EntryPoint, InvocationResult, InvocationRunner};
pub use smoke::{run_smoke_suite, HarnessReport, WorkerRequest, WorkerResponse};
pub use telemetry::{Clock, MemorySnapshot, MemoryUsage, MonotonicClock, Telemetry, TelemetryReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
