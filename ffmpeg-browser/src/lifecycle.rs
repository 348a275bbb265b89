//! Lifecycle manager: owns one engine instance and exposes the public API.

use crate::command::{CommandBuilder, ProcessOptions};
use crate::config::EngineConfig;
use crate::engine::{Engine, EngineLoader, LineSink, LoadHooks};
use crate::error::{Error, Result};
use crate::fs::{FilesystemBridge, MountState};
use crate::runner::{EntryPoint, InvocationResult, InvocationRunner};
use crate::telemetry::{Clock, MemoryUsage, MonotonicClock, Telemetry, TelemetryReport};
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Lifecycle state of a [`BrowserFfmpeg`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    /// No engine loaded yet.
    Uninitialized,
    /// Engine load in progress.
    Initializing,
    /// Engine loaded and accepting work.
    Ready,
    /// Engine load failed. The instance cannot be reused.
    Failed,
    /// Engine released by `terminate`.
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Result of one successful `process_media` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Bytes of the produced file.
    pub data: Vec<u8>,
    /// Wall time of the whole call, including file transfer.
    pub processing_time: Duration,
    /// Memory usage after processing.
    pub memory_usage: MemoryUsage,
    /// Exact argument list handed to the engine.
    pub command: Vec<String>,
}

impl ProcessOutput {
    /// Processing time in fractional milliseconds.
    pub fn processing_time_ms(&self) -> f64 {
        self.processing_time.as_secs_f64() * 1000.0
    }

    /// The argument list joined with spaces, for display.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Resources that exist only while the engine is loaded.
struct Session<E> {
    engine: E,
    runner: InvocationRunner,
    fs: FilesystemBridge,
    telemetry: Telemetry,
}

impl<E: Engine> Session<E> {
    fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage::from_bytes(self.engine.heap_size(), self.engine.initial_memory())
    }

    fn snapshot(&mut self, operation: &str) {
        let usage = self.memory_usage();
        self.telemetry.log_snapshot(operation, usage);
    }
}

/// Owns a single engine and drives it through
/// `initialize` → `process_media`* → `terminate`.
///
/// Calls take `&mut self`, so one instance never runs two invocations at
/// once. Use one instance per worker for parallelism.
pub struct BrowserFfmpeg<L: EngineLoader> {
    loader: L,
    config: EngineConfig,
    clock: Rc<dyn Clock>,
    builder: CommandBuilder,
    state: LifecycleState,
    session: Option<Session<L::Engine>>,
    /// Telemetry of the last terminated session and whether it had
    /// persistent storage.
    retired: Option<(Telemetry, bool)>,
}

impl<L> BrowserFfmpeg<L>
where
    L: EngineLoader + 'static,
    L::Engine: 'static,
{
    /// Create an instance with default configuration and the `std` clock.
    pub fn new(loader: L) -> Self {
        Self::with_clock(loader, EngineConfig::default(), Rc::new(MonotonicClock::new()))
    }

    /// Create an instance with explicit configuration and clock.
    pub fn with_clock(loader: L, config: EngineConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            loader,
            config,
            clock,
            builder: CommandBuilder::new(),
            state: LifecycleState::Uninitialized,
            session: None,
            retired: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether the engine is ready for work.
    pub fn is_ready(&self) -> bool {
        self.state == LifecycleState::Ready
    }

    /// Mount state of the current session.
    pub fn mount_state(&self) -> MountState {
        self.session
            .as_ref()
            .map(|s| s.fs.mount_state())
            .unwrap_or_default()
    }

    /// Entry point selected for the current session.
    pub fn entry_point(&self) -> Option<EntryPoint> {
        self.session.as_ref().map(|s| s.runner.entry_point())
    }

    /// Configuration in effect for the current or next session.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The loader used for new sessions.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Load the engine.
    ///
    /// `overrides` is shallow-merged over the instance configuration. Calling
    /// this on a ready instance does nothing and returns `Ok(true)`; after a
    /// failed load the instance must be replaced.
    pub async fn initialize(&mut self, overrides: Option<Value>) -> Result<bool> {
        match self.state {
            LifecycleState::Ready => {
                tracing::debug!("Engine already initialized");
                return Ok(true);
            }
            LifecycleState::Failed => {
                return Err(Error::Initialization(
                    "a previous load failed; create a new instance to retry".to_string(),
                ));
            }
            LifecycleState::Initializing => {
                return Err(Error::Initialization(
                    "initialization already in progress".to_string(),
                ));
            }
            LifecycleState::Uninitialized | LifecycleState::Terminated => {}
        }

        let config = match overrides {
            Some(overrides) => self.config.with_overrides(&overrides)?,
            None => self.config.clone(),
        };

        self.state = LifecycleState::Initializing;
        match self.load_session(&config).await {
            Ok(session) => {
                tracing::info!(
                    mount = %session.fs.mount_state(),
                    entry_point = ?session.runner.entry_point(),
                    "Engine initialized"
                );
                self.config = config;
                self.session = Some(session);
                self.retired = None;
                self.state = LifecycleState::Ready;
                Ok(true)
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to initialize engine");
                self.state = LifecycleState::Failed;
                Err(err)
            }
        }
    }

    async fn load_session(&self, config: &EngineConfig) -> Result<Session<L::Engine>> {
        let fs = Rc::new(RefCell::new(FilesystemBridge::new(
            config.persistent_mount.clone(),
            config.scratch_dir.clone(),
        )));
        let ready = Rc::new(Cell::new(false));

        let hooks = {
            let fs = Rc::clone(&fs);
            let ready = Rc::clone(&ready);
            let print: LineSink =
                Rc::new(|line: &str| tracing::info!(target: "ffmpeg_browser::engine", "{line}"));
            let print_err: LineSink =
                Rc::new(|line: &str| tracing::error!(target: "ffmpeg_browser::engine", "{line}"));
            LoadHooks {
                pre_run: Box::new(move |engine: &mut L::Engine| {
                    fs.borrow_mut().setup(engine);
                }),
                print,
                print_err,
                on_runtime_initialized: Box::new(move || ready.set(true)),
            }
        };

        let mut engine = self
            .loader
            .load(config, hooks)
            .await
            .map_err(|err| Error::Initialization(err.to_string()))?;

        if !ready.get() {
            return Err(Error::Initialization(
                "engine resolved without signalling runtime initialization".to_string(),
            ));
        }

        let entry_point = EntryPoint::select(engine.entry_points())?;

        let mut fs = fs.borrow().clone();
        if fs.mount_state() == MountState::Unmounted {
            tracing::debug!("Engine skipped the pre-run hook, setting up filesystem now");
            fs.setup(&mut engine);
        }

        Ok(Session {
            engine,
            runner: InvocationRunner::new(entry_point, config.program_name.clone()),
            fs,
            telemetry: Telemetry::start(Rc::clone(&self.clock), config.memory_warning_ratio),
        })
    }

    /// Convert `input` using `options` and return the produced file.
    ///
    /// `output_format` names the output file's extension, which the engine
    /// uses to pick a container. Temporary files are removed whether or not
    /// the engine succeeds.
    pub async fn process_media(
        &mut self,
        input: &[u8],
        output_format: &str,
        options: &ProcessOptions,
    ) -> Result<ProcessOutput> {
        let clock = Rc::clone(&self.clock);
        let builder = self.builder;
        let session = self.ready_session()?;

        let started = clock.now();
        session.snapshot("start-processing");

        let input_path = session
            .fs
            .write_input(&mut session.engine, input, clock.unix_millis())?;
        let output_path = session.fs.output_path(output_format, clock.unix_millis());
        let command = builder.build(&input_path, &output_path, options);
        tracing::debug!(command = %command.join(" "), "Processing media");

        let outcome = session
            .runner
            .run(&mut session.engine, &command, clock.as_ref())
            .and_then(|mut result| {
                if !result.is_success() {
                    return Err(result.into_error());
                }
                result.output = Some(session.fs.read_output(&session.engine, &output_path)?);
                Ok(result)
            });

        session.fs.remove(&mut session.engine, &input_path);
        session.fs.remove(&mut session.engine, &output_path);

        let data = match outcome {
            Ok(result) => result.output.unwrap_or_default(),
            Err(err) => {
                tracing::error!(error = %err, "Processing failed");
                return Err(err);
            }
        };

        let processing_time = clock.now().saturating_sub(started);
        session.snapshot("end-processing");

        Ok(ProcessOutput {
            data,
            processing_time,
            memory_usage: session.memory_usage(),
            command,
        })
    }

    /// Run a raw argument list against the ready engine.
    ///
    /// When the invocation succeeds and its last argument names a file the
    /// engine wrote, that file is read into [`InvocationResult::output`]. The
    /// file itself is left in place.
    pub async fn execute(&mut self, args: &[String]) -> Result<InvocationResult> {
        let clock = Rc::clone(&self.clock);
        let session = self.ready_session()?;
        session.snapshot("execute");
        let mut result = session.runner.run(&mut session.engine, args, clock.as_ref())?;

        if result.is_success() {
            if let Some(path) = args.last().filter(|arg| !arg.starts_with('-')) {
                result.output = session.fs.read_output(&session.engine, path).ok();
            }
        }
        Ok(result)
    }

    /// Current memory usage, if the engine is loaded.
    pub fn memory_usage(&self) -> Option<MemoryUsage> {
        self.session.as_ref().map(Session::memory_usage)
    }

    /// Telemetry for the current session, or for the last one after
    /// `terminate`. `None` if no engine was ever loaded.
    pub fn stats(&self) -> Option<TelemetryReport> {
        if let Some(session) = &self.session {
            return Some(
                session
                    .telemetry
                    .report(session.fs.mount_state().is_persistent(), self.is_ready()),
            );
        }
        self.retired
            .as_ref()
            .map(|(telemetry, persistent)| telemetry.report(*persistent, false))
    }

    /// Release the engine. Safe to call in any state.
    pub async fn terminate(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.fs.unmount(&mut session.engine);
            tracing::info!(
                snapshots = session.telemetry.snapshots().len(),
                "Engine terminated"
            );
            let persistent = session.fs.mount_state().is_persistent();
            self.retired = Some((session.telemetry, persistent));
        }
        if self.state != LifecycleState::Failed {
            self.state = LifecycleState::Terminated;
        }
    }

    fn ready_session(&mut self) -> Result<&mut Session<L::Engine>> {
        match (self.state, self.session.as_mut()) {
            (LifecycleState::Ready, Some(session)) => Ok(session),
            _ => Err(Error::NotInitialized),
        }
    }
}

impl<L: EngineLoader> fmt::Debug for BrowserFfmpeg<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserFfmpeg")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
