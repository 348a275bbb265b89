//! Invocation runner: executes one argument list against a loaded engine.

use crate::engine::{CallResult, Engine, EngineException, EntryPointSupport, LineSink};
use crate::error::{Error, Result};
use crate::telemetry::Clock;
use regex::Regex;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Duration;

/// Size of one argv pointer slot in wasm32 linear memory.
const POINTER_SIZE: usize = 4;

/// Calling convention used to run `main`, chosen once per loaded engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// `callMain(args)`.
    CallMain,
    /// `arguments = args; run()`.
    SetArgumentsAndRun,
    /// `main(argc, argv)` with argv marshaled by hand.
    RawMain,
}

impl EntryPoint {
    /// Pick the preferred entry point the engine supports.
    pub fn select(support: EntryPointSupport) -> Result<Self> {
        if support.call_main {
            Ok(EntryPoint::CallMain)
        } else if support.set_arguments_and_run {
            Ok(EntryPoint::SetArgumentsAndRun)
        } else if support.raw_main {
            Ok(EntryPoint::RawMain)
        } else {
            Err(Error::EnvironmentDefect(
                "engine exposes no callMain, run or main entry point".to_string(),
            ))
        }
    }
}

/// Everything observed during one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationResult {
    /// Lines written to stdout.
    pub stdout: Vec<String>,
    /// Lines written to stderr, plus the message of any unexpected exception.
    pub stderr: Vec<String>,
    /// 0 on success, -1 for unexpected exceptions, engine-defined otherwise.
    pub exit_code: i32,
    /// Time spent inside the engine call.
    pub duration: Duration,
    /// Output file contents, when one was read back.
    pub output: Option<Vec<u8>>,
}

impl InvocationResult {
    /// Whether the engine reported success.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Duration in fractional milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    /// First digest printed by the engine's `md5` muxer (`MD5=<hex>`).
    pub fn md5_digest(&self) -> Option<String> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"(?i)MD5=([0-9a-f]+)").expect("digest pattern is valid")
        });
        pattern
            .captures(&self.stdout.join("\n"))
            .map(|caps| caps[1].to_string())
    }

    /// Convert a failed invocation into an error.
    pub fn into_error(self) -> Error {
        Error::EngineExecution {
            exit_code: self.exit_code,
            stderr: self.stderr,
        }
    }
}

#[derive(Default)]
struct Captured {
    stdout: Vec<String>,
    stderr: Vec<String>,
}

/// Replaces the engine's print sinks for as long as it lives; the previous
/// sinks are reinstalled on drop, including during unwinding.
struct SinkCapture<'a, E: Engine> {
    engine: &'a mut E,
    previous: Option<E::Sinks>,
}

impl<'a, E: Engine> SinkCapture<'a, E> {
    fn install(engine: &'a mut E, captured: &Rc<RefCell<Captured>>) -> Self {
        let out = Rc::clone(captured);
        let err = Rc::clone(captured);
        let stdout: LineSink = Rc::new(move |line: &str| out.borrow_mut().stdout.push(line.to_string()));
        let stderr: LineSink = Rc::new(move |line: &str| err.borrow_mut().stderr.push(line.to_string()));
        let previous = engine.replace_sinks(stdout, stderr);
        Self {
            engine,
            previous: Some(previous),
        }
    }
}

impl<E: Engine> Deref for SinkCapture<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: Engine> DerefMut for SinkCapture<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: Engine> Drop for SinkCapture<'_, E> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.engine.restore_sinks(previous);
        }
    }
}

/// Runs argument lists through a fixed entry point.
#[derive(Debug, Clone)]
pub struct InvocationRunner {
    entry_point: EntryPoint,
    program_name: String,
}

impl InvocationRunner {
    /// Create a runner. `program_name` becomes `argv[0]` for raw calls.
    pub fn new(entry_point: EntryPoint, program_name: impl Into<String>) -> Self {
        Self {
            entry_point,
            program_name: program_name.into(),
        }
    }

    /// Entry point in use.
    pub fn entry_point(&self) -> EntryPoint {
        self.entry_point
    }

    /// Run one argument list.
    ///
    /// Engine-reported failures come back as a non-zero exit code with the
    /// captured stderr. Only a missing allocator for raw argv marshaling is
    /// an error.
    pub fn run<E: Engine>(
        &self,
        engine: &mut E,
        args: &[String],
        clock: &dyn Clock,
    ) -> Result<InvocationResult> {
        let captured = Rc::new(RefCell::new(Captured::default()));
        let (outcome, duration) = {
            let mut capture = SinkCapture::install(engine, &captured);
            let start = clock.now();
            let outcome = match self.entry_point {
                EntryPoint::CallMain => capture.call_main(args),
                EntryPoint::SetArgumentsAndRun => capture.run_with_arguments(args),
                EntryPoint::RawMain => self.call_raw_main(&mut *capture, args)?,
            };
            (outcome, clock.now().saturating_sub(start))
        };

        let Captured { stdout, mut stderr } = captured.take();
        let exit_code = match outcome {
            Ok(code) => code,
            Err(EngineException::Exit(status)) => status,
            Err(EngineException::Thrown(message)) => {
                stderr.push(message);
                -1
            }
        };

        tracing::debug!(
            exit_code,
            duration_ms = duration.as_secs_f64() * 1000.0,
            stderr_lines = stderr.len(),
            "Invocation finished"
        );

        Ok(InvocationResult {
            stdout,
            stderr,
            exit_code,
            duration,
            output: None,
        })
    }

    /// Marshal argv into linear memory and call `main`. Every allocation is
    /// released whether the call returns or throws.
    fn call_raw_main<E: Engine>(&self, engine: &mut E, args: &[String]) -> Result<CallResult> {
        let mut allocations = Vec::with_capacity(args.len() + 2);
        let outcome = self.marshal_and_call(engine, args, &mut allocations);
        for ptr in allocations {
            engine.free(ptr);
        }
        outcome
    }

    fn marshal_and_call<E: Engine>(
        &self,
        engine: &mut E,
        args: &[String],
        allocations: &mut Vec<u32>,
    ) -> Result<CallResult> {
        let argv: Vec<&str> = std::iter::once(self.program_name.as_str())
            .chain(args.iter().map(String::as_str))
            .collect();

        // argc slots plus a trailing null pointer.
        let argv_ptr = engine
            .malloc((argv.len() + 1) * POINTER_SIZE)
            .ok_or_else(|| Error::EnvironmentDefect("malloc unavailable for argv array".into()))?;
        allocations.push(argv_ptr);

        for (index, arg) in argv.iter().enumerate() {
            let capacity = arg.len() + 1;
            let ptr = engine
                .malloc(capacity)
                .ok_or_else(|| Error::EnvironmentDefect("malloc unavailable for argv".into()))?;
            allocations.push(ptr);
            engine.write_c_string(ptr, arg, capacity);
            engine.write_i32(slot(argv_ptr, index), ptr as i32);
        }
        engine.write_i32(slot(argv_ptr, argv.len()), 0);

        Ok(engine.raw_main(argv.len() as i32, argv_ptr))
    }
}

fn slot(base: u32, index: usize) -> u32 {
    base + (index * POINTER_SIZE) as u32
}
