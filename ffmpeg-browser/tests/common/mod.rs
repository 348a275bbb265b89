//! In-process engine fake shared by the integration tests.
//!
//! The fake behaves like a tiny FFmpeg: `lavfi` sources are synthesized,
//! `-f md5 -` prints a digest, `.bmp` outputs produce a 64x64 bitmap and
//! anything else copies the input file to the output path.

#![allow(dead_code)]

use async_trait::async_trait;
use ffmpeg_browser::{
    CallResult, Engine, EngineConfig, EngineException, EngineLoader, EntryPointSupport, FsError,
    LineSink, LoadError, LoadHooks, VirtualFs,
};
use md5::{Digest, Md5};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;
use std::rc::Rc;

pub const MIB: usize = 1024 * 1024;

/// Size of a 64x64 24-bit bitmap including headers.
pub const BMP_64_SIZE: u64 = 54 + 64 * 64 * 3;

/// What the fake does when asked to run `main`.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Interpret the arguments.
    Emulate,
    /// Print `message` to stderr and throw an exit status.
    Exit { code: i32, message: String },
    /// Print `message` to stderr and return `code`.
    Return { code: i32, message: String },
    /// Throw a non-exit exception.
    Throw(String),
}

/// Properties of a fake engine build.
#[derive(Debug, Clone)]
pub struct FakeBuild {
    pub support: EntryPointSupport,
    pub opfs: bool,
    pub has_malloc: bool,
    pub heap: usize,
    pub initial_memory: Option<usize>,
    pub behavior: Behavior,
    pub fail_load: Option<String>,
    pub skip_pre_run: bool,
    pub skip_ready: bool,
    pub init_lines: Vec<String>,
}

impl Default for FakeBuild {
    fn default() -> Self {
        Self {
            support: EntryPointSupport {
                call_main: true,
                set_arguments_and_run: true,
                raw_main: true,
            },
            opfs: true,
            has_malloc: true,
            heap: 16 * MIB,
            initial_memory: Some(256 * MIB),
            behavior: Behavior::Emulate,
            fail_load: None,
            skip_pre_run: false,
            skip_ready: false,
            init_lines: vec!["ffmpeg version n6.1 Copyright (c) 2000-2023".to_string()],
        }
    }
}

impl FakeBuild {
    pub fn call_main_only() -> Self {
        Self::with_support(true, false, false)
    }

    pub fn run_only() -> Self {
        Self::with_support(false, true, false)
    }

    pub fn raw_main_only() -> Self {
        Self::with_support(false, false, true)
    }

    pub fn without_entry_points() -> Self {
        Self::with_support(false, false, false)
    }

    fn with_support(call_main: bool, set_arguments_and_run: bool, raw_main: bool) -> Self {
        Self {
            support: EntryPointSupport {
                call_main,
                set_arguments_and_run,
                raw_main,
            },
            ..Default::default()
        }
    }
}

/// Observable state of one fake engine.
#[derive(Debug, Default)]
pub struct FakeState {
    pub config: EngineConfig,
    pub behavior: Option<Behavior>,
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub mounted: Option<String>,
    pub invocations: Vec<Vec<String>>,
    pub entry_used: Vec<&'static str>,
    pub raw_argv: Vec<String>,
    pub live_allocations: BTreeSet<u32>,
    pub freed: Vec<u32>,
    strings: BTreeMap<u32, String>,
    words: BTreeMap<u32, i32>,
    next_ptr: u32,
    heap: usize,
}

impl FakeState {
    /// Scratch files still present under `dir`.
    pub fn files_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{dir}/");
        self.files
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect()
    }
}

/// Fake engine instance. Its state is shared with the loader that made it.
pub struct FakeEngine {
    pub state: Rc<RefCell<FakeState>>,
    build: FakeBuild,
    print: LineSink,
    print_err: LineSink,
}

impl FakeEngine {
    pub fn new(build: FakeBuild, print: LineSink, print_err: LineSink) -> Self {
        let state = FakeState {
            behavior: Some(build.behavior.clone()),
            next_ptr: 1024,
            heap: build.heap,
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            build,
            print,
            print_err,
        }
    }

    /// Write a line through the currently installed stdout sink.
    pub fn emit_stdout(&self, line: &str) {
        (self.print)(line);
    }

    /// Write a line through the currently installed stderr sink.
    pub fn emit_stderr(&self, line: &str) {
        (self.print_err)(line);
    }

    fn dispatch(&mut self, entry: &'static str, args: &[String]) -> CallResult {
        let behavior = {
            let mut state = self.state.borrow_mut();
            state.entry_used.push(entry);
            state.invocations.push(args.to_vec());
            state.behavior.clone().unwrap_or(Behavior::Emulate)
        };

        match behavior {
            Behavior::Emulate => self.emulate(args),
            Behavior::Exit { code, message } => {
                (self.print_err)(&message);
                Err(EngineException::Exit(code))
            }
            Behavior::Return { code, message } => {
                (self.print_err)(&message);
                Ok(code)
            }
            Behavior::Throw(message) => Err(EngineException::Thrown(message)),
        }
    }

    fn emulate(&mut self, args: &[String]) -> CallResult {
        let Some(input) = value_after(args, "-i") else {
            (self.print_err)("Output file #0 does not contain any stream");
            return Ok(1);
        };
        let output = args.last().cloned().unwrap_or_default();

        let data = if value_after(args, "-f").is_some_and(|f| f == "lavfi") {
            synthesize(&input)
        } else {
            match self.state.borrow().files.get(&input) {
                Some(data) => data.clone(),
                None => {
                    let message = format!("{input}: No such file or directory");
                    (self.print_err)(&message);
                    return Ok(1);
                }
            }
        };

        if output == "-" {
            if last_value_after(args, "-f").as_deref() == Some("md5") {
                (self.print)(&format!("MD5={}", md5_hex(&data)));
            }
            return Ok(0);
        }

        let produced = if output.ends_with(".bmp") {
            vec![0u8; BMP_64_SIZE as usize]
        } else {
            data
        };

        let mut state = self.state.borrow_mut();
        state.heap += produced.len();
        state.files.insert(output, produced);
        Ok(0)
    }
}

impl VirtualFs for FakeEngine {
    fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        if !self.state.borrow_mut().dirs.insert(path.to_string()) {
            return Err(FsError::new("mkdir", path, "File exists"));
        }
        Ok(())
    }

    fn mount_persistent(&mut self, mount_point: &str) -> Result<(), FsError> {
        if !self.build.opfs {
            return Err(FsError::new("mount", mount_point, "OPFS is not defined"));
        }
        self.state.borrow_mut().mounted = Some(mount_point.to_string());
        Ok(())
    }

    fn unmount(&mut self, mount_point: &str) -> Result<(), FsError> {
        self.state
            .borrow_mut()
            .mounted
            .take()
            .map(|_| ())
            .ok_or_else(|| FsError::new("unmount", mount_point, "Invalid argument"))
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let mut state = self.state.borrow_mut();
        state.heap += data.len();
        state.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        self.state
            .borrow()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| FsError::new("readFile", path, "No such file or directory"))
    }

    fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        self.state
            .borrow_mut()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::new("unlink", path, "No such file or directory"))
    }

    fn file_size(&self, path: &str) -> Result<u64, FsError> {
        self.read_file(path).map(|data| data.len() as u64)
    }
}

impl Engine for FakeEngine {
    type Sinks = (LineSink, LineSink);

    fn entry_points(&self) -> EntryPointSupport {
        self.build.support
    }

    fn heap_size(&self) -> usize {
        self.state.borrow().heap
    }

    fn initial_memory(&self) -> Option<usize> {
        self.build.initial_memory
    }

    fn replace_sinks(&mut self, stdout: LineSink, stderr: LineSink) -> Self::Sinks {
        let previous_out = std::mem::replace(&mut self.print, stdout);
        let previous_err = std::mem::replace(&mut self.print_err, stderr);
        (previous_out, previous_err)
    }

    fn restore_sinks(&mut self, (stdout, stderr): Self::Sinks) {
        self.print = stdout;
        self.print_err = stderr;
    }

    fn call_main(&mut self, args: &[String]) -> CallResult {
        self.dispatch("callMain", args)
    }

    fn run_with_arguments(&mut self, args: &[String]) -> CallResult {
        self.dispatch("run", args)
    }

    fn raw_main(&mut self, argc: i32, argv: u32) -> CallResult {
        let argv_strings = {
            let state = self.state.borrow();
            let mut strings = Vec::with_capacity(argc as usize);
            for index in 0..argc as u32 {
                let slot = argv + index * 4;
                let ptr = state.words.get(&slot).copied().unwrap_or(0) as u32;
                strings.push(state.strings.get(&ptr).cloned().unwrap_or_default());
            }
            if state.words.get(&(argv + argc as u32 * 4)) != Some(&0) {
                return Err(EngineException::Thrown("argv is not null-terminated".into()));
            }
            strings
        };
        self.state.borrow_mut().raw_argv = argv_strings.clone();
        self.dispatch("main", &argv_strings[1..])
    }

    fn malloc(&mut self, size: usize) -> Option<u32> {
        if !self.build.has_malloc {
            return None;
        }
        let mut state = self.state.borrow_mut();
        let ptr = state.next_ptr;
        state.next_ptr += size.max(8).next_multiple_of(8) as u32;
        state.live_allocations.insert(ptr);
        Some(ptr)
    }

    fn free(&mut self, ptr: u32) {
        let mut state = self.state.borrow_mut();
        state.live_allocations.remove(&ptr);
        state.freed.push(ptr);
    }

    fn write_c_string(&mut self, ptr: u32, value: &str, capacity: usize) {
        let truncated: String = value.chars().take(capacity.saturating_sub(1)).collect();
        self.state.borrow_mut().strings.insert(ptr, truncated);
    }

    fn write_i32(&mut self, ptr: u32, value: i32) {
        self.state.borrow_mut().words.insert(ptr, value);
    }
}

/// Loader producing [`FakeEngine`]s. Clones share the list of loaded engines.
#[derive(Clone)]
pub struct FakeLoader {
    build: FakeBuild,
    loaded: Rc<RefCell<Vec<Rc<RefCell<FakeState>>>>>,
}

impl FakeLoader {
    pub fn new(build: FakeBuild) -> Self {
        Self {
            build,
            loaded: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Number of engines created so far.
    pub fn loads(&self) -> usize {
        self.loaded.borrow().len()
    }

    /// State of the most recently loaded engine.
    pub fn latest(&self) -> Rc<RefCell<FakeState>> {
        Rc::clone(self.loaded.borrow().last().expect("no engine loaded"))
    }
}

impl Default for FakeLoader {
    fn default() -> Self {
        Self::new(FakeBuild::default())
    }
}

#[async_trait(?Send)]
impl EngineLoader for FakeLoader {
    type Engine = FakeEngine;

    async fn load(
        &self,
        config: &EngineConfig,
        hooks: LoadHooks<FakeEngine>,
    ) -> Result<FakeEngine, LoadError> {
        if let Some(message) = &self.build.fail_load {
            (hooks.print_err)(message);
            return Err(LoadError::new(message.clone()));
        }

        let mut engine = FakeEngine::new(self.build.clone(), hooks.print, hooks.print_err);
        engine.state.borrow_mut().config = config.clone();
        self.loaded.borrow_mut().push(Rc::clone(&engine.state));

        for line in &self.build.init_lines {
            engine.emit_stderr(line);
        }
        if !self.build.skip_pre_run {
            (hooks.pre_run)(&mut engine);
        }
        if !self.build.skip_ready {
            (hooks.on_runtime_initialized)();
        }
        Ok(engine)
    }
}

/// Sink that appends into a shared vector.
pub fn collecting_sink() -> (LineSink, Rc<RefCell<Vec<String>>>) {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let target = Rc::clone(&lines);
    let sink: LineSink = Rc::new(move |line: &str| target.borrow_mut().push(line.to_string()));
    (sink, lines)
}

/// One second of a 1 kHz tone at 44.1 kHz as 16-bit little-endian PCM.
pub fn generate_sine_wave(frequency: f64, sample_rate: u32, seconds: u32) -> Vec<u8> {
    let samples = sample_rate * seconds;
    let mut bytes = Vec::with_capacity(samples as usize * 2);
    for n in 0..samples {
        let t = n as f64 / sample_rate as f64;
        let sample = ((2.0 * PI * frequency * t).sin() * 0.5 * i16::MAX as f64) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Digest the fake prints for the audio smoke case.
pub fn expected_sine_md5() -> String {
    md5_hex(&generate_sine_wave(1000.0, 44100, 1))
}

pub fn md5_hex(data: &[u8]) -> String {
    Md5::digest(data)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn synthesize(source: &str) -> Vec<u8> {
    if source.starts_with("sine=") {
        generate_sine_wave(1000.0, 44100, 1)
    } else {
        source.bytes().cycle().take(64 * 64 * 3).collect()
    }
}

fn value_after(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

fn last_value_after(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).filter(|w| w[0] == flag).last().map(|w| w[1].clone())
}
