//! [`Engine`] implementation over an instantiated Emscripten module object.

use ffmpeg_browser::{
    CallResult, Engine, EngineException, EntryPointSupport, FsError, LineSink, VirtualFs,
};
use js_sys::{Array, Function, Object, Reflect, Uint8Array};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Print sinks the module's `print`/`printErr` trampolines forward to.
///
/// Emscripten copies `print` and `printErr` out of the module arguments at
/// startup, so reassigning them later has no effect. The loader installs
/// trampolines once and swaps the sinks behind them instead.
#[derive(Clone)]
pub struct SinkSlots {
    stdout: Rc<RefCell<LineSink>>,
    stderr: Rc<RefCell<LineSink>>,
}

impl SinkSlots {
    /// Create slots holding the given sinks.
    pub fn new(stdout: LineSink, stderr: LineSink) -> Self {
        Self {
            stdout: Rc::new(RefCell::new(stdout)),
            stderr: Rc::new(RefCell::new(stderr)),
        }
    }

    /// JS function forwarding each line to the current stdout sink.
    pub fn stdout_trampoline(&self) -> JsValue {
        trampoline(Rc::clone(&self.stdout))
    }

    /// JS function forwarding each line to the current stderr sink.
    pub fn stderr_trampoline(&self) -> JsValue {
        trampoline(Rc::clone(&self.stderr))
    }

    fn swap(&self, stdout: LineSink, stderr: LineSink) -> (LineSink, LineSink) {
        (
            self.stdout.replace(stdout),
            self.stderr.replace(stderr),
        )
    }
}

fn trampoline(slot: Rc<RefCell<LineSink>>) -> JsValue {
    Closure::<dyn Fn(JsValue)>::new(move |text: JsValue| {
        let sink = Rc::clone(&*slot.borrow());
        sink(&js_to_string(&text));
    })
    .into_js_value()
}

/// A loaded Emscripten module.
pub struct EmscriptenModule {
    module: JsValue,
    sinks: SinkSlots,
}

impl EmscriptenModule {
    /// Wrap a module object.
    pub fn new(module: JsValue, sinks: SinkSlots) -> Self {
        Self { module, sinks }
    }

    /// The raw module object.
    pub fn raw(&self) -> &JsValue {
        &self.module
    }

    fn fs(&self) -> Result<JsValue, JsValue> {
        Reflect::get(&self.module, &"FS".into())
    }

    fn fs_call(&self, op: &'static str, path: &str, args: &[JsValue]) -> Result<JsValue, FsError> {
        self.fs()
            .and_then(|fs| call_method(&fs, op, args))
            .map_err(|err| FsError::new(op, path, js_to_string(&err)))
    }

    fn has_function(&self, name: &str) -> bool {
        Reflect::get(&self.module, &name.into())
            .map(|value| value.is_function())
            .unwrap_or(false)
    }

    fn call(&self, name: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
        call_method(&self.module, name, args)
    }

    fn main_function(&self) -> Result<Function, JsValue> {
        if self.has_function("_main") {
            return Reflect::get(&self.module, &"_main".into())?.dyn_into();
        }
        let signature: Array = ["number", "number"].iter().map(|s| JsValue::from_str(s)).collect();
        self.call(
            "cwrap",
            &["main".into(), "number".into(), signature.into()],
        )?
        .dyn_into()
    }
}

impl VirtualFs for EmscriptenModule {
    fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        self.fs_call("mkdir", path, &[path.into()]).map(|_| ())
    }

    fn mount_persistent(&mut self, mount_point: &str) -> Result<(), FsError> {
        let opfs = Reflect::get(&self.module, &"OPFS".into())
            .ok()
            .filter(|value| !value.is_undefined() && !value.is_null())
            .ok_or_else(|| FsError::new("mount", mount_point, "OPFS is not defined"))?;
        self.fs_call("mount", mount_point, &[opfs, Object::new().into(), mount_point.into()])
            .map(|_| ())
    }

    fn unmount(&mut self, mount_point: &str) -> Result<(), FsError> {
        self.fs_call("unmount", mount_point, &[mount_point.into()])
            .map(|_| ())
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let bytes = Uint8Array::from(data);
        self.fs_call("writeFile", path, &[path.into(), bytes.into()])
            .map(|_| ())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let value = self.fs_call("readFile", path, &[path.into()])?;
        value
            .dyn_into::<Uint8Array>()
            .map(|bytes| bytes.to_vec())
            .map_err(|_| FsError::new("readFile", path, "engine returned a non-binary result"))
    }

    fn unlink(&mut self, path: &str) -> Result<(), FsError> {
        self.fs_call("unlink", path, &[path.into()]).map(|_| ())
    }

    fn file_size(&self, path: &str) -> Result<u64, FsError> {
        let stat = self.fs_call("stat", path, &[path.into()])?;
        Reflect::get(&stat, &"size".into())
            .ok()
            .and_then(|size| size.as_f64())
            .map(|size| size as u64)
            .ok_or_else(|| FsError::new("stat", path, "missing size"))
    }
}

impl Engine for EmscriptenModule {
    type Sinks = (LineSink, LineSink);

    fn entry_points(&self) -> EntryPointSupport {
        EntryPointSupport {
            call_main: self.has_function("callMain"),
            set_arguments_and_run: self.has_function("run"),
            raw_main: self.has_function("_main") || self.has_function("cwrap"),
        }
    }

    fn heap_size(&self) -> usize {
        Reflect::get(&self.module, &"HEAPU8".into())
            .ok()
            .and_then(|heap| heap.dyn_into::<Uint8Array>().ok())
            .map(|heap| heap.length() as usize)
            .unwrap_or(0)
    }

    fn initial_memory(&self) -> Option<usize> {
        Reflect::get(&self.module, &"INITIAL_MEMORY".into())
            .ok()
            .and_then(|value| value.as_f64())
            .filter(|bytes| *bytes > 0.0)
            .map(|bytes| bytes as usize)
    }

    fn replace_sinks(&mut self, stdout: LineSink, stderr: LineSink) -> Self::Sinks {
        self.sinks.swap(stdout, stderr)
    }

    fn restore_sinks(&mut self, (stdout, stderr): Self::Sinks) {
        self.sinks.swap(stdout, stderr);
    }

    fn call_main(&mut self, args: &[String]) -> CallResult {
        self.call("callMain", &[string_array(args).into()])
            .map(|code| code.as_f64().map(|c| c as i32).unwrap_or(0))
            .map_err(classify_exception)
    }

    fn run_with_arguments(&mut self, args: &[String]) -> CallResult {
        Reflect::set(&self.module, &"arguments".into(), &string_array(args))
            .map_err(classify_exception)?;
        self.call("run", &[]).map(|_| 0).map_err(classify_exception)
    }

    fn raw_main(&mut self, argc: i32, argv: u32) -> CallResult {
        let main = self.main_function().map_err(classify_exception)?;
        main.call2(&JsValue::NULL, &argc.into(), &argv.into())
            .map(|code| code.as_f64().map(|c| c as i32).unwrap_or(0))
            .map_err(classify_exception)
    }

    fn malloc(&mut self, size: usize) -> Option<u32> {
        if !self.has_function("_malloc") {
            return None;
        }
        self.call("_malloc", &[JsValue::from_f64(size as f64)])
            .ok()
            .and_then(|ptr| ptr.as_f64())
            .filter(|ptr| *ptr > 0.0)
            .map(|ptr| ptr as u32)
    }

    fn free(&mut self, ptr: u32) {
        if self.has_function("_free") {
            if let Err(err) = self.call("_free", &[ptr.into()]) {
                tracing::debug!(ptr, error = %js_to_string(&err), "free failed");
            }
        }
    }

    fn write_c_string(&mut self, ptr: u32, value: &str, capacity: usize) {
        let args = [value.into(), ptr.into(), JsValue::from_f64(capacity as f64)];
        if let Err(err) = self.call("stringToUTF8", &args) {
            tracing::warn!(error = %js_to_string(&err), "stringToUTF8 failed");
        }
    }

    fn write_i32(&mut self, ptr: u32, value: i32) {
        if let Err(err) = self.call("setValue", &[ptr.into(), value.into(), "i32".into()]) {
            tracing::warn!(error = %js_to_string(&err), "setValue failed");
        }
    }
}

/// Call `target[name](...args)` with `target` as `this`.
pub(crate) fn call_method(target: &JsValue, name: &str, args: &[JsValue]) -> Result<JsValue, JsValue> {
    let function: Function = Reflect::get(target, &name.into())?
        .dyn_into()
        .map_err(|_| JsValue::from_str(&format!("{name} is not a function")))?;
    let args: Array = args.iter().collect();
    Reflect::apply(&function, target, &args)
}

/// Map a thrown value to an exit status or an unexpected exception.
pub(crate) fn classify_exception(err: JsValue) -> EngineException {
    let name = Reflect::get(&err, &"name".into())
        .ok()
        .and_then(|name| name.as_string());
    let text = js_to_string(&err);

    if name.as_deref() == Some("ExitStatus") || text.contains("ExitStatus") {
        let status = Reflect::get(&err, &"status".into())
            .ok()
            .and_then(|status| status.as_f64())
            .unwrap_or(0.0);
        EngineException::Exit(status as i32)
    } else {
        EngineException::Thrown(text)
    }
}

/// Best-effort `String(value)`.
pub(crate) fn js_to_string(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return format!("{}: {}", String::from(error.name()), String::from(error.message()));
    }
    if let Some(object) = value.dyn_ref::<Object>() {
        if let Some(code) = Reflect::get(object, &"code".into()).ok().and_then(|c| c.as_string()) {
            return code;
        }
        return String::from(object.to_string());
    }
    format!("{value:?}")
}

fn string_array(args: &[String]) -> Array {
    args.iter().map(|arg| JsValue::from_str(arg)).collect()
}
