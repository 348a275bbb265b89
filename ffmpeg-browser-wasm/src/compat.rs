//! Browser capability checks.

use js_sys::Reflect;
use serde::Serialize;
use wasm_bindgen::JsValue;

/// Upper bound on worker threads suggested to callers.
pub const MAX_THREADS: u32 = 8;

/// Thread count assumed when the browser does not report one.
pub const DEFAULT_THREADS: u32 = 4;

/// Browser feature support information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Compatibility {
    /// WebAssembly is available.
    pub web_assembly: bool,
    /// SharedArrayBuffer is available (needs COOP/COEP headers).
    pub shared_array_buffer: bool,
    /// Origin-private file system is available.
    pub opfs: bool,
    /// Web Workers are available.
    pub web_workers: bool,
    /// BigInt is available.
    pub bigint: bool,
    /// Every check above passed.
    pub overall: bool,
}

impl Compatibility {
    /// Check the current global scope.
    pub fn detect() -> Self {
        let global = js_sys::global();
        let opfs = lookup(&global, &["navigator", "storage"])
            .map(|storage| has(&storage, "getDirectory"))
            .unwrap_or(false);

        Self::from_checks(
            has(&global, "WebAssembly"),
            has(&global, "SharedArrayBuffer"),
            opfs,
            has(&global, "Worker"),
            has(&global, "BigInt"),
        )
    }

    fn from_checks(
        web_assembly: bool,
        shared_array_buffer: bool,
        opfs: bool,
        web_workers: bool,
        bigint: bool,
    ) -> Self {
        Self {
            web_assembly,
            shared_array_buffer,
            opfs,
            web_workers,
            bigint,
            overall: web_assembly && shared_array_buffer && opfs && web_workers && bigint,
        }
    }

    /// Names of the missing features.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (self.web_assembly, "WebAssembly"),
            (self.shared_array_buffer, "SharedArrayBuffer"),
            (self.opfs, "OPFS"),
            (self.web_workers, "Web Workers"),
            (self.bigint, "BigInt"),
        ]
        .into_iter()
        .filter(|(supported, _)| !supported)
        .map(|(_, name)| name)
        .collect()
    }
}

/// Suggested thread count: the reported core count capped at
/// [`MAX_THREADS`], or [`DEFAULT_THREADS`] when none is reported.
pub fn thread_count(hardware_concurrency: Option<f64>) -> u32 {
    match hardware_concurrency {
        Some(cores) if cores >= 1.0 => (cores as u32).min(MAX_THREADS),
        _ => DEFAULT_THREADS,
    }
}

/// Thread count for the current browser.
pub fn detect_thread_count() -> u32 {
    let reported = lookup(&js_sys::global(), &["navigator", "hardwareConcurrency"])
        .and_then(|value| value.as_f64());
    thread_count(reported)
}

fn has(target: &JsValue, key: &str) -> bool {
    Reflect::has(target, &key.into()).unwrap_or(false)
        && Reflect::get(target, &key.into())
            .map(|value| !value.is_undefined())
            .unwrap_or(false)
}

fn lookup(target: &JsValue, path: &[&str]) -> Option<JsValue> {
    path.iter().try_fold(target.clone(), |current, key| {
        if !current.is_object() && !current.is_function() {
            return None;
        }
        Reflect::get(&current, &(*key).into())
            .ok()
            .filter(|value| !value.is_undefined() && !value.is_null())
    })
}
