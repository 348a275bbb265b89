//! WebAssembly bindings for the ffmpeg-browser shim.
//!
//! This crate runs an Emscripten build of FFmpeg from Rust compiled to
//! WebAssembly, wrapping it in a small promise-based API.
//!
//! # Example (JavaScript)
//!
//! ```javascript
//! import init, { BrowserFFmpeg, checkCompatibility } from 'ffmpeg-browser-wasm';
//!
//! await init();
//! if (!checkCompatibility().overall) console.warn('reduced functionality');
//!
//! const ffmpeg = new BrowserFFmpeg('./ffmpeg-browser.js');
//! await ffmpeg.initialize({ INITIAL_MEMORY: 268435456 });
//!
//! const { data, processingTime, command } =
//!     await ffmpeg.processMedia(input, 'webm', { format: 'webm', videoBitrate: '1000k' });
//!
//! await ffmpeg.terminate();
//! ```

use error::WasmResult;
use wasm_bindgen::prelude::*;

mod clock;
mod compat;
mod error;
mod ffmpeg;
mod loader;
mod module;
mod utils;
mod worker;

pub use clock::PerformanceClock;
pub use compat::Compatibility;
pub use error::{ErrorCode, WasmError};
pub use ffmpeg::BrowserFFmpeg;
pub use loader::{EmscriptenLoader, EngineSource, ScriptSource};
pub use module::EmscriptenModule;
pub use worker::install_smoke_worker;

/// Initialize the WASM module.
///
/// Installs the panic hook and routes `tracing` output to the console.
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
    // A host page may already have installed a subscriber.
    let _ = tracing_wasm::try_set_as_global_default();
}

/// Get the version of the ffmpeg-browser-wasm library.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Check which browser features the engine can use. Returns
/// `{webAssembly, sharedArrayBuffer, opfs, webWorkers, bigint, overall}`.
#[wasm_bindgen(js_name = checkCompatibility)]
pub fn check_compatibility() -> WasmResult<JsValue> {
    let report = Compatibility::detect();
    if !report.overall {
        tracing::warn!(missing = ?report.missing(), "Browser lacks features");
    }
    Ok(serde_wasm_bindgen::to_value(&report)?)
}

/// Suggested thread count: `navigator.hardwareConcurrency` (or 4) capped
/// at 8.
#[wasm_bindgen(js_name = optimalThreadCount)]
pub fn optimal_thread_count() -> u32 {
    compat::detect_thread_count()
}
