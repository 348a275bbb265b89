//! Smoke-test worker entry point.
//!
//! ```javascript
//! // smoke-worker.js
//! importScripts('./ffmpeg_browser_wasm.js');
//! wasm_bindgen('./ffmpeg_browser_wasm_bg.wasm').then(() => wasm_bindgen.installSmokeWorker());
//!
//! // page
//! worker.postMessage({ type: 'run' });
//! worker.onmessage = (e) => console.log(e.data.results);
//! ```

use crate::clock::PerformanceClock;
use crate::error::{WasmError, WasmResult};
use crate::loader::{EmscriptenLoader, EngineSource, ScriptSource};
use ffmpeg_browser::{run_smoke_suite, EngineConfig, WorkerRequest, WorkerResponse};
use serde::Serialize;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent};

/// Install the smoke harness as this worker's message handler.
///
/// `source` selects the engine build as in the `BrowserFFmpeg` constructor
/// and defaults to `ffmpeg-core.st.js` under `../dist-st/`, then `../dist/`.
/// Messages other than `{type: "run"}` are ignored.
#[wasm_bindgen(js_name = installSmokeWorker)]
pub fn install_smoke_worker(source: JsValue) -> WasmResult<()> {
    let scope: DedicatedWorkerGlobalScope = js_sys::global().dyn_into().map_err(|_| {
        WasmError::browser_not_supported("installSmokeWorker must run in a dedicated worker")
    })?;
    let source = Rc::new(EngineSource::from_js(
        source,
        EngineSource::Script(ScriptSource::smoke_default()),
    )?);

    let handler_scope = scope.clone();
    let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
        if serde_wasm_bindgen::from_value::<WorkerRequest>(event.data()).is_err() {
            return;
        }
        let scope = handler_scope.clone();
        let source = Rc::clone(&source);
        spawn_local(async move {
            let loader = EmscriptenLoader::new((*source).clone());
            let clock = PerformanceClock::new();
            let report = run_smoke_suite(&loader, &EngineConfig::default(), &clock).await;
            tracing::info!(ok = report.ok, total_ms = report.total_ms, "Smoke run finished");

            let message = WorkerResponse::Result(report)
                .serialize(&serde_wasm_bindgen::Serializer::json_compatible());
            match message {
                Ok(message) => {
                    if let Err(err) = scope.post_message(&message) {
                        tracing::error!(error = ?err, "Failed to post smoke results");
                    }
                }
                Err(err) => tracing::error!(error = %err, "Failed to serialize smoke results"),
            }
        });
    });

    scope.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();
    Ok(())
}
