//! `BrowserFFmpeg` - the JavaScript-facing engine wrapper.

use crate::clock::PerformanceClock;
use crate::error::{WasmError, WasmResult};
use crate::loader::{EmscriptenLoader, EngineSource};
use crate::utils::{format_bytes, format_duration_ms};
use ffmpeg_browser::{BrowserFfmpeg, EngineConfig, ProcessOptions};
use js_sys::{Array, Object, Promise, Reflect, Uint8Array};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;

type Manager = BrowserFfmpeg<EmscriptenLoader>;

/// One engine instance. Create one per worker for parallel work.
///
/// Calls are serialized: while a promise returned by this object is
/// pending, further calls reject with a `Busy` error.
#[wasm_bindgen(js_name = BrowserFFmpeg)]
pub struct BrowserFFmpeg {
    slot: Rc<RefCell<Option<Manager>>>,
}

#[wasm_bindgen(js_class = BrowserFFmpeg)]
impl BrowserFFmpeg {
    /// Create an instance. `source` is a factory function, a module URL,
    /// `{url}` or `{bases, script, wasm, global}`; defaults to
    /// `./ffmpeg-browser.js`.
    #[wasm_bindgen(constructor)]
    pub fn new(source: JsValue) -> WasmResult<BrowserFFmpeg> {
        let source = EngineSource::from_js(source, EngineSource::default())?;
        let manager = BrowserFfmpeg::with_clock(
            EmscriptenLoader::new(source),
            EngineConfig::default(),
            Rc::new(PerformanceClock::new()),
        );
        Ok(Self {
            slot: Rc::new(RefCell::new(Some(manager))),
        })
    }

    /// Load the engine. Resolves to `true`.
    ///
    /// `options` is merged over the defaults; function-valued entries such
    /// as `locateFile` are passed to the module factory as-is.
    pub fn initialize(&self, options: JsValue) -> Promise {
        let slot = Rc::clone(&self.slot);
        future_to_promise(async move {
            let mut manager = take(&slot)?;
            let result = async {
                let (json, raw) = split_overrides(&options)?;
                manager.loader().set_overrides(raw);
                manager.initialize(json).await.map_err(WasmError::from)
            }
            .await;
            put_back(&slot, manager);
            result.map(JsValue::from_bool).map_err(JsValue::from)
        })
    }

    /// Convert `input`. Resolves to `{data, processingTime, memoryUsage,
    /// command}`.
    #[wasm_bindgen(js_name = processMedia)]
    pub fn process_media(&self, input: Uint8Array, output_format: String, options: JsValue) -> Promise {
        let slot = Rc::clone(&self.slot);
        let input = input.to_vec();
        future_to_promise(async move {
            let mut manager = take(&slot)?;
            let result = async {
                let options = parse_options(options)?;
                let output = manager
                    .process_media(&input, &output_format, &options)
                    .await?;
                tracing::info!(
                    "Processed {} into {} in {}",
                    format_bytes(input.len()),
                    format_bytes(output.data.len()),
                    format_duration_ms(output.processing_time_ms())
                );
                Ok::<_, WasmError>(output)
            }
            .await;
            put_back(&slot, manager);

            let output = result.map_err(JsValue::from)?;
            let memory = serialize(&output.memory_usage)?;
            let obj = Object::new();
            Reflect::set(&obj, &"data".into(), &Uint8Array::from(output.data.as_slice()))?;
            Reflect::set(&obj, &"processingTime".into(), &output.processing_time_ms().into())?;
            Reflect::set(&obj, &"memoryUsage".into(), &memory)?;
            Reflect::set(&obj, &"command".into(), &output.command_line().into())?;
            Ok(obj.into())
        })
    }

    /// Telemetry report, or `null` when no engine is loaded or a call is
    /// in flight.
    #[wasm_bindgen(js_name = getStats)]
    pub fn get_stats(&self) -> WasmResult<JsValue> {
        let slot = self.slot.borrow();
        match slot.as_ref().and_then(|manager| manager.stats()) {
            Some(report) => Ok(serialize(&report)?),
            None => Ok(JsValue::NULL),
        }
    }

    /// Release the engine.
    pub fn terminate(&self) -> Promise {
        let slot = Rc::clone(&self.slot);
        future_to_promise(async move {
            let mut manager = take(&slot)?;
            manager.terminate().await;
            put_back(&slot, manager);
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Lifecycle state name, or `busy` while a call is in flight.
    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        self.slot
            .borrow()
            .as_ref()
            .map(|manager| manager.state().to_string())
            .unwrap_or_else(|| "busy".to_string())
    }

    /// Where user files live: `persistent`, `memory` or `unmounted`.
    #[wasm_bindgen(getter, js_name = mountState)]
    pub fn mount_state(&self) -> String {
        self.slot
            .borrow()
            .as_ref()
            .map(|manager| manager.mount_state().to_string())
            .unwrap_or_else(|| "busy".to_string())
    }
}

fn take(slot: &Rc<RefCell<Option<Manager>>>) -> Result<Manager, JsValue> {
    slot.borrow_mut()
        .take()
        .ok_or_else(|| WasmError::busy().into())
}

fn put_back(slot: &Rc<RefCell<Option<Manager>>>, manager: Manager) {
    *slot.borrow_mut() = Some(manager);
}

fn serialize<T: Serialize>(value: &T) -> WasmResult<JsValue> {
    Ok(value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())?)
}

fn parse_options(options: JsValue) -> WasmResult<ProcessOptions> {
    if options.is_undefined() || options.is_null() {
        return Ok(ProcessOptions::default());
    }
    Ok(serde_wasm_bindgen::from_value(options)?)
}

/// Split caller overrides into the JSON part merged into [`EngineConfig`]
/// and the raw object handed to the module factory.
fn split_overrides(options: &JsValue) -> WasmResult<(Option<Value>, Option<Object>)> {
    if options.is_undefined() || options.is_null() {
        return Ok((None, None));
    }
    let Some(raw) = options.dyn_ref::<Object>().filter(|_| !Array::is_array(options)) else {
        // Not an object; let the config merge reject it.
        let value: Value = serde_wasm_bindgen::from_value(options.clone())?;
        return Ok((Some(value), None));
    };

    let mut json = Map::new();
    for entry in Object::entries(raw).iter() {
        let entry: Array = entry.unchecked_into();
        let Some(key) = entry.get(0).as_string() else {
            continue;
        };
        let value = entry.get(1);
        if value.is_function() {
            continue;
        }
        match serde_wasm_bindgen::from_value::<Value>(value) {
            Ok(value) => {
                json.insert(key, value);
            }
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "Override kept for the module factory only");
            }
        }
    }
    Ok((Some(Value::Object(json)), Some(raw.clone())))
}
