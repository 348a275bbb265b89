//! Loading the Emscripten module factory and instantiating engines.

use crate::module::{call_method, js_to_string, EmscriptenModule, SinkSlots};
use crate::utils::join_url;
use async_trait::async_trait;
use ffmpeg_browser::{EngineConfig, EngineLoader, LoadError, LoadHooks};
use js_sys::{Array, Function, Object, Promise, Reflect};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

/// Module URL used when no source is given.
pub const DEFAULT_MODULE_URL: &str = "./ffmpeg-browser.js";

/// Classic-script build of the engine, loaded with `importScripts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSource {
    /// Directories tried in order; the first that loads wins.
    pub bases: Vec<String>,
    /// Script file name inside each base.
    pub script: String,
    /// Wasm binary name served next to the script.
    #[serde(default)]
    pub wasm: Option<String>,
    /// Global the script defines its factory under.
    #[serde(default = "default_global")]
    pub global: String,
}

fn default_global() -> String {
    "Module".to_string()
}

impl ScriptSource {
    /// The single-threaded build the smoke harness targets.
    pub fn smoke_default() -> Self {
        Self {
            bases: vec!["../dist-st/".to_string(), "../dist/".to_string()],
            script: "ffmpeg-core.st.js".to_string(),
            wasm: Some("ffmpeg-core.st.wasm".to_string()),
            global: default_global(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceDescriptor {
    Url { url: String },
    Script(ScriptSource),
}

/// Where the engine factory comes from.
#[derive(Debug, Clone)]
pub enum EngineSource {
    /// A factory function supplied by the caller.
    Factory(Function),
    /// An ES module whose default export is the factory.
    Url(String),
    /// A classic script defining a global factory.
    Script(ScriptSource),
}

impl EngineSource {
    /// Parse a source from JS: a function, a URL string, `{url}` or a
    /// script description. `undefined` selects `fallback`.
    pub fn from_js(value: JsValue, fallback: EngineSource) -> Result<Self, serde_wasm_bindgen::Error> {
        if value.is_undefined() || value.is_null() {
            return Ok(fallback);
        }
        if let Some(factory) = value.dyn_ref::<Function>() {
            return Ok(EngineSource::Factory(factory.clone()));
        }
        if let Some(url) = value.as_string() {
            return Ok(EngineSource::Url(url));
        }
        Ok(match serde_wasm_bindgen::from_value::<SourceDescriptor>(value)? {
            SourceDescriptor::Url { url } => EngineSource::Url(url),
            SourceDescriptor::Script(script) => EngineSource::Script(script),
        })
    }
}

impl Default for EngineSource {
    fn default() -> Self {
        EngineSource::Url(DEFAULT_MODULE_URL.to_string())
    }
}

/// Factory plus the script base it was loaded from, if any.
struct ResolvedFactory {
    factory: Function,
    script: Option<(String, ScriptSource)>,
}

/// [`EngineLoader`] for Emscripten `MODULARIZE` builds.
#[derive(Debug)]
pub struct EmscriptenLoader {
    source: EngineSource,
    overrides: RefCell<Option<Object>>,
}

impl EmscriptenLoader {
    /// Create a loader for `source`.
    pub fn new(source: EngineSource) -> Self {
        Self {
            source,
            overrides: RefCell::new(None),
        }
    }

    /// Raw JS overrides copied onto the module arguments at the next load.
    /// Unlike the JSON overrides merged into [`EngineConfig`], these may
    /// contain functions such as `locateFile`.
    pub fn set_overrides(&self, overrides: Option<Object>) {
        *self.overrides.borrow_mut() = overrides;
    }

    async fn resolve_factory(&self) -> Result<ResolvedFactory, LoadError> {
        match &self.source {
            EngineSource::Factory(factory) => Ok(ResolvedFactory {
                factory: factory.clone(),
                script: None,
            }),
            EngineSource::Url(url) => {
                let namespace = dynamic_import(url).await?;
                let factory = Reflect::get(&namespace, &"default".into())
                    .ok()
                    .and_then(|value| value.dyn_into::<Function>().ok())
                    .ok_or_else(|| LoadError::new(format!("{url} has no default export factory")))?;
                Ok(ResolvedFactory {
                    factory,
                    script: None,
                })
            }
            EngineSource::Script(script) => {
                let base = import_first(script)?;
                let factory = Reflect::get(&js_sys::global(), &script.global.as_str().into())
                    .ok()
                    .and_then(|value| value.dyn_into::<Function>().ok())
                    .ok_or_else(|| {
                        LoadError::new(format!("{} did not define {}", script.script, script.global))
                    })?;
                Ok(ResolvedFactory {
                    factory,
                    script: Some((base, script.clone())),
                })
            }
        }
    }

    fn module_arguments(
        &self,
        config: &EngineConfig,
        resolved: &ResolvedFactory,
        hooks: LoadHooks<EmscriptenModule>,
        sinks: &SinkSlots,
    ) -> Result<Object, LoadError> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let args: Object = config
            .passthrough
            .serialize(&serializer)
            .map_err(|err| LoadError::new(err.to_string()))?
            .dyn_into()
            .unwrap_or_else(|_| Object::new());

        if let Some(overrides) = self.overrides.borrow().as_ref() {
            Object::assign(&args, overrides);
        }

        if let Some((base, script)) = &resolved.script {
            if !has_key(&args, "locateFile") {
                set(&args, "locateFile", &locate_file(base.clone(), script.wasm.clone()))?;
            }
        }

        let caller_pre_run = get(&args, "preRun");
        let caller_ready = get(&args, "onRuntimeInitialized");
        if has_key(&args, "print") || has_key(&args, "printErr") {
            tracing::debug!("Ignoring caller print overrides; output is routed through the shim");
        }

        let pre_run_sinks = sinks.clone();
        let pre_run = hooks.pre_run;
        let our_pre_run = Closure::once_into_js(move |module: JsValue| {
            if module.is_undefined() {
                tracing::debug!("preRun received no module; filesystem setup deferred");
                return;
            }
            let mut engine = EmscriptenModule::new(module, pre_run_sinks);
            pre_run(&mut engine);
        });
        let pre_run_list = Array::of1(&our_pre_run);
        match caller_pre_run {
            Some(list) if Array::is_array(&list) => {
                for callback in Array::from(&list).iter() {
                    pre_run_list.push(&callback);
                }
            }
            Some(callback) => {
                pre_run_list.push(&callback);
            }
            None => {}
        }

        let ready = hooks.on_runtime_initialized;
        let on_ready = Closure::once_into_js(move || {
            ready();
            if let Some(callback) = caller_ready.and_then(|c| c.dyn_into::<Function>().ok()) {
                if let Err(err) = callback.call0(&JsValue::NULL) {
                    tracing::warn!(error = %js_to_string(&err), "onRuntimeInitialized override threw");
                }
            }
        });

        set(&args, "noInitialRun", &JsValue::TRUE)?;
        set(&args, "preRun", &pre_run_list)?;
        set(&args, "print", &sinks.stdout_trampoline())?;
        set(&args, "printErr", &sinks.stderr_trampoline())?;
        set(&args, "onRuntimeInitialized", &on_ready)?;
        Ok(args)
    }
}

#[async_trait(?Send)]
impl EngineLoader for EmscriptenLoader {
    type Engine = EmscriptenModule;

    async fn load(
        &self,
        config: &EngineConfig,
        hooks: LoadHooks<EmscriptenModule>,
    ) -> Result<EmscriptenModule, LoadError> {
        let resolved = self.resolve_factory().await?;
        let sinks = SinkSlots::new(hooks.print.clone(), hooks.print_err.clone());
        let args = self.module_arguments(config, &resolved, hooks, &sinks)?;

        let pending = resolved
            .factory
            .call1(&JsValue::NULL, &args)
            .map_err(load_error)?;
        let module = JsFuture::from(Promise::resolve(&pending))
            .await
            .map_err(load_error)?;

        tracing::debug!("Engine module instantiated");
        Ok(EmscriptenModule::new(module, sinks))
    }
}

async fn dynamic_import(url: &str) -> Result<JsValue, LoadError> {
    let import = Function::new_with_args("url", "return import(url);");
    let promise = import
        .call1(&JsValue::NULL, &url.into())
        .map_err(load_error)?;
    JsFuture::from(Promise::resolve(&promise))
        .await
        .map_err(load_error)
}

/// Try `importScripts` for each base in order and return the one that loaded.
fn import_first(script: &ScriptSource) -> Result<String, LoadError> {
    let global = js_sys::global();
    let mut failures = Vec::new();
    for base in &script.bases {
        let url = join_url(base, &script.script);
        match call_method(&global, "importScripts", &[url.as_str().into()]) {
            Ok(_) => {
                tracing::debug!(url = %url, "Loaded engine script");
                return Ok(base.clone());
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %js_to_string(&err), "Engine script failed to load");
                failures.push(format!("{url}: {}", js_to_string(&err)));
            }
        }
    }
    Err(LoadError::new(format!(
        "importScripts failed for every location ({})",
        failures.join("; ")
    )))
}

/// `locateFile` resolving `.wasm` to the configured binary and everything
/// else relative to the script base, both against the global location.
fn locate_file(base: String, wasm: Option<String>) -> JsValue {
    Closure::<dyn Fn(JsValue) -> JsValue>::new(move |path: JsValue| {
        let path = path.as_string().unwrap_or_default();
        let file = match &wasm {
            Some(wasm) if path.ends_with(".wasm") => wasm.clone(),
            _ => path,
        };
        let relative = join_url(&base, &file);
        JsValue::from_str(&resolve_against_location(&relative))
    })
    .into_js_value()
}

fn resolve_against_location(relative: &str) -> String {
    let location = Reflect::get(&js_sys::global(), &"location".into())
        .ok()
        .and_then(|location| Reflect::get(&location, &"href".into()).ok())
        .and_then(|href| href.as_string());
    location
        .and_then(|href| web_sys::Url::new_with_base(relative, &href).ok())
        .map(|url| url.href())
        .unwrap_or_else(|| relative.to_string())
}

fn load_error(err: JsValue) -> LoadError {
    LoadError::new(js_to_string(&err))
}

fn get(target: &Object, key: &str) -> Option<JsValue> {
    Reflect::get(target, &key.into())
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

fn has_key(target: &Object, key: &str) -> bool {
    get(target, key).is_some()
}

fn set(target: &Object, key: &str, value: &JsValue) -> Result<(), LoadError> {
    Reflect::set(target, &key.into(), value)
        .map(|_| ())
        .map_err(load_error)
}
