//! Browser time source.

use ffmpeg_browser::Clock;
use js_sys::Reflect;
use std::time::Duration;
use wasm_bindgen::JsCast;
use web_sys::Performance;

/// [`Clock`] backed by `performance.now()`, falling back to `Date.now()`
/// where no performance timeline exists. Works on both the main thread and
/// in workers.
#[derive(Debug, Clone)]
pub struct PerformanceClock {
    performance: Option<Performance>,
}

impl PerformanceClock {
    /// Look up the global performance timeline.
    pub fn new() -> Self {
        let performance = Reflect::get(&js_sys::global(), &"performance".into())
            .ok()
            .and_then(|value| value.dyn_into::<Performance>().ok());
        Self { performance }
    }

    /// Milliseconds on the monotonic timeline.
    pub fn now_ms(&self) -> f64 {
        self.performance
            .as_ref()
            .map(|p| p.now())
            .unwrap_or_else(js_sys::Date::now)
    }
}

impl Default for PerformanceClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PerformanceClock {
    fn now(&self) -> Duration {
        Duration::from_secs_f64(self.now_ms().max(0.0) / 1000.0)
    }

    fn unix_millis(&self) -> u64 {
        js_sys::Date::now() as u64
    }
}
