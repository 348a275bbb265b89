//! Smoke-test harness run inside a worker to check an engine build.
//!
//! The harness loads an engine, runs three fixed invocations on synthetic
//! input and reports digests, sizes and timings. It talks to the page through
//! two messages:
//!
//! - inbound `{type: "run"}`
//! - outbound `{type: "result", ok, totalMs, initLogs, initErrs, results}` or,
//!   when loading fails, `{type: "result", ok: false, error, totalMs, ...}`

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineLoader, LineSink, LoadHooks};
use crate::runner::{EntryPoint, InvocationRunner};
use crate::telemetry::Clock;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

/// What a smoke case reports besides its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    /// Digest printed by the `md5` muxer on stdout.
    Md5,
    /// Size of the file written at this path.
    FileSize(&'static str),
}

/// One fixed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmokeCase {
    /// Name reported in the results.
    pub name: &'static str,
    /// Arguments passed to the engine.
    pub args: &'static [&'static str],
    /// What to report.
    pub measure: Measure,
}

/// Synthetic 1 kHz tone, one second at 44.1 kHz, hashed.
pub const AUDIO_MD5: SmokeCase = SmokeCase {
    name: "audio_md5",
    args: &[
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "lavfi",
        "-i",
        "sine=frequency=1000:sample_rate=44100",
        "-t",
        "1",
        "-f",
        "md5",
        "-",
    ],
    measure: Measure::Md5,
};

/// 64x64 test pattern, one second at one frame per second, hashed.
pub const VIDEO_MD5: SmokeCase = SmokeCase {
    name: "video_md5",
    args: &[
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "lavfi",
        "-i",
        "testsrc=size=64x64:rate=1",
        "-t",
        "1",
        "-f",
        "md5",
        "-",
    ],
    measure: Measure::Md5,
};

/// One red 64x64 frame written as a bitmap.
pub const IMAGE_BMP: SmokeCase = SmokeCase {
    name: "image_bmp",
    args: &[
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "lavfi",
        "-i",
        "color=c=red:size=64x64:rate=1",
        "-frames:v",
        "1",
        "-f",
        "image2",
        "-vcodec",
        "bmp",
        "/out.bmp",
    ],
    measure: Measure::FileSize("/out.bmp"),
};

/// The suite, in execution order.
pub const SMOKE_CASES: [SmokeCase; 3] = [AUDIO_MD5, VIDEO_MD5, IMAGE_BMP];

/// Messages the harness accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    /// Load the engine and run the suite.
    Run,
}

/// Messages the harness posts back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerResponse {
    /// Suite finished, or loading failed.
    Result(HarnessReport),
}

/// Outcome of a whole harness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessReport {
    /// Whether the engine loaded.
    pub ok: bool,
    /// Load failure message.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Milliseconds from request to report.
    pub total_ms: u64,
    /// Stdout lines printed while loading.
    pub init_logs: Vec<String>,
    /// Stderr lines printed while loading.
    pub init_errs: Vec<String>,
    /// Per-case results; absent when loading failed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub results: Option<Vec<SmokeOutcome>>,
}

impl HarnessReport {
    /// Whether the engine loaded and every case exited cleanly.
    pub fn all_passed(&self) -> bool {
        self.ok
            && self
                .results
                .as_ref()
                .is_some_and(|results| results.iter().all(|r| r.exit_code == 0))
    }
}

/// Result of one smoke case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmokeOutcome {
    /// Case name.
    pub name: String,
    /// Engine exit code.
    pub exit_code: i32,
    /// Milliseconds spent in the engine.
    pub ms: f64,
    /// Digest or file size.
    #[serde(flatten)]
    pub measurement: Measurement,
    /// Captured stderr lines.
    pub err: Vec<String>,
}

/// Measured value of a smoke case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    /// Digest from stdout, `None` when none was printed.
    Md5 {
        /// Hex digest.
        md5: Option<String>,
    },
    /// Output file size, 0 when the file is missing.
    Size {
        /// Size in bytes.
        size: u64,
    },
}

/// Load an engine with `loader` and run [`SMOKE_CASES`] against it.
pub async fn run_smoke_suite<L>(loader: &L, config: &EngineConfig, clock: &dyn Clock) -> HarnessReport
where
    L: EngineLoader + 'static,
    L::Engine: 'static,
{
    let started = clock.now();
    let logs = Rc::new(RefCell::new(Vec::new()));
    let errors = Rc::new(RefCell::new(Vec::new()));

    let hooks = {
        let logs = Rc::clone(&logs);
        let errors = Rc::clone(&errors);
        let print: LineSink = Rc::new(move |line: &str| logs.borrow_mut().push(line.to_string()));
        let print_err: LineSink =
            Rc::new(move |line: &str| errors.borrow_mut().push(line.to_string()));
        LoadHooks {
            pre_run: Box::new(|_: &mut L::Engine| {}),
            print,
            print_err,
            on_runtime_initialized: Box::new(|| {}),
        }
    };

    let loaded = loader
        .load(config, hooks)
        .await
        .map_err(|err| err.to_string())
        .and_then(|engine| {
            EntryPoint::select(engine.entry_points())
                .map(|entry| (engine, entry))
                .map_err(|err| err.to_string())
        });

    let elapsed_ms = |clock: &dyn Clock| clock.now().saturating_sub(started).as_millis() as u64;

    let (mut engine, entry_point) = match loaded {
        Ok(loaded) => loaded,
        Err(error) => {
            tracing::error!(error = %error, "Smoke harness could not load engine");
            return HarnessReport {
                ok: false,
                error: Some(error),
                total_ms: elapsed_ms(clock),
                init_logs: logs.take(),
                init_errs: errors.take(),
                results: None,
            };
        }
    };

    let runner = InvocationRunner::new(entry_point, config.program_name.clone());
    let results = SMOKE_CASES
        .iter()
        .map(|case| run_case(&runner, &mut engine, case, clock))
        .collect();

    HarnessReport {
        ok: true,
        error: None,
        total_ms: elapsed_ms(clock),
        init_logs: logs.take(),
        init_errs: errors.take(),
        results: Some(results),
    }
}

fn run_case<E: Engine>(
    runner: &InvocationRunner,
    engine: &mut E,
    case: &SmokeCase,
    clock: &dyn Clock,
) -> SmokeOutcome {
    let args: Vec<String> = case.args.iter().map(|a| a.to_string()).collect();
    let (exit_code, ms, err, digest) = match runner.run(engine, &args, clock) {
        Ok(result) => (
            result.exit_code,
            result.duration_ms(),
            result.stderr.clone(),
            result.md5_digest(),
        ),
        Err(error) => (-1, 0.0, vec![error.to_string()], None),
    };

    let measurement = match case.measure {
        Measure::Md5 => Measurement::Md5 { md5: digest },
        Measure::FileSize(path) => Measurement::Size {
            size: engine.file_size(path).unwrap_or(0),
        },
    };

    tracing::info!(case = case.name, exit_code, ms, "Smoke case finished");
    SmokeOutcome {
        name: case.name.to_string(),
        exit_code,
        ms,
        measurement,
        err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_request_parses() {
        let request: WorkerRequest = serde_json::from_value(json!({ "type": "run" })).unwrap();
        assert_eq!(request, WorkerRequest::Run);
        assert!(serde_json::from_value::<WorkerRequest>(json!({ "type": "ping" })).is_err());
    }

    #[test]
    fn test_failure_report_shape() {
        let response = WorkerResponse::Result(HarnessReport {
            ok: false,
            error: Some("NetworkError".into()),
            total_ms: 12,
            init_logs: vec![],
            init_errs: vec!["failed to fetch".into()],
            results: None,
        });
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["type"], "result");
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "NetworkError");
        assert_eq!(value["totalMs"], 12);
        assert_eq!(value["initErrs"][0], "failed to fetch");
        assert!(value.get("results").is_none());
    }

    #[test]
    fn test_outcome_flattens_measurement() {
        let md5 = SmokeOutcome {
            name: "audio_md5".into(),
            exit_code: 0,
            ms: 1.5,
            measurement: Measurement::Md5 { md5: None },
            err: vec![],
        };
        let size = SmokeOutcome {
            name: "image_bmp".into(),
            exit_code: 0,
            ms: 2.0,
            measurement: Measurement::Size { size: 12342 },
            err: vec![],
        };

        let md5 = serde_json::to_value(md5).unwrap();
        assert!(md5["md5"].is_null());
        assert_eq!(md5["exitCode"], 0);
        assert_eq!(serde_json::to_value(size).unwrap()["size"], 12342);
    }

    #[test]
    fn test_cases_target_expected_outputs() {
        assert_eq!(SMOKE_CASES.len(), 3);
        assert_eq!(SMOKE_CASES[0].args.last(), Some(&"-"));
        assert_eq!(IMAGE_BMP.measure, Measure::FileSize("/out.bmp"));
        assert_eq!(IMAGE_BMP.args.last(), Some(&"/out.bmp"));
    }
}
