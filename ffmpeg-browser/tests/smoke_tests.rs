//! Smoke harness tests.

mod common;

use common::{expected_sine_md5, Behavior, FakeBuild, FakeLoader, BMP_64_SIZE};
use ffmpeg_browser::smoke::{Measurement, SmokeOutcome};
use ffmpeg_browser::{run_smoke_suite, EngineConfig, MonotonicClock, WorkerResponse};

fn outcome<'a>(results: &'a [SmokeOutcome], name: &str) -> &'a SmokeOutcome {
    results
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("missing result {name}"))
}

#[tokio::test]
async fn test_suite_reports_digests_and_sizes() {
    let loader = FakeLoader::default();
    let report = run_smoke_suite(&loader, &EngineConfig::default(), &MonotonicClock::new()).await;

    assert!(report.ok);
    assert!(report.all_passed());
    assert!(report.error.is_none());
    assert_eq!(report.init_errs, vec!["ffmpeg version n6.1 Copyright (c) 2000-2023".to_string()]);

    let results = report.results.as_deref().unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["audio_md5", "video_md5", "image_bmp"]);

    assert_eq!(
        outcome(results, "audio_md5").measurement,
        Measurement::Md5 {
            md5: Some(expected_sine_md5())
        }
    );
    assert!(matches!(
        &outcome(results, "video_md5").measurement,
        Measurement::Md5 { md5: Some(digest) } if digest.len() == 32
    ));
    assert_eq!(
        outcome(results, "image_bmp").measurement,
        Measurement::Size { size: BMP_64_SIZE }
    );
}

#[tokio::test]
async fn test_suite_with_raw_main_matches_call_main() {
    let raw = FakeLoader::new(FakeBuild::raw_main_only());
    let report = run_smoke_suite(&raw, &EngineConfig::default(), &MonotonicClock::new()).await;

    assert!(report.all_passed());
    let results = report.results.unwrap();
    assert_eq!(
        results[0].measurement,
        Measurement::Md5 {
            md5: Some(expected_sine_md5())
        }
    );
    assert_eq!(raw.latest().borrow().raw_argv[0], "ffmpeg");
    assert!(raw.latest().borrow().live_allocations.is_empty());
}

#[tokio::test]
async fn test_load_failure_reports_error() {
    let loader = FakeLoader::new(FakeBuild {
        fail_load: Some("importScripts failed for ffmpeg-core.js and ffmpeg.js".into()),
        ..Default::default()
    });
    let report = run_smoke_suite(&loader, &EngineConfig::default(), &MonotonicClock::new()).await;

    assert!(!report.ok);
    assert!(!report.all_passed());
    assert!(report.results.is_none());
    assert!(report.error.as_deref().unwrap().contains("importScripts failed"));
    assert_eq!(report.init_errs.len(), 1);

    let value = serde_json::to_value(WorkerResponse::Result(report)).unwrap();
    assert_eq!(value["type"], "result");
    assert_eq!(value["ok"], false);
    assert!(value.get("results").is_none());
}

#[tokio::test]
async fn test_build_without_entry_points_reports_error() {
    let loader = FakeLoader::new(FakeBuild::without_entry_points());
    let report = run_smoke_suite(&loader, &EngineConfig::default(), &MonotonicClock::new()).await;

    assert!(!report.ok);
    assert!(report.error.unwrap().contains("entry point"));
}

#[tokio::test]
async fn test_failing_cases_keep_stderr() {
    let loader = FakeLoader::new(FakeBuild {
        behavior: Behavior::Exit {
            code: 1,
            message: "Unknown input format: 'lavfi'".into(),
        },
        ..Default::default()
    });
    let report = run_smoke_suite(&loader, &EngineConfig::default(), &MonotonicClock::new()).await;

    assert!(report.ok);
    assert!(!report.all_passed());
    for result in report.results.as_deref().unwrap() {
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.err, vec!["Unknown input format: 'lavfi'".to_string()]);
    }

    let results = report.results.unwrap();
    assert_eq!(results[0].measurement, Measurement::Md5 { md5: None });
    assert_eq!(results[2].measurement, Measurement::Size { size: 0 });
}

#[tokio::test]
async fn test_success_report_serializes_for_page() {
    let loader = FakeLoader::default();
    let report = run_smoke_suite(&loader, &EngineConfig::default(), &MonotonicClock::new()).await;
    let value = serde_json::to_value(WorkerResponse::Result(report)).unwrap();

    assert_eq!(value["type"], "result");
    assert_eq!(value["ok"], true);
    assert!(value["totalMs"].is_u64());
    assert_eq!(value["results"][0]["name"], "audio_md5");
    assert_eq!(value["results"][0]["exitCode"], 0);
    assert_eq!(value["results"][0]["md5"], expected_sine_md5());
    assert_eq!(value["results"][2]["size"], BMP_64_SIZE);
    assert!(value.get("error").is_none());
}
