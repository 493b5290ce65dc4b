//! Heavy route integration tests.
//!
//! Runs `GET /slow` many times under a paused clock so the simulated
//! latencies elapse instantly but are still observed by the middleware.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use obs_service::observability::logging::LogLevel;
use obs_service::workload::{FAILURE_REASONS, LATENCY_CHOICES_MS};
use obs_test_utils::exposition::{latency_count, request_total};
use obs_test_utils::TestApp;

const CALLS: usize = 1000;

#[tokio::test(start_paused = true)]
async fn test_slow_route_outcomes_over_many_calls() {
    let app = TestApp::new(2024);
    let mut failures = 0;
    let mut successes = Vec::new();

    for _ in 0..CALLS {
        let (status, body) = app.get_json("/slow").await;
        match status {
            200 => {
                assert_eq!(body["status"], "Success");
                let message = body["message"].as_str().unwrap();
                let ms: u64 = message
                    .strip_prefix("Heavy task completed in ")
                    .and_then(|rest| rest.strip_suffix("ms"))
                    .unwrap()
                    .parse()
                    .unwrap();
                assert!(LATENCY_CHOICES_MS.contains(&ms), "unexpected latency {ms}");
                successes.push(ms);
            }
            500 => {
                assert_eq!(body["status"], "Error");
                assert!(FAILURE_REASONS.contains(&body["error"].as_str().unwrap()));
                failures += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }

    let rate = failures as f64 / CALLS as f64;
    assert!(
        (0.09..=0.16).contains(&rate),
        "failure rate {rate} outside expected range"
    );
    assert_eq!(successes.len() + failures, CALLS);

    let metrics = app.metrics_text();
    assert_eq!(request_total(&metrics), CALLS as f64);
    assert_eq!(
        latency_count(&metrics, &[("route", "/slow"), ("status_code", "200")]),
        successes.len() as f64
    );
    assert_eq!(
        latency_count(&metrics, &[("route", "/slow"), ("status_code", "500")]),
        failures as f64
    );
    assert_eq!(app.logs().count_level(LogLevel::Error), failures);
    assert_eq!(app.logs().count_level(LogLevel::Info), successes.len());
}

#[tokio::test(start_paused = true)]
async fn test_recorded_duration_covers_simulated_latency() {
    let app = TestApp::new(11);

    for i in 0..50 {
        let (status, body) = app.get_json("/slow").await;

        let span = app.spans().spans().pop().unwrap();
        assert_eq!(span.status_code, status);
        assert!(span.start_time <= span.end_time);

        let event = app.logs().events().pop().unwrap();
        assert_eq!(event.context["status_code"], status);
        let duration = event.context["duration"].as_f64().unwrap();

        if status == 200 {
            let message = body["message"].as_str().unwrap();
            let ms: u64 = message
                .trim_start_matches("Heavy task completed in ")
                .trim_end_matches("ms")
                .parse()
                .unwrap();
            assert!(duration >= ms as f64, "call {i}: {duration} < {ms}");
            assert!(duration < (ms + 50) as f64);
        } else {
            // Failures are raised before any waiting.
            assert!(duration < 100.0);
        }
    }
    assert_eq!(app.spans().len(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_same_seed_gives_same_responses() {
    let first = TestApp::new(99);
    let second = TestApp::new(99);

    for _ in 0..20 {
        let a = first.get_json("/slow").await;
        let b = second.get_json("/slow").await;
        assert_eq!(a, b);
    }
}
