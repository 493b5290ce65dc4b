//! Request instrumentation integration tests.
//!
//! Drives the real router through `TestApp` and checks that every request
//! except the scrape produces one span, one latency sample, one counter
//! increment and one log entry, all agreeing on the status code.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::{body::Body, http::Request, routing::get, Router};
use obs_service::observability::logging::LogLevel;
use obs_service::workload::FAILURE_REASONS;
use obs_test_utils::exposition::{latency_count, latency_count_all, request_total};
use obs_test_utils::TestApp;
use std::collections::BTreeMap;
use tokio::task::JoinSet;
use tower::ServiceExt;

#[tokio::test]
async fn test_home_is_fully_instrumented() {
    let app = TestApp::new(1);

    let (status, body) = app.get_text("/").await;
    assert_eq!(status, 200);
    assert_eq!(body, "Welcome to the Home Page!");

    let metrics = app.metrics_text();
    assert_eq!(request_total(&metrics), 1.0);
    assert_eq!(
        latency_count(
            &metrics,
            &[("method", "GET"), ("route", "/"), ("status_code", "200")]
        ),
        1.0
    );

    let event = app.logs().single();
    assert_eq!(event.level, LogLevel::Info);
    assert_eq!(event.message, "request on / route");
    assert_eq!(event.context["status_code"], 200);

    let span = app.spans().single();
    assert_eq!(span.name, "GET /");
    assert_eq!(span.status_code, 200);
    assert!(span.start_time <= span.end_time);
}

#[tokio::test]
async fn test_error_route_is_logged_as_error() {
    let app = TestApp::new(2);

    let (status, body) = app.get_json("/error").await;
    assert_eq!(status, 500);
    assert_eq!(body["status"], "Error");
    let reason = body["error"].as_str().unwrap();
    assert!(FAILURE_REASONS.contains(&reason));

    let event = app.logs().single();
    assert_eq!(event.level, LogLevel::Error);
    assert_eq!(event.message, "request on /error route failed");
    assert_eq!(event.context["errorMessage"], reason);
    assert_eq!(event.context["status_code"], 500);

    assert_eq!(app.spans().single().status_code, 500);
    assert_eq!(
        latency_count(&app.metrics_text(), &[("route", "/error"), ("status_code", "500")]),
        1.0
    );
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = TestApp::new(3);

    let (status, body) = app.get_json("/does-not-exist").await;
    assert_eq!(status, 404);
    assert_eq!(body["status"], "Error");
    assert_eq!(body["error"], "Cannot GET /does-not-exist");

    let event = app.logs().single();
    assert_eq!(event.level, LogLevel::Error);
    assert_eq!(event.context["route"], "/other");
    assert_eq!(event.context["path"], "/does-not-exist");
    assert_eq!(event.context["errorMessage"], "Cannot GET /does-not-exist");

    assert_eq!(app.spans().single().status_code, 404);
    assert_eq!(
        latency_count(&app.metrics_text(), &[("route", "/other"), ("status_code", "404")]),
        1.0
    );
}

async fn crashing_handler() -> &'static str {
    panic!("worker crashed")
}

#[tokio::test]
async fn test_panic_reaches_terminal_stage_and_is_finalized() {
    let app = TestApp::with_router(Router::new().route("/slow", get(crashing_handler)));

    let (status, body) = app.get_json("/slow").await;
    assert_eq!(status, 500);
    assert_eq!(body["status"], "Error");
    assert_eq!(body["error"], "worker crashed");

    let event = app.logs().single();
    assert_eq!(event.level, LogLevel::Error);
    assert_eq!(event.context["errorMessage"], "worker crashed");

    assert_eq!(app.spans().single().status_code, 500);
    assert_eq!(request_total(&app.metrics_text()), 1.0);
}

#[tokio::test]
async fn test_scrape_is_never_instrumented() {
    let app = TestApp::new(4);
    app.get("/").await;

    for _ in 0..10 {
        let (status, body) = app.get_text("/metrics").await;
        assert_eq!(status, 200);
        assert_eq!(request_total(&body), 1.0);
        assert_eq!(latency_count_all(&body), 1.0);
    }

    let after = app.metrics_text();
    assert_eq!(request_total(&after), 1.0);
    assert_eq!(latency_count(&after, &[("route", "/metrics")]), 0.0);
    assert_eq!(app.logs().len(), 1);
    assert_eq!(app.spans().len(), 1);
}

#[tokio::test]
async fn test_scrape_reports_exposition_format() {
    let app = TestApp::new(5);
    app.get("/").await;

    let (status, body) = app.get_text("/metrics").await;
    assert_eq!(status, 200);
    assert!(body.contains("# TYPE http_requests_total counter"));
    assert!(body.contains("# TYPE http_request_duration_milliseconds histogram"));
    assert!(body.contains("# HELP http_requests_total Total number of requests made"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_scrape_reports_process_metrics_without_counting_them() {
    let app = TestApp::new(8);

    let (_, first) = app.get_text("/metrics").await;
    let (_, second) = app.get_text("/metrics").await;

    for body in [&first, &second] {
        assert!(body
            .lines()
            .any(|line| line.starts_with("process_cpu_seconds_total")));
        assert!(body
            .lines()
            .any(|line| line.starts_with("process_resident_memory_bytes ")));
        assert!(body
            .lines()
            .any(|line| line.starts_with("process_start_time_seconds ")));
        assert_eq!(request_total(body), 0.0);
    }
    assert!(app.logs().is_empty());
    assert!(app.spans().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_all_signals_agree_on_status() {
    let app = TestApp::new(6);
    let paths = ["/", "/slow", "/error", "/missing"];

    for _ in 0..25 {
        for path in paths {
            app.get(path).await;
        }
    }
    let total = (paths.len() * 25) as f64;

    let metrics = app.metrics_text();
    assert_eq!(request_total(&metrics), total);
    assert_eq!(latency_count_all(&metrics), total);

    let mut span_statuses: BTreeMap<u16, usize> = BTreeMap::new();
    for span in app.spans().spans() {
        assert!(span.start_time <= span.end_time);
        *span_statuses.entry(span.status_code).or_default() += 1;
    }

    let mut log_statuses: BTreeMap<u16, usize> = BTreeMap::new();
    for event in app.logs().events() {
        let status = event.context["status_code"].as_u64().unwrap() as u16;
        let expected_level = if (200..300).contains(&status) {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        assert_eq!(event.level, expected_level);
        *log_statuses.entry(status).or_default() += 1;
    }

    assert_eq!(span_statuses, log_statuses);

    let mut sampled_total = 0.0;
    for status in span_statuses.keys() {
        let status = status.to_string();
        for route in ["/", "/slow", "/error", "/other"] {
            sampled_total += latency_count(
                &metrics,
                &[("route", route), ("status_code", status.as_str())],
            );
        }
    }
    assert_eq!(sampled_total, total);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_lose_no_samples() {
    let app = TestApp::new(7);
    let mut tasks = JoinSet::new();

    for i in 0..50 {
        let router = app.router();
        let path = if i % 2 == 0 { "/" } else { "/slow" };
        tasks.spawn(async move {
            router
                .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
                .await
                .unwrap()
                .status()
                .as_u16()
        });
    }

    let mut completed = 0;
    while let Some(result) = tasks.join_next().await {
        let status = result.unwrap();
        assert!(status == 200 || status == 500);
        completed += 1;
    }
    assert_eq!(completed, 50);

    let metrics = app.metrics_text();
    assert_eq!(request_total(&metrics), 50.0);
    assert_eq!(latency_count_all(&metrics), 50.0);
    assert_eq!(app.logs().len(), 50);
    assert_eq!(app.spans().len(), 50);
}
