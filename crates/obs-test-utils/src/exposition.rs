//! Helpers for reading Prometheus text exposition output.

use obs_service::observability::metrics::{LATENCY_HISTOGRAM, REQUEST_COUNTER};

/// Value of the first sample named `name` whose labels include every pair
/// in `labels`. Returns `None` when no sample matches.
pub fn sample_value(rendered: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| {
            let metric = line.split(['{', ' ']).next().unwrap_or_default();
            metric == name
        })
        .find(|line| {
            labels
                .iter()
                .all(|(key, value)| line.contains(&format!("{key}=\"{value}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

/// Current value of the request counter, zero before the first request.
pub fn request_total(rendered: &str) -> f64 {
    sample_value(rendered, REQUEST_COUNTER, &[]).unwrap_or(0.0)
}

/// Histogram sample count for the given labels, zero when absent.
pub fn latency_count(rendered: &str, labels: &[(&str, &str)]) -> f64 {
    sample_value(rendered, &format!("{LATENCY_HISTOGRAM}_count"), labels).unwrap_or(0.0)
}

/// Histogram sample count across every label set.
pub fn latency_count_all(rendered: &str) -> f64 {
    let name = format!("{LATENCY_HISTOGRAM}_count");
    rendered
        .lines()
        .filter(|line| line.starts_with(&name))
        .filter_map(|line| line.rsplit(' ').next())
        .filter_map(|value| value.parse::<f64>().ok())
        .sum()
}
