//! Metric extraction from a quality tool's JSON summary.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::util::extract_json_object;

pub const PASS_RATE: &str = "pass_rate";
pub const COVERAGE: &str = "coverage";

/// Parse the first JSON object on stdout into numeric metrics.
///
/// Top-level numbers become metrics. `coverage_percent` is read as `coverage`,
/// and `pass_rate` is derived from `passed`/`failed`/`total` when not reported.
pub fn parse_metrics(stdout: &str) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    let Some(json) = extract_json_object(stdout) else {
        return metrics;
    };
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&json) else {
        return metrics;
    };
    for (key, value) in &map {
        if let Some(n) = value.as_f64() {
            metrics.insert(key.clone(), n);
        }
    }

    if !metrics.contains_key(COVERAGE)
        && let Some(n) = metrics.get("coverage_percent").copied()
    {
        metrics.insert(COVERAGE.to_string(), n);
    }

    if !metrics.contains_key(PASS_RATE)
        && let Some(passed) = metrics.get("passed").copied()
    {
        let total = metrics
            .get("total")
            .copied()
            .unwrap_or_else(|| passed + metrics.get("failed").copied().unwrap_or(0.0));
        if total > 0.0 {
            metrics.insert(PASS_RATE.to_string(), passed * 100.0 / total);
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reported_metrics() {
        let metrics = parse_metrics(r#"{"pass_rate": 82.0, "coverage": 71.0, "name": "x"}"#);
        assert_eq!(metrics.get(PASS_RATE), Some(&82.0));
        assert_eq!(metrics.get(COVERAGE), Some(&71.0));
        assert!(!metrics.contains_key("name"));
    }

    #[test]
    fn test_pass_rate_derived_from_counts() {
        let metrics = parse_metrics("test result: ok\n{\"passed\": 41, \"failed\": 9}\n");
        assert_eq!(metrics.get(PASS_RATE), Some(&82.0));

        let metrics = parse_metrics(r#"{"passed": 3, "total": 4}"#);
        assert_eq!(metrics.get(PASS_RATE), Some(&75.0));
    }

    #[test]
    fn test_coverage_percent_alias() {
        let metrics = parse_metrics(r#"{"coverage_percent": 69.5}"#);
        assert_eq!(metrics.get(COVERAGE), Some(&69.5));
    }

    #[test]
    fn test_no_summary() {
        assert!(parse_metrics("all good").is_empty());
        assert!(parse_metrics("{not json}").is_empty());
        assert!(parse_metrics(r#"{"passed": 0, "failed": 0}"#).get(PASS_RATE).is_none());
    }
}
