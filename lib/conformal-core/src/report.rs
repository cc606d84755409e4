//! Run-level report payload.
//!
//! [`ConformanceReport`] is the stable JSON surface consumed by downstream
//! renderers; field names are part of the contract. Rendering to HTML or
//! Markdown happens outside this crate.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::property::RequestReport;

/// Aggregated results of one conformance run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConformanceReport {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub results: Vec<RequestReport>,
}

/// Headline numbers across all checked requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub overall_pass_rate: f64,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub total_properties: usize,
    pub passed_properties: usize,
    pub failed_properties: usize,
    pub unique_endpoints: usize,
    pub property_pass_rate: f64,
    pub average_response_time_ms: f64,
}

impl ConformanceReport {
    pub fn from_reports(title: impl Into<String>, results: Vec<RequestReport>) -> Self {
        let total_tests = results.len();
        let passed_tests = results.iter().filter(|report| report.overall_passed).count();
        let total_properties: usize = results.iter().map(|report| report.total_properties).sum();
        let passed_properties: usize = results.iter().map(|report| report.passed_properties).sum();
        let unique_endpoints = results
            .iter()
            .map(|report| format!("{} {}", report.request_method, report.request_path))
            .collect::<BTreeSet<_>>()
            .len();
        let average_response_time_ms = if results.is_empty() {
            0.0
        } else {
            let total: u64 = results.iter().map(|report| report.response_time_ms).sum();
            total as f64 / results.len() as f64
        };

        Self {
            title: title.into(),
            generated_at: Utc::now(),
            summary: ReportSummary {
                overall_pass_rate: rate(passed_tests, total_tests),
                total_tests,
                passed_tests,
                failed_tests: total_tests - passed_tests,
                total_properties,
                passed_properties,
                failed_properties: total_properties - passed_properties,
                unique_endpoints,
                property_pass_rate: rate(passed_properties, total_properties),
                average_response_time_ms,
            },
            results,
        }
    }
}

/// Fraction in `[0, 1]`; an empty population counts as fully passing.
fn rate(passed: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        passed as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::Method;

    use super::*;
    use crate::http::Request;

    fn report(method: Method, path: &str, passed: bool, response_time_ms: u64) -> RequestReport {
        let request = Request::new(method, path);
        let mut report = RequestReport::new(&request, 200, Vec::new(), Duration::ZERO);
        report.overall_passed = passed;
        if !passed {
            report.total_properties = 1;
            report.failed_properties = 1;
        }
        report.response_time_ms = response_time_ms;
        report
    }

    #[test]
    fn should_aggregate_summary_numbers() {
        let results = vec![
            report(Method::GET, "/api/users", true, 10),
            report(Method::GET, "/api/users", false, 30),
            report(Method::POST, "/api/users", true, 20),
        ];

        let conformance = ConformanceReport::from_reports("run", results);
        let summary = &conformance.summary;
        assert_eq!(summary.total_tests, 3);
        assert_eq!(summary.passed_tests, 2);
        assert_eq!(summary.failed_tests, 1);
        assert_eq!(summary.unique_endpoints, 2);
        assert!((summary.overall_pass_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!((summary.average_response_time_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_handle_empty_run() {
        let conformance = ConformanceReport::from_reports("empty", Vec::new());
        let summary = &conformance.summary;
        assert_eq!(summary.total_tests, 0);
        assert!((summary.overall_pass_rate - 1.0).abs() < f64::EPSILON);
        assert!((summary.average_response_time_ms - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn should_serialize_with_stable_field_names() {
        let conformance = ConformanceReport::from_reports("run", Vec::new());
        let json = serde_json::to_value(&conformance).expect("serializable");

        assert!(json.get("generatedAt").is_some());
        let summary = json.get("summary").expect("summary present");
        for field in [
            "overallPassRate",
            "totalTests",
            "passedTests",
            "failedTests",
            "totalProperties",
            "passedProperties",
            "failedProperties",
            "uniqueEndpoints",
            "propertyPassRate",
            "averageResponseTimeMs",
        ] {
            assert!(summary.get(field).is_some(), "missing field {field}");
        }
    }
}
