//! Normalization of the runner's JSON report.
//!
//! The report is untrusted, transient input: the runner re-emits specs and
//! tests with the same title across retries and workers, and is
//! inconsistent about which field carries pass/fail across versions.
//! Normalization deduplicates by title with a failure-wins rule (a failing
//! duplicate always replaces a passing one; problems are surfaced, never
//! hidden behind a later passing retry) and projects the result into a
//! stable suites/specs/tests shape plus flat per-step outcomes aligned to
//! the originating step order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use testdeck_common::StepRecord;

use crate::script::STEP_TOKEN_PREFIX;

// ---------------------------------------------------------------------------
// Raw report shapes (tolerant deserialization)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct RawReport {
    #[serde(default)]
    stats: RawStats,
    #[serde(default)]
    suites: Vec<RawSuite>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawStats {
    #[serde(default)]
    expected: u64,
    #[serde(default)]
    unexpected: u64,
    #[serde(default)]
    flaky: u64,
    #[serde(default)]
    skipped: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSuite {
    #[serde(default)]
    title: String,
    #[serde(default)]
    specs: Vec<RawSpec>,
    /// The runner nests file-level suites inside describe-blocks
    #[serde(default)]
    suites: Vec<RawSuite>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSpec {
    #[serde(default)]
    title: String,
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    tests: Vec<RawTest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawTest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    passed: Option<bool>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    error: Option<RawError>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stack: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawStep {
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    error: Option<RawError>,
}

// ---------------------------------------------------------------------------
// Normalized shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportStats {
    pub expected: u64,
    pub unexpected: u64,
    pub flaky: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

/// A step as the runner reported it, title marker included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStep {
    pub title: String,
    pub duration_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub title: String,
    pub status: String,
    pub passed: bool,
    pub duration_ms: i64,
    #[serde(default)]
    pub error: Option<TestError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<RunnerStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecResult {
    pub title: String,
    pub ok: bool,
    pub tests: Vec<TestOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub title: String,
    pub specs: Vec<SpecResult>,
}

/// Flat per-step outcome aligned to the originating step order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub action: String,
    pub success: bool,
    pub duration_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Canonical, UI-friendly projection of one runner report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub stats: ReportStats,
    pub suites: Vec<SuiteResult>,
    #[serde(default)]
    pub step_results: Vec<StepOutcome>,
}

impl NormalizedResult {
    /// Total retained tests across all suites
    pub fn test_count(&self) -> usize {
        self.suites
            .iter()
            .flat_map(|s| &s.specs)
            .map(|spec| spec.tests.len())
            .sum()
    }
}

pub struct ReportNormalizer;

impl ReportNormalizer {
    /// Parse and normalize a raw report.
    ///
    /// Returns `None` when the text does not parse as a report; the run is
    /// still treated as completed by the caller, with the raw output as
    /// the fallback source of truth.
    pub fn normalize(raw_json: &str, step_records: &[StepRecord]) -> Option<NormalizedResult> {
        let report: RawReport = match serde_json::from_str(raw_json.trim()) {
            Ok(report) => report,
            Err(e) => {
                debug!("Report did not parse as JSON: {}", e);
                return None;
            }
        };

        let suites: Vec<SuiteResult> = report
            .suites
            .iter()
            .map(normalize_suite)
            .collect();

        let step_results = derive_step_results(&suites, step_records);

        Some(NormalizedResult {
            stats: ReportStats {
                expected: report.stats.expected,
                unexpected: report.stats.unexpected,
                flaky: report.stats.flaky,
                skipped: report.stats.skipped,
            },
            suites,
            step_results,
        })
    }
}

/// The runner is inconsistent about which field carries pass/fail across
/// versions; union them defensively.
fn test_passed(test: &RawTest) -> bool {
    matches!(test.status.as_deref(), Some("passed") | Some("expected"))
        || test.passed == Some(true)
}

fn normalize_error(error: &RawError) -> TestError {
    TestError {
        message: error.message.clone().unwrap_or_else(|| "unknown error".to_string()),
        stack: error.stack.clone(),
    }
}

fn normalize_test(test: &RawTest) -> TestOutcome {
    TestOutcome {
        title: test.title.clone(),
        status: test.status.clone().unwrap_or_else(|| {
            if test_passed(test) { "passed" } else { "failed" }.to_string()
        }),
        passed: test_passed(test),
        duration_ms: test.duration.unwrap_or(0.0) as i64,
        error: test.error.as_ref().map(normalize_error),
        steps: test
            .steps
            .iter()
            .map(|step| RunnerStep {
                title: step.title.clone(),
                duration_ms: step.duration.unwrap_or(0.0) as i64,
                error: step
                    .error
                    .as_ref()
                    .map(|e| e.message.clone().unwrap_or_else(|| "unknown error".to_string())),
            })
            .collect(),
    }
}

/// Deduplicate tests keyed by title: first entry wins unless a later
/// duplicate is non-passing.
fn dedup_tests(tests: &[RawTest]) -> Vec<TestOutcome> {
    let mut order: Vec<String> = Vec::new();
    let mut by_title: HashMap<String, TestOutcome> = HashMap::new();

    for test in tests {
        let outcome = normalize_test(test);
        if !by_title.contains_key(&test.title) {
            order.push(test.title.clone());
            by_title.insert(test.title.clone(), outcome);
        } else if !outcome.passed {
            by_title.insert(test.title.clone(), outcome);
        }
    }

    order
        .into_iter()
        .filter_map(|title| by_title.remove(&title))
        .collect()
}

/// Deduplicate specs keyed by title: a failing duplicate (`ok == false`)
/// always wins over a passing one.
fn dedup_specs(specs: Vec<&RawSpec>) -> Vec<SpecResult> {
    let mut order: Vec<String> = Vec::new();
    let mut by_title: HashMap<String, &RawSpec> = HashMap::new();

    for spec in specs {
        let failing = spec.ok == Some(false);
        if !by_title.contains_key(&spec.title) {
            order.push(spec.title.clone());
            by_title.insert(spec.title.clone(), spec);
        } else if failing {
            by_title.insert(spec.title.clone(), spec);
        }
    }

    order
        .into_iter()
        .filter_map(|title| by_title.remove(&title))
        .map(|spec| {
            let tests = dedup_tests(&spec.tests);
            let ok = spec.ok.unwrap_or_else(|| tests.iter().all(|t| t.passed));
            SpecResult {
                title: spec.title.clone(),
                ok,
                tests,
            }
        })
        .collect()
}

fn normalize_suite(suite: &RawSuite) -> SuiteResult {
    // Flatten nested describe-block suites into the file-level suite
    let mut specs: Vec<&RawSpec> = Vec::new();
    collect_specs(suite, &mut specs);
    SuiteResult {
        title: suite.title.clone(),
        specs: dedup_specs(specs),
    }
}

fn collect_specs<'a>(suite: &'a RawSuite, out: &mut Vec<&'a RawSpec>) {
    out.extend(suite.specs.iter());
    for child in &suite.suites {
        collect_specs(child, out);
    }
}

/// Extract the step id from a `step:<id> ...` title marker
fn step_token(title: &str) -> Option<&str> {
    let rest = title.strip_prefix(STEP_TOKEN_PREFIX)?;
    let id = rest.split_whitespace().next()?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

fn strip_token(title: &str) -> &str {
    match title.strip_prefix(STEP_TOKEN_PREFIX) {
        Some(rest) => {
            let trimmed = rest.trim_start_matches(|c: char| !c.is_whitespace());
            trimmed.trim_start()
        }
        None => title,
    }
}

/// Recover per-step outcomes for the common single-test-case report.
///
/// Runner steps are matched to domain steps by the embedded `step:<id>`
/// marker when present, falling back to positional zip (the runner's step
/// titles do not otherwise match domain step actions). Only emitted when
/// the report retains exactly one spec with exactly one test; across many
/// specs the per-test tree is the result.
fn derive_step_results(suites: &[SuiteResult], step_records: &[StepRecord]) -> Vec<StepOutcome> {
    let specs: Vec<&SpecResult> = suites.iter().flat_map(|s| &s.specs).collect();
    if specs.len() != 1 || specs[0].tests.len() != 1 {
        return Vec::new();
    }

    let mut enabled: Vec<&StepRecord> = step_records.iter().filter(|s| !s.disabled).collect();
    enabled.sort_by_key(|s| s.order);

    let test = &specs[0].tests[0];

    test.steps
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let matched = step_token(&step.title)
                .and_then(|id| enabled.iter().find(|s| s.id == id).copied())
                .or_else(|| enabled.get(index).copied());

            let action = match matched {
                Some(record) => record.action.clone(),
                None => strip_token(&step.title).to_string(),
            };

            StepOutcome {
                action,
                success: step.error.is_none(),
                duration_ms: step.duration_ms,
                error: step.error.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::StepRecord;

    #[test]
    fn unparsable_input_returns_none() {
        assert!(ReportNormalizer::normalize("", &[]).is_none());
        assert!(ReportNormalizer::normalize("not json at all", &[]).is_none());
        assert!(ReportNormalizer::normalize("Error: boom\n{partial", &[]).is_none());
    }

    #[test]
    fn failing_duplicate_spec_wins_over_passing() {
        let raw = r#"{
            "stats": {"expected": 1, "unexpected": 1},
            "suites": [{
                "title": "login.spec.js",
                "specs": [
                    {"title": "Login", "ok": true,
                     "tests": [{"title": "Login", "status": "passed"}]},
                    {"title": "Login", "ok": false,
                     "tests": [{"title": "Login", "status": "failed",
                                "error": {"message": "timeout"}}]}
                ]
            }]
        }"#;
        let result = ReportNormalizer::normalize(raw, &[]).unwrap();
        assert_eq!(result.suites.len(), 1);
        let specs = &result.suites[0].specs;
        assert_eq!(specs.len(), 1);
        assert!(!specs[0].ok);
        assert!(!specs[0].tests[0].passed);
        assert_eq!(
            specs[0].tests[0].error.as_ref().unwrap().message,
            "timeout"
        );
    }

    #[test]
    fn failing_spec_is_not_replaced_by_later_passing_retry() {
        let raw = r#"{
            "suites": [{
                "title": "s",
                "specs": [
                    {"title": "Flow", "ok": false,
                     "tests": [{"title": "Flow", "status": "failed"}]},
                    {"title": "Flow", "ok": true,
                     "tests": [{"title": "Flow", "status": "passed"}]}
                ]
            }]
        }"#;
        let result = ReportNormalizer::normalize(raw, &[]).unwrap();
        assert!(!result.suites[0].specs[0].ok);
    }

    #[test]
    fn duplicate_tests_keep_the_failure() {
        let raw = r#"{
            "suites": [{
                "title": "s",
                "specs": [{
                    "title": "Checkout", "ok": false,
                    "tests": [
                        {"title": "Checkout", "status": "passed"},
                        {"title": "Checkout", "status": "failed"},
                        {"title": "Checkout", "status": "passed"}
                    ]
                }]
            }]
        }"#;
        let result = ReportNormalizer::normalize(raw, &[]).unwrap();
        let tests = &result.suites[0].specs[0].tests;
        assert_eq!(tests.len(), 1);
        assert!(!tests[0].passed);
    }

    #[test]
    fn passed_is_unioned_across_status_and_flag() {
        let raw = r#"{
            "suites": [{
                "title": "s",
                "specs": [{
                    "title": "a", "ok": true,
                    "tests": [
                        {"title": "by-status", "status": "expected"},
                        {"title": "by-flag", "passed": true},
                        {"title": "neither", "status": "timedOut"}
                    ]
                }]
            }]
        }"#;
        let result = ReportNormalizer::normalize(raw, &[]).unwrap();
        let tests = &result.suites[0].specs[0].tests;
        assert!(tests[0].passed);
        assert!(tests[1].passed);
        assert!(!tests[2].passed);
    }

    #[test]
    fn nested_suites_are_flattened_into_the_file_suite() {
        let raw = r#"{
            "suites": [{
                "title": "file.spec.js",
                "specs": [],
                "suites": [{
                    "title": "describe block",
                    "specs": [{"title": "inner", "ok": true,
                               "tests": [{"title": "inner", "status": "passed"}]}]
                }]
            }]
        }"#;
        let result = ReportNormalizer::normalize(raw, &[]).unwrap();
        assert_eq!(result.suites[0].specs.len(), 1);
        assert_eq!(result.suites[0].specs[0].title, "inner");
    }

    fn single_test_report(step_titles: &[(&str, bool)]) -> String {
        let steps: Vec<String> = step_titles
            .iter()
            .map(|(title, failed)| {
                if *failed {
                    format!(
                        r#"{{"title": "{}", "duration": 50, "error": {{"message": "step failed"}}}}"#,
                        title
                    )
                } else {
                    format!(r#"{{"title": "{}", "duration": 50}}"#, title)
                }
            })
            .collect();
        format!(
            r#"{{
                "stats": {{"expected": 1}},
                "suites": [{{
                    "title": "s",
                    "specs": [{{
                        "title": "t", "ok": true,
                        "tests": [{{"title": "t", "status": "passed", "steps": [{}]}}]
                    }}]
                }}]
            }}"#,
            steps.join(",")
        )
    }

    #[test]
    fn step_results_match_by_token_over_position() {
        let mut first = StepRecord::for_test_case("tc", 1, "click login");
        let mut second = StepRecord::for_test_case("tc", 2, "fill password");
        first.id = "aaa".to_string();
        second.id = "bbb".to_string();

        // Runner reports them in reverse order; token match must still align
        let raw = single_test_report(&[("step:bbb fill", false), ("step:aaa click", true)]);
        let result =
            ReportNormalizer::normalize(&raw, &[first.clone(), second.clone()]).unwrap();

        assert_eq!(result.step_results.len(), 2);
        assert_eq!(result.step_results[0].action, "fill password");
        assert!(result.step_results[0].success);
        assert_eq!(result.step_results[1].action, "click login");
        assert!(!result.step_results[1].success);
        assert_eq!(
            result.step_results[1].error.as_deref(),
            Some("step failed")
        );
    }

    #[test]
    fn step_results_fall_back_to_positional_zip() {
        let steps = vec![
            StepRecord::for_test_case("tc", 1, "navigate"),
            StepRecord::for_test_case("tc", 2, "click"),
        ];
        let raw = single_test_report(&[("Go to page", false), ("Press button", false)]);
        let result = ReportNormalizer::normalize(&raw, &steps).unwrap();

        assert_eq!(result.step_results[0].action, "navigate");
        assert_eq!(result.step_results[1].action, "click");
    }

    #[test]
    fn surplus_runner_steps_use_their_own_title() {
        let steps = vec![StepRecord::for_test_case("tc", 1, "navigate")];
        let raw = single_test_report(&[("Go to page", false), ("After hook", false)]);
        let result = ReportNormalizer::normalize(&raw, &steps).unwrap();

        assert_eq!(result.step_results[0].action, "navigate");
        assert_eq!(result.step_results[1].action, "After hook");
    }

    #[test]
    fn disabled_steps_are_excluded_from_the_zip() {
        let steps = vec![
            StepRecord::for_test_case("tc", 1, "click"),
            StepRecord::for_test_case("tc", 2, "fill").disabled(true),
            StepRecord::for_test_case("tc", 3, "submit"),
        ];
        let raw = single_test_report(&[("one", false), ("two", false)]);
        let result = ReportNormalizer::normalize(&raw, &steps).unwrap();

        assert_eq!(result.step_results[0].action, "click");
        assert_eq!(result.step_results[1].action, "submit");
    }

    #[test]
    fn multi_spec_reports_emit_no_step_results() {
        let raw = r#"{
            "suites": [{
                "title": "s",
                "specs": [
                    {"title": "a", "ok": true, "tests": [{"title": "a", "status": "passed", "steps": [{"title": "x"}]}]},
                    {"title": "b", "ok": true, "tests": [{"title": "b", "status": "passed", "steps": [{"title": "y"}]}]}
                ]
            }]
        }"#;
        let result = ReportNormalizer::normalize(raw, &[]).unwrap();
        assert!(result.step_results.is_empty());
        assert_eq!(result.test_count(), 2);
    }

    #[test]
    fn normalized_result_round_trips_through_json() {
        let raw = single_test_report(&[("step one", false)]);
        let result = ReportNormalizer::normalize(&raw, &[]).unwrap();
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: NormalizedResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.stats.expected, 1);
        assert_eq!(decoded.step_results.len(), 1);
    }
}
