//! Execution orchestration facade.
//!
//! Sequences one run end-to-end: Preparing (output dir reset, inside the
//! process runner) -> Running -> Parsing (report + artifacts) ->
//! Recording -> Done. Two modes share the pipeline: a single test case,
//! or a whole-project sweep. A non-zero runner exit takes the failure
//! branch but still harvests artifacts (a failing run can still have a
//! video) and still writes history; only a pre-run configuration problem
//! returns without launching anything.
//!
//! One orchestrator call owns one child process lifecycle; callers are
//! responsible for not running two sweeps against the same project
//! directory concurrently, since both would race on the output dir reset.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use testdeck_common::{BrowserProject, Database, StepRecord};

use crate::artifacts::ArtifactHarvester;
use crate::error::{EngineError, EngineResult};
use crate::process::{ProcessRunner, RunManifest, RunTarget, RunnerInvocation};
use crate::recorder::{ExecutionRecorder, RunOwner, RunRecord};
use crate::report::{NormalizedResult, ReportNormalizer, StepOutcome};
use crate::script::ScriptMaterializer;

/// Engine paths and runner command for one deployment
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the runner project (cwd for the child process)
    pub project_dir: PathBuf,
    /// Durable public storage for harvested videos
    pub storage_dir: PathBuf,
    /// Program used to launch the runner
    pub runner_program: String,
    /// Leading arguments for the runner
    pub runner_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            storage_dir: PathBuf::from("public/videos"),
            runner_program: "npx".to_string(),
            runner_args: vec!["playwright".to_string(), "test".to_string()],
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("TESTDECK_PROJECT_DIR") {
            config.project_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("TESTDECK_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Ok(program) = std::env::var("TESTDECK_RUNNER_PROGRAM") {
            config.runner_program = program;
            config.runner_args = Vec::new();
        }
        config
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.project_dir.join("tests")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.project_dir.join("test-results")
    }

    pub fn config_path(&self) -> PathBuf {
        self.project_dir.join("playwright.config.ts")
    }
}

/// Per-run options selected by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub browser: BrowserProject,
    /// Headed runs include the runner's headed flag
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_initiator")]
    pub initiator_id: String,
}

fn default_headless() -> bool {
    true
}

fn default_initiator() -> String {
    "system".to_string()
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            browser: BrowserProject::Chromium,
            headless: true,
            initiator_id: default_initiator(),
        }
    }
}

/// What every orchestrated run returns to the caller.
///
/// Optional fields stay empty when a launch failure produced no output to
/// parse; the run outcome itself is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub step_results: Vec<StepOutcome>,
    #[serde(default)]
    pub test_results: Option<NormalizedResult>,
    #[serde(default)]
    pub screenshots: Vec<String>,
    /// Relative video name in durable storage
    #[serde(default)]
    pub video_ref: Option<String>,
}

pub struct ExecutionOrchestrator {
    db: Database,
    config: EngineConfig,
    runner: ProcessRunner,
    harvester: ArtifactHarvester,
    recorder: ExecutionRecorder,
    materializer: ScriptMaterializer,
}

impl ExecutionOrchestrator {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let runner = ProcessRunner::new(&config.project_dir, config.output_dir())
            .with_program(config.runner_program.clone(), config.runner_args.clone());
        let harvester = ArtifactHarvester::new(&config.storage_dir);
        let recorder = ExecutionRecorder::new(db.clone());
        let materializer = ScriptMaterializer::new(config.scripts_dir());
        Self {
            db,
            config,
            runner,
            harvester,
            recorder,
            materializer,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a single test case
    pub async fn run_test_case(
        &self,
        test_case_id: &str,
        options: &RunOptions,
    ) -> EngineResult<ExecutionOutcome> {
        let test_case = self.db.get_test_case(test_case_id)?;
        let project = self.db.get_project(&test_case.project_id)?;

        if let Some(outcome) = self.check_config() {
            return Ok(outcome);
        }

        let steps = self.db.steps_for_test_case(test_case_id)?;

        // Normally materialized at step-edit time; regenerate when absent
        // since derivation from steps is deterministic.
        let script = self.materializer.script_path(&test_case);
        if !script.exists() {
            self.materializer
                .materialize(&test_case, &steps, &project.base_url)?;
        }

        info!(
            "Executing test case '{}' on {}",
            test_case.name, options.browser
        );

        self.run_internal(
            RunOwner::TestCase(test_case.id.clone()),
            RunTarget::Script(script),
            &steps,
            format!("test-{}", test_case.id),
            options,
        )
        .await
    }

    /// Execute every test in the project (sweep mode)
    pub async fn run_project(
        &self,
        project_id: &str,
        options: &RunOptions,
    ) -> EngineResult<ExecutionOutcome> {
        let project = self.db.get_project(project_id)?;

        if let Some(outcome) = self.check_config() {
            return Ok(outcome);
        }

        info!("Executing all tests of '{}' on {}", project.name, options.browser);

        self.run_internal(
            RunOwner::Project(project.id.clone()),
            RunTarget::All,
            &[],
            "all-tests".to_string(),
            options,
        )
        .await
    }

    /// Missing runner config is a structured failure, not an error; no
    /// process is launched and no history is written since no run started.
    fn check_config(&self) -> Option<ExecutionOutcome> {
        let path = self.config.config_path();
        if path.exists() {
            return None;
        }
        warn!("Runner configuration missing at {:?}", path);
        Some(ExecutionOutcome {
            success: false,
            output: String::new(),
            duration_ms: None,
            error_message: Some(format!(
                "Runner configuration not found at {}",
                path.display()
            )),
            step_results: Vec::new(),
            test_results: None,
            screenshots: Vec::new(),
            video_ref: None,
        })
    }

    async fn run_internal(
        &self,
        owner: RunOwner,
        target: RunTarget,
        steps: &[StepRecord],
        owner_key: String,
        options: &RunOptions,
    ) -> EngineResult<ExecutionOutcome> {
        let invocation = RunnerInvocation {
            target,
            browser: options.browser,
            headless: options.headless,
        };

        match self.runner.execute(&invocation).await {
            Ok(run) => {
                let normalized = ReportNormalizer::normalize(&run.stdout, steps);
                let artifacts = self.harvester.collect(&run.manifest, &owner_key);
                let output = combine_output(&run.stdout, &run.stderr);

                let result_data = normalized
                    .as_ref()
                    .and_then(|n| serde_json::to_string(n).ok());
                let error_message = if run.exit_ok {
                    None
                } else {
                    Some(failure_message(normalized.as_ref(), &run.stderr, run.exit_code))
                };

                let record = RunRecord {
                    owner,
                    browser: options.browser,
                    initiator_id: options.initiator_id.clone(),
                    output: output.clone(),
                    execution_time_ms: Some(run.duration_ms),
                    error_message: error_message.clone(),
                    result_data,
                    video_ref: artifacts.video_ref.clone(),
                };
                if run.exit_ok {
                    self.recorder.record_success(record);
                } else {
                    self.recorder.record_failure(record);
                }

                let (step_results, test_results) = match normalized {
                    Some(result) => (result.step_results.clone(), Some(result)),
                    None => (Vec::new(), None),
                };

                Ok(ExecutionOutcome {
                    success: run.exit_ok,
                    output,
                    duration_ms: Some(run.duration_ms),
                    error_message,
                    step_results,
                    test_results,
                    screenshots: artifacts.screenshots,
                    video_ref: artifacts.video_ref,
                })
            }
            Err(EngineError::Launch(message)) => {
                warn!("Runner launch failed: {}", message);

                // A partially prepared run can still have artifacts on disk
                let manifest = RunManifest::scan(&self.config.output_dir());
                let artifacts = self.harvester.collect(&manifest, &owner_key);

                self.recorder.record_failure(RunRecord {
                    owner,
                    browser: options.browser,
                    initiator_id: options.initiator_id.clone(),
                    output: message.clone(),
                    execution_time_ms: None,
                    error_message: Some(message.clone()),
                    result_data: None,
                    video_ref: artifacts.video_ref.clone(),
                });

                Ok(ExecutionOutcome {
                    success: false,
                    output: message.clone(),
                    duration_ms: None,
                    error_message: Some(message),
                    step_results: Vec::new(),
                    test_results: None,
                    screenshots: artifacts.screenshots,
                    video_ref: artifacts.video_ref,
                })
            }
            Err(other) => Err(other),
        }
    }
}

/// Concatenate captured streams the way the history row stores them
fn combine_output(stdout: &str, stderr: &str) -> String {
    if stderr.trim().is_empty() {
        stdout.to_string()
    } else {
        format!("{}\nErrors:\n{}", stdout, stderr)
    }
}

fn failure_message(
    normalized: Option<&NormalizedResult>,
    stderr: &str,
    exit_code: Option<i32>,
) -> String {
    if let Some(result) = normalized {
        let failing = result
            .suites
            .iter()
            .flat_map(|s| &s.specs)
            .flat_map(|spec| &spec.tests)
            .find(|t| !t.passed);
        if let Some(test) = failing {
            if let Some(error) = &test.error {
                return error.message.clone();
            }
            return format!("Test '{}' {}", test.title, test.status);
        }
    }
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.lines().last().unwrap_or(stderr).to_string();
    }
    match exit_code {
        Some(code) => format!("Runner exited with code {}", code),
        None => "Runner terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::{Project, TestCase};

    #[test]
    fn combine_output_appends_errors_section() {
        assert_eq!(combine_output("out", ""), "out");
        assert_eq!(combine_output("out", "  \n"), "out");
        assert_eq!(
            combine_output("out", "Error: timeout"),
            "out\nErrors:\nError: timeout"
        );
    }

    #[test]
    fn failure_message_prefers_test_error() {
        let raw = r#"{
            "suites": [{"title": "s", "specs": [{"title": "t", "ok": false,
                "tests": [{"title": "t", "status": "failed",
                           "error": {"message": "selector not found"}}]}]}]
        }"#;
        let normalized = ReportNormalizer::normalize(raw, &[]).unwrap();
        assert_eq!(
            failure_message(Some(&normalized), "noise", Some(1)),
            "selector not found"
        );
    }

    #[test]
    fn failure_message_falls_back_to_stderr_then_exit_code() {
        assert_eq!(
            failure_message(None, "warning\nError: timeout", Some(1)),
            "Error: timeout"
        );
        assert_eq!(failure_message(None, "", Some(3)), "Runner exited with code 3");
        assert_eq!(failure_message(None, "", None), "Runner terminated by signal");
    }

    #[tokio::test]
    async fn missing_config_is_a_structured_failure_without_history() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_memory().unwrap();
        let project = Project::new("p", "http://x");
        db.create_project(&project).unwrap();
        let tc = TestCase::new(&project.id, "case");
        db.create_test_case(&tc).unwrap();

        let config = EngineConfig {
            project_dir: dir.path().to_path_buf(),
            storage_dir: dir.path().join("videos"),
            ..Default::default()
        };
        let orchestrator = ExecutionOrchestrator::new(db.clone(), config);

        let outcome = orchestrator
            .run_test_case(&tc.id, &RunOptions::default())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome
            .error_message
            .unwrap()
            .contains("Runner configuration not found"));
        assert!(db.list_executions_for_test_case(&tc.id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_test_case_propagates_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_memory().unwrap();
        let config = EngineConfig {
            project_dir: dir.path().to_path_buf(),
            storage_dir: dir.path().join("videos"),
            ..Default::default()
        };
        let orchestrator = ExecutionOrchestrator::new(db, config);
        let err = orchestrator
            .run_test_case("missing", &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(testdeck_common::Error::NotFound { .. })
        ));
    }
}
