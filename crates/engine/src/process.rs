//! Runner process invocation.
//!
//! Spawns the external Playwright runner with an argument vector (never a
//! shell string), captures stdout/stderr in full, and reports non-zero
//! exit as data rather than an error: a failing test suite exits non-zero
//! by design. Only spawn-level failures are errors.
//!
//! The output directory is deleted and recreated empty before every run,
//! and walked exactly once after the process exits to produce a
//! `RunManifest`. Artifact harvesting consumes the manifest, not the
//! directory, so the clean -> run -> harvest ordering is explicit.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use testdeck_common::BrowserProject;

use crate::error::{EngineError, EngineResult};

/// What the runner should execute
#[derive(Debug, Clone)]
pub enum RunTarget {
    /// A single materialized spec file
    Script(PathBuf),
    /// Every spec in the configured test directory
    All,
}

/// Ephemeral per-call invocation parameters
#[derive(Debug, Clone)]
pub struct RunnerInvocation {
    pub target: RunTarget,
    pub browser: BrowserProject,
    pub headless: bool,
}

/// Files present in the output directory after a run, in traversal order
#[derive(Debug, Clone, Default)]
pub struct RunManifest {
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl RunManifest {
    /// Walk `output_dir` once, recording every regular file in traversal
    /// order. Unreadable entries are skipped.
    pub fn scan(output_dir: &Path) -> Self {
        let files = WalkDir::new(output_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        Self {
            output_dir: output_dir.to_path_buf(),
            files,
        }
    }

    /// Whether a manifest entry sits directly in the output directory
    /// (as opposed to a nested per-test subdirectory)
    pub fn is_top_level(&self, path: &Path) -> bool {
        path.parent() == Some(self.output_dir.as_path())
    }
}

/// Captured result of one runner invocation
#[derive(Debug)]
pub struct RunOutput {
    pub exit_ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub manifest: RunManifest,
}

/// Settings for launching the runner against one project directory
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Program to execute (normally `npx`)
    pub program: String,
    /// Leading arguments (normally `playwright test`)
    pub base_args: Vec<String>,
    /// Working directory for the child process
    pub project_dir: PathBuf,
    /// Runner output directory, cleared before every run
    pub output_dir: PathBuf,
}

impl ProcessRunner {
    pub fn new(project_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "npx".to_string(),
            base_args: vec!["playwright".to_string(), "test".to_string()],
            project_dir: project_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Override the runner binary (used by tests to substitute a stub)
    pub fn with_program(mut self, program: impl Into<String>, base_args: Vec<String>) -> Self {
        self.program = program.into();
        self.base_args = base_args;
        self
    }

    fn build_args(&self, invocation: &RunnerInvocation) -> Vec<String> {
        let mut args = self.base_args.clone();

        if let RunTarget::Script(path) = &invocation.target {
            // Prefer a path relative to the project dir; the runner resolves
            // targets against its own cwd.
            let target = path
                .strip_prefix(&self.project_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string();
            args.push(target);
        }

        args.push(format!("--project={}", invocation.browser.as_str()));
        if !invocation.headless {
            args.push("--headed".to_string());
        }
        args.push("--reporter=json".to_string());
        args
    }

    /// Clear the output directory, run the runner to completion, and scan
    /// the manifest.
    ///
    /// Returns `Err` only on spawn failure; a non-zero exit produces
    /// `Ok` with `exit_ok == false`.
    pub async fn execute(&self, invocation: &RunnerInvocation) -> EngineResult<RunOutput> {
        self.reset_output_dir()?;

        let args = self.build_args(invocation);
        info!(
            "Launching runner: {} {} (cwd {:?})",
            self.program,
            args.join(" "),
            self.project_dir
        );

        let start = Instant::now();
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.project_dir)
            .output()
            .await
            .map_err(|e| EngineError::Launch(format!("{} {}: {}", self.program, args.join(" "), e)))?;
        let duration_ms = start.elapsed().as_millis() as i64;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_ok = output.status.success();

        debug!(
            "Runner exited with {:?} in {} ms ({} bytes stdout, {} bytes stderr)",
            output.status.code(),
            duration_ms,
            stdout.len(),
            stderr.len()
        );

        let manifest = RunManifest::scan(&self.output_dir);

        Ok(RunOutput {
            exit_ok,
            exit_code: output.status.code(),
            stdout,
            stderr,
            duration_ms,
            manifest,
        })
    }

    /// Delete and recreate the output directory so harvesting never sees
    /// stale files from a prior run.
    fn reset_output_dir(&self) -> EngineResult<()> {
        match std::fs::remove_dir_all(&self.output_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to clear output dir {:?}: {}", self.output_dir, e);
                return Err(e.into());
            }
        }
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}
