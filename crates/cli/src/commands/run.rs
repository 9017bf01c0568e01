//! Run commands: single test case and whole-project sweep

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use testdeck_common::BrowserProject;
use testdeck_engine::{ExecutionOrchestrator, ExecutionOutcome, RunOptions, StepOutcome};

use super::Context;
use crate::output::{
    print_error, print_info, print_list, print_success, OutputFormat, TableDisplay,
};

#[derive(Args)]
pub struct RunArgs {
    /// Test case id, or name when --project is given
    test_case: String,

    /// Project name for name-based lookup
    #[arg(short, long)]
    project: Option<String>,

    #[command(flatten)]
    common: CommonRunArgs,
}

#[derive(Args)]
pub struct RunAllArgs {
    /// Project id or name
    project: String,

    #[command(flatten)]
    common: CommonRunArgs,
}

#[derive(Args)]
pub struct CommonRunArgs {
    /// Browser project to run against (chromium, firefox, webkit)
    #[arg(long, default_value = "chromium")]
    browser: String,

    /// Run with a visible browser window
    #[arg(long)]
    headed: bool,

    /// Recorded as the run initiator
    #[arg(long, default_value = "cli")]
    initiator: String,
}

impl CommonRunArgs {
    fn options(&self) -> Result<RunOptions> {
        let browser: BrowserProject = self.browser.parse()?;
        Ok(RunOptions {
            browser,
            headless: !self.headed,
            initiator_id: self.initiator.clone(),
        })
    }
}

pub async fn execute_one(context: &Context, args: RunArgs) -> Result<()> {
    let test_case = context.resolve_test_case(&args.test_case, args.project.as_deref())?;
    let options = args.common.options()?;

    let orchestrator = ExecutionOrchestrator::new(context.db.clone(), context.engine.clone());
    let outcome = orchestrator.run_test_case(&test_case.id, &options).await?;

    render_outcome(&test_case.name, &outcome, context.format);
    Ok(())
}

pub async fn execute_all(context: &Context, args: RunAllArgs) -> Result<()> {
    let project = context.resolve_project(&args.project)?;
    let options = args.common.options()?;

    let orchestrator = ExecutionOrchestrator::new(context.db.clone(), context.engine.clone());
    let outcome = orchestrator.run_project(&project.id, &options).await?;

    render_outcome(&project.name, &outcome, context.format);
    Ok(())
}

/// One step row for table output
#[derive(Serialize)]
struct StepRow {
    action: String,
    result: String,
    duration_ms: i64,
    error: String,
}

impl From<&StepOutcome> for StepRow {
    fn from(step: &StepOutcome) -> Self {
        Self {
            action: step.action.clone(),
            result: if step.success {
                "pass".green().to_string()
            } else {
                "FAIL".red().to_string()
            },
            duration_ms: step.duration_ms,
            error: step.error.clone().unwrap_or_default(),
        }
    }
}

impl TableDisplay for StepRow {
    fn headers() -> Vec<&'static str> {
        vec!["Action", "Result", "Duration (ms)", "Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.action.clone(),
            self.result.clone(),
            self.duration_ms.to_string(),
            self.error.clone(),
        ]
    }
}

fn render_outcome(name: &str, outcome: &ExecutionOutcome, format: OutputFormat) {
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(outcome).unwrap_or_default());
        return;
    }

    if outcome.success {
        match outcome.duration_ms {
            Some(ms) => print_success(&format!("{} passed ({} ms)", name, ms)),
            None => print_success(&format!("{} passed", name)),
        }
    } else {
        let reason = outcome
            .error_message
            .as_deref()
            .unwrap_or("test run failed");
        print_error(&format!("{} failed: {}", name, reason));
    }

    if !outcome.step_results.is_empty() {
        let rows: Vec<StepRow> = outcome.step_results.iter().map(StepRow::from).collect();
        print_list(&rows, format);
    }

    if let Some(results) = &outcome.test_results {
        let stats = &results.stats;
        print_info(&format!(
            "{} expected, {} unexpected, {} flaky, {} skipped",
            stats.expected, stats.unexpected, stats.flaky, stats.skipped
        ));
    }

    if let Some(video) = &outcome.video_ref {
        print_info(&format!("Video: {}", video));
    }
    if !outcome.screenshots.is_empty() {
        print_info(&format!("{} screenshot(s) captured", outcome.screenshots.len()));
    }
}
