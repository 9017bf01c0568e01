//! Execution history commands

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use testdeck_common::ExecutionRecord;

use super::Context;
use crate::output::{print_list, TableDisplay};

#[derive(Args)]
pub struct HistoryArgs {
    /// Test case id or name; a project id or name with --sweeps
    reference: String,

    /// Project name for test-case name lookup
    #[arg(short, long)]
    project: Option<String>,

    /// Show whole-project sweep history instead of test-case history
    #[arg(long)]
    sweeps: bool,

    /// Maximum number of rows
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

/// Execution display wrapper for serialization
#[derive(Serialize)]
pub struct ExecutionDisplay {
    pub when: String,
    pub status: String,
    pub duration_ms: String,
    pub browser: String,
    pub initiator: String,
    pub video: String,
}

impl From<&ExecutionRecord> for ExecutionDisplay {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            when: chrono::DateTime::from_timestamp_millis(record.created_at)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            status: record.status.to_string(),
            duration_ms: record
                .execution_time_ms
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".to_string()),
            browser: record.browser.to_string(),
            initiator: record.initiator_id.clone(),
            video: record.video_ref.clone().unwrap_or_default(),
        }
    }
}

impl TableDisplay for ExecutionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["When", "Status", "Duration (ms)", "Browser", "Initiator", "Video"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.when.clone(),
            self.status.clone(),
            self.duration_ms.clone(),
            self.browser.clone(),
            self.initiator.clone(),
            self.video.clone(),
        ]
    }
}

pub fn handle(context: &Context, args: HistoryArgs) -> Result<()> {
    let records = if args.sweeps {
        let project = context.resolve_project(&args.reference)?;
        context
            .db
            .list_executions_for_project(&project.id, args.limit)?
    } else {
        let test_case = context.resolve_test_case(&args.reference, args.project.as_deref())?;
        context
            .db
            .list_executions_for_test_case(&test_case.id, args.limit)?
    };

    let rows: Vec<ExecutionDisplay> = records.iter().map(ExecutionDisplay::from).collect();
    print_list(&rows, context.format);
    Ok(())
}
