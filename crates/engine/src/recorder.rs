//! Execution history recording.
//!
//! Exactly one immutable history row is written per orchestrated run, on
//! the success and the failure branch alike, plus a best-effort update of
//! the owner's cached status fields. A persistence error here must not
//! convert a completed test run into an API-level error, so failures are
//! logged and swallowed; the run's own outcome stays the caller-visible
//! result.

use tracing::warn;

use testdeck_common::{BrowserProject, Database, NewExecution, RunStatus};

/// The entity whose status cache a run updates
#[derive(Debug, Clone)]
pub enum RunOwner {
    TestCase(String),
    Project(String),
}

/// Everything the recorder persists about one run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub owner: RunOwner,
    pub browser: BrowserProject,
    pub initiator_id: String,
    /// Concatenated stdout + stderr
    pub output: String,
    /// Absent when the process failed to launch
    pub execution_time_ms: Option<i64>,
    pub error_message: Option<String>,
    /// Serialized normalized result; absent when the report did not parse
    pub result_data: Option<String>,
    pub video_ref: Option<String>,
}

pub struct ExecutionRecorder {
    db: Database,
}

impl ExecutionRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn record_success(&self, record: RunRecord) {
        self.record(true, record);
    }

    pub fn record_failure(&self, record: RunRecord) {
        self.record(false, record);
    }

    fn record(&self, success: bool, record: RunRecord) {
        let status = RunStatus::from_passed(success);
        let now = chrono::Utc::now().timestamp();

        let (test_case_id, project_id) = match &record.owner {
            RunOwner::TestCase(id) => (Some(id.clone()), None),
            RunOwner::Project(id) => (None, Some(id.clone())),
        };

        let new = NewExecution {
            test_case_id,
            project_id,
            success,
            status,
            execution_time_ms: record.execution_time_ms,
            output: record.output,
            error_message: record.error_message,
            result_data: record.result_data,
            browser: record.browser,
            initiator_id: record.initiator_id.clone(),
            video_ref: record.video_ref,
        };

        if let Err(e) = self.db.insert_execution(&new) {
            warn!("Failed to persist execution history: {}", e);
        }

        let updated = match &record.owner {
            RunOwner::TestCase(id) => {
                self.db
                    .update_test_case_run_status(id, status, now, &record.initiator_id)
            }
            RunOwner::Project(id) => {
                self.db
                    .update_project_run_status(id, status, now, &record.initiator_id)
            }
        };
        if let Err(e) = updated {
            warn!("Failed to update cached run status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::{Project, TestCase};

    fn record_for(owner: RunOwner) -> RunRecord {
        RunRecord {
            owner,
            browser: BrowserProject::Chromium,
            initiator_id: "user-1".to_string(),
            output: "output".to_string(),
            execution_time_ms: Some(1500),
            error_message: None,
            result_data: None,
            video_ref: None,
        }
    }

    #[test]
    fn success_writes_one_row_and_updates_cache() {
        let db = Database::open_memory().unwrap();
        let project = Project::new("p", "http://x");
        db.create_project(&project).unwrap();
        let tc = TestCase::new(&project.id, "case");
        db.create_test_case(&tc).unwrap();

        let recorder = ExecutionRecorder::new(db.clone());
        recorder.record_success(record_for(RunOwner::TestCase(tc.id.clone())));

        let history = db.list_executions_for_test_case(&tc.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].status, RunStatus::Passed);

        let cached = db.get_test_case(&tc.id).unwrap();
        assert_eq!(cached.status, RunStatus::Passed);
        assert_eq!(cached.last_run_by.as_deref(), Some("user-1"));
    }

    #[test]
    fn failure_writes_one_row_for_project_sweeps() {
        let db = Database::open_memory().unwrap();
        let project = Project::new("p", "http://x");
        db.create_project(&project).unwrap();

        let recorder = ExecutionRecorder::new(db.clone());
        let mut record = record_for(RunOwner::Project(project.id.clone()));
        record.error_message = Some("2 tests failed".to_string());
        recorder.record_failure(record);

        let history = db.list_executions_for_project(&project.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].error_message.as_deref(), Some("2 tests failed"));

        let cached = db.get_project(&project.id).unwrap();
        assert_eq!(cached.status, RunStatus::Failed);
    }

    #[test]
    fn persistence_errors_are_swallowed() {
        let db = Database::open_memory().unwrap();
        let recorder = ExecutionRecorder::new(db.clone());
        // Unknown owner: the status update fails internally but the call
        // itself completes without error
        recorder.record_failure(record_for(RunOwner::TestCase("missing".to_string())));
    }
}
