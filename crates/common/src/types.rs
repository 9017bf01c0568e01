//! Core domain types for Testdeck

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Cached run status shown in list views.
///
/// Not authoritative; the execution history rows are. This is a fast-path
/// summary updated as a side effect of each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Passed,
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn from_passed(passed: bool) -> Self {
        if passed {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "passed" => Ok(RunStatus::Passed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(Error::Internal(format!("unknown run status: {}", other))),
        }
    }
}

/// Browser project the runner executes against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserProject {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserProject {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserProject::Chromium => "chromium",
            BrowserProject::Firefox => "firefox",
            BrowserProject::Webkit => "webkit",
        }
    }

    pub const ALL: [BrowserProject; 3] = [
        BrowserProject::Chromium,
        BrowserProject::Firefox,
        BrowserProject::Webkit,
    ];
}

impl std::fmt::Display for BrowserProject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BrowserProject {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(BrowserProject::Chromium),
            "firefox" => Ok(BrowserProject::Firefox),
            "webkit" => Ok(BrowserProject::Webkit),
            other => Err(Error::UnknownBrowser(other.to_string())),
        }
    }
}

/// A project groups test cases and owns one runner working directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Base URL the generated scripts navigate to
    pub base_url: String,
    pub status: RunStatus,
    pub last_run: Option<i64>,
    pub last_run_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            base_url: base_url.into(),
            status: RunStatus::Pending,
            last_run: None,
            last_run_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An authored test case: a named, ordered list of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tags embedded into the generated script for filtered runs
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: RunStatus,
    pub last_run: Option<i64>,
    pub last_run_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TestCase {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            status: RunStatus::Pending,
            last_run: None,
            last_run_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// A reusable group of steps referenced from test-case steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: i64,
}

impl Fixture {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name: name.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One ordered unit of test intent.
///
/// Owned by exactly one of `test_case_id` / `fixture_id`. The optional
/// `linked_fixture_id` is a weak reference to a reusable step group and
/// carries no ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    #[serde(default)]
    pub test_case_id: Option<String>,
    #[serde(default)]
    pub fixture_id: Option<String>,
    /// Unique within the parent, ascending, gap-tolerant
    pub order: i64,
    pub action: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    /// Disabled steps are excluded from materialization
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub linked_fixture_id: Option<String>,
}

impl StepRecord {
    pub fn for_test_case(test_case_id: impl Into<String>, order: i64, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            test_case_id: Some(test_case_id.into()),
            fixture_id: None,
            order,
            action: action.into(),
            data: None,
            expected: None,
            selector: None,
            disabled: false,
            linked_fixture_id: None,
        }
    }

    pub fn for_fixture(fixture_id: impl Into<String>, order: i64, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            test_case_id: None,
            fixture_id: Some(fixture_id.into()),
            order,
            action: action.into(),
            data: None,
            expected: None,
            selector: None,
            disabled: false,
            linked_fixture_id: None,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// An immutable execution history row.
///
/// Written exactly once per orchestrated run, on both the success and
/// failure branch. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    /// Set for single-case runs
    pub test_case_id: Option<String>,
    /// Set for whole-project sweeps
    pub project_id: Option<String>,
    pub success: bool,
    pub status: RunStatus,
    /// Absent when the process failed to launch
    pub execution_time_ms: Option<i64>,
    /// Concatenated stdout + stderr
    pub output: String,
    pub error_message: Option<String>,
    /// Serialized normalized result; null when the report failed to parse
    pub result_data: Option<String>,
    pub browser: BrowserProject,
    pub initiator_id: String,
    /// Relative name of the harvested video in durable storage
    pub video_ref: Option<String>,
    pub created_at: i64,
}

/// Fields for inserting a new execution row
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub test_case_id: Option<String>,
    pub project_id: Option<String>,
    pub success: bool,
    pub status: RunStatus,
    pub execution_time_ms: Option<i64>,
    pub output: String,
    pub error_message: Option<String>,
    pub result_data: Option<String>,
    pub browser: BrowserProject,
    pub initiator_id: String,
    pub video_ref: Option<String>,
}
