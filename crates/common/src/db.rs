//! SQLite persistence for Testdeck domain state.
//!
//! Exposes the small set of read/write operations the execution engine
//! consumes (ordered step listing, status-cache updates, history inserts)
//! plus the seeding writes the CLI and tests need. The schema is a fixed,
//! versioned contract; absence of a column is handled by migration, never
//! by runtime probing.

use crate::error::{Error, Result};
use crate::types::*;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Database wrapper for domain state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Projects table
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                base_url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                last_run INTEGER,
                last_run_by TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name);

            -- Test cases table
            CREATE TABLE IF NOT EXISTS test_cases (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                tags TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'pending',
                last_run INTEGER,
                last_run_by TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_test_cases_project ON test_cases(project_id);

            -- Reusable step groups
            CREATE TABLE IF NOT EXISTS fixtures (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fixtures_project ON fixtures(project_id);

            -- Steps table; owned by exactly one of test_case_id / fixture_id
            CREATE TABLE IF NOT EXISTS steps (
                id TEXT PRIMARY KEY,
                test_case_id TEXT REFERENCES test_cases(id),
                fixture_id TEXT REFERENCES fixtures(id),
                ord INTEGER NOT NULL,
                action TEXT NOT NULL,
                data TEXT,
                expected TEXT,
                selector TEXT,
                disabled INTEGER NOT NULL DEFAULT 0,
                linked_fixture_id TEXT,
                CHECK ((test_case_id IS NULL) != (fixture_id IS NULL))
            );
            CREATE INDEX IF NOT EXISTS idx_steps_test_case ON steps(test_case_id, ord);
            CREATE INDEX IF NOT EXISTS idx_steps_fixture ON steps(fixture_id, ord);

            -- Immutable execution history
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                test_case_id TEXT REFERENCES test_cases(id),
                project_id TEXT REFERENCES projects(id),
                success INTEGER NOT NULL,
                status TEXT NOT NULL,
                execution_time_ms INTEGER,
                output TEXT NOT NULL,
                error_message TEXT,
                result_data TEXT,
                browser TEXT NOT NULL,
                initiator_id TEXT NOT NULL,
                video_ref TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_test_case ON executions(test_case_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_executions_project ON executions(project_id, created_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub fn create_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO projects (id, name, base_url, status, last_run, last_run_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                project.id,
                project.name,
                project.base_url,
                project.status.as_str(),
                project.last_run,
                project.last_run_by,
                project.created_at,
                project.updated_at,
            ],
        )?;
        debug!("Created project {}", project.id);
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, base_url, status, last_run, last_run_by, created_at, updated_at
             FROM projects WHERE id = ?1",
            params![id],
            project_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound {
            kind: "project".to_string(),
            id: id.to_string(),
        })
    }

    pub fn get_project_by_name(&self, name: &str) -> Result<Project> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, base_url, status, last_run, last_run_by, created_at, updated_at
             FROM projects WHERE name = ?1",
            params![name],
            project_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound {
            kind: "project".to_string(),
            id: name.to_string(),
        })
    }

    /// Update the cached run-status fields on a project (sweep mode)
    pub fn update_project_run_status(
        &self,
        id: &str,
        status: RunStatus,
        last_run: i64,
        last_run_by: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let changed = conn.execute(
            "UPDATE projects SET status = ?1, last_run = ?2, last_run_by = ?3, updated_at = ?4 WHERE id = ?5",
            params![status.as_str(), last_run, last_run_by, now, id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                kind: "project".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Test cases
    // ========================================================================

    pub fn create_test_case(&self, test_case: &TestCase) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO test_cases (id, project_id, name, description, tags, status, last_run, last_run_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                test_case.id,
                test_case.project_id,
                test_case.name,
                test_case.description,
                serde_json::to_string(&test_case.tags)?,
                test_case.status.as_str(),
                test_case.last_run,
                test_case.last_run_by,
                test_case.created_at,
                test_case.updated_at,
            ],
        )?;
        debug!("Created test case {}", test_case.id);
        Ok(())
    }

    pub fn get_test_case(&self, id: &str) -> Result<TestCase> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, project_id, name, description, tags, status, last_run, last_run_by, created_at, updated_at
             FROM test_cases WHERE id = ?1",
            params![id],
            test_case_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound {
            kind: "test case".to_string(),
            id: id.to_string(),
        })
    }

    pub fn get_test_case_by_name(&self, project_id: &str, name: &str) -> Result<TestCase> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, project_id, name, description, tags, status, last_run, last_run_by, created_at, updated_at
             FROM test_cases WHERE project_id = ?1 AND name = ?2",
            params![project_id, name],
            test_case_from_row,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound {
            kind: "test case".to_string(),
            id: name.to_string(),
        })
    }

    pub fn list_test_cases(&self, project_id: &str) -> Result<Vec<TestCase>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, description, tags, status, last_run, last_run_by, created_at, updated_at
             FROM test_cases WHERE project_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![project_id], test_case_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Update the cached run-status fields on a test case
    pub fn update_test_case_run_status(
        &self,
        id: &str,
        status: RunStatus,
        last_run: i64,
        last_run_by: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();
        let changed = conn.execute(
            "UPDATE test_cases SET status = ?1, last_run = ?2, last_run_by = ?3, updated_at = ?4 WHERE id = ?5",
            params![status.as_str(), last_run, last_run_by, now, id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound {
                kind: "test case".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Fixtures and steps
    // ========================================================================

    pub fn create_fixture(&self, fixture: &Fixture) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fixtures (id, project_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![fixture.id, fixture.project_id, fixture.name, fixture.created_at],
        )?;
        Ok(())
    }

    pub fn add_step(&self, step: &StepRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO steps (id, test_case_id, fixture_id, ord, action, data, expected, selector, disabled, linked_fixture_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                step.id,
                step.test_case_id,
                step.fixture_id,
                step.order,
                step.action,
                step.data,
                step.expected,
                step.selector,
                step.disabled as i64,
                step.linked_fixture_id,
            ],
        )?;
        Ok(())
    }

    /// Ordered steps for a test case, ascending by `ord`
    pub fn steps_for_test_case(&self, test_case_id: &str) -> Result<Vec<StepRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, test_case_id, fixture_id, ord, action, data, expected, selector, disabled, linked_fixture_id
             FROM steps WHERE test_case_id = ?1 ORDER BY ord ASC",
        )?;
        let rows = stmt.query_map(params![test_case_id], step_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Ordered steps for a fixture, ascending by `ord`
    pub fn steps_for_fixture(&self, fixture_id: &str) -> Result<Vec<StepRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, test_case_id, fixture_id, ord, action, data, expected, selector, disabled, linked_fixture_id
             FROM steps WHERE fixture_id = ?1 ORDER BY ord ASC",
        )?;
        let rows = stmt.query_map(params![fixture_id], step_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // ========================================================================
    // Execution history
    // ========================================================================

    /// Insert one immutable execution row
    pub fn insert_execution(&self, new: &NewExecution) -> Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            test_case_id: new.test_case_id.clone(),
            project_id: new.project_id.clone(),
            success: new.success,
            status: new.status,
            execution_time_ms: new.execution_time_ms,
            output: new.output.clone(),
            error_message: new.error_message.clone(),
            result_data: new.result_data.clone(),
            browser: new.browser,
            initiator_id: new.initiator_id.clone(),
            video_ref: new.video_ref.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO executions (id, test_case_id, project_id, success, status, execution_time_ms,
                                     output, error_message, result_data, browser, initiator_id, video_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.test_case_id,
                record.project_id,
                record.success as i64,
                record.status.as_str(),
                record.execution_time_ms,
                record.output,
                record.error_message,
                record.result_data,
                record.browser.as_str(),
                record.initiator_id,
                record.video_ref,
                record.created_at,
            ],
        )?;
        debug!("Inserted execution {}", record.id);
        Ok(record)
    }

    /// Recent executions for a test case, newest first
    pub fn list_executions_for_test_case(
        &self,
        test_case_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, test_case_id, project_id, success, status, execution_time_ms,
                    output, error_message, result_data, browser, initiator_id, video_ref, created_at
             FROM executions WHERE test_case_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![test_case_id, limit as i64], execution_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Recent executions for a project (sweep rows), newest first
    pub fn list_executions_for_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, test_case_id, project_id, success, status, execution_time_ms,
                    output, error_message, result_data, browser, initiator_id, video_ref, created_at
             FROM executions WHERE project_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project_id, limit as i64], execution_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

fn parse_status(raw: String) -> RunStatus {
    raw.parse().unwrap_or(RunStatus::Pending)
}

fn parse_browser(raw: String) -> BrowserProject {
    raw.parse().unwrap_or_default()
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        status: parse_status(row.get(3)?),
        last_run: row.get(4)?,
        last_run_by: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn test_case_from_row(row: &Row<'_>) -> rusqlite::Result<TestCase> {
    let tags: String = row.get(4)?;
    Ok(TestCase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        status: parse_status(row.get(5)?),
        last_run: row.get(6)?,
        last_run_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    Ok(StepRecord {
        id: row.get(0)?,
        test_case_id: row.get(1)?,
        fixture_id: row.get(2)?,
        order: row.get(3)?,
        action: row.get(4)?,
        data: row.get(5)?,
        expected: row.get(6)?,
        selector: row.get(7)?,
        disabled: row.get::<_, i64>(8)? != 0,
        linked_fixture_id: row.get(9)?,
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        id: row.get(0)?,
        test_case_id: row.get(1)?,
        project_id: row.get(2)?,
        success: row.get::<_, i64>(3)? != 0,
        status: parse_status(row.get(4)?),
        execution_time_ms: row.get(5)?,
        output: row.get(6)?,
        error_message: row.get(7)?,
        result_data: row.get(8)?,
        browser: parse_browser(row.get(9)?),
        initiator_id: row.get(10)?,
        video_ref: row.get(11)?,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Database, Project, TestCase) {
        let db = Database::open_memory().unwrap();
        let project = Project::new("demo", "http://localhost:3000");
        db.create_project(&project).unwrap();
        let test_case = TestCase::new(&project.id, "Login flow");
        db.create_test_case(&test_case).unwrap();
        (db, project, test_case)
    }

    #[test]
    fn steps_come_back_ordered() {
        let (db, _, tc) = seeded();
        db.add_step(&StepRecord::for_test_case(&tc.id, 30, "submit"))
            .unwrap();
        db.add_step(&StepRecord::for_test_case(&tc.id, 10, "navigate"))
            .unwrap();
        db.add_step(&StepRecord::for_test_case(&tc.id, 20, "fill"))
            .unwrap();

        let steps = db.steps_for_test_case(&tc.id).unwrap();
        let actions: Vec<&str> = steps.iter().map(|s| s.action.as_str()).collect();
        assert_eq!(actions, vec!["navigate", "fill", "submit"]);
    }

    #[test]
    fn gap_tolerant_ordering() {
        let (db, _, tc) = seeded();
        db.add_step(&StepRecord::for_test_case(&tc.id, 100, "b")).unwrap();
        db.add_step(&StepRecord::for_test_case(&tc.id, 7, "a")).unwrap();

        let steps = db.steps_for_test_case(&tc.id).unwrap();
        assert_eq!(steps[0].action, "a");
        assert_eq!(steps[1].action, "b");
    }

    #[test]
    fn fixture_steps_are_independent_of_test_case_steps() {
        let (db, project, tc) = seeded();
        let fixture = Fixture::new(&project.id, "login");
        db.create_fixture(&fixture).unwrap();
        db.add_step(&StepRecord::for_fixture(&fixture.id, 1, "fill user"))
            .unwrap();
        db.add_step(&StepRecord::for_fixture(&fixture.id, 2, "fill pass"))
            .unwrap();

        let mut linked = StepRecord::for_test_case(&tc.id, 1, "run login");
        linked.linked_fixture_id = Some(fixture.id.clone());
        db.add_step(&linked).unwrap();

        assert_eq!(db.steps_for_fixture(&fixture.id).unwrap().len(), 2);
        let case_steps = db.steps_for_test_case(&tc.id).unwrap();
        assert_eq!(case_steps.len(), 1);
        assert_eq!(
            case_steps[0].linked_fixture_id.as_deref(),
            Some(fixture.id.as_str())
        );
    }

    #[test]
    fn execution_insert_and_list() {
        let (db, _, tc) = seeded();
        let new = NewExecution {
            test_case_id: Some(tc.id.clone()),
            project_id: None,
            success: true,
            status: RunStatus::Passed,
            execution_time_ms: Some(1234),
            output: "1 passed".to_string(),
            error_message: None,
            result_data: Some("{}".to_string()),
            browser: BrowserProject::Chromium,
            initiator_id: "user-1".to_string(),
            video_ref: None,
        };
        let record = db.insert_execution(&new).unwrap();
        assert!(record.success);

        let history = db.list_executions_for_test_case(&tc.id, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
        assert_eq!(history[0].status, RunStatus::Passed);
    }

    #[test]
    fn status_cache_update() {
        let (db, project, tc) = seeded();
        db.update_test_case_run_status(&tc.id, RunStatus::Failed, 1000, "user-1")
            .unwrap();
        let fetched = db.get_test_case(&tc.id).unwrap();
        assert_eq!(fetched.status, RunStatus::Failed);
        assert_eq!(fetched.last_run, Some(1000));
        assert_eq!(fetched.last_run_by.as_deref(), Some("user-1"));

        db.update_project_run_status(&project.id, RunStatus::Passed, 2000, "user-2")
            .unwrap();
        let fetched = db.get_project(&project.id).unwrap();
        assert_eq!(fetched.status, RunStatus::Passed);
    }

    #[test]
    fn missing_rows_are_not_found() {
        let (db, _, _) = seeded();
        assert!(matches!(
            db.get_test_case("nope"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            db.update_test_case_run_status("nope", RunStatus::Passed, 0, "x"),
            Err(Error::NotFound { .. })
        ));
    }
}
