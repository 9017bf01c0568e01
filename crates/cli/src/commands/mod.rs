//! CLI Commands

pub mod config;
pub mod history;
pub mod run;
pub mod seed;

use std::path::PathBuf;

use anyhow::Result;

use testdeck_common::Database;
use testdeck_engine::EngineConfig;

use crate::output::OutputFormat;

/// Shared command context: store handle, engine paths, output format
pub struct Context {
    pub db: Database,
    pub engine: EngineConfig,
    pub format: OutputFormat,
}

impl Context {
    pub fn open(
        db_path: Option<PathBuf>,
        project_dir: PathBuf,
        storage_dir: Option<PathBuf>,
        format: OutputFormat,
    ) -> Result<Self> {
        let db_path = db_path.unwrap_or_else(testdeck_common::default_db_path);
        let db = Database::open(&db_path)?;

        let storage_dir = storage_dir.unwrap_or_else(|| project_dir.join("public/videos"));
        let engine = EngineConfig {
            project_dir,
            storage_dir,
            ..EngineConfig::from_env()
        };

        Ok(Self { db, engine, format })
    }

    /// Resolve a test case argument: exact id first, then name within the
    /// given project.
    pub fn resolve_test_case(
        &self,
        reference: &str,
        project: Option<&str>,
    ) -> Result<testdeck_common::TestCase> {
        match self.db.get_test_case(reference) {
            Ok(test_case) => Ok(test_case),
            Err(testdeck_common::Error::NotFound { .. }) => {
                let Some(project_name) = project else {
                    anyhow::bail!(
                        "No test case with id '{}'; pass --project to look it up by name",
                        reference
                    );
                };
                let project = self.db.get_project_by_name(project_name)?;
                Ok(self.db.get_test_case_by_name(&project.id, reference)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a project argument: exact id first, then name.
    pub fn resolve_project(&self, reference: &str) -> Result<testdeck_common::Project> {
        match self.db.get_project(reference) {
            Ok(project) => Ok(project),
            Err(testdeck_common::Error::NotFound { .. }) => {
                Ok(self.db.get_project_by_name(reference)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}
