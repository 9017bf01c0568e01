//! Seed a sample project for demos and local development

use anyhow::Result;
use clap::Args;

use testdeck_common::{Fixture, Project, StepRecord, TestCase};
use testdeck_engine::{ConfigPatcher, RunnerConfigTemplate, ScriptMaterializer};

use super::Context;
use crate::output::{print_info, print_success};

#[derive(Args)]
pub struct SeedArgs {
    /// Project name
    #[arg(long, default_value = "demo")]
    name: String,

    /// Base URL the sample test navigates to
    #[arg(long, default_value = "http://localhost:3000")]
    base_url: String,
}

pub fn handle(context: &Context, args: SeedArgs) -> Result<()> {
    let project = Project::new(&args.name, &args.base_url);
    context.db.create_project(&project)?;

    // Reusable login step group
    let fixture = Fixture::new(&project.id, "authenticate");
    context.db.create_fixture(&fixture)?;
    let fixture_steps = [
        StepRecord::for_fixture(&fixture.id, 1, "fill username")
            .with_selector("[data-testid=username]")
            .with_data("demo-user"),
        StepRecord::for_fixture(&fixture.id, 2, "fill password")
            .with_selector("[data-testid=password]")
            .with_data("demo-pass"),
        StepRecord::for_fixture(&fixture.id, 3, "click sign in")
            .with_selector("[data-testid=submit]"),
    ];
    for step in &fixture_steps {
        context.db.add_step(step)?;
    }

    let test_case = TestCase::new(&project.id, "Login Flow")
        .with_tags(vec!["smoke".to_string(), "auth".to_string()]);
    context.db.create_test_case(&test_case)?;

    let mut login = StepRecord::for_test_case(&test_case.id, 1, "run login fixture");
    login.linked_fixture_id = Some(fixture.id.clone());
    let steps = [
        login,
        StepRecord::for_test_case(&test_case.id, 2, "click dashboard link")
            .with_selector("[data-testid=nav-dashboard]"),
        StepRecord::for_test_case(&test_case.id, 3, "verify greeting")
            .with_selector("[data-testid=greeting]"),
        StepRecord::for_test_case(&test_case.id, 4, "capture debug state").disabled(true),
    ];
    for step in &steps {
        context.db.add_step(step)?;
    }

    // Consolidate: the spec file is regenerated whenever steps change
    let materializer = ScriptMaterializer::new(context.engine.scripts_dir());
    let script = materializer.materialize(&test_case, &steps, &project.base_url)?;

    let config_path = context.engine.config_path();
    if !config_path.exists() {
        ConfigPatcher::new(&config_path).write_template(&RunnerConfigTemplate {
            base_url: args.base_url.clone(),
            ..Default::default()
        })?;
        print_info(&format!("Wrote {}", config_path.display()));
    }

    print_success(&format!(
        "Seeded project '{}' with test case '{}'",
        project.name, test_case.name
    ));
    print_info(&format!("Project id:   {}", project.id));
    print_info(&format!("Test case id: {}", test_case.id));
    print_info(&format!("Script:       {}", script.display()));
    Ok(())
}
