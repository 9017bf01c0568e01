//! Script materialization: stored steps -> executable Playwright spec file.
//!
//! The per-step code emission belongs to the consolidation pipeline; this
//! module guarantees the stable parts of the contract: the scripts
//! directory exists, the file name is a filesystem-safe derivation of the
//! test-case display name, the write is atomic (temp file + rename), and
//! the test declaration carries tags plus one correlation annotation per
//! enabled step so the report can be matched back by step id.

use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::debug;

use testdeck_common::{StepRecord, TestCase};

use crate::error::{EngineError, EngineResult};

/// Marker prefix used in generated step titles and annotations so runner
/// output can be correlated back to domain steps by id.
pub const STEP_TOKEN_PREFIX: &str = "step:";

pub struct ScriptMaterializer {
    scripts_dir: PathBuf,
}

impl ScriptMaterializer {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
        }
    }

    /// Path the script for this test case will be written to
    pub fn script_path(&self, test_case: &TestCase) -> PathBuf {
        self.scripts_dir
            .join(format!("{}.spec.js", sanitize_name(&test_case.name)))
    }

    /// Write the spec file for a test case and return its path.
    ///
    /// Steps are ordered ascending by `order`; disabled steps are
    /// excluded. A reader never observes a partially written file.
    pub fn materialize(
        &self,
        test_case: &TestCase,
        steps: &[StepRecord],
        base_url: &str,
    ) -> EngineResult<PathBuf> {
        std::fs::create_dir_all(&self.scripts_dir)?;

        let mut enabled: Vec<&StepRecord> = steps.iter().filter(|s| !s.disabled).collect();
        enabled.sort_by_key(|s| s.order);

        let content = render_script(test_case, &enabled, base_url);
        let path = self.script_path(test_case);

        let mut tmp = NamedTempFile::new_in(&self.scripts_dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path)
            .map_err(|e| EngineError::Script(format!("failed to persist {}: {}", path.display(), e)))?;

        debug!(
            "Materialized {} step(s) for '{}' into {:?}",
            enabled.len(),
            test_case.name,
            path
        );
        Ok(path)
    }
}

/// Derive a filesystem-safe name: case-folded, runs of non-alphanumeric
/// characters collapsed to a single dash.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut dash_pending = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if dash_pending && !out.is_empty() {
                out.push('-');
            }
            dash_pending = false;
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        } else {
            dash_pending = true;
        }
    }
    if out.is_empty() {
        "test-case".to_string()
    } else {
        out
    }
}

fn js_str(value: &str) -> String {
    format!(
        "'{}'",
        value
            .replace('\\', "\\\\")
            .replace('\'', "\\'")
            .replace('\n', "\\n")
    )
}

fn render_script(test_case: &TestCase, enabled: &[&StepRecord], base_url: &str) -> String {
    let mut options = String::new();

    if !test_case.tags.is_empty() {
        let tags: Vec<String> = test_case
            .tags
            .iter()
            .map(|t| js_str(&format!("@{}", t.trim_start_matches('@'))))
            .collect();
        options.push_str(&format!("  tag: [{}],\n", tags.join(", ")));
    }

    // One annotation per enabled step, in execution order; the consolidation
    // pipeline emits matching `test.step('step:<id> ...')` titles.
    if !enabled.is_empty() {
        options.push_str("  annotation: [\n");
        for step in enabled {
            options.push_str(&format!(
                "    {{ type: 'step', description: {} }},\n",
                js_str(&format!("{}{}", STEP_TOKEN_PREFIX, step.id))
            ));
        }
        options.push_str("  ],\n");
    }

    let options_block = if options.is_empty() {
        String::new()
    } else {
        format!("{{\n{}}}, ", options)
    };

    format!(
        r#"const {{ test, expect }} = require('@playwright/test');

test({title}, {options}async ({{ page }}) => {{
  await page.goto({base_url});
}});
"#,
        title = js_str(&test_case.name),
        options = options_block,
        base_url = js_str(base_url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use testdeck_common::TestCase;

    fn test_case(name: &str) -> TestCase {
        TestCase::new("project-1", name)
    }

    #[test]
    fn sanitize_collapses_and_folds() {
        assert_eq!(sanitize_name("Login Flow"), "login-flow");
        assert_eq!(sanitize_name("Checkout -- V2!"), "checkout-v2");
        assert_eq!(sanitize_name("  weird///name  "), "weird-name");
        assert_eq!(sanitize_name("ÜBER Test"), "über-test");
        assert_eq!(sanitize_name("!!!"), "test-case");
    }

    #[test]
    fn materialize_skips_disabled_steps() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ScriptMaterializer::new(dir.path());
        let tc = test_case("Login Flow");

        let steps = vec![
            StepRecord::for_test_case(&tc.id, 1, "click"),
            StepRecord::for_test_case(&tc.id, 2, "fill").disabled(true),
            StepRecord::for_test_case(&tc.id, 3, "submit"),
        ];

        let path = materializer.materialize(&tc, &steps, "http://localhost:3000").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        assert!(content.contains(&format!("step:{}", steps[0].id)));
        assert!(content.contains(&format!("step:{}", steps[2].id)));
        assert!(!content.contains(&format!("step:{}", steps[1].id)));
        assert!(content.contains("await page.goto('http://localhost:3000');"));
    }

    #[test]
    fn annotations_follow_step_order_not_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ScriptMaterializer::new(dir.path());
        let tc = test_case("Ordering");

        let late = StepRecord::for_test_case(&tc.id, 20, "second");
        let early = StepRecord::for_test_case(&tc.id, 10, "first");
        let steps = vec![late.clone(), early.clone()];

        let path = materializer.materialize(&tc, &steps, "http://localhost:3000").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        let early_pos = content.find(&early.id).unwrap();
        let late_pos = content.find(&late.id).unwrap();
        assert!(early_pos < late_pos);
    }

    #[test]
    fn tags_are_embedded_as_runner_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ScriptMaterializer::new(dir.path());
        let tc = test_case("Tagged").with_tags(vec!["smoke".to_string(), "@auth".to_string()]);

        let path = materializer.materialize(&tc, &[], "http://localhost:3000").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("tag: ['@smoke', '@auth'],"));
    }

    #[test]
    fn file_name_derives_from_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ScriptMaterializer::new(dir.path());
        let tc = test_case("My First Test!");
        let path = materializer.materialize(&tc, &[], "http://x").unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "my-first-test.spec.js"
        );
    }

    #[test]
    fn quotes_in_names_do_not_break_the_script() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ScriptMaterializer::new(dir.path());
        let tc = test_case("User's \"special\" flow");
        let path = materializer.materialize(&tc, &[], "http://x").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(r"test('User\'s"));
    }
}
