//! Targeted patching and generation of the Playwright configuration file.
//!
//! The config file is hand-edited by users, so patching operates as
//! scoped textual replacement instead of a parse/re-serialize round trip:
//! edits are limited to known keys in the main settings region (before
//! `projects:`), the `use:` sub-block, and the `expect:` sub-block.
//! Absent keys are inserted at a canonical position. Applying the same
//! patch twice yields the same text.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use testdeck_common::BrowserProject;

use crate::error::{EngineError, EngineResult};

/// Recording mode for video/screenshot/trace options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    On,
    Off,
    RetainOnFailure,
    OnlyOnFailure,
    OnFirstRetry,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::On => "on",
            CaptureMode::Off => "off",
            CaptureMode::RetainOnFailure => "retain-on-failure",
            CaptureMode::OnlyOnFailure => "only-on-failure",
            CaptureMode::OnFirstRetry => "on-first-retry",
        }
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CaptureMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(CaptureMode::On),
            "off" => Ok(CaptureMode::Off),
            "retain-on-failure" => Ok(CaptureMode::RetainOnFailure),
            "only-on-failure" => Ok(CaptureMode::OnlyOnFailure),
            "on-first-retry" => Ok(CaptureMode::OnFirstRetry),
            other => Err(EngineError::UnknownCaptureMode(other.to_string())),
        }
    }
}

/// Sparse set of fields to patch into an existing config
#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub test_dir: Option<String>,
    pub output_dir: Option<String>,
    pub retries: Option<u32>,
    pub workers: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub expect_timeout_ms: Option<u64>,
    pub base_url: Option<String>,
    pub video: Option<CaptureMode>,
    pub screenshot: Option<CaptureMode>,
    pub trace: Option<CaptureMode>,
    /// Reporter names; rendered with their standard options
    pub reporters: Option<Vec<String>>,
    /// Enabled browser projects
    pub browsers: Option<Vec<BrowserProject>>,
}

/// Outcome of patching a config file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    /// The file does not exist; callers treat this as non-fatal
    NotFound,
}

/// Values for rendering a complete config from scratch
#[derive(Debug, Clone)]
pub struct RunnerConfigTemplate {
    pub test_dir: String,
    pub output_dir: String,
    pub base_url: String,
    pub retries: u32,
    pub workers: u32,
    pub timeout_ms: u64,
    pub expect_timeout_ms: u64,
    pub video: CaptureMode,
    pub screenshot: CaptureMode,
    pub trace: CaptureMode,
    pub browsers: Vec<BrowserProject>,
}

impl Default for RunnerConfigTemplate {
    fn default() -> Self {
        Self {
            test_dir: "./tests".to_string(),
            output_dir: "test-results".to_string(),
            base_url: "http://localhost:3000".to_string(),
            retries: 0,
            workers: 1,
            timeout_ms: 30_000,
            expect_timeout_ms: 5_000,
            video: CaptureMode::On,
            screenshot: CaptureMode::On,
            trace: CaptureMode::RetainOnFailure,
            browsers: BrowserProject::ALL.to_vec(),
        }
    }
}

static TOP_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"defineConfig\(\{").unwrap());
static USE_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*use\s*:\s*\{").unwrap());
static EXPECT_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*expect\s*:\s*\{").unwrap());
static PROJECTS_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*projects\s*:\s*\[").unwrap());
static REPORTER_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^([ \t]*)reporter\s*:\s*").unwrap());

/// Patches and renders Playwright configuration text for one project
/// directory.
pub struct ConfigPatcher {
    config_path: PathBuf,
}

impl ConfigPatcher {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Apply a patch to the config file on disk.
    ///
    /// A missing file is a no-op reported as `NotFound`; most flows only
    /// need the template path at initialization time.
    pub fn patch_file(&self, patch: &ConfigPatch) -> EngineResult<PatchOutcome> {
        if !self.config_path.exists() {
            warn!("Runner config not found at {:?}, skipping patch", self.config_path);
            return Ok(PatchOutcome::NotFound);
        }
        let text = std::fs::read_to_string(&self.config_path)?;
        let patched = Self::apply_patch(&text, patch);
        if patched != text {
            std::fs::write(&self.config_path, patched)?;
            debug!("Patched runner config at {:?}", self.config_path);
        }
        Ok(PatchOutcome::Patched)
    }

    /// Write a complete config rendered from the template, replacing any
    /// existing file.
    pub fn write_template(&self, template: &RunnerConfigTemplate) -> EngineResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config_path, Self::render_template(template))?;
        debug!("Wrote runner config template to {:?}", self.config_path);
        Ok(())
    }

    /// Apply a sparse patch to config text. Pure; unrelated text is
    /// preserved byte-identically and the operation is idempotent.
    pub fn apply_patch(config: &str, patch: &ConfigPatch) -> String {
        let mut text = config.to_string();

        if let Some(dir) = &patch.test_dir {
            text = set_top_level(text, "testDir", &js_str(dir));
        }
        if let Some(dir) = &patch.output_dir {
            text = set_top_level(text, "outputDir", &js_str(dir));
        }
        if let Some(retries) = patch.retries {
            text = set_top_level(text, "retries", &retries.to_string());
        }
        if let Some(workers) = patch.workers {
            text = set_top_level(text, "workers", &workers.to_string());
        }
        if let Some(timeout) = patch.timeout_ms {
            text = set_top_level(text, "timeout", &timeout.to_string());
        }
        if let Some(timeout) = patch.expect_timeout_ms {
            text = set_expect_timeout(text, timeout);
        }
        if let Some(url) = &patch.base_url {
            text = set_in_use_block(text, "baseURL", &js_str(url));
        }
        if let Some(mode) = patch.video {
            text = set_in_use_block(text, "video", &js_str(mode.as_str()));
        }
        if let Some(mode) = patch.screenshot {
            text = set_in_use_block(text, "screenshot", &js_str(mode.as_str()));
        }
        if let Some(mode) = patch.trace {
            text = set_in_use_block(text, "trace", &js_str(mode.as_str()));
        }
        if let Some(reporters) = &patch.reporters {
            text = set_reporter(text, reporters);
        }
        if let Some(browsers) = &patch.browsers {
            text = set_projects(text, browsers);
        }

        text
    }

    /// Render a complete, known-good config from the template. Always
    /// includes the multi-reporter block and the configured browser
    /// projects.
    pub fn render_template(template: &RunnerConfigTemplate) -> String {
        format!(
            r#"import {{ defineConfig, devices }} from '@playwright/test';

export default defineConfig({{
  testDir: {test_dir},
  outputDir: {output_dir},
  fullyParallel: false,
  retries: {retries},
  workers: {workers},
  timeout: {timeout},
  reporter: {reporter},
  expect: {{
    timeout: {expect_timeout},
  }},
  use: {{
    baseURL: {base_url},
    headless: true,
    video: {video},
    screenshot: {screenshot},
    trace: {trace},
  }},
  projects: [
{projects}
  ],
}});
"#,
            test_dir = js_str(&template.test_dir),
            output_dir = js_str(&template.output_dir),
            retries = template.retries,
            workers = template.workers,
            timeout = template.timeout_ms,
            reporter = render_reporters(&default_reporters()),
            expect_timeout = template.expect_timeout_ms,
            base_url = js_str(&template.base_url),
            video = js_str(template.video.as_str()),
            screenshot = js_str(template.screenshot.as_str()),
            trace = js_str(template.trace.as_str()),
            projects = render_projects(&template.browsers),
        )
    }
}

fn js_str(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn default_reporters() -> Vec<String> {
    vec!["html".to_string(), "json".to_string(), "list".to_string()]
}

fn render_reporters(names: &[String]) -> String {
    let entries: Vec<String> = names
        .iter()
        .map(|name| match name.as_str() {
            "html" => "['html', { open: 'never' }]".to_string(),
            "json" => "['json', { outputFile: 'test-results/report.json' }]".to_string(),
            other => format!("['{}']", other),
        })
        .collect();
    format!("[{}]", entries.join(", "))
}

fn device_for(browser: BrowserProject) -> &'static str {
    match browser {
        BrowserProject::Chromium => "Desktop Chrome",
        BrowserProject::Firefox => "Desktop Firefox",
        BrowserProject::Webkit => "Desktop Safari",
    }
}

fn render_projects(browsers: &[BrowserProject]) -> String {
    browsers
        .iter()
        .map(|b| {
            format!(
                "    {{\n      name: '{}',\n      use: {{ ...devices['{}'] }},\n    }},",
                b.as_str(),
                device_for(*b)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Index where the main settings region ends (start of `projects:`)
fn main_region_end(text: &str) -> usize {
    PROJECTS_KEY.find(text).map(|m| m.start()).unwrap_or(text.len())
}

/// Byte range of a `{ ... }` block whose opening brace starts at `open_idx`
fn brace_block_end(text: &str, open_idx: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte index of the `]` matching the `[` at `open_idx`
fn bracket_block_end(text: &str, open_idx: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Range of the `use: { ... }` block within the main region, if present
fn use_block_range(text: &str) -> Option<(usize, usize)> {
    let main_end = main_region_end(text);
    let m = USE_BLOCK.find(&text[..main_end])?;
    let open = m.end() - 1;
    let close = brace_block_end(text, open)?;
    Some((open, close))
}

/// Range of the `expect: { ... }` block within the main region, if present
fn expect_block_range(text: &str) -> Option<(usize, usize)> {
    let main_end = main_region_end(text);
    let m = EXPECT_BLOCK.find(&text[..main_end])?;
    let open = m.end() - 1;
    let close = brace_block_end(text, open)?;
    Some((open, close))
}

/// Replace a `key: value` scalar in the main settings region, outside the
/// `use:` and `expect:` sub-blocks; insert after `defineConfig({` when
/// absent.
fn set_top_level(text: String, key: &str, value: &str) -> String {
    let main_end = main_region_end(&text);
    let use_range = use_block_range(&text);
    let expect_range = expect_block_range(&text);
    let inside = |idx: usize| {
        use_range.map(|(a, b)| idx > a && idx < b).unwrap_or(false)
            || expect_range.map(|(a, b)| idx > a && idx < b).unwrap_or(false)
    };

    let re = Regex::new(&format!(
        r"(?m)^([ \t]*){}\s*:\s*([^,\n]*)(,?)",
        regex::escape(key)
    ))
    .unwrap();

    for caps in re.captures_iter(&text[..main_end]) {
        let whole = caps.get(0).unwrap();
        if inside(whole.start()) {
            continue;
        }
        let indent = caps.get(1).unwrap().as_str();
        let comma = caps.get(3).unwrap().as_str();
        let replacement = format!("{}{}: {}{}", indent, key, value, comma);
        let mut out = text.clone();
        out.replace_range(whole.range(), &replacement);
        return out;
    }

    insert_after_anchor(text, &format!("  {}: {},", key, value))
}

/// Replace a `key: value` scalar inside the `use:` block; insert right
/// after `use: {` when absent; create the block when missing entirely.
fn set_in_use_block(text: String, key: &str, value: &str) -> String {
    let Some((open, close)) = use_block_range(&text) else {
        return insert_after_anchor(
            text,
            &format!("  use: {{\n    {}: {},\n  }},", key, value),
        );
    };

    let block = &text[open..=close];
    let re = Regex::new(&format!(
        r"(?m)^([ \t]*){}\s*:\s*([^,\n]*)(,?)",
        regex::escape(key)
    ))
    .unwrap();

    if let Some(caps) = re.captures(block) {
        let whole = caps.get(0).unwrap();
        let indent = caps.get(1).unwrap().as_str();
        let comma = caps.get(3).unwrap().as_str();
        let replacement = format!("{}{}: {}{}", indent, key, value, comma);
        let mut out = text.clone();
        out.replace_range(open + whole.start()..open + whole.end(), &replacement);
        return out;
    }

    let mut out = text.clone();
    out.insert_str(open + 1, &format!("\n    {}: {},", key, value));
    out
}

/// Replace the timeout inside the `expect:` block; create the block when
/// missing.
fn set_expect_timeout(text: String, timeout_ms: u64) -> String {
    let Some((open, close)) = expect_block_range(&text) else {
        return insert_after_anchor(
            text,
            &format!("  expect: {{\n    timeout: {},\n  }},", timeout_ms),
        );
    };

    let block = &text[open..=close];
    static TIMEOUT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?m)^([ \t]*)timeout\s*:\s*([^,\n]*)(,?)").unwrap());

    if let Some(caps) = TIMEOUT.captures(block) {
        let whole = caps.get(0).unwrap();
        let indent = caps.get(1).unwrap().as_str();
        let comma = caps.get(3).unwrap().as_str();
        let replacement = format!("{}timeout: {}{}", indent, timeout_ms, comma);
        let mut out = text.clone();
        out.replace_range(open + whole.start()..open + whole.end(), &replacement);
        return out;
    }

    let mut out = text.clone();
    out.insert_str(open + 1, &format!("\n    timeout: {},", timeout_ms));
    out
}

/// Replace the reporter list (array or scalar value); insert when absent.
fn set_reporter(text: String, reporters: &[String]) -> String {
    let rendered = render_reporters(reporters);
    let main_end = main_region_end(&text);

    if let Some(caps) = REPORTER_KEY.captures(&text[..main_end]) {
        let value_start = caps.get(0).unwrap().end();
        let rest = &text[value_start..];
        let value_end = if rest.starts_with('[') {
            match bracket_block_end(&text, value_start) {
                Some(close) => close + 1,
                None => value_start,
            }
        } else {
            // Scalar form: `reporter: 'html'`
            value_start
                + rest
                    .find(|c| c == ',' || c == '\n')
                    .unwrap_or(rest.len())
        };
        let mut out = text.clone();
        out.replace_range(value_start..value_end, &rendered);
        return out;
    }

    insert_after_anchor(text, &format!("  reporter: {},", rendered))
}

/// Replace the projects array with entries for the enabled browsers;
/// append the block before the closing of `defineConfig` when absent.
fn set_projects(text: String, browsers: &[BrowserProject]) -> String {
    let rendered = render_projects(browsers);

    if let Some(m) = PROJECTS_KEY.find(&text) {
        let open = m.end() - 1;
        if let Some(close) = bracket_block_end(&text, open) {
            let mut out = text.clone();
            out.replace_range(open + 1..close, &format!("\n{}\n  ", rendered));
            return out;
        }
    }

    // No projects block yet; add one at the end of the config object.
    if let Some(idx) = text.rfind("});") {
        let mut out = text.clone();
        out.insert_str(idx, &format!("  projects: [\n{}\n  ],\n", rendered));
        return out;
    }

    warn!("Config text has no defineConfig closing; projects left unpatched");
    text
}

/// Insert a line right after the `defineConfig({` anchor
fn insert_after_anchor(text: String, line: &str) -> String {
    let Some(m) = TOP_ANCHOR.find(&text) else {
        warn!("Config text has no defineConfig anchor; field left unpatched");
        return text;
    };
    let mut out = text.clone();
    out.insert_str(m.end(), &format!("\n{}", line));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_text() -> String {
        ConfigPatcher::render_template(&RunnerConfigTemplate::default())
    }

    #[test]
    fn template_contains_reporters_and_projects() {
        let text = template_text();
        assert!(text.contains("['html', { open: 'never' }]"));
        assert!(text.contains("['json', { outputFile: 'test-results/report.json' }]"));
        assert!(text.contains("['list']"));
        for name in ["chromium", "firefox", "webkit"] {
            assert!(text.contains(&format!("name: '{}'", name)), "missing {}", name);
        }
    }

    #[test]
    fn patch_replaces_existing_values() {
        let text = template_text();
        let patch = ConfigPatch {
            retries: Some(2),
            workers: Some(4),
            base_url: Some("http://app.local:8080".to_string()),
            video: Some(CaptureMode::RetainOnFailure),
            ..Default::default()
        };
        let patched = ConfigPatcher::apply_patch(&text, &patch);
        assert!(patched.contains("retries: 2,"));
        assert!(patched.contains("workers: 4,"));
        assert!(patched.contains("baseURL: 'http://app.local:8080',"));
        assert!(patched.contains("video: 'retain-on-failure',"));
        // Untouched settings keep their template values
        assert!(patched.contains("timeout: 30000,"));
        assert!(patched.contains("screenshot: 'on',"));
    }

    #[test]
    fn patch_is_idempotent() {
        let text = template_text();
        let patch = ConfigPatch {
            test_dir: Some("./generated".to_string()),
            retries: Some(1),
            workers: Some(2),
            timeout_ms: Some(60_000),
            expect_timeout_ms: Some(10_000),
            base_url: Some("http://localhost:4000".to_string()),
            video: Some(CaptureMode::On),
            screenshot: Some(CaptureMode::OnlyOnFailure),
            trace: Some(CaptureMode::Off),
            reporters: Some(vec!["json".to_string(), "list".to_string()]),
            browsers: Some(vec![BrowserProject::Chromium, BrowserProject::Firefox]),
            ..Default::default()
        };
        let once = ConfigPatcher::apply_patch(&text, &patch);
        let twice = ConfigPatcher::apply_patch(&once, &patch);
        assert_eq!(once, twice);
    }

    #[test]
    fn patch_preserves_unrelated_text() {
        let text = format!(
            "// custom header comment\n{}// trailing user note\n",
            template_text()
        );
        let patch = ConfigPatch {
            retries: Some(3),
            ..Default::default()
        };
        let patched = ConfigPatcher::apply_patch(&text, &patch);
        assert!(patched.starts_with("// custom header comment\n"));
        assert!(patched.ends_with("// trailing user note\n"));
        // Only the retries line changed
        let diff: Vec<(&str, &str)> = text
            .lines()
            .zip(patched.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(diff.len(), 1);
        assert!(diff[0].1.contains("retries: 3"));
    }

    #[test]
    fn absent_fields_are_inserted() {
        let text = "export default defineConfig({\n  testDir: './tests',\n});\n";
        let patch = ConfigPatch {
            retries: Some(5),
            base_url: Some("http://localhost:9000".to_string()),
            expect_timeout_ms: Some(7_000),
            ..Default::default()
        };
        let patched = ConfigPatcher::apply_patch(text, &patch);
        assert!(patched.contains("retries: 5,"));
        assert!(patched.contains("baseURL: 'http://localhost:9000',"));
        assert!(patched.contains("timeout: 7000,"));
        // Still idempotent through the insert path
        assert_eq!(patched, ConfigPatcher::apply_patch(&patched, &patch));
    }

    #[test]
    fn timeout_patch_does_not_touch_expect_block() {
        let text = template_text();
        let patch = ConfigPatch {
            timeout_ms: Some(90_000),
            ..Default::default()
        };
        let patched = ConfigPatcher::apply_patch(&text, &patch);
        assert!(patched.contains("timeout: 90000,"));
        // Expect block timeout keeps the template value
        assert!(patched.contains("timeout: 5000,"));
    }

    #[test]
    fn projects_patch_narrows_browser_set() {
        let text = template_text();
        let patch = ConfigPatch {
            browsers: Some(vec![BrowserProject::Webkit]),
            ..Default::default()
        };
        let patched = ConfigPatcher::apply_patch(&text, &patch);
        assert!(patched.contains("name: 'webkit'"));
        assert!(!patched.contains("name: 'chromium'"));
        assert!(!patched.contains("name: 'firefox'"));
    }

    #[test]
    fn missing_file_patch_is_nonfatal() {
        let dir = tempfile::tempdir().unwrap();
        let patcher = ConfigPatcher::new(dir.path().join("playwright.config.ts"));
        let outcome = patcher.patch_file(&ConfigPatch::default()).unwrap();
        assert_eq!(outcome, PatchOutcome::NotFound);
    }

    #[test]
    fn write_template_then_patch_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playwright.config.ts");
        let patcher = ConfigPatcher::new(&path);
        patcher.write_template(&RunnerConfigTemplate::default()).unwrap();

        let outcome = patcher
            .patch_file(&ConfigPatch {
                workers: Some(8),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outcome, PatchOutcome::Patched);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("workers: 8,"));
    }
}
