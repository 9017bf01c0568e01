//! Runner configuration commands

use anyhow::Result;
use clap::Subcommand;

use testdeck_common::BrowserProject;
use testdeck_engine::{
    CaptureMode, ConfigPatch, ConfigPatcher, PatchOutcome, RunnerConfigTemplate,
};

use super::Context;
use crate::output::{print_error, print_success};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a complete runner config from the template
    Init {
        /// Base URL the generated tests navigate to
        #[arg(long, default_value = "http://localhost:3000")]
        base_url: String,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Patch individual settings in the existing config
    Patch {
        #[arg(long)]
        test_dir: Option<String>,

        #[arg(long)]
        output_dir: Option<String>,

        #[arg(long)]
        retries: Option<u32>,

        #[arg(long)]
        workers: Option<u32>,

        /// Per-test timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Assertion timeout in milliseconds
        #[arg(long)]
        expect_timeout: Option<u64>,

        #[arg(long)]
        base_url: Option<String>,

        /// Video recording mode (on, off, retain-on-failure, ...)
        #[arg(long)]
        video: Option<CaptureMode>,

        /// Screenshot mode
        #[arg(long)]
        screenshot: Option<CaptureMode>,

        /// Trace mode
        #[arg(long)]
        trace: Option<CaptureMode>,

        /// Comma-separated browser projects to enable
        #[arg(long, value_delimiter = ',')]
        browsers: Option<Vec<String>>,

        /// Comma-separated reporter names
        #[arg(long, value_delimiter = ',')]
        reporters: Option<Vec<String>>,
    },
}

pub fn handle(context: &Context, command: ConfigCommands) -> Result<()> {
    let config_path = context.engine.config_path();
    let patcher = ConfigPatcher::new(&config_path);

    match command {
        ConfigCommands::Init { base_url, force } => {
            if config_path.exists() && !force {
                print_error(&format!(
                    "{} already exists; pass --force to overwrite",
                    config_path.display()
                ));
                anyhow::bail!("config exists");
            }
            let template = RunnerConfigTemplate {
                base_url,
                ..Default::default()
            };
            patcher.write_template(&template)?;
            print_success(&format!("Wrote {}", config_path.display()));
            Ok(())
        }

        ConfigCommands::Patch {
            test_dir,
            output_dir,
            retries,
            workers,
            timeout,
            expect_timeout,
            base_url,
            video,
            screenshot,
            trace,
            browsers,
            reporters,
        } => {
            let browsers = browsers
                .map(|names| {
                    names
                        .iter()
                        .map(|n| n.parse::<BrowserProject>())
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?;

            let patch = ConfigPatch {
                test_dir,
                output_dir,
                retries,
                workers,
                timeout_ms: timeout,
                expect_timeout_ms: expect_timeout,
                base_url,
                video,
                screenshot,
                trace,
                reporters,
                browsers,
            };

            match patcher.patch_file(&patch)? {
                PatchOutcome::Patched => {
                    print_success(&format!("Patched {}", config_path.display()));
                }
                PatchOutcome::NotFound => {
                    // Non-fatal: most flows only need the template at init time
                    print_error(&format!(
                        "{} not found; run `testdeck config init` first",
                        config_path.display()
                    ));
                }
            }
            Ok(())
        }
    }
}
