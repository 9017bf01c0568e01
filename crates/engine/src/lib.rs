//! Testdeck execution engine
//!
//! Orchestrates browser end-to-end test runs: materializes stored steps
//! into Playwright scripts, patches the runner configuration, spawns the
//! runner process, normalizes its JSON report, harvests video/screenshot
//! artifacts into durable storage, and persists immutable execution
//! history.
//!
//! A failing test suite is a non-zero exit from the runner and is the
//! normal path here, not an error; only spawn-level failures surface as
//! `EngineError`.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod recorder;
pub mod report;
pub mod script;

pub use artifacts::{ArtifactHarvester, HarvestedArtifacts};
pub use config::{CaptureMode, ConfigPatch, ConfigPatcher, PatchOutcome, RunnerConfigTemplate};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{EngineConfig, ExecutionOrchestrator, ExecutionOutcome, RunOptions};
pub use process::{ProcessRunner, RunManifest, RunOutput, RunTarget, RunnerInvocation};
pub use recorder::ExecutionRecorder;
pub use report::{NormalizedResult, ReportNormalizer, StepOutcome};
pub use script::ScriptMaterializer;
