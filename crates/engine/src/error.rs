//! Error types for the execution engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to launch runner: {0}")]
    Launch(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Unknown capture mode: {0}")]
    UnknownCaptureMode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] testdeck_common::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
