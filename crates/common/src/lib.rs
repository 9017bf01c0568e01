//! Testdeck Common Library
//!
//! Shared domain types and the persistence layer consumed by the
//! execution engine, web API, and CLI.

pub mod db;
pub mod error;
pub mod types;

pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

/// Testdeck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".testdeck")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}
