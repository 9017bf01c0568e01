//! Testdeck Web API
//!
//! Thin HTTP surface over the execution engine: trigger single-case and
//! whole-project runs, browse execution history, and serve harvested
//! videos from durable storage.

pub mod server;

pub use server::{WebServerConfig, build_router, serve};
