//! Infrastructure layer: job orchestration, SQLite persistence, configuration.

pub mod config;
pub mod jobs;
pub mod sqlite;
