//! specter — turns mail and free-text commands into reply drafts,
//! contact lookups and calendar events.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod cli;
pub mod config;
pub mod grounding;
pub mod intent;
pub mod mcp;
pub mod models;
pub mod router;
pub mod services;
pub mod utils;

/// Return the Specter home directory.
///
/// Resolution order:
/// 1. `SPECTER_HOME` environment variable
/// 2. `$HOME/.specter`
pub fn specter_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("SPECTER_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".specter")
    }
}
