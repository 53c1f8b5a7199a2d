//! Engine Configuration Module
//!
//! Provides engine configuration loaded from TOML files, covering every
//! threshold the monitor, detector, sandbox and coordinator act on.
//!
//! ## Loading Order
//!
//! 1. `MENDER_CONFIG` environment variable (path to TOML file)
//! 2. `mender.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(EngineConfig::load());
//!
//! // Anywhere in the binary:
//! let cfg = config::get();
//! ```
//!
//! Library components take their config section by value so they stay
//! testable without the global.

mod engine_config;
pub mod defaults;
pub mod validation;

pub use engine_config::*;

use std::sync::OnceLock;

static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration. Later calls are ignored.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global engine configuration, or the built-in defaults if
/// `init()` has not run.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG.get_or_init(EngineConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}
