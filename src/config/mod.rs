//! Machine Configuration Module
//!
//! Per-machine configuration loaded from TOML, covering scheduling, signal
//! conditioning, post-processing, anomaly limits and collaborator endpoints.
//!
//! ## Loading Order
//!
//! 1. `SENTRY_CONFIG` environment variable (path to TOML file)
//! 2. `sentry_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded config is passed explicitly to the components that need it:
//!
//! ```ignore
//! let config = MachineConfig::load();
//! let orchestrator = SchedulerOrchestrator::from_config(&config, source, oracle, notifier)?;
//! ```

mod machine_config;
pub mod defaults;
pub mod validation;

pub use machine_config::*;
