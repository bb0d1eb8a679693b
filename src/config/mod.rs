//! Runner configuration
//!
//! Layered loading: built-in defaults, optional TOML file, `BOOKSTORE_*`
//! environment variables, then command line overrides.

pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, ConfigOverrides};
pub use types::{ConnectionOptions, QueryPlan, RunnerConfig};
