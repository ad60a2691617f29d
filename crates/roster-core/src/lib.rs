pub mod config;
pub mod types;

pub use config::{ConfigError, RegistryConfig, RosterConfig};
pub use types::*;
