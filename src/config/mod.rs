//! Gateway configuration
//!
//! Settings are read once at startup from a JSON file. Every field has a
//! default, so an absent file yields a working local gateway.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, ConfigError, ConfigStorage, CONFIG_ENV, BIND_ENV};
pub use types::GatewayConfig;
