//! Configuration module for the Courier runtime.
//!
//! This module provides layered configuration loading and validation for
//! logging, dispatcher defaults, endpoint resolution and processing groups.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CourierConfig, DispatchConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    ResolverConfig, RoutingConfig, SpanEventConfig,
};
pub use validation::validate_config;
