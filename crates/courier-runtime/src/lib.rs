//! Courier Runtime - engine orchestration for the Courier CQRS runtime.
//!
//! This crate provides:
//! - The CQRS engine (`CqrsEngine`, `CqrsEngineBuilder`)
//! - Bounded-context registrations and default routing
//! - Long-running processes started alongside the engine
//! - Layered configuration loading
//! - Logging initialization
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Installs logging from the `[logging]` section as well.
//!     let config = load_config()?;
//!     let engine = CqrsEngineBuilder::from_config(Arc::new(InMemoryMessagingEngine::new()), &config)
//!         .context(
//!             ContextRegistration::new("orders")
//!                 .listening_commands([MessageType::of::<CreateOrder>()], "commands")
//!                 .publishing_events([MessageType::of::<OrderCreated>()], "events")
//!                 .with_command_handlers(
//!                     CommandHandlers::new(OrderHandler::default()).on(OrderHandler::create),
//!                 ),
//!         )
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `toml-config` / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, CourierConfig, DispatchConfig, LoggingConfig,
    Profile, ResolverConfig, RoutingConfig, load_config, load_config_from_file,
};
pub use engine::{
    ContextRegistration, CqrsEngine, CqrsEngineBuilder, DefaultRouting, Process,
    ReadHeadersAction, WriteHeadersFunc,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};

// Re-export tracing for convenience
pub use tracing;

/// Commonly used types for assembling an engine.
pub mod prelude {
    pub use crate::{
        ContextRegistration, CourierConfig, CqrsEngine, CqrsEngineBuilder, DefaultRouting,
        Process, RuntimeError, RuntimeResult, load_config,
    };
    pub use courier_core::{Endpoint, MessageType, ProcessingOptions};
    pub use courier_framework::prelude::*;
    pub use courier_transport::InMemoryMessagingEngine;
}
