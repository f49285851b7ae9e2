//! # Courier
//!
//! A CQRS message-dispatch runtime for Rust.
//!
//! ## Overview
//!
//! Courier routes commands and events between application handlers and a
//! messaging transport. Commands have exactly one handler per bounded context
//! and are redelivered when handling fails; events fan out to every handler
//! bound to their type and acknowledge independently.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ send  ┌──────────────────┐ callback ┌────────────────────┐
//! │ CqrsEngine   │──────▶│ MessagingEngine  │─────────▶│ CommandDispatcher  │──▶ handler
//! │ (route maps) │       │ (transport)      │─────────▶│ EventDispatcher    │──▶ handlers
//! └──────────────┘       └──────────────────┘  + ack   └────────────────────┘
//!        ▲                                                  │ interceptor chain
//!        └──────────── publishers / senders ◀───────────────┘
//! ```
//!
//! - **Core**: messages, routing keys, endpoints, route maps and resolvers
//! - **Framework**: handler tables, interceptors and the two dispatchers
//! - **Transport**: the in-memory messaging engine
//! - **Runtime**: the engine, context registrations, configuration and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize)]
//! struct CreateOrder { id: u64 }
//!
//! #[derive(Default)]
//! struct Orders;
//!
//! impl Orders {
//!     async fn create(self: Arc<Self>, command: CreateOrder) -> Result<(), HandlerError> {
//!         tracing::info!(id = command.id, "Order created");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = CqrsEngineBuilder::in_memory()
//!         .context(
//!             ContextRegistration::new("orders")
//!                 .listening_commands([MessageType::of::<CreateOrder>()], "commands")
//!                 .with_loopback()
//!                 .with_command_handlers(CommandHandlers::new(Orders).on(Orders::create)),
//!         )
//!         .build()?;
//!
//!     engine.start_all().await?;
//!     engine.send_command(CreateOrder { id: 1 }, "orders", "orders", 0).await?;
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;
pub use courier_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    // Engine - main entry point
    pub use courier_runtime::{
        ContextRegistration, CqrsEngine, CqrsEngineBuilder, DefaultRouting, Process,
        RuntimeError, RuntimeResult,
    };

    // Configuration
    pub use courier_runtime::{CourierConfig, load_config};

    // Handlers - tables, extra parameters and batching
    pub use courier_framework::{
        Batch, BatchSettings, CommandHandlers, EventHandlers, HandlerError, Param,
        ParameterProvider,
    };

    // Middleware
    pub use courier_framework::{
        CommandInterceptionContext, DefaultLoggingInterceptor, EventInterceptionContext,
        InterceptionContext, Interceptor,
    };

    // Outbound seams
    pub use courier_framework::{
        CommandSender, CommandSenderExt, EventPublisher, EventPublisherExt,
    };

    // Messages and routing
    pub use courier_core::{
        BoxError, BoxedMessage, CommandHandlingResult, Endpoint, Message, MessageType,
        ProcessingOptions,
    };

    // Transport
    pub use courier_transport::InMemoryMessagingEngine;
}
