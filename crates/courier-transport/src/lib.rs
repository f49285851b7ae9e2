//! # Courier Transport
//!
//! Messaging engines for the Courier CQRS runtime.
//!
//! The runtime talks to transports only through
//! [`MessagingEngine`](courier_core::MessagingEngine). This crate provides
//! the in-process engine used for single-process deployments and tests:
//!
//! ```rust,ignore
//! use courier_transport::InMemoryMessagingEngine;
//!
//! let engine = Arc::new(InMemoryMessagingEngine::new());
//! let cqrs = CqrsEngine::builder(engine).context(/* ... */).build()?;
//! ```
//!
//! Endpoints handled here use the [`IN_MEMORY_TRANSPORT`] transport id.

pub mod in_memory;

pub use courier_core::IN_MEMORY_TRANSPORT;
pub use in_memory::InMemoryMessagingEngine;
