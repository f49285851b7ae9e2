//! Long-running processes hosted by a bounded context.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::BoxError;
use courier_framework::{CommandSender, EventPublisher};

/// A process started with the engine and disposed on shutdown.
///
/// Processes drive the system from the outside: timers, pollers or sagas
/// that send commands and publish events on behalf of their context.
///
/// ```rust,ignore
/// struct Heartbeat;
///
/// #[async_trait]
/// impl Process for Heartbeat {
///     async fn start(
///         &self,
///         commands: Arc<dyn CommandSender>,
///         _events: Arc<dyn EventPublisher>,
///     ) -> Result<(), BoxError> {
///         commands.send_command(Ping, "monitoring").await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Process: Send + Sync + 'static {
    /// Starts the process with its context's outbound seams.
    async fn start(
        &self,
        commands: Arc<dyn CommandSender>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<(), BoxError>;

    /// Releases whatever `start` acquired.
    async fn dispose(&self) {}
}
