use std::fmt;
use std::sync::Arc;

use courier_core::{
    CommunicationType, ConfigurationError, ConfigurationResult, RouteMap, RouteType,
};
use courier_framework::{CommandDispatcher, EventDispatcher};

use super::process::Process;
use super::router::ContextPublisher;

/// A wired bounded context: its dispatchers, outbound seams and processes.
pub(crate) struct BoundedContext {
    pub(crate) name: String,
    pub(crate) commands: CommandDispatcher,
    pub(crate) events: EventDispatcher,
    pub(crate) publisher: Arc<ContextPublisher>,
    pub(crate) processes: Vec<Arc<dyn Process>>,
}

impl BoundedContext {
    /// Checks that every listened message type has a handler.
    pub(crate) fn check_listened_types(&self, map: &RouteMap) -> ConfigurationResult<()> {
        let listened = map
            .iter()
            .flat_map(|route| route.routing_keys())
            .filter(|key| key.communication_type == CommunicationType::Subscribe);

        for key in listened {
            let handled = match key.route_type {
                RouteType::Commands => self.commands.handles(key.message_type),
                RouteType::Events => self.events.handles(
                    key.remote_context.as_deref().unwrap_or_default(),
                    key.message_type,
                ),
            };
            if !handled {
                return Err(ConfigurationError::UnhandledListenedType {
                    context: self.name.clone(),
                    kind: key.route_type,
                    message_type: key.message_type.full_name().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BoundedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedContext")
            .field("name", &self.name)
            .field("commands", &self.commands)
            .field("events", &self.events)
            .field("processes", &self.processes.len())
            .finish()
    }
}
