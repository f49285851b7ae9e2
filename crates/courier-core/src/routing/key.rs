use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::MessageType;

/// Kind of message a route carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    /// Commands: exactly one handler, retried on failure.
    Commands,
    /// Events: fanned out to every handler.
    Events,
}

impl RouteType {
    /// Lowercase keyword, used by convention-based naming.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commands => "commands",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a message flow relative to the local context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationType {
    /// The local context sends.
    Publish,
    /// The local context receives.
    Subscribe,
}

impl fmt::Display for CommunicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
        })
    }
}

/// Identity of a message-flow intent. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    /// Type of the routed message.
    pub message_type: MessageType,
    /// Commands or events.
    pub route_type: RouteType,
    /// Publish or subscribe.
    pub communication_type: CommunicationType,
    /// Priority lane; `0` is the default lane.
    pub priority: u32,
    /// Context owning the route, `None` for the default route map.
    pub local_context: Option<String>,
    /// Context on the other end of the flow, if any.
    pub remote_context: Option<String>,
    /// Whether the subscribe-side queue is exclusive to this consumer.
    pub exclusive: bool,
}

impl RoutingKey {
    /// Creates a key on the default priority lane with no contexts.
    pub fn new(
        message_type: MessageType,
        route_type: RouteType,
        communication_type: CommunicationType,
    ) -> Self {
        Self {
            message_type,
            route_type,
            communication_type,
            priority: 0,
            local_context: None,
            remote_context: None,
            exclusive: false,
        }
    }

    /// Sets the priority lane.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the local context.
    pub fn with_local_context(mut self, context: impl Into<String>) -> Self {
        self.local_context = Some(context.into());
        self
    }

    /// Sets the remote context.
    pub fn with_remote_context(mut self, context: impl Into<String>) -> Self {
        self.remote_context = Some(context.into());
        self
    }

    /// Marks the subscribe-side queue as exclusive.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// `true` when both keys describe the same lane of the same flow,
    /// ignoring contexts.
    pub(crate) fn same_lane(&self, other: &RoutingKey) -> bool {
        self.message_type == other.message_type
            && self.communication_type == other.communication_type
            && self.priority == other.priority
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} (priority {})",
            self.communication_type, self.route_type, self.message_type, self.priority
        )
    }
}
