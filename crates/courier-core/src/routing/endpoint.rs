use std::fmt;

use serde::{Deserialize, Serialize};

/// Payload encoding requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationFormat {
    /// JSON (default).
    #[default]
    Json,
    /// MessagePack.
    MessagePack,
    /// Protocol buffers.
    Protobuf,
}

/// Publish-side and subscribe-side destination names.
///
/// For brokers with exchanges and queues the two differ; simple transports
/// use one name for both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Destination {
    /// Where messages are sent.
    pub publish: String,
    /// Where messages are consumed from.
    #[serde(default)]
    pub subscribe: String,
}

impl Destination {
    /// A destination using the same name on both sides.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            publish: name.clone(),
            subscribe: name,
        }
    }

    /// A destination with distinct publish and subscribe names.
    pub fn split(publish: impl Into<String>, subscribe: impl Into<String>) -> Self {
        Self {
            publish: publish.into(),
            subscribe: subscribe.into(),
        }
    }

    /// A publish-only destination.
    pub fn publish_only(publish: impl Into<String>) -> Self {
        Self::split(publish, String::new())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.publish == self.subscribe || self.subscribe.is_empty() {
            f.write_str(&self.publish)
        } else {
            write!(f, "[p:{}, s:{}]", self.publish, self.subscribe)
        }
    }
}

/// A resolved transport destination. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Identifier of the transport that owns the destination.
    pub transport_id: String,
    /// Destination names.
    pub destination: Destination,
    /// Whether several consumers share the subscribe-side destination.
    #[serde(default = "default_shared_destination")]
    pub shared_destination: bool,
    /// Payload encoding.
    #[serde(default)]
    pub serialization_format: SerializationFormat,
}

fn default_shared_destination() -> bool {
    true
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(
        transport_id: impl Into<String>,
        destination: Destination,
        shared_destination: bool,
        serialization_format: SerializationFormat,
    ) -> Self {
        Self {
            transport_id: transport_id.into(),
            destination,
            shared_destination,
            serialization_format,
        }
    }

    /// The same endpoint restricted to its subscribe side.
    pub fn subscribe_side(&self) -> Endpoint {
        Endpoint {
            destination: Destination::split(String::new(), self.destination.subscribe.clone()),
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.transport_id, self.destination)
    }
}
