//! Type-erased messages.
//!
//! Commands and events are both plain Rust values. Anything that is
//! `Send + Sync + Debug + Serialize + 'static` is a [`Message`]; the runtime
//! moves them around as [`BoxedMessage`] and recovers the concrete type by
//! downcasting at the handler boundary.
//!
//! ```rust,ignore
//! use courier_core::BoxedMessage;
//!
//! let message = BoxedMessage::new(String::from("create-order"));
//! assert_eq!(message.message_type().name(), "String");
//! assert_eq!(message.downcast_ref::<String>().map(String::as_str), Some("create-order"));
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

// ============================================================================
// Message Trait
// ============================================================================

/// The base trait for every command and event.
///
/// Implemented automatically for all serializable, thread-safe types.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Renders the payload as JSON, used by logging interceptors.
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T> Message for T
where
    T: Any + Send + Sync + fmt::Debug + Serialize,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

// ============================================================================
// Message Type
// ============================================================================

/// Runtime identity of a message type.
///
/// Equality and hashing use the `TypeId` only; the names are carried for
/// logging and convention-based endpoint naming.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    full_name: &'static str,
}

impl MessageType {
    /// Returns the identity of `T`.
    pub fn of<T: Message>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            full_name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, e.g. `alloc::string::String`.
    pub fn full_name(&self) -> &'static str {
        self.full_name
    }

    /// Short type name without module path or generic arguments, e.g. `String`.
    pub fn name(&self) -> &'static str {
        short_type_name(self.full_name)
    }
}

/// Strips the module path and generic arguments from a `type_name` string.
pub fn short_type_name(full_name: &'static str) -> &'static str {
    let base = full_name.split('<').next().unwrap_or(full_name);
    base.rsplit("::").next().unwrap_or(base)
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.full_name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Boxed Message
// ============================================================================

/// A cheaply clonable, type-erased message.
///
/// `BoxedMessage` implements `Deref<Target = dyn Message>`, so trait methods
/// can be called directly on it.
#[derive(Clone)]
pub struct BoxedMessage {
    inner: Arc<dyn Message>,
    message_type: MessageType,
}

impl BoxedMessage {
    /// Wraps a concrete message.
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            inner: Arc::new(message),
            message_type: MessageType::of::<M>(),
        }
    }

    /// Runtime type identity of the wrapped value.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns `true` if the wrapped value is an `M`.
    pub fn is<M: Message>(&self) -> bool {
        self.message_type.id == TypeId::of::<M>()
    }

    /// Attempts to borrow the wrapped value as `M`.
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.inner.as_ref().as_any().downcast_ref()
    }

    /// Attempts to clone the wrapped value out as `M`.
    pub fn downcast<M: Message + Clone>(&self) -> Option<M> {
        self.downcast_ref::<M>().cloned()
    }

    /// Returns the inner `Arc<dyn Message>`.
    pub fn inner(&self) -> &Arc<dyn Message> {
        &self.inner
    }
}

impl std::ops::Deref for BoxedMessage {
    type Target = dyn Message;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BoxedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedMessage")
            .field("type", &self.message_type.name())
            .field("payload", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct CreateOrder {
        id: u32,
    }

    #[test]
    fn short_names_strip_paths_and_generics() {
        assert_eq!(MessageType::of::<String>().name(), "String");
        assert_eq!(MessageType::of::<CreateOrder>().name(), "CreateOrder");
        assert_eq!(MessageType::of::<Vec<CreateOrder>>().name(), "Vec");
        assert_eq!(MessageType::of::<i64>().name(), "i64");
    }

    #[test]
    fn identity_is_by_type() {
        assert_eq!(MessageType::of::<String>(), MessageType::of::<String>());
        assert_ne!(MessageType::of::<String>(), MessageType::of::<&'static str>());
    }

    #[test]
    fn downcasting() {
        let message = BoxedMessage::new(CreateOrder { id: 7 });

        assert!(message.is::<CreateOrder>());
        assert!(!message.is::<String>());
        assert_eq!(message.downcast_ref::<CreateOrder>().map(|c| c.id), Some(7));
        assert!(message.downcast::<String>().is_none());
        assert_eq!(message.to_json().ok(), Some(serde_json::json!({ "id": 7 })));
    }
}
