//! Handler parameters.
//!
//! A handler table can carry extra parameters that are resolved for every
//! invocation and passed as additional handler arguments:
//!
//! ```rust,ignore
//! CommandHandlers::new(OrderHandler::default())
//!     .with_parameter(ParameterProvider::value(Clock::system()))
//!     .with_parameter(ParameterProvider::scoped(|| pool.checkout()))
//!     .on(OrderHandler::create);
//!
//! impl OrderHandler {
//!     async fn create(self: Arc<Self>, cmd: CreateOrder, clock: Param<Clock>, conn: Option<Param<Connection>>) {
//!         // ...
//!     }
//! }
//! ```
//!
//! Value and shared parameters live as long as the table. Scoped parameters
//! are produced per invocation and dropped when the invocation completes, so
//! resources with a `Drop` release are released after every call.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::HandlerError;

type SharedValue = Arc<dyn Any + Send + Sync>;
type ScopedFactory = Arc<dyn Fn() -> Option<SharedValue> + Send + Sync>;

// ============================================================================
// Providers
// ============================================================================

enum ProviderKind {
    Shared(SharedValue),
    Scoped(ScopedFactory),
}

/// Source of one extra handler parameter, keyed by its type.
pub struct ParameterProvider {
    type_id: TypeId,
    type_name: &'static str,
    kind: ProviderKind,
}

impl ParameterProvider {
    /// A fixed value shared by every invocation.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Self::shared(Arc::new(value))
    }

    /// An already shared value.
    pub fn shared<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            kind: ProviderKind::Shared(value),
        }
    }

    /// A value produced for each invocation and dropped afterwards.
    ///
    /// The factory may return `None`; handlers declaring the parameter as
    /// `Option<Param<T>>` then receive `None`.
    pub fn scoped<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Option<T> + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            kind: ProviderKind::Scoped(Arc::new(move || {
                factory().map(|value| Arc::new(value) as SharedValue)
            })),
        }
    }

    /// Type name of the provided parameter.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ParameterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ProviderKind::Shared(_) => "shared",
            ProviderKind::Scoped(_) => "scoped",
        };
        f.debug_struct("ParameterProvider")
            .field("type", &self.type_name)
            .field("kind", &kind)
            .finish()
    }
}

// ============================================================================
// Parameter Set and Scope
// ============================================================================

/// The providers of one handler table.
///
/// A later provider for the same type replaces an earlier one.
#[derive(Clone, Default)]
pub struct ParameterSet {
    shared: Arc<HashMap<TypeId, SharedValue>>,
    scoped: Arc<Vec<(TypeId, ScopedFactory)>>,
}

impl ParameterSet {
    /// Builds a set from providers.
    pub fn new(providers: Vec<ParameterProvider>) -> Self {
        let mut shared = HashMap::new();
        let mut scoped: Vec<(TypeId, ScopedFactory)> = Vec::new();

        for provider in providers {
            match provider.kind {
                ProviderKind::Shared(value) => {
                    scoped.retain(|(id, _)| *id != provider.type_id);
                    shared.insert(provider.type_id, value);
                }
                ProviderKind::Scoped(factory) => {
                    shared.remove(&provider.type_id);
                    scoped.retain(|(id, _)| *id != provider.type_id);
                    scoped.push((provider.type_id, factory));
                }
            }
        }

        Self {
            shared: Arc::new(shared),
            scoped: Arc::new(scoped),
        }
    }

    /// Returns `true` if no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.scoped.is_empty()
    }

    /// Resolves every scoped provider for one invocation.
    pub fn open_scope(&self) -> ParameterScope {
        let scoped = self
            .scoped
            .iter()
            .filter_map(|(id, factory)| factory().map(|value| (*id, value)))
            .collect();

        ParameterScope {
            shared: Arc::clone(&self.shared),
            scoped,
        }
    }
}

impl fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSet")
            .field("shared", &self.shared.len())
            .field("scoped", &self.scoped.len())
            .finish()
    }
}

/// Parameters resolved for one invocation.
///
/// Dropping the scope drops every scoped value it produced.
pub struct ParameterScope {
    shared: Arc<HashMap<TypeId, SharedValue>>,
    scoped: HashMap<TypeId, SharedValue>,
}

impl ParameterScope {
    /// A scope with no parameters.
    pub fn empty() -> Self {
        Self {
            shared: Arc::new(HashMap::new()),
            scoped: HashMap::new(),
        }
    }

    /// Looks up the parameter of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let id = TypeId::of::<T>();
        self.scoped
            .get(&id)
            .or_else(|| self.shared.get(&id))
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }
}

impl fmt::Debug for ParameterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterScope")
            .field("shared", &self.shared.len())
            .field("scoped", &self.scoped.len())
            .finish()
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Types that can be extracted from a [`ParameterScope`] as handler arguments.
pub trait FromScope: Sized + Send + 'static {
    /// Extracts the argument, failing if it is unavailable.
    fn from_scope(scope: &ParameterScope) -> Result<Self, HandlerError>;
}

/// A handler argument resolved from the table's parameter providers.
pub struct Param<T>(pub Arc<T>);

impl<T> Param<T> {
    /// Returns the shared value.
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T> Deref for Param<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> Clone for Param<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Param<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Param").field(&self.0).finish()
    }
}

impl<T: Send + Sync + 'static> FromScope for Param<T> {
    fn from_scope(scope: &ParameterScope) -> Result<Self, HandlerError> {
        scope
            .get::<T>()
            .map(Param)
            .ok_or(HandlerError::MissingParameter(type_name::<T>()))
    }
}

impl<T: FromScope> FromScope for Option<T> {
    fn from_scope(scope: &ParameterScope) -> Result<Self, HandlerError> {
        Ok(T::from_scope(scope).ok())
    }
}
