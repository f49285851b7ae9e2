//! Routing model: keys, endpoints, routes and route maps.
//!
//! A [`RoutingKey`] describes one message-flow intent (type, direction,
//! priority, contexts). Each [`Route`] groups keys under a name and, once
//! [`RouteMap::resolve_routes`] has run, maps each key to an [`Endpoint`].

mod endpoint;
mod key;
mod map;
mod route;

pub use endpoint::{Destination, Endpoint, SerializationFormat};
pub use key::{CommunicationType, RouteType, RoutingKey};
pub use map::RouteMap;
pub use route::{ProcessingOptions, Route};
