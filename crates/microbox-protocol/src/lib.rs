//! # microbox-protocol: capability contracts
//!
//! This crate defines the ports every microbox capability adapter implements,
//! the typed payloads those ports exchange, and the shared error taxonomy.
//!
//! It is intentionally dependency-light (no tokio) so it can be used as a pure
//! contract crate by adapter authors.
//!
//! ## Module Overview
//!
//! - [`ports`]: Logger, Configuration, Broker, Transport, Client, Cache, Registry, Store, AuthN, AuthZ
//! - [`message`]: broker `Message` and `MessageHandler`
//! - [`http`]: `Request`/`Response`, route and response handlers
//! - [`capability`]: `CapabilityKind`, the name of each kernel slot
//! - [`ids`]: typed ID wrappers (ServiceId, MessageId)
//! - [`error`]: KernelError, KernelResult

pub mod capability;
pub mod error;
pub mod http;
pub mod ids;
pub mod message;
pub mod ports;

// Re-export the most commonly used types at the crate root.
pub use capability::CapabilityKind;
pub use error::{KernelError, KernelResult};
pub use http::{Method, Request, Response, ResponseHandler, RouteHandler, route_handler};
pub use ids::{MessageId, ServiceId};
pub use message::{Message, MessageHandler, message_handler};
pub use ports::{
    Account, AuthN, AuthZ, Broker, Cache, Client, Configuration, Logger, Registry,
    ServiceEndpoint, Store, StoreQuery, StoreRecord, TokenClaims, Transport,
};
