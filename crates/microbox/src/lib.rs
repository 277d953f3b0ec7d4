//! # microbox
//!
//! Build a microservice from interchangeable capabilities and processors.
//! This crate re-exports the contracts, the kernel, and the in-process
//! adapters under one name.
//!
//! - [`protocol`]: capability ports, payload types, `KernelError`
//! - [`kernel`]: `Kernel`, options, processors, lifecycle
//! - [`adapters`]: in-process broker, cache, store, registry, auth, transport

pub use microbox_kernel as kernel;
pub use microbox_protocol as protocol;

pub use microbox_kernel::*;
pub use microbox_protocol::{
    Account, AuthN, AuthZ, Broker, Cache, CapabilityKind, Client, Configuration, KernelError,
    KernelResult, Logger, Message, MessageHandler, Method, Registry, Request, Response,
    ResponseHandler, RouteHandler, ServiceEndpoint, ServiceId, Store, StoreQuery, StoreRecord,
    TokenClaims, Transport, message_handler, route_handler,
};

pub mod adapters {
    pub use microbox_events::MemoryBroker;
    pub use microbox_memory::{CatalogRegistry, MemoryCache, MemoryStore, ServiceCatalog};
    pub use microbox_policy::{MemoryAuthN, TokenAuthZ};
    pub use microbox_transport::{LocalClient, LocalTransport, TransportHandle};
}
