//! In-process storage adapters: [`MemoryCache`], [`MemoryStore`] and
//! [`CatalogRegistry`].

pub mod cache;
pub mod registry;
pub mod store;

pub use cache::MemoryCache;
pub use registry::{CatalogRegistry, ServiceCatalog};
pub use store::MemoryStore;
