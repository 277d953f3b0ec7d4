use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use microbox_protocol::{KernelError, KernelResult, Registry, ServiceEndpoint};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Shared table of known endpoints, keyed by endpoint id.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    endpoints: Arc<RwLock<IndexMap<String, ServiceEndpoint>>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn endpoints(&self) -> Vec<ServiceEndpoint> {
        self.endpoints.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}

/// Registry adapter announcing one endpoint into a [`ServiceCatalog`].
///
/// Several instances sharing a catalog discover each other through `lookup`.
#[derive(Debug, Clone)]
pub struct CatalogRegistry {
    catalog: ServiceCatalog,
    endpoint: ServiceEndpoint,
}

impl CatalogRegistry {
    pub fn new(catalog: ServiceCatalog, endpoint: ServiceEndpoint) -> KernelResult<Self> {
        if endpoint.id.trim().is_empty() || endpoint.name.trim().is_empty() {
            return Err(KernelError::validation(
                "endpoint",
                "id and name cannot be empty",
            ));
        }
        Ok(Self { catalog, endpoint })
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }
}

#[async_trait]
impl Registry for CatalogRegistry {
    #[instrument(skip(self), fields(id = %self.endpoint.id, service = %self.endpoint.name))]
    async fn register(&self) -> KernelResult<()> {
        self.catalog
            .endpoints
            .write()
            .await
            .insert(self.endpoint.id.clone(), self.endpoint.clone());
        debug!(
            address = %self.endpoint.address,
            port = self.endpoint.port,
            "endpoint registered"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deregister(&self, id: &str) -> KernelResult<()> {
        self.catalog
            .endpoints
            .write()
            .await
            .shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| KernelError::NotFound(format!("endpoint {id}")))
    }

    async fn lookup(
        &self,
        service: &str,
        tag: Option<&str>,
    ) -> KernelResult<Vec<ServiceEndpoint>> {
        let matches: Vec<ServiceEndpoint> = self
            .catalog
            .endpoints
            .read()
            .await
            .values()
            .filter(|endpoint| endpoint.name == service)
            .filter(|endpoint| tag.is_none_or(|tag| endpoint.has_tag(tag)))
            .cloned()
            .collect();
        if matches.is_empty() {
            return Err(KernelError::NotFound(match tag {
                Some(tag) => format!("service {service} with tag {tag}"),
                None => format!("service {service}"),
            }));
        }
        Ok(matches)
    }
}
