//! Read-only views of the capabilities attached to a kernel.
//!
//! [`Capabilities`] is the slot set itself; [`KernelFacade`] is what a
//! processor receives at `init`. Both expose one explicit accessor per
//! capability, returning `None` for slots that were never attached.

use std::fmt;
use std::sync::{Arc, OnceLock};

use microbox_protocol::{
    AuthN, AuthZ, Broker, Cache, CapabilityKind, Client, Configuration, Logger, Registry,
    ServiceId, Store, Transport,
};

/// One optional reference per capability.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub(crate) logger: Option<Arc<dyn Logger>>,
    pub(crate) configuration: Option<Arc<dyn Configuration>>,
    pub(crate) broker: Option<Arc<dyn Broker>>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) client: Option<Arc<dyn Client>>,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) registry: Option<Arc<dyn Registry>>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) authn: Option<Arc<dyn AuthN>>,
    pub(crate) authz: Option<Arc<dyn AuthZ>>,
}

impl Capabilities {
    pub fn logger(&self) -> Option<Arc<dyn Logger>> {
        self.logger.clone()
    }

    pub fn configuration(&self) -> Option<Arc<dyn Configuration>> {
        self.configuration.clone()
    }

    pub fn broker(&self) -> Option<Arc<dyn Broker>> {
        self.broker.clone()
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.clone()
    }

    pub fn client(&self) -> Option<Arc<dyn Client>> {
        self.client.clone()
    }

    pub fn cache(&self) -> Option<Arc<dyn Cache>> {
        self.cache.clone()
    }

    pub fn registry(&self) -> Option<Arc<dyn Registry>> {
        self.registry.clone()
    }

    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.store.clone()
    }

    pub fn authn(&self) -> Option<Arc<dyn AuthN>> {
        self.authn.clone()
    }

    pub fn authz(&self) -> Option<Arc<dyn AuthZ>> {
        self.authz.clone()
    }

    pub fn is_attached(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::Logger => self.logger.is_some(),
            CapabilityKind::Configuration => self.configuration.is_some(),
            CapabilityKind::Broker => self.broker.is_some(),
            CapabilityKind::Transport => self.transport.is_some(),
            CapabilityKind::Client => self.client.is_some(),
            CapabilityKind::Cache => self.cache.is_some(),
            CapabilityKind::Registry => self.registry.is_some(),
            CapabilityKind::Store => self.store.is_some(),
            CapabilityKind::AuthN => self.authn.is_some(),
            CapabilityKind::AuthZ => self.authz.is_some(),
        }
    }

    /// Attached slots, in [`CapabilityKind::ALL`] order.
    pub fn attached(&self) -> Vec<CapabilityKind> {
        CapabilityKind::ALL
            .into_iter()
            .filter(|kind| self.is_attached(*kind))
            .collect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("attached", &self.attached())
            .finish()
    }
}

/// Identity plus capabilities; immutable once the kernel is sealed.
#[derive(Debug, Clone)]
pub(crate) struct Assembly {
    pub(crate) id: ServiceId,
    pub(crate) name: String,
    pub(crate) capabilities: Capabilities,
}

/// The view of a kernel handed to processors.
///
/// Once assembly completes the facade reads the sealed kernel, so a processor
/// that keeps its facade sees every capability. While its own `init` runs it
/// sees only what options before it attached.
#[derive(Clone)]
pub struct KernelFacade {
    sealed: Arc<OnceLock<Arc<Assembly>>>,
    provisional: Arc<Assembly>,
}

impl KernelFacade {
    pub(crate) fn new(sealed: Arc<OnceLock<Arc<Assembly>>>, provisional: Assembly) -> Self {
        Self {
            sealed,
            provisional: Arc::new(provisional),
        }
    }

    pub(crate) fn sealed(assembly: Arc<Assembly>) -> Self {
        let sealed = Arc::new(OnceLock::new());
        let _ = sealed.set(assembly.clone());
        Self {
            sealed,
            provisional: assembly,
        }
    }

    fn view(&self) -> &Assembly {
        self.sealed.get().unwrap_or(&self.provisional)
    }

    /// `true` once the kernel this facade belongs to finished assembly.
    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }

    pub fn id(&self) -> &ServiceId {
        &self.view().id
    }

    pub fn name(&self) -> &str {
        &self.view().name
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.view().capabilities
    }

    pub fn logger(&self) -> Option<Arc<dyn Logger>> {
        self.capabilities().logger()
    }

    pub fn configuration(&self) -> Option<Arc<dyn Configuration>> {
        self.capabilities().configuration()
    }

    pub fn broker(&self) -> Option<Arc<dyn Broker>> {
        self.capabilities().broker()
    }

    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.capabilities().transport()
    }

    pub fn client(&self) -> Option<Arc<dyn Client>> {
        self.capabilities().client()
    }

    pub fn cache(&self) -> Option<Arc<dyn Cache>> {
        self.capabilities().cache()
    }

    pub fn registry(&self) -> Option<Arc<dyn Registry>> {
        self.capabilities().registry()
    }

    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.capabilities().store()
    }

    pub fn authn(&self) -> Option<Arc<dyn AuthN>> {
        self.capabilities().authn()
    }

    pub fn authz(&self) -> Option<Arc<dyn AuthZ>> {
        self.capabilities().authz()
    }
}

impl fmt::Debug for KernelFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelFacade")
            .field("id", self.id())
            .field("name", &self.name())
            .field("sealed", &self.is_sealed())
            .field("capabilities", self.capabilities())
            .finish()
    }
}
