//! The assembled kernel and its run/stop state machine.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use microbox_protocol::{
    AuthN, AuthZ, Broker, Cache, CapabilityKind, Client, Configuration, KernelError,
    KernelResult, Logger, Registry, ServiceId, Store, Transport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

use crate::facade::{Assembly, Capabilities, KernelFacade};
use crate::logger::TracingLogger;
use crate::option::{KernelDraft, KernelOption};
use crate::processor::{Processor, ProcessorRegistry};
use crate::shutdown::ShutdownHook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Assembling,
    Ready,
    Running,
    Stopping,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assembling => "assembling",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct KernelInner {
    assembly: Arc<Assembly>,
    banner: Option<String>,
    processors: ProcessorRegistry,
    state: watch::Sender<LifecycleState>,
    run_started: AtomicBool,
    stop_requested: AtomicBool,
    // Held while startup brings capabilities up and while stop tears them down.
    transition: Mutex<()>,
    shutdown: ShutdownHook,
    fallback_logger: Arc<dyn Logger>,
}

/// An assembled microservice.
///
/// `Kernel` is a cheap handle over shared state: clone it to call
/// [`stop`](Kernel::stop) from another task while [`run`](Kernel::run) is
/// parked. A kernel only exists once every option applied successfully.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

/// Non-owning kernel reference held by background tasks.
#[derive(Clone)]
pub(crate) struct WeakKernel(Weak<KernelInner>);

impl WeakKernel {
    pub(crate) fn upgrade(&self) -> Option<Kernel> {
        self.0.upgrade().map(|inner| Kernel { inner })
    }
}

impl Kernel {
    /// Apply `options` in order to a fresh draft.
    ///
    /// The first failing option aborts assembly: its error is returned
    /// unchanged, later options are never applied, and whatever the draft
    /// already acquired (connected cache, initialised processors) is released.
    #[instrument(skip_all)]
    pub async fn new<I>(options: I) -> KernelResult<Self>
    where
        I: IntoIterator<Item = KernelOption>,
    {
        let mut draft = KernelDraft::default();
        for option in options {
            let name = option.name();
            if let Err(error) = draft.apply(option).await {
                warn!(option = name, %error, "kernel assembly aborted");
                let fallback = TracingLogger::default();
                let logger = draft.capabilities.logger();
                draft
                    .release(logger.as_deref().unwrap_or(&fallback))
                    .await;
                return Err(error);
            }
        }

        let sealed = draft.seal();
        let (state, _) = watch::channel(LifecycleState::Ready);
        let kernel = Self {
            inner: Arc::new(KernelInner {
                assembly: sealed.assembly,
                banner: sealed.banner,
                processors: sealed.processors,
                state,
                run_started: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                transition: Mutex::new(()),
                shutdown: ShutdownHook::new(sealed.signal_hook),
                fallback_logger: Arc::new(TracingLogger::default()),
            }),
        };
        info!(
            service_id = %kernel.id(),
            name = %kernel.name(),
            capabilities = ?kernel.capabilities().attached(),
            processors = kernel.inner.processors.len(),
            "kernel assembled"
        );
        Ok(kernel)
    }

    /// Bring up registry, broker and transport, then park until stopped.
    ///
    /// A startup failure is reported through the logger's `fatal`. Loggers
    /// that return from `fatal` get the partial startup released and a
    /// [`KernelError::Startup`] back. A `stop` that lands during startup
    /// waits for the step in flight, skips the remaining ones, and tears
    /// down whatever came up.
    #[instrument(skip(self), fields(service_id = %self.id(), name = %self.name()))]
    pub async fn run(&self) -> KernelResult<()> {
        let state = self.state();
        if state != LifecycleState::Ready || self.inner.run_started.swap(true, Ordering::SeqCst) {
            return Err(KernelError::InvalidState(format!(
                "kernel {} cannot run from state {state}",
                self.name()
            )));
        }

        if let Some(banner) = &self.inner.banner {
            println!("{banner}");
        }
        if self.inner.shutdown.install(self).is_some() {
            debug!("shutdown hook installed");
        }

        let logger = self.lifecycle_logger();
        let transition = self.inner.transition.lock().await;
        let started = self.start_capabilities(logger.as_ref()).await;
        drop(transition);
        if let Err((capability, error)) = started {
            return self.fail_startup(capability, error).await;
        }

        let running = self.inner.state.send_if_modified(|state| {
            if *state == LifecycleState::Ready {
                *state = LifecycleState::Running;
                true
            } else {
                false
            }
        });
        if running {
            logger.info(&format!("{} is running", self.name()));
        }

        let mut state = self.inner.state.subscribe();
        state
            .wait_for(|state| *state == LifecycleState::Stopped)
            .await
            .map(|_| ())
            .map_err(|_| KernelError::InvalidState("lifecycle channel closed".to_owned()))
    }

    fn stop_pending(&self) -> bool {
        let pending = self.inner.stop_requested.load(Ordering::SeqCst);
        if pending {
            debug!("stop requested during startup; skipping remaining steps");
        }
        pending
    }

    async fn start_capabilities(
        &self,
        logger: &dyn Logger,
    ) -> Result<(), (CapabilityKind, KernelError)> {
        let capabilities = self.capabilities();
        if let Some(registry) = capabilities.registry() {
            if self.stop_pending() {
                return Ok(());
            }
            registry
                .register()
                .await
                .map_err(|error| (CapabilityKind::Registry, error))?;
            logger.debug("registered with service registry");
        }
        if let Some(broker) = capabilities.broker() {
            if self.stop_pending() {
                return Ok(());
            }
            broker
                .connect()
                .await
                .map_err(|error| (CapabilityKind::Broker, error))?;
            logger.debug("broker connected");
        }
        if let Some(transport) = capabilities.transport() {
            if self.stop_pending() {
                return Ok(());
            }
            transport
                .listen()
                .await
                .map_err(|error| (CapabilityKind::Transport, error))?;
            logger.debug("transport listening");
        }
        Ok(())
    }

    async fn fail_startup(
        &self,
        capability: CapabilityKind,
        error: KernelError,
    ) -> KernelResult<()> {
        self.lifecycle_logger()
            .fatal(&format!("{capability} failed to start: {error}"));
        self.stop().await;
        Err(KernelError::Startup {
            capability,
            source: Box::new(error),
        })
    }

    /// Tear down once: broker, transport, processors (last attached first),
    /// then cache. Each step runs even if an earlier one failed. Later calls
    /// return immediately.
    #[instrument(skip(self), fields(service_id = %self.id()))]
    pub async fn stop(&self) {
        if self.inner.stop_requested.swap(true, Ordering::SeqCst) {
            debug!("stop already requested");
            return;
        }
        self.inner.state.send_replace(LifecycleState::Stopping);
        let _transition = self.inner.transition.lock().await;

        let logger = self.lifecycle_logger();
        let capabilities = self.capabilities();
        let mut failures = 0;
        if let Some(broker) = capabilities.broker() {
            if let Err(error) = broker.close().await {
                failures += 1;
                logger.error(&format!("broker failed to close: {error}"));
            }
        }
        if let Some(transport) = capabilities.transport() {
            if let Err(error) = transport.stop().await {
                failures += 1;
                logger.error(&format!("transport failed to stop: {error}"));
            }
        }
        failures += self.inner.processors.close_all(logger.as_ref()).await;
        if let Some(cache) = capabilities.cache() {
            if let Err(error) = cache.close().await {
                failures += 1;
                logger.error(&format!("cache failed to close: {error}"));
            }
        }

        self.inner.state.send_replace(LifecycleState::Stopped);
        debug!(failures, "teardown finished");
        logger.info(&format!("{} stopped", self.name()));
    }

    pub fn id(&self) -> &ServiceId {
        &self.inner.assembly.id
    }

    pub fn name(&self) -> &str {
        &self.inner.assembly.name
    }

    pub fn banner(&self) -> Option<&str> {
        self.inner.banner.as_deref()
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.assembly.capabilities
    }

    /// The same view processors receive at `init`.
    pub fn facade(&self) -> KernelFacade {
        KernelFacade::sealed(self.inner.assembly.clone())
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

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.inner.processors
    }

    pub fn processor(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.inner.processors.get(name)
    }

    /// Route `input` to the named processor.
    #[instrument(skip(self, input), fields(service_id = %self.id()))]
    pub async fn process(&self, name: &str, input: Value) -> KernelResult<Value> {
        let processor = self
            .processor(name)
            .ok_or_else(|| KernelError::NotFound(format!("processor {name}")))?;
        processor.process(input).await
    }

    pub(crate) fn downgrade(&self) -> WeakKernel {
        WeakKernel(Arc::downgrade(&self.inner))
    }

    fn lifecycle_logger(&self) -> Arc<dyn Logger> {
        self.logger()
            .unwrap_or_else(|| self.inner.fallback_logger.clone())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("id", self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("capabilities", self.capabilities())
            .field("processors", &self.inner.processors.names())
            .finish()
    }
}
