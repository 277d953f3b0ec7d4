//! Recording test doubles for kernel tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use microbox_protocol::{
    Broker, Cache, CapabilityKind, KernelError, KernelResult, Logger, MessageHandler, Method,
    Registry, RouteHandler, ServiceEndpoint, Transport,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::facade::KernelFacade;
use crate::processor::Processor;

/// Shared, ordered record of side effects across doubles.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub(crate) fn matching(&self, needle: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.contains(needle))
            .collect()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|candidate| *candidate == entry).count()
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingLogger {
    lines: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingLogger {
    fn record(&self, level: &'static str, message: &str) {
        self.lines.lock().push((level, message.to_owned()));
    }

    pub(crate) fn count(&self, level: &str) -> usize {
        self.lines.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub(crate) fn messages(&self, level: &str) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn info(&self, message: &str) {
        self.record("info", message);
    }

    fn debug(&self, message: &str) {
        self.record("debug", message);
    }

    fn warn(&self, message: &str) {
        self.record("warn", message);
    }

    fn error(&self, message: &str) {
        self.record("error", message);
    }

    // Records instead of exiting so the kernel's post-fatal path is observable.
    fn fatal(&self, message: &str) {
        self.record("fatal", message);
    }
}

fn injected(capability: CapabilityKind, what: &str) -> KernelError {
    KernelError::connection(capability, format!("injected {what} failure"))
}

#[derive(Debug)]
pub(crate) struct FakeBroker {
    log: EventLog,
    fail_connect: bool,
    fail_close: bool,
}

impl FakeBroker {
    pub(crate) fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_connect: false,
            fail_close: false,
        })
    }

    pub(crate) fn failing_connect(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_connect: true,
            fail_close: false,
        })
    }

    pub(crate) fn failing_close(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_connect: false,
            fail_close: true,
        })
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn connect(&self) -> KernelResult<()> {
        self.log.push("broker.connect");
        if self.fail_connect {
            return Err(injected(CapabilityKind::Broker, "connect"));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, _payload: Vec<u8>) -> KernelResult<()> {
        self.log.push(format!("broker.publish.{topic}"));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _handler: MessageHandler) -> KernelResult<()> {
        self.log.push(format!("broker.subscribe.{topic}"));
        Ok(())
    }

    async fn close(&self) -> KernelResult<()> {
        self.log.push("broker.close");
        if self.fail_close {
            return Err(injected(CapabilityKind::Broker, "close"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FakeTransport {
    log: EventLog,
    fail_listen: bool,
}

impl FakeTransport {
    pub(crate) fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_listen: false,
        })
    }

    pub(crate) fn failing_listen(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_listen: true,
        })
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn listen(&self) -> KernelResult<()> {
        self.log.push("transport.listen");
        if self.fail_listen {
            return Err(injected(CapabilityKind::Transport, "listen"));
        }
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        self.log.push("transport.stop");
        Ok(())
    }

    fn route(&self, method: Method, path: &str, _handler: RouteHandler) -> KernelResult<()> {
        self.log.push(format!("transport.route.{method}.{path}"));
        Ok(())
    }

    fn serve_static(&self, path: &str, _folder: &Path) -> KernelResult<()> {
        self.log.push(format!("transport.static.{path}"));
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FakeCache {
    log: EventLog,
    label: &'static str,
    reachable: bool,
}

impl FakeCache {
    pub(crate) fn new(log: &EventLog) -> Arc<Self> {
        Self::labelled(log, "cache")
    }

    pub(crate) fn labelled(log: &EventLog, label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            label,
            reachable: true,
        })
    }

    pub(crate) fn unreachable(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            label: "cache",
            reachable: false,
        })
    }
}

#[async_trait]
impl Cache for FakeCache {
    async fn connect(&self) -> KernelResult<()> {
        self.log.push(format!("{}.connect", self.label));
        if !self.reachable {
            return Err(KernelError::connection(
                CapabilityKind::Cache,
                "connection refused",
            ));
        }
        Ok(())
    }

    async fn close(&self) -> KernelResult<()> {
        self.log.push(format!("{}.close", self.label));
        Ok(())
    }

    async fn set(&self, key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> KernelResult<()> {
        self.log.push(format!("{}.set.{key}", self.label));
        Ok(())
    }

    async fn get(&self, key: &str) -> KernelResult<Vec<u8>> {
        Err(KernelError::NotFound(key.to_owned()))
    }

    async fn keys(&self) -> KernelResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug)]
pub(crate) struct FakeRegistry {
    log: EventLog,
    fail_register: bool,
    register_delay: Option<Duration>,
}

impl FakeRegistry {
    pub(crate) fn new(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_register: false,
            register_delay: None,
        })
    }

    pub(crate) fn failing_register(log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_register: true,
            register_delay: None,
        })
    }

    /// Logs `registry.register` on entry and `registry.registered` after `delay`.
    pub(crate) fn slow(log: &EventLog, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            fail_register: false,
            register_delay: Some(delay),
        })
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn register(&self) -> KernelResult<()> {
        self.log.push("registry.register");
        if let Some(delay) = self.register_delay {
            tokio::time::sleep(delay).await;
            self.log.push("registry.registered");
        }
        if self.fail_register {
            return Err(injected(CapabilityKind::Registry, "register"));
        }
        Ok(())
    }

    async fn deregister(&self, id: &str) -> KernelResult<()> {
        self.log.push(format!("registry.deregister.{id}"));
        Ok(())
    }

    async fn lookup(&self, service: &str, _tag: Option<&str>) -> KernelResult<Vec<ServiceEndpoint>> {
        Err(KernelError::NotFound(service.to_owned()))
    }
}

pub(crate) struct TestProcessor {
    name: String,
    log: EventLog,
    fail_init: bool,
    fail_close: bool,
    inits: AtomicUsize,
    facade: Mutex<Option<KernelFacade>>,
}

impl TestProcessor {
    fn build(name: &str, log: &EventLog, fail_init: bool, fail_close: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            log: log.clone(),
            fail_init,
            fail_close,
            inits: AtomicUsize::new(0),
            facade: Mutex::new(None),
        })
    }

    pub(crate) fn new(name: &str, log: &EventLog) -> Arc<Self> {
        Self::build(name, log, false, false)
    }

    pub(crate) fn failing_init(name: &str, log: &EventLog) -> Arc<Self> {
        Self::build(name, log, true, false)
    }

    pub(crate) fn failing_close(name: &str, log: &EventLog) -> Arc<Self> {
        Self::build(name, log, false, true)
    }

    pub(crate) fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub(crate) fn facade(&self) -> Option<KernelFacade> {
        self.facade.lock().clone()
    }
}

#[async_trait]
impl Processor for TestProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, kernel: KernelFacade) -> KernelResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("processor.{}.init", self.name));
        if self.fail_init {
            return Err(KernelError::Runtime(format!("{} refused to start", self.name)));
        }
        *self.facade.lock() = Some(kernel);
        Ok(())
    }

    async fn close(&self) -> KernelResult<()> {
        self.log.push(format!("processor.{}.close", self.name));
        if self.fail_close {
            return Err(KernelError::Runtime(format!("{} refused to close", self.name)));
        }
        Ok(())
    }

    async fn process(&self, input: Value) -> KernelResult<Value> {
        self.log.push(format!("processor.{}.process", self.name));
        Ok(serde_json::json!({ "processor": self.name, "input": input }))
    }
}
