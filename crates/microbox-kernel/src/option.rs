//! Assembly options.
//!
//! Each [`KernelOption`] validates one input and mutates the draft kernel it
//! is applied to. [`Kernel::new`](crate::Kernel::new) applies options in the
//! order supplied and stops at the first failure, so an option placed after a
//! failing one never runs its side effects (cache connect, processor init).
//! Setting the same slot twice is allowed; the later option wins.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use microbox_protocol::{
    AuthN, AuthZ, Broker, Cache, Client, Configuration, KernelError, KernelResult, Logger,
    Registry, ServiceId, Store, Transport,
};
use tracing::{debug, warn};

use crate::config::JsonConfiguration;
use crate::facade::{Assembly, Capabilities, KernelFacade};
use crate::processor::{Processor, ProcessorRegistry};

pub const DEFAULT_NAME: &str = "default";

/// Startup banner source. Files are read while the option is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
    Text(String),
    File(PathBuf),
}

enum OptionKind {
    Id(String),
    Name(String),
    Banner(Banner),
    Logger(Arc<dyn Logger>),
    Configuration(Arc<dyn Configuration>),
    LocalConfiguration(Vec<PathBuf>),
    Broker(Arc<dyn Broker>),
    Transport(Arc<dyn Transport>),
    Client(Arc<dyn Client>),
    Cache(Arc<dyn Cache>),
    Registry(Arc<dyn Registry>),
    Store(Arc<dyn Store>),
    AuthN(Arc<dyn AuthN>),
    AuthZ(Arc<dyn AuthZ>),
    Processor(Arc<dyn Processor>),
    Processors(Vec<Arc<dyn Processor>>),
    SignalHook(bool),
}

/// A deferred, named mutation of a draft kernel.
pub struct KernelOption {
    name: &'static str,
    kind: OptionKind,
}

impl KernelOption {
    fn new(name: &'static str, kind: OptionKind) -> Self {
        Self { name, kind }
    }

    /// Stable name used in validation errors and logs, e.g. `with_cache`.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for KernelOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KernelOption").field(&self.name).finish()
    }
}

pub fn with_id(id: impl Into<String>) -> KernelOption {
    KernelOption::new("with_id", OptionKind::Id(id.into()))
}

pub fn with_name(name: impl Into<String>) -> KernelOption {
    KernelOption::new("with_name", OptionKind::Name(name.into()))
}

pub fn with_banner(banner: Banner) -> KernelOption {
    KernelOption::new("with_banner", OptionKind::Banner(banner))
}

pub fn with_logger(logger: Arc<dyn Logger>) -> KernelOption {
    KernelOption::new("with_logger", OptionKind::Logger(logger))
}

pub fn with_configuration(configuration: Arc<dyn Configuration>) -> KernelOption {
    KernelOption::new(
        "with_configuration",
        OptionKind::Configuration(configuration),
    )
}

/// Load `<name>.json` for the kernel's current name from the standard search
/// path plus `paths`. Place it after `with_name`.
pub fn with_local_configuration<I, P>(paths: I) -> KernelOption
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    KernelOption::new(
        "with_local_configuration",
        OptionKind::LocalConfiguration(paths.into_iter().map(Into::into).collect()),
    )
}

pub fn with_broker(broker: Arc<dyn Broker>) -> KernelOption {
    KernelOption::new("with_broker", OptionKind::Broker(broker))
}

pub fn with_transport(transport: Arc<dyn Transport>) -> KernelOption {
    KernelOption::new("with_transport", OptionKind::Transport(transport))
}

pub fn with_client(client: Arc<dyn Client>) -> KernelOption {
    KernelOption::new("with_client", OptionKind::Client(client))
}

/// Attach a cache, connecting it immediately. A connect failure aborts
/// assembly with the cache's own error.
pub fn with_cache(cache: Arc<dyn Cache>) -> KernelOption {
    KernelOption::new("with_cache", OptionKind::Cache(cache))
}

pub fn with_registry(registry: Arc<dyn Registry>) -> KernelOption {
    KernelOption::new("with_registry", OptionKind::Registry(registry))
}

pub fn with_store(store: Arc<dyn Store>) -> KernelOption {
    KernelOption::new("with_store", OptionKind::Store(store))
}

pub fn with_authn(authn: Arc<dyn AuthN>) -> KernelOption {
    KernelOption::new("with_authn", OptionKind::AuthN(authn))
}

pub fn with_authz(authz: Arc<dyn AuthZ>) -> KernelOption {
    KernelOption::new("with_authz", OptionKind::AuthZ(authz))
}

/// Attach one processor; its `init` runs while this option is applied.
pub fn with_processor(processor: Arc<dyn Processor>) -> KernelOption {
    KernelOption::new("with_processor", OptionKind::Processor(processor))
}

pub fn with_processors<I>(processors: I) -> KernelOption
where
    I: IntoIterator<Item = Arc<dyn Processor>>,
{
    KernelOption::new(
        "with_processors",
        OptionKind::Processors(processors.into_iter().collect()),
    )
}

/// Whether `run` registers for Ctrl-C / SIGTERM. Enabled by default.
pub fn with_signal_hook(enabled: bool) -> KernelOption {
    KernelOption::new("with_signal_hook", OptionKind::SignalHook(enabled))
}

fn non_empty(option: &'static str, field: &str, value: String) -> KernelResult<String> {
    if value.trim().is_empty() {
        return Err(KernelError::validation(
            option,
            format!("{field} cannot be empty"),
        ));
    }
    Ok(value)
}

/// The mutable record options are applied to.
pub(crate) struct KernelDraft {
    pub(crate) id: ServiceId,
    pub(crate) name: String,
    pub(crate) banner: Option<String>,
    pub(crate) capabilities: Capabilities,
    pub(crate) processors: ProcessorRegistry,
    pub(crate) signal_hook: bool,
    sealed: Arc<OnceLock<Arc<Assembly>>>,
}

impl Default for KernelDraft {
    fn default() -> Self {
        Self {
            id: ServiceId::new_uuid(),
            name: DEFAULT_NAME.to_owned(),
            banner: None,
            capabilities: Capabilities::default(),
            processors: ProcessorRegistry::default(),
            signal_hook: true,
            sealed: Arc::new(OnceLock::new()),
        }
    }
}

impl KernelDraft {
    fn assembly(&self) -> Assembly {
        Assembly {
            id: self.id.clone(),
            name: self.name.clone(),
            capabilities: self.capabilities.clone(),
        }
    }

    /// Facade over the draft as it stands; switches to the sealed kernel once
    /// assembly completes.
    pub(crate) fn facade(&self) -> KernelFacade {
        KernelFacade::new(self.sealed.clone(), self.assembly())
    }

    pub(crate) async fn apply(&mut self, option: KernelOption) -> KernelResult<()> {
        let name = option.name;
        match option.kind {
            OptionKind::Id(id) => self.id = ServiceId::from(non_empty(name, "id", id)?),
            OptionKind::Name(value) => self.name = non_empty(name, "name", value)?,
            OptionKind::Banner(Banner::Text(text)) => {
                self.banner = Some(non_empty(name, "banner", text)?);
            }
            OptionKind::Banner(Banner::File(path)) => {
                let text = tokio::fs::read_to_string(&path).await.map_err(|error| {
                    KernelError::Io(format!("banner {}: {error}", path.display()))
                })?;
                self.banner = Some(text);
            }
            OptionKind::Logger(logger) => self.capabilities.logger = Some(logger),
            OptionKind::Configuration(configuration) => {
                self.capabilities.configuration = Some(configuration);
            }
            OptionKind::LocalConfiguration(paths) => {
                let configuration = JsonConfiguration::new(self.name.clone())?;
                configuration.open(&paths).await?;
                self.capabilities.configuration = Some(Arc::new(configuration));
            }
            OptionKind::Broker(broker) => self.capabilities.broker = Some(broker),
            OptionKind::Transport(transport) => self.capabilities.transport = Some(transport),
            OptionKind::Client(client) => self.capabilities.client = Some(client),
            OptionKind::Cache(cache) => {
                cache.connect().await?;
                if let Some(previous) = self.capabilities.cache.replace(cache) {
                    if let Err(error) = previous.close().await {
                        warn!(%error, "replaced cache failed to close");
                    }
                }
            }
            OptionKind::Registry(registry) => self.capabilities.registry = Some(registry),
            OptionKind::Store(store) => self.capabilities.store = Some(store),
            OptionKind::AuthN(authn) => self.capabilities.authn = Some(authn),
            OptionKind::AuthZ(authz) => self.capabilities.authz = Some(authz),
            OptionKind::Processor(processor) => {
                let facade = self.facade();
                self.processors.attach(name, processor, facade)?;
            }
            OptionKind::Processors(processors) => {
                if processors.is_empty() {
                    return Err(KernelError::validation(
                        name,
                        "at least one processor is required",
                    ));
                }
                for processor in processors {
                    let facade = self.facade();
                    self.processors.attach(name, processor, facade)?;
                }
            }
            OptionKind::SignalHook(enabled) => self.signal_hook = enabled,
        }
        debug!(option = name, "option applied");
        Ok(())
    }

    /// Release what an aborted assembly already acquired: attached processors
    /// and the eagerly connected cache.
    pub(crate) async fn release(&self, logger: &dyn Logger) {
        self.processors.close_all(logger).await;
        if let Some(cache) = &self.capabilities.cache {
            if let Err(error) = cache.close().await {
                logger.error(&format!("cache failed to close: {error}"));
            }
        }
    }

    /// Publish the final assembly to every facade handed out during `init`.
    pub(crate) fn seal(self) -> SealedDraft {
        let assembly = Arc::new(self.assembly());
        let _ = self.sealed.set(assembly.clone());
        SealedDraft {
            assembly,
            banner: self.banner,
            processors: self.processors,
            signal_hook: self.signal_hook,
        }
    }
}

pub(crate) struct SealedDraft {
    pub(crate) assembly: Arc<Assembly>,
    pub(crate) banner: Option<String>,
    pub(crate) processors: ProcessorRegistry,
    pub(crate) signal_hook: bool,
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use microbox_protocol::CapabilityKind;

    use super::*;
    use crate::testing::{EventLog, FakeCache, RecordingLogger, TestProcessor};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("microbox-option-{name}-{nanos}"))
    }

    #[tokio::test]
    async fn draft_starts_with_defaults() {
        let draft = KernelDraft::default();
        assert_eq!(draft.name, DEFAULT_NAME);
        assert!(!draft.id.as_str().is_empty());
        assert!(draft.banner.is_none());
        assert!(draft.capabilities.attached().is_empty());
        assert!(draft.signal_hook);
    }

    #[tokio::test]
    async fn empty_identity_fields_are_rejected() {
        let mut draft = KernelDraft::default();
        for option in [with_id(""), with_name("  "), with_banner(Banner::Text(String::new()))] {
            let expected = option.name();
            let error = draft.apply(option).await.unwrap_err();
            assert!(
                matches!(error, KernelError::Validation { option, .. } if option == expected),
                "{expected} should fail validation"
            );
        }
        assert_eq!(draft.name, DEFAULT_NAME);
    }

    #[tokio::test]
    async fn later_name_wins() {
        let mut draft = KernelDraft::default();
        draft.apply(with_name("first")).await.unwrap();
        draft.apply(with_name("second")).await.unwrap();
        assert_eq!(draft.name, "second");
    }

    #[tokio::test]
    async fn banner_file_is_read_eagerly() -> anyhow::Result<()> {
        let root = unique_test_root("banner");
        tokio::fs::create_dir_all(&root).await?;
        let path = root.join("banner.txt");
        tokio::fs::write(&path, "== orders ==").await?;

        let mut draft = KernelDraft::default();
        draft.apply(with_banner(Banner::File(path))).await?;
        assert_eq!(draft.banner.as_deref(), Some("== orders =="));

        let missing = draft
            .apply(with_banner(Banner::File(root.join("missing.txt"))))
            .await
            .unwrap_err();
        assert!(matches!(missing, KernelError::Io(_)));
        Ok(())
    }

    #[tokio::test]
    async fn cache_is_connected_on_attach_and_replacement_closes_previous() {
        let log = EventLog::default();
        let mut draft = KernelDraft::default();
        draft
            .apply(with_cache(FakeCache::labelled(&log, "first")))
            .await
            .unwrap();
        draft
            .apply(with_cache(FakeCache::labelled(&log, "second")))
            .await
            .unwrap();

        assert_eq!(
            log.entries(),
            vec!["first.connect", "second.connect", "first.close"]
        );
        assert!(draft.capabilities.is_attached(CapabilityKind::Cache));
    }

    #[tokio::test]
    async fn unreachable_cache_is_not_attached() {
        let log = EventLog::default();
        let mut draft = KernelDraft::default();
        let error = draft
            .apply(with_cache(FakeCache::unreachable(&log)))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            KernelError::Connection {
                capability: CapabilityKind::Cache,
                ..
            }
        ));
        assert!(draft.capabilities.cache().is_none());
    }

    #[tokio::test]
    async fn empty_processor_list_is_rejected() {
        let mut draft = KernelDraft::default();
        let error = draft.apply(with_processors(Vec::new())).await.unwrap_err();
        assert!(matches!(
            error,
            KernelError::Validation {
                option: "with_processors",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn processor_list_attaches_every_item() {
        let log = EventLog::default();
        let first = TestProcessor::new("first", &log);
        let second = TestProcessor::new("second", &log);
        let mut draft = KernelDraft::default();
        draft
            .apply(with_processors([
                first.clone() as Arc<dyn Processor>,
                second.clone() as Arc<dyn Processor>,
            ]))
            .await
            .unwrap();

        assert_eq!(draft.processors.names(), vec!["first", "second"]);
        assert_eq!(first.init_count(), 1);
        assert_eq!(second.init_count(), 1);
    }

    #[tokio::test]
    async fn init_sees_capabilities_attached_before_it() {
        let log = EventLog::default();
        let processor = TestProcessor::new("observer", &log);
        let mut draft = KernelDraft::default();
        draft
            .apply(with_logger(Arc::new(RecordingLogger::default())))
            .await
            .unwrap();
        draft.apply(with_processor(processor.clone())).await.unwrap();
        draft.apply(with_name("late")).await.unwrap();

        let facade = processor.facade().unwrap();
        assert!(!facade.is_sealed());
        assert!(facade.logger().is_some());
        assert_eq!(facade.name(), DEFAULT_NAME);

        let sealed = draft.seal();
        assert!(facade.is_sealed());
        assert_eq!(facade.name(), "late");
        assert_eq!(facade.id(), &sealed.assembly.id);
    }

    #[tokio::test]
    async fn local_configuration_uses_the_current_name() -> anyhow::Result<()> {
        let root = unique_test_root("local-config");
        tokio::fs::create_dir_all(&root).await?;
        tokio::fs::write(root.join("orders.json"), r#"{"http":{"port":8080}}"#).await?;

        let mut draft = KernelDraft::default();
        draft.apply(with_name("orders")).await?;
        draft.apply(with_local_configuration([root.clone()])).await?;

        let configuration = draft.capabilities.configuration().unwrap();
        assert_eq!(
            configuration.get("http.port"),
            Some(serde_json::json!(8080))
        );

        let mut unnamed = KernelDraft::default();
        unnamed.apply(with_name("nothing-here")).await?;
        let error = unnamed
            .apply(with_local_configuration([root]))
            .await
            .unwrap_err();
        assert!(error.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn release_closes_processors_then_cache() {
        let log = EventLog::default();
        let logger = RecordingLogger::default();
        let mut draft = KernelDraft::default();
        draft.apply(with_cache(FakeCache::new(&log))).await.unwrap();
        draft
            .apply(with_processor(TestProcessor::new("a", &log)))
            .await
            .unwrap();

        draft.release(&logger).await;
        assert_eq!(
            log.entries(),
            vec!["cache.connect", "processor.a.init", "processor.a.close", "cache.close"]
        );
    }
}
