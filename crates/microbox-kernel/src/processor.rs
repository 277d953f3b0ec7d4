//! Processors: caller-supplied domain logic plugged into a kernel.

use std::sync::Arc;

use async_trait::async_trait;
use microbox_protocol::{KernelError, KernelResult, Logger};
use serde_json::Value;
use tracing::debug;

use crate::facade::KernelFacade;

/// A unit of domain logic attached to a kernel.
///
/// `init` runs exactly once, synchronously, while the attaching option is
/// applied; an error aborts assembly. `close` runs during shutdown, in reverse
/// attachment order. Names must be unique within one kernel.
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;
    fn init(&self, kernel: KernelFacade) -> KernelResult<()>;
    async fn close(&self) -> KernelResult<()>;
    async fn process(&self, input: Value) -> KernelResult<Value>;
}

/// Attached processors in attachment order.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    /// Initialise `processor` and append it. Nothing is retained on failure.
    pub(crate) fn attach(
        &mut self,
        option: &'static str,
        processor: Arc<dyn Processor>,
        facade: KernelFacade,
    ) -> KernelResult<()> {
        let name = processor.name().to_owned();
        if name.trim().is_empty() {
            return Err(KernelError::validation(option, "processor name cannot be empty"));
        }
        if self.contains(&name) {
            return Err(KernelError::validation(
                option,
                format!("processor {name} is already attached"),
            ));
        }
        processor.init(facade)?;
        debug!(processor = %name, position = self.processors.len(), "processor attached");
        self.processors.push(processor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.iter().any(|processor| processor.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Processor>> {
        self.processors
            .iter()
            .find(|processor| processor.name() == name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|processor| processor.name().to_owned())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Processor>> {
        self.processors.iter()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Close every processor, last attached first. Failures are logged and
    /// do not stop the remaining closes.
    pub(crate) async fn close_all(&self, logger: &dyn Logger) -> usize {
        let mut failures = 0;
        for processor in self.processors.iter().rev() {
            match processor.close().await {
                Ok(()) => debug!(processor = %processor.name(), "processor closed"),
                Err(error) => {
                    failures += 1;
                    logger.error(&format!(
                        "processor {} failed to close: {error}",
                        processor.name()
                    ));
                }
            }
        }
        failures
    }
}
