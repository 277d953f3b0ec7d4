//! # microbox-kernel: composition and lifecycle
//!
//! Assembles a microservice from capability adapters and processors, then
//! drives it through `Ready → Running → Stopping → Stopped`.
//!
//! ```no_run
//! # async fn demo() -> microbox_protocol::KernelResult<()> {
//! use std::sync::Arc;
//! use microbox_kernel::{Kernel, TracingLogger, with_logger, with_name};
//!
//! let kernel = Kernel::new([
//!     with_name("orders"),
//!     with_logger(Arc::new(TracingLogger::default())),
//! ])
//! .await?;
//! kernel.run().await
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`option`]: `KernelOption` and the `with_*` constructors
//! - [`lifecycle`]: `Kernel`, `LifecycleState`, run/stop
//! - [`processor`]: `Processor` trait and `ProcessorRegistry`
//! - [`facade`]: `KernelFacade`, `Capabilities`
//! - [`logger`]: `TracingLogger`, `LogLevel`
//! - [`config`]: `JsonConfiguration`

pub mod config;
pub mod facade;
pub mod lifecycle;
pub mod logger;
pub mod option;
pub mod processor;
mod shutdown;

#[cfg(test)]
mod testing;

pub use config::JsonConfiguration;
pub use facade::{Capabilities, KernelFacade};
pub use lifecycle::{Kernel, LifecycleState};
pub use logger::{LogLevel, TracingLogger};
pub use option::{
    Banner, DEFAULT_NAME, KernelOption, with_authn, with_authz, with_banner, with_broker,
    with_cache, with_client, with_configuration, with_id, with_local_configuration, with_logger,
    with_name, with_processor, with_processors, with_registry, with_signal_hook, with_store,
    with_transport,
};
pub use processor::{Processor, ProcessorRegistry};
