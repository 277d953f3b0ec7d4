//! Host termination-signal registration for a running kernel.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lifecycle::{Kernel, LifecycleState};

/// Kernel-owned signal registration, installed at most once per kernel.
///
/// The background task holds only a weak reference to the kernel and exits
/// without acting once the kernel leaves `Running` by any other path.
#[derive(Debug)]
pub(crate) struct ShutdownHook {
    enabled: bool,
    installed: AtomicBool,
}

impl ShutdownHook {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            installed: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Listen for the host's termination signals. Returns the hook task if
    /// this call installed it.
    pub(crate) fn install(&self, kernel: &Kernel) -> Option<JoinHandle<()>> {
        self.install_with(kernel, termination_signal())
    }

    /// Stop `kernel` when `trigger` resolves.
    pub(crate) fn install_with<S>(&self, kernel: &Kernel, trigger: S) -> Option<JoinHandle<()>>
    where
        S: Future<Output = io::Result<&'static str>> + Send + 'static,
    {
        if !self.enabled || self.installed.swap(true, Ordering::SeqCst) {
            return None;
        }

        let weak = kernel.downgrade();
        let mut state = kernel.subscribe_state();
        let released = async move {
            // The watch guard must not outlive this future.
            let _ = state
                .wait_for(|state| *state >= LifecycleState::Stopping)
                .await;
        };
        Some(tokio::spawn(async move {
            tokio::select! {
                signal = trigger => match signal {
                    Ok(name) => {
                        if let Some(kernel) = weak.upgrade() {
                            info!(signal = name, service_id = %kernel.id(), "termination signal received");
                            kernel.stop().await;
                        }
                    }
                    Err(error) => warn!(%error, "failed to listen for termination signals"),
                },
                () = released => {
                    debug!("shutdown hook released");
                }
            }
        }))
    }
}

#[cfg(unix)]
async fn termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "interrupt"),
        _ = terminate.recv() => Ok("terminate"),
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "interrupt")
}
