//! [`TracingLogger`] – the Logger capability backed by `tracing`.

use std::fmt;
use std::str::FromStr;

use microbox_protocol::{KernelError, KernelResult, Logger};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = KernelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "" => Err(KernelError::validation(
                "log_level",
                "level cannot be empty, use info, warn, error, fatal or debug",
            )),
            other => Err(KernelError::validation(
                "log_level",
                format!("unknown level {other:?}, use info, warn, error, fatal or debug"),
            )),
        }
    }
}

/// Forwards every message to `tracing` at the matching level, dropping
/// messages below the configured minimum.
///
/// `fatal` is never filtered; it logs at error level and exits the process
/// with status 1.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    level: LogLevel,
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: &str) -> KernelResult<Self> {
        Ok(Self {
            level: level.parse()?,
        })
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.level
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        if self.enabled(LogLevel::Info) {
            info!("{message}");
        }
    }

    fn debug(&self, message: &str) {
        if self.enabled(LogLevel::Debug) {
            debug!("{message}");
        }
    }

    fn warn(&self, message: &str) {
        if self.enabled(LogLevel::Warn) {
            warn!("{message}");
        }
    }

    fn error(&self, message: &str) {
        if self.enabled(LogLevel::Error) {
            error!("{message}");
        }
    }

    fn fatal(&self, message: &str) {
        error!(fatal = true, "{message}");
        std::process::exit(1);
    }
}
