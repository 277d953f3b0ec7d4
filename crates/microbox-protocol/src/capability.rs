use std::fmt;

use serde::{Deserialize, Serialize};

/// One capability slot of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Logger,
    Configuration,
    Broker,
    Transport,
    Client,
    Cache,
    Registry,
    Store,
    AuthN,
    AuthZ,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 10] = [
        CapabilityKind::Logger,
        CapabilityKind::Configuration,
        CapabilityKind::Broker,
        CapabilityKind::Transport,
        CapabilityKind::Client,
        CapabilityKind::Cache,
        CapabilityKind::Registry,
        CapabilityKind::Store,
        CapabilityKind::AuthN,
        CapabilityKind::AuthZ,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logger => "logger",
            Self::Configuration => "configuration",
            Self::Broker => "broker",
            Self::Transport => "transport",
            Self::Client => "client",
            Self::Cache => "cache",
            Self::Registry => "registry",
            Self::Store => "store",
            Self::AuthN => "authn",
            Self::AuthZ => "authz",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
