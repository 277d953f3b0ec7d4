//! Capability ports.
//!
//! These traits are the only boundary between the kernel and concrete
//! capability adapters. The kernel holds each attached adapter as an
//! `Arc<dyn Port>` and never downcasts.
//!
//! Object-safety note:
//! - Traits use `async-trait` for async dyn-dispatch.
//! - Handler arguments are boxed closures (see [`crate::message`] and [`crate::http`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KernelResult;
use crate::http::{Method, ResponseHandler, RouteHandler};
use crate::message::MessageHandler;

/// Leveled logging sink.
///
/// None of the methods fail. `fatal` logs and then terminates the process.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn debug(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn fatal(&self, message: &str);
}

/// Key/value configuration source.
#[async_trait]
pub trait Configuration: Send + Sync {
    /// Load configuration, searching `paths` in addition to the adapter's own
    /// locations. Adapters may keep watching the source afterwards.
    async fn open(&self, paths: &[PathBuf]) -> KernelResult<()>;

    /// Unknown keys yield `None`, never an error.
    fn get(&self, key: &str) -> Option<Value>;

    fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }
}

/// Publish/subscribe messaging.
///
/// Handlers subscribed before `connect` are queued and bound at connect time.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> KernelResult<()>;
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> KernelResult<()>;
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> KernelResult<()>;
    async fn close(&self) -> KernelResult<()>;
}

/// Inbound request serving.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start serving in the background; returns once bound.
    async fn listen(&self) -> KernelResult<()>;
    async fn stop(&self) -> KernelResult<()>;

    fn route(&self, method: Method, path: &str, handler: RouteHandler) -> KernelResult<()>;
    fn serve_static(&self, path: &str, folder: &Path) -> KernelResult<()>;

    fn get(&self, path: &str, handler: RouteHandler) -> KernelResult<()> {
        self.route(Method::Get, path, handler)
    }

    fn post(&self, path: &str, handler: RouteHandler) -> KernelResult<()> {
        self.route(Method::Post, path, handler)
    }

    fn put(&self, path: &str, handler: RouteHandler) -> KernelResult<()> {
        self.route(Method::Put, path, handler)
    }

    fn delete(&self, path: &str, handler: RouteHandler) -> KernelResult<()> {
        self.route(Method::Delete, path, handler)
    }
}

/// Outbound requests built from parameters configured on the adapter.
#[async_trait]
pub trait Client: Send + Sync {
    async fn send(&self, method: Method, handler: ResponseHandler) -> KernelResult<()>;

    async fn get(&self, handler: ResponseHandler) -> KernelResult<()> {
        self.send(Method::Get, handler).await
    }

    async fn post(&self, handler: ResponseHandler) -> KernelResult<()> {
        self.send(Method::Post, handler).await
    }

    async fn put(&self, handler: ResponseHandler) -> KernelResult<()> {
        self.send(Method::Put, handler).await
    }

    async fn delete(&self, handler: ResponseHandler) -> KernelResult<()> {
        self.send(Method::Delete, handler).await
    }
}

/// Expiring key/value cache. Missing keys are `KernelError::NotFound`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn connect(&self) -> KernelResult<()>;
    async fn close(&self) -> KernelResult<()>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> KernelResult<()>;
    async fn get(&self, key: &str) -> KernelResult<Vec<u8>>;
    async fn keys(&self) -> KernelResult<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServiceEndpoint {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }
}

/// Service discovery.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Announce the running instance's address under its service name.
    async fn register(&self) -> KernelResult<()>;
    async fn deregister(&self, id: &str) -> KernelResult<()>;
    /// Endpoints for `service`, optionally filtered by tag. No match is `NotFound`.
    async fn lookup(&self, service: &str, tag: Option<&str>)
    -> KernelResult<Vec<ServiceEndpoint>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Top-level fields that must equal the given values.
    #[serde(default)]
    pub filter: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.filter.insert(name.into(), value);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub key: String,
    pub value: Value,
}

/// Namespaced document storage. `update` is create-or-replace.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create(&self, namespace: &str, key: &str, value: Value) -> KernelResult<()>;
    async fn read(&self, namespace: &str, key: &str) -> KernelResult<Value>;
    async fn update(&self, namespace: &str, key: &str, value: Value) -> KernelResult<()>;
    async fn delete(&self, namespace: &str, key: &str) -> KernelResult<()>;
    async fn list(&self, namespace: &str, query: &StoreQuery) -> KernelResult<Vec<String>>;
    async fn query(&self, namespace: &str, query: &StoreQuery) -> KernelResult<Vec<StoreRecord>>;
    async fn namespaces(&self) -> KernelResult<Vec<String>>;
}

/// A user account as returned by [`AuthN`]. Carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub groups: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Authentication. Credential mismatch is `KernelError::Unauthorized`.
#[async_trait]
pub trait AuthN: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> KernelResult<Account>;
    async fn logout(&self, username: &str) -> KernelResult<()>;
    async fn register(&self, username: &str, password: &str) -> KernelResult<Account>;
    async fn delete(&self, username: &str) -> KernelResult<()>;
    async fn reset(&self, username: &str, password: &str) -> KernelResult<Account>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub subject: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Token authorization.
///
/// `check_token` distinguishes `TokenExpired`, `TokenInvalid`, and `TokenRevoked`.
#[async_trait]
pub trait AuthZ: Send + Sync {
    async fn issue_token(&self, subject: &str) -> KernelResult<String>;
    async fn refresh_token(&self, token: &str) -> KernelResult<String>;
    async fn revoke_token(&self, token: &str) -> KernelResult<()>;
    async fn check_token(&self, token: &str) -> KernelResult<TokenClaims>;
}
