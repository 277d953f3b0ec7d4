//! [`JsonConfiguration`] – a Configuration capability reading `<name>.json`.
//!
//! Lookup order for [`Configuration::open`]: `/etc/<name>/`, `$HOME/.<name>/`,
//! the caller's paths, then the working directory. The first `<name>.json`
//! found wins. Environment variables prefixed with the upper-cased name
//! (`orders` → `ORDERS_`) shadow file values: key `http.port` is read from
//! `ORDERS_HTTP_PORT`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use microbox_protocol::{Configuration, KernelError, KernelResult};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Fixed(BTreeMap<String, String>),
}

#[derive(Debug, Default)]
struct Loaded {
    source: Option<PathBuf>,
    values: Map<String, Value>,
}

#[derive(Debug)]
pub struct JsonConfiguration {
    name: String,
    env_prefix: String,
    env: EnvSource,
    loaded: RwLock<Loaded>,
}

impl JsonConfiguration {
    pub fn new(name: impl Into<String>) -> KernelResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(KernelError::validation(
                "configuration",
                "name cannot be empty",
            ));
        }
        let env_prefix = format!("{}_", name.to_ascii_uppercase().replace(['-', '.'], "_"));
        Ok(Self {
            name,
            env_prefix,
            env: EnvSource::Process,
            loaded: RwLock::new(Loaded::default()),
        })
    }

    /// In-memory configuration, already "open". Non-object values are ignored.
    pub fn from_value(name: impl Into<String>, value: Value) -> KernelResult<Self> {
        let configuration = Self::new(name)?;
        if let Value::Object(values) = value {
            configuration.loaded.write().values = values;
        }
        Ok(configuration)
    }

    /// Replace the process environment with a fixed variable set.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = EnvSource::Fixed(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name)
    }

    /// File the configuration was loaded from, if any.
    pub fn source(&self) -> Option<PathBuf> {
        self.loaded.read().source.clone()
    }

    pub fn search_paths(&self, extra: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(format!("/etc/{}/", self.name))];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(format!(".{}", self.name)));
        }
        paths.extend(extra.iter().cloned());
        paths.push(PathBuf::from("."));
        paths
    }

    /// Re-read the file found by the last `open`.
    #[instrument(skip(self), fields(name = %self.name))]
    pub async fn reload(&self) -> KernelResult<()> {
        let Some(source) = self.source() else {
            return Err(KernelError::InvalidState(format!(
                "configuration {} was never opened from a file",
                self.name
            )));
        };
        let values = read_object(&source).await?;
        self.loaded.write().values = values;
        debug!(source = %source.display(), "configuration reloaded");
        Ok(())
    }

    fn replace(&self, source: PathBuf, values: Map<String, Value>) {
        let mut loaded = self.loaded.write();
        loaded.values = values;
        loaded.source = Some(source);
    }

    fn env_var(&self, key: &str) -> Option<String> {
        let variable = format!(
            "{}{}",
            self.env_prefix,
            key.to_ascii_uppercase().replace(['.', '-'], "_")
        );
        match &self.env {
            EnvSource::Process => std::env::var(&variable).ok(),
            EnvSource::Fixed(vars) => vars.get(&variable).cloned(),
        }
    }

    fn lookup(values: &Map<String, Value>, key: &str) -> Option<Value> {
        let mut segments = key.split('.');
        let first = segments.next()?;
        let mut current = values.get(first)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }
}

async fn read_object(path: &Path) -> KernelResult<Map<String, Value>> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|error| KernelError::Io(format!("failed reading {path:?}: {error}")))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(values)) => Ok(values),
        Ok(_) => Err(KernelError::Serialization(format!(
            "{path:?} must contain a JSON object"
        ))),
        Err(error) => Err(KernelError::Serialization(format!(
            "failed parsing {path:?}: {error}"
        ))),
    }
}

#[async_trait]
impl Configuration for JsonConfiguration {
    #[instrument(skip(self, paths), fields(name = %self.name))]
    async fn open(&self, paths: &[PathBuf]) -> KernelResult<()> {
        let file_name = self.file_name();
        for directory in self.search_paths(paths) {
            let candidate = directory.join(&file_name);
            if !fs::try_exists(&candidate).await.unwrap_or(false) {
                continue;
            }
            let values = read_object(&candidate).await?;
            info!(source = %candidate.display(), keys = values.len(), "configuration loaded");
            self.replace(candidate, values);
            return Ok(());
        }
        Err(KernelError::NotFound(format!(
            "{file_name} not found in configuration search paths"
        )))
    }

    fn get(&self, key: &str) -> Option<Value> {
        if let Some(raw) = self.env_var(key) {
            return Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)));
        }
        Self::lookup(&self.loaded.read().values, key)
    }
}
