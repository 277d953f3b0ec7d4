mod echo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use microbox_events::MemoryBroker;
use microbox_kernel::{
    Banner, JsonConfiguration, Kernel, KernelOption, LifecycleState, TracingLogger, with_authn,
    with_authz, with_banner, with_broker, with_cache, with_client, with_configuration,
    with_logger, with_name, with_processor, with_registry, with_store, with_transport,
};
use microbox_memory::{CatalogRegistry, MemoryCache, MemoryStore, ServiceCatalog};
use microbox_policy::{MemoryAuthN, TokenAuthZ};
use microbox_protocol::{Configuration, KernelResult, Response, ServiceEndpoint, message_handler};
use microbox_transport::{LocalClient, LocalTransport};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "microboxd")]
#[command(about = "microbox kernel demo daemon")]
struct Cli {
    #[arg(long, default_value = "microbox")]
    name: String,
    /// Extra directories searched for `<name>.json`.
    #[arg(long = "config")]
    config: Vec<PathBuf>,
    #[arg(long)]
    banner: Option<PathBuf>,
    /// Overrides `log_level` from configuration.
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    json_logs: bool,
}

async fn load_configuration(cli: &Cli) -> Result<JsonConfiguration> {
    let configuration = JsonConfiguration::new(cli.name.clone())?;
    match configuration.open(&cli.config).await {
        Ok(()) => Ok(configuration),
        Err(error) if error.is_not_found() => {
            eprintln!("{error}; continuing with defaults");
            Ok(configuration)
        }
        Err(error) => Err(error.into()),
    }
}

fn string_setting(configuration: &JsonConfiguration, key: &str) -> Option<String> {
    configuration
        .get(key)
        .and_then(|value| value.as_str().map(str::to_owned))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let configuration = Arc::new(load_configuration(&cli).await?);

    let level = cli
        .log_level
        .clone()
        .or_else(|| string_setting(&configuration, "log_level"))
        .unwrap_or_else(|| "info".to_owned());
    let logger = TracingLogger::with_level(&level)?;
    let filter = match logger.level().as_str() {
        "fatal" => "error",
        other => other,
    };
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }

    let port = configuration
        .get_or("http.port", serde_json::json!(8080))
        .as_u64()
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(8080);
    let endpoint = ServiceEndpoint {
        id: format!("{}-{}", cli.name, std::process::id()),
        name: cli.name.clone(),
        address: "127.0.0.1".to_owned(),
        port,
        tags: vec![env!("CARGO_PKG_VERSION").to_owned()],
    };

    let transport = LocalTransport::new(cli.name.clone());
    let catalog = ServiceCatalog::new();
    let mut options: Vec<KernelOption> = vec![
        with_name(cli.name.clone()),
        with_logger(Arc::new(logger)),
        with_configuration(configuration.clone()),
    ];
    if let Some(path) = &cli.banner {
        options.push(with_banner(Banner::File(path.clone())));
    } else if let Some(text) = string_setting(&configuration, "banner") {
        options.push(with_banner(Banner::Text(text)));
    }
    options.extend([
        with_broker(Arc::new(MemoryBroker::default())),
        with_transport(Arc::new(transport.clone())),
        with_client(Arc::new(LocalClient::new(transport.handle(), "/health"))),
        with_registry(Arc::new(CatalogRegistry::new(catalog.clone(), endpoint)?)),
        with_cache(Arc::new(MemoryCache::new())),
        with_store(Arc::new(MemoryStore::new())),
        with_authn(Arc::new(MemoryAuthN::default())),
        with_authz(Arc::new(TokenAuthZ::default())),
        with_processor(echo::Echo::shared()),
    ]);

    let kernel = Kernel::new(options).await?;
    info!(service_id = %kernel.id(), name = %kernel.name(), "kernel assembled");

    if let Some(broker) = kernel.broker() {
        broker
            .subscribe(
                echo::TOPIC,
                message_handler(|message| async move {
                    info!(topic = %message.topic, payload = %message.text(), "echo relayed");
                }),
            )
            .await?;
    }

    let probe = tokio::spawn({
        let kernel = kernel.clone();
        async move {
            let mut state = kernel.subscribe_state();
            if state
                .wait_for(|state| *state == LifecycleState::Running)
                .await
                .is_err()
            {
                return;
            }
            let Some(client) = kernel.client() else {
                return;
            };
            let result = client
                .get(Box::new(|response: Response| -> KernelResult<()> {
                    info!(status = response.status, body = %response.text(), "health probe");
                    Ok(())
                }))
                .await;
            if let Err(error) = result {
                warn!(%error, "health probe failed");
            }
        }
    });

    kernel.run().await?;
    probe.abort();
    info!(endpoints = catalog.len().await, "daemon exiting");
    Ok(())
}
