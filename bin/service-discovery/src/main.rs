use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use discovery_core::{
    shutdown_signal, DiscoveryConfig, LifecycleGuard, ServiceDiscovery, WatchEventKind,
};
use discovery_etcd::EtcdStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "service-discovery")]
#[command(about = "Register, resolve and watch services in a shared etcd namespace")]
struct Cli {
    /// YAML configuration file (environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register host:port under a service name until interrupted
    Register {
        name: String,
        /// Address to advertise, as host:port
        uri: String,
    },
    /// Resolve a service name to one endpoint
    Discover { name: String },
    /// Print every change to a service's address set until interrupted
    Watch { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = DiscoveryConfig::load(cli.config.as_deref())
        .context("failed to load discovery configuration")?;
    info!(
        "Using store {} with namespace {}",
        config.store_url, config.namespace
    );

    let store = Arc::new(EtcdStore::from_config(&config)?);
    let discovery = ServiceDiscovery::from_config(store, &config)?;

    match cli.command {
        Commands::Register { name, uri } => register(&discovery, &name, &uri).await,
        Commands::Discover { name } => discover(&discovery, &name).await,
        Commands::Watch { name } => watch(&discovery, &name).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn register(discovery: &ServiceDiscovery, name: &str, uri: &str) -> Result<()> {
    let handle = discovery
        .register(name, uri)
        .await
        .with_context(|| format!("failed to register {} at {}", name, uri))?;

    let mut guard = LifecycleGuard::new();
    guard.track(handle);
    info!("Holding registration of {} at {}, waiting for shutdown signal", name, uri);

    let report = guard.run_until(shutdown_signal()).await;
    if report.failed > 0 {
        warn!("{} registrations could not be removed", report.failed);
    }
    Ok(())
}

async fn discover(discovery: &ServiceDiscovery, name: &str) -> Result<()> {
    let endpoint = discovery.discover(name).await?;
    if endpoint.is_empty() {
        warn!("No endpoint registered for {}", name);
        std::process::exit(2);
    }
    println!("{}", endpoint);
    Ok(())
}

async fn watch(discovery: &ServiceDiscovery, name: &str) -> Result<()> {
    let id = discovery
        .watch(name, |event| match event.kind {
            WatchEventKind::Updated(record) => {
                println!("{} @{}: {}", event.name, event.version, record.uris().join(","));
            }
            WatchEventKind::Removed => {
                println!("{} @{}: <none>", event.name, event.version);
            }
            WatchEventKind::Malformed { raw, reason } => {
                error!("{} @{}: malformed record {:?}: {}", event.name, event.version, raw, reason);
            }
        })
        .await?;

    shutdown_signal().await;
    discovery.unwatch(&id);
    Ok(())
}
