use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use cellgate::CacheStoreBuilder;
use cellgate_moka::MokaBackend;
use cellgate_server::{Config, Gateway, GatewayStore, HttpUpstream, LogFormat, serve};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Caching, auth-delegating HTTP edge gateway.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "CELLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `listen`.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Overrides `upstream.url`.
    #[arg(long)]
    upstream: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(upstream) = &args.upstream {
        config.upstream.url = upstream.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config);

    let backend = MokaBackend::builder(config.cache.max_size.as_u64()).build();
    let store: GatewayStore = CacheStoreBuilder::new(backend)
        .policy(config.cache.ttl_policy())
        .offload(config.cache.offload_config())
        .build();
    let upstream = HttpUpstream::new(config.upstream_uri()?, &config.upstream);
    let gateway = Gateway::from_config(&config, store, upstream)?;

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(
        listen = %config.listen,
        upstream = %config.upstream.url,
        mount = config.server.mount_service.as_deref().unwrap_or("-"),
        "cellgate listening"
    );

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };
    serve(listener, gateway, shutdown, config.server.shutdown_timeout).await;
    Ok(())
}
