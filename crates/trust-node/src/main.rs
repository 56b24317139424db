#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use trust_indexer::{spawn_supervised, ContractPoller, DocumentStore, PollerHandle};
use trust_node::{build_router, load_config, ApiState, NodeConfig, Overrides};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Trust registry node")]
struct Settings {
    /// TOML file with the `[[contracts]]` to track.
    #[arg(long, env = "TRUST_CONFIG", default_value = "contracts.toml")]
    config: PathBuf,
    #[arg(long, env = "KUPO_API_PROTOCOL")]
    kupo_protocol: Option<String>,
    #[arg(long, env = "KUPO_API_HOST")]
    kupo_host: Option<String>,
    #[arg(long, env = "KUPO_API_PORT")]
    kupo_port: Option<u16>,
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[arg(long, env = "POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,
    #[arg(long, env = "LISTEN_ADDR")]
    listen_addr: Option<String>,
    #[arg(long, env = "CACHE_TTL_SECS")]
    cache_ttl_secs: Option<u64>,
    /// `json` or `compact`.
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Poll every contract and serve the Read API (default).
    Run,
    /// Poll every contract without serving.
    Index,
    /// Serve already published documents without polling.
    Serve,
    /// Run one cycle per contract and exit.
    Once,
}

impl Settings {
    fn overrides(&self) -> Overrides {
        Overrides {
            kupo_protocol: self.kupo_protocol.clone(),
            kupo_host: self.kupo_host.clone(),
            kupo_port: self.kupo_port,
            data_dir: self.data_dir.clone(),
            poll_interval_secs: self.poll_interval_secs,
            listen_addr: self.listen_addr.clone(),
            cache_ttl_secs: self.cache_ttl_secs,
            log_format: self.log_format.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %format!("{err:#}"), "node terminated with error");
        eprintln!("trust-node: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::parse();

    let mut cfg = load_config(&settings.config)?;
    cfg.apply(settings.overrides());
    cfg.validate()?;
    init_logging(&cfg);

    let command = settings.command.unwrap_or(Command::Run);
    info!(
        config = %settings.config.display(),
        command = ?command,
        contracts = cfg.contracts.len(),
        "starting trust-node"
    );

    let store = DocumentStore::open(cfg.storage.data_dir.clone())?;
    trust_indexer::metrics::init();

    match command {
        Command::Run => {
            let workers = spawn_workers(&cfg, &store)?;
            let result = serve(&cfg, store, workers.clone()).await;
            stop_workers(&workers);
            result
        }
        Command::Index => {
            let workers = spawn_workers(&cfg, &store)?;
            shutdown_signal().await;
            stop_workers(&workers);
            Ok(())
        }
        Command::Serve => serve(&cfg, store, Vec::new()).await,
        Command::Once => run_once(&cfg, &store).await,
    }
}

fn init_logging(cfg: &NodeConfig) {
    // RUST_LOG, when set, wins over logging.level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.as_str()));

    if cfg.logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn pollers(cfg: &NodeConfig, store: &DocumentStore) -> anyhow::Result<Vec<ContractPoller>> {
    info!(kupo = %cfg.kupo.client_config().base_url, "using kupo chain index");
    Ok(cfg.pollers(store)?)
}

fn spawn_workers(cfg: &NodeConfig, store: &DocumentStore) -> anyhow::Result<Vec<PollerHandle>> {
    let handles: Vec<PollerHandle> = pollers(cfg, store)?
        .into_iter()
        .map(spawn_supervised)
        .collect();
    info!(
        workers = handles.len(),
        interval_secs = cfg.poller.interval_secs,
        "pollers started"
    );
    Ok(handles)
}

fn stop_workers(workers: &[PollerHandle]) {
    for handle in workers {
        handle.shutdown();
    }
}

async fn run_once(cfg: &NodeConfig, store: &DocumentStore) -> anyhow::Result<()> {
    let mut failed = Vec::new();
    for poller in pollers(cfg, store)? {
        if poller.run_once().await.is_err() {
            failed.push(poller.contract().name.clone());
        }
    }
    if !failed.is_empty() {
        bail!("cycle failed for: {}", failed.join(", "));
    }
    Ok(())
}

async fn serve(
    cfg: &NodeConfig,
    store: DocumentStore,
    workers: Vec<PollerHandle>,
) -> anyhow::Result<()> {
    let state = ApiState::new(store, cfg.contract_names(), cfg.server.cache_ttl())
        .with_workers(workers);
    let app = build_router(state);

    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen addr {}", cfg.server.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
