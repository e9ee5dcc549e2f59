// Main entrypoint for the hotcache server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hotcache::app::App;
use hotcache::config::Config;
use hotcache::shutdown::GracefulShutdown;
use hotcache::time;

const CONFIG_PATH: &str = "cfg/hotcache.cfg.yaml";
const CONFIG_PATH_LOCAL: &str = "cfg/hotcache.cfg.local.yaml";

/// hotcache - high-throughput multi-protocol in-memory cache server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,

    /// Listen host override
    #[arg(long)]
    host: Option<String>,

    /// Listen port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Unix socket path override
    #[arg(short = 's', long)]
    unixsock: Option<String>,

    /// Runtime worker threads override (0 = all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Shard count override
    #[arg(long)]
    shards: Option<usize>,

    /// RSS budget override (e.g. "512mb", "80%")
    #[arg(long)]
    maxmemory: Option<String>,

    /// Require this auth token
    #[arg(long)]
    auth: Option<String>,
}

/// Loads the YAML config: a custom path, the local file, the default
/// file, or built-in defaults, in that order.
fn load_cfg(path: Option<&PathBuf>) -> Result<Config> {
    if let Some(custom_path) = path {
        let cfg = Config::load(custom_path)
            .with_context(|| format!("failed to load custom config from {:?}", custom_path))?;
        return Ok(cfg);
    }
    if let Ok(cfg) = Config::load(CONFIG_PATH_LOCAL) {
        return Ok(cfg);
    }
    if let Ok(cfg) = Config::load(CONFIG_PATH) {
        return Ok(cfg);
    }
    Ok(Config::default())
}

/// Applies command-line overrides on top of the file config.
fn apply_overrides(cfg: &mut Config, args: &Args) {
    let server = cfg.cache.server.get_or_insert_with(|| {
        hotcache::config::Server {
            host: None,
            port: None,
            unixsock: None,
            threads: None,
            backlog: None,
            maxconns: None,
        }
    });
    if let Some(host) = &args.host {
        server.host = Some(host.clone());
    }
    if let Some(port) = args.port {
        server.port = Some(port);
    }
    if let Some(unixsock) = &args.unixsock {
        server.unixsock = Some(unixsock.clone());
    }
    if let Some(threads) = args.threads {
        server.threads = Some(threads);
    }
    if let Some(shards) = args.shards {
        cfg.cache
            .storage
            .get_or_insert_with(|| hotcache::config::Storage {
                shards: None,
                loadfactor: None,
                usecas: None,
                nosixpack: None,
                noevict: None,
                allowshrink: None,
                seed: None,
            })
            .shards = Some(shards);
    }
    if let Some(maxmemory) = &args.maxmemory {
        cfg.cache
            .limits
            .get_or_insert_with(|| hotcache::config::Limits { maxmemory: None })
            .maxmemory = Some(maxmemory.clone());
    }
    if let Some(auth) = &args.auth {
        cfg.cache
            .auth
            .get_or_insert_with(|| hotcache::config::Auth { token: None })
            .token = Some(auth.clone());
    }
}

/// Configures structured logging from the loaded config.
fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level()));

    if cfg.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = load_cfg(args.cfg.as_ref())?;
    apply_overrides(&mut cfg, &args);
    configure_logger(&cfg);

    let threads = cfg.threads();
    info!(
        component = "main",
        event = "runtime_configured",
        threads = threads,
        "starting runtime"
    );

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?
        .block_on(async_main(cfg))
}

async fn async_main(cfg: Config) -> Result<()> {
    let shutdown_token = CancellationToken::new();

    // Keep timestamp reads cheap on the hot path.
    let _clock_token = time::start(Duration::from_millis(1));

    let graceful = Arc::new(GracefulShutdown::new(
        shutdown_token.clone(),
        Duration::from_secs(30),
    ));

    let app = App::new(shutdown_token.clone(), cfg);
    graceful.add(1);

    let app_clone = app.clone();
    let graceful_clone = graceful.clone();
    tokio::task::spawn(async move {
        if let Err(e) = app_clone.serve().await {
            error!(
                component = "main",
                scope = "app",
                event = "serve_failed",
                error = %e,
                "failed to serve"
            );
            // Listener failures are fatal; bring the process down.
            app_clone.shutdown_token().cancel();
        }
        graceful_clone.done();
    });

    if let Err(e) = graceful.await_shutdown().await {
        warn!(
            component = "main",
            event = "graceful_shutdown_failed",
            error = %e,
            "service did not shut down cleanly"
        );
        return Err(e);
    }
    Ok(())
}
