//! Application wiring: cache, shared context, listeners and workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{Cache, Options};
use crate::config::Config;
use crate::net::{self, Shared};
use crate::stats::Stats;
use crate::time;
use crate::workers::memmon::MemoryMonitor;
use crate::workers::sweeper::Sweeper;

pub struct App {
    shutdown_token: CancellationToken,
    cfg: Config,
    shared: Arc<Shared>,
}

impl App {
    /// Builds the cache and shared context and starts the maintenance
    /// workers.
    pub fn new(shutdown_token: CancellationToken, cfg: Config) -> Arc<App> {
        let stats = Arc::new(Stats::default());
        let evict_stats = stats.clone();
        let cache = Arc::new(Cache::new(Options {
            nshards: cfg.shards(),
            loadfactor: cfg.loadfactor(),
            seed: cfg.seed(),
            usecas: cfg.usecas(),
            nosixpack: cfg.nosixpack(),
            noevict: cfg.noevict(),
            allowshrink: cfg.allowshrink(),
            evicted: Some(Arc::new(move |_reason, _view| {
                evict_stats.evictions.fetch_add(1, Ordering::Relaxed);
            })),
        }));
        info!(
            component = "app",
            event = "cache_created",
            shards = cache.nshards(),
            usecas = cfg.usecas(),
            "cache engine ready"
        );

        let lowmem = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared {
            cache: cache.clone(),
            auth: cfg.auth_token(),
            lowmem: lowmem.clone(),
            stats,
            started_at: time::now_nanos(),
            maxconns: cfg.maxconns(),
            shutdown: shutdown_token.clone(),
        });

        let memlimit = cfg.memlimit();
        if memlimit > 0 {
            info!(
                component = "app",
                event = "memmon_enabled",
                limit = memlimit,
                "memory monitor enabled"
            );
            let monitor = MemoryMonitor::new(
                shutdown_token.clone(),
                lowmem,
                memlimit,
                cfg.memory_interval(),
            );
            tokio::task::spawn(monitor.run());
        }

        let sweeper = Sweeper::new(
            shutdown_token.clone(),
            cache,
            cfg.sweep_interval(),
            cfg.sweep_threshold(),
        );
        tokio::task::spawn(sweeper.run());

        Arc::new(App {
            shutdown_token,
            cfg,
            shared,
        })
    }

    pub fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Serves until shutdown.
    pub async fn serve(&self) -> Result<()> {
        net::server::serve(
            self.shared.clone(),
            &self.cfg.host(),
            self.cfg.port(),
            self.cfg.backlog(),
            self.cfg.unixsock().as_deref(),
        )
        .await
    }
}
