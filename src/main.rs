mod auth;
mod constants;
mod error;
mod models;
mod modules;
mod proxy;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::GrazieAuthClient;
use crate::modules::cache::TtlLruCache;
use crate::modules::stats::StatsRegistry;
use crate::modules::storage::{self, StatsStore};
use crate::proxy::http_client::{build_http_client, HttpClientConfig};
use crate::proxy::server::AppState;
use crate::proxy::{AccountPool, ModelRegistry, ProxyConfig};

#[tokio::main]
async fn main() {
    modules::logger::init_logger();

    let config = Arc::new(ProxyConfig::from_env());
    let accounts = ProxyConfig::load_accounts_from_env();
    let registry = Arc::new(ModelRegistry::load(&config.models_path));

    let http = match build_http_client(&HttpClientConfig::default()) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let auth_client = GrazieAuthClient::new(http.clone(), config.upstream_base.clone());
    let pool = Arc::new(AccountPool::new(accounts, auth_client));

    let store: Arc<dyn StatsStore> = Arc::from(
        storage::init_store(config.redis_url.as_deref(), config.stats_path.clone()).await,
    );
    let initial_stats = match store.load().await {
        Ok(stats) => {
            info!(
                "Loaded {} request record(s) from stats storage",
                stats.request_history.len()
            );
            stats
        }
        Err(e) => {
            warn!("Failed to load stats snapshot: {}", e);
            Default::default()
        }
    };
    let stats = Arc::new(StatsRegistry::new(initial_stats));

    let message_cache = Arc::new(TtlLruCache::new(constants::CACHE_CAPACITY));
    let tools_cache = Arc::new(TtlLruCache::new(constants::CACHE_CAPACITY));

    let cancel = CancellationToken::new();
    let _message_sweeper = message_cache.start_sweeper(cancel.child_token());
    let _tools_sweeper = tools_cache.start_sweeper(cancel.child_token());

    // Periodic stats persistence; final flush happens on shutdown.
    {
        let stats = Arc::clone(&stats);
        let store = Arc::clone(&store);
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                constants::STATS_SAVE_INTERVAL_SECS,
            ));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let snapshot = stats.snapshot();
                        if let Err(e) = store.save(&snapshot).await {
                            error!("Error saving stats: {}", e);
                        }
                    }
                }
            }
        });
    }

    let state = AppState {
        config: Arc::clone(&config),
        registry,
        pool,
        stats: Arc::clone(&stats),
        message_cache,
        tools_cache,
        http,
    };

    info!("Starting grazie-relay on port {}", config.port);

    let shutdown = cancel.child_token();
    let server = tokio::spawn(proxy::server::run(state, shutdown));

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down");
    cancel.cancel();

    if let Err(e) = store.save(&stats.snapshot()).await {
        error!("Error saving stats on shutdown: {}", e);
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server error: {}", e),
        Err(e) => error!("Server task panicked: {}", e),
    }
}
