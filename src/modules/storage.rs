//! Pluggable persistence for the stats snapshot.
//!
//! Local JSON file by default; a remote key-value store when `REDIS_URL`
//! is configured. The file write is atomic (temp file + rename) so a crash
//! mid-save never truncates the previous snapshot.

use std::path::PathBuf;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::RequestStats;

const STATS_REDIS_KEY: &str = "grazie-relay:stats";

#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn save(&self, stats: &RequestStats) -> AppResult<()>;
    async fn load(&self) -> AppResult<RequestStats>;
}

// ─── File-backed store ──────────────────────────────────────────────────────

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl StatsStore for FileStore {
    async fn save(&self, stats: &RequestStats) -> AppResult<()> {
        let data = serde_json::to_vec_pretty(stats)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> AppResult<RequestStats> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(RequestStats::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ─── Redis-backed store ─────────────────────────────────────────────────────

pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Unknown(format!("invalid redis url: {}", e)))?;
        // Probe the connection once so a bad URL fails at startup.
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Unknown(format!("redis connect failed: {}", e)))?;
        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Unknown(format!("redis ping failed: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatsStore for RedisStore {
    async fn save(&self, stats: &RequestStats) -> AppResult<()> {
        let data = serde_json::to_string(stats)?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Unknown(format!("redis connect failed: {}", e)))?;
        conn.set::<_, _, ()>(STATS_REDIS_KEY, data)
            .await
            .map_err(|e| AppError::Unknown(format!("redis set failed: {}", e)))?;
        Ok(())
    }

    async fn load(&self) -> AppResult<RequestStats> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Unknown(format!("redis connect failed: {}", e)))?;
        let raw: Option<String> = conn
            .get(STATS_REDIS_KEY)
            .await
            .map_err(|e| AppError::Unknown(format!("redis get failed: {}", e)))?;
        match raw {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Ok(RequestStats::default()),
        }
    }
}

/// Pick the store from configuration. A dead Redis falls back to the file
/// store so a missing cache never blocks startup.
pub async fn init_store(redis_url: Option<&str>, stats_path: PathBuf) -> Box<dyn StatsStore> {
    if let Some(url) = redis_url {
        match RedisStore::connect(url).await {
            Ok(store) => {
                info!("Using Redis stats storage");
                return Box::new(store);
            }
            Err(e) => {
                warn!("Redis storage unavailable ({}), falling back to file", e);
            }
        }
    }
    info!("Using file stats storage at {:?}", stats_path);
    Box::new(FileStore::new(stats_path))
}
