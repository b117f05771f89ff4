use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::{Clock, RequestCache, DEFAULT_TTL_HOURS};
use crate::discovery::{self, DiscoveryQuery};
use crate::error::AppError;
use crate::fetcher::{CachedFetcher, Transport};
use crate::mirror::MirrorStore;
use crate::models::DiscoveryResult;
use crate::registry::{FetchMode, PeeringDb};
use crate::settings::SettingsStore;
use crate::sync::Syncer;

/// Application configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind_address: String,
    /// Cron expression for the scheduled mirror sync.
    pub refresh_cron: String,
    pub peeringdb_api_key: Option<String>,
    pub peeringdb_base_url: String,
    /// IRR Explorer API used for AS-SET expansion.
    pub irr_base_url: String,
    /// Where the mirror snapshot is persisted.
    pub mirror_path: String,
    pub settings_path: String,
    /// Mirror age after which a startup sync is due.
    pub mirror_max_age_hours: i64,
    pub cache_ttl_hours: i64,
    pub request_timeout_secs: u64,
}

impl Config {
    /// Creates Config from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8201".into()),
            refresh_cron: env::var("REFRESH_CRON").unwrap_or_else(|_| "0 0 0 * * *".into()),
            peeringdb_api_key: env::var("PEERINGDB_API_KEY").ok().filter(|k| !k.is_empty()),
            peeringdb_base_url: env::var("PEERINGDB_BASE_URL")
                .unwrap_or_else(|_| "https://www.peeringdb.com/api".into()),
            irr_base_url: env::var("IRR_BASE_URL")
                .unwrap_or_else(|_| "https://irrexplorer.nlnog.net/api".into()),
            mirror_path: env::var("PEERINGDB_DB_PATH")
                .unwrap_or_else(|_| "data/peeringdb/mirror.json".into()),
            settings_path: env::var("CONFIG_FILE").unwrap_or_else(|_| "config.json".into()),
            mirror_max_age_hours: parse_env("MIRROR_MAX_AGE_HOURS", 24),
            cache_ttl_hours: parse_env("REQUEST_CACHE_TTL_HOURS", DEFAULT_TTL_HOURS),
            request_timeout_secs: parse_env("PEERINGDB_TIMEOUT_SECS", 30),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_env<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Shared application state passed to all request handlers.
pub struct AppState<T> {
    pub config: Config,
    pub settings: Arc<SettingsStore>,
    pub mirror: Arc<MirrorStore>,
    pub fetcher: Arc<CachedFetcher<T>>,
    /// Registry reads that may be served from the request cache.
    pub registry: PeeringDb<T>,
    pub syncer: Syncer<T>,
}

impl<T: Transport> AppState<T> {
    pub async fn new(config: Config, transport: T, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let settings = Arc::new(SettingsStore::open(&config.settings_path)?);
        let mirror = Arc::new(MirrorStore::open(&config.mirror_path).await);

        let cache = RequestCache::new(chrono::Duration::hours(config.cache_ttl_hours), clock.clone());
        let fetcher = Arc::new(CachedFetcher::new(transport, cache));

        let registry = PeeringDb::new(fetcher.clone(), &config.peeringdb_base_url, FetchMode::Cached);
        let syncer = Syncer::new(
            PeeringDb::new(fetcher.clone(), &config.peeringdb_base_url, FetchMode::Live),
            mirror.clone(),
            settings.clone(),
            clock,
            chrono::Duration::hours(config.mirror_max_age_hours),
        );

        Ok(Self {
            config,
            settings,
            mirror,
            fetcher,
            registry,
            syncer,
        })
    }

    /// Discovery against the mirror. Before the first sync a facility query
    /// goes to the registry through the request cache instead.
    pub async fn discover(&self, query: &DiscoveryQuery) -> Result<Vec<DiscoveryResult>, AppError> {
        let mirror = self.mirror.snapshot().await;
        if mirror.synced_at.is_none() {
            if let Some(fac_id) = query.fac_id {
                return Ok(discovery::discover_live(&self.registry, fac_id, query.category).await?);
            }
        }
        Ok(discovery::discover(&mirror, &self.settings.get(), query))
    }
}
