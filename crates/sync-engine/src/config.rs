use market_core::{SortOrder, SyncError, SyncResult};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    // Cache lifetimes
    pub stocks_ttl: Duration,    // 2 min
    pub index_ttl: Duration,     // 2 min
    pub news_ttl: Duration,      // 5 min
    pub sentiment_ttl: Duration, // 3 min

    // Whole-resource retry
    pub retry_attempts: u32,   // 3 total (1 + 2 retries)
    pub retry_delay: Duration, // 1s between attempts

    // Per-symbol enrichment pacing
    pub item_delay: Duration, // 100ms before every request but the first

    /// Screen-focus triggers inside this window after the last one are ignored
    pub focus_cooldown: Duration,

    // News paging
    pub news_page_size: u32,
    pub news_sort_field: String,
    pub news_sort_order: SortOrder,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stocks_ttl: Duration::from_millis(120_000),
            index_ttl: Duration::from_millis(120_000),
            news_ttl: Duration::from_millis(300_000),
            sentiment_ttl: Duration::from_millis(180_000),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
            item_delay: Duration::from_millis(100),
            focus_cooldown: Duration::from_millis(30_000),
            news_page_size: 20,
            news_sort_field: "publishedAt".to_string(),
            news_sort_order: SortOrder::Desc,
        }
    }
}

impl SyncConfig {
    /// Build from `SYNC_*` environment variables, falling back to defaults.
    pub fn from_env() -> SyncResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            stocks_ttl: env_millis("SYNC_STOCKS_TTL_MS", defaults.stocks_ttl)?,
            index_ttl: env_millis("SYNC_INDEX_TTL_MS", defaults.index_ttl)?,
            news_ttl: env_millis("SYNC_NEWS_TTL_MS", defaults.news_ttl)?,
            sentiment_ttl: env_millis("SYNC_SENTIMENT_TTL_MS", defaults.sentiment_ttl)?,
            retry_attempts: env_or("SYNC_RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_delay: env_millis("SYNC_RETRY_DELAY_MS", defaults.retry_delay)?,
            item_delay: env_millis("SYNC_ITEM_DELAY_MS", defaults.item_delay)?,
            focus_cooldown: env_millis("SYNC_FOCUS_COOLDOWN_MS", defaults.focus_cooldown)?,
            news_page_size: env_or("SYNC_NEWS_PAGE_SIZE", defaults.news_page_size)?,
            news_sort_field: defaults.news_sort_field,
            news_sort_order: defaults.news_sort_order,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.retry_attempts == 0 {
            return Err(SyncError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.news_page_size == 0 {
            return Err(SyncError::Config(
                "news_page_size must be at least 1".to_string(),
            ));
        }
        if self.news_sort_field.trim().is_empty() {
            return Err(SyncError::Config("news_sort_field is empty".to_string()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> SyncResult<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SyncError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> SyncResult<Duration> {
    env_or(key, default.as_millis() as u64).map(Duration::from_millis)
}
