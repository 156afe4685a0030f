use async_trait::async_trait;
use crate::{CatalogEntry, IndexQuote, NewsQuery, PriceQuote, RawNewsItem, RawSentiment, SyncResult};

/// Backend-agnostic interface for every remote resource the sync engine reads.
///
/// Implemented by the HTTP client and by in-memory fakes in tests. Each method
/// performs exactly one request and normalizes the `{ success, data }` envelope
/// into a `SyncResult`; retries and rate limiting live above this trait.
#[async_trait]
pub trait MarketBackend: Send + Sync {
    // -- Catalog -------------------------------------------------------------
    async fn fetch_catalog(&self, auth_token: &str) -> SyncResult<Vec<CatalogEntry>>;

    async fn fetch_sectors(&self, auth_token: &str) -> SyncResult<Vec<String>>;

    // -- Prices --------------------------------------------------------------
    async fn fetch_price(&self, symbol: &str) -> SyncResult<PriceQuote>;

    async fn fetch_index_price(&self) -> SyncResult<IndexQuote>;

    // -- News & sentiment ----------------------------------------------------
    async fn fetch_news_page(
        &self,
        auth_token: &str,
        query: &NewsQuery,
    ) -> SyncResult<Vec<RawNewsItem>>;

    async fn fetch_aggregate_sentiment(&self) -> SyncResult<Vec<RawSentiment>>;

    // -- User ----------------------------------------------------------------
    async fn fetch_favorites(&self, auth_token: &str) -> SyncResult<Vec<String>>;

    // -- Meta ----------------------------------------------------------------
    fn backend_name(&self) -> &'static str;
}
