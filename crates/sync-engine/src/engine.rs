use market_core::{
    EnrichedStock, IndexQuote, MarketBackend, NewsItem, NewsQuery, SentimentRecord, SyncError,
    SyncResult,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::cache::{CacheManager, Clock, ResourceKind, SystemClock};
use crate::config::SyncConfig;
use crate::news::{merge_pages, normalize_page, NewsState};
use crate::pipeline::{requires_auth, FetchPipeline};
use crate::reconciler::{FavoriteReconciler, ReconcileOutcome, ReconcilePhase, ReconcileReport};
use crate::sentiment::{effective_sentiment, index_sentiment, EffectiveSentiment, SentimentSummary};

/// Why a reconciliation was requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Login or token refresh; favorites are re-read from the backend
    AuthChanged,
    /// Dashboard came back into view; rate limited by the focus cooldown
    ScreenFocus,
    /// The host changed favorites itself and passes the new list
    FavoritesMutated(Vec<String>),
}

/// Result of a TTL-gated refresh of one resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    /// Cache entry still fresh, nothing fetched
    Fresh,
    Refreshed,
    /// All attempts failed; the resource now reports no data
    Failed,
    /// Another writer held the resource; try again on the next trigger
    Busy,
}

/// Client-side market data sync engine.
///
/// Owns the displayed favorites, the news feed, aggregate sentiment and the
/// index quote for one authenticated session. Every accessor returns a
/// snapshot, so readers never observe a half-applied update.
pub struct SyncEngine {
    backend: Arc<dyn MarketBackend>,
    config: SyncConfig,
    pipeline: FetchPipeline,
    cache: Arc<CacheManager>,
    clock: Arc<dyn Clock>,
    reconciler: FavoriteReconciler,
    news: RwLock<NewsState>,
    /// Serializes news page loads so page numbers stay consistent
    news_gate: Mutex<()>,
    sentiment: RwLock<Arc<HashMap<String, SentimentRecord>>>,
    index: RwLock<Option<IndexQuote>>,
    last_focus_millis: Mutex<Option<i64>>,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn MarketBackend>, config: SyncConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        backend: Arc<dyn MarketBackend>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pipeline = FetchPipeline::from_config(&config);
        let cache = Arc::new(CacheManager::new(&config));
        let reconciler = FavoriteReconciler::new(
            backend.clone(),
            pipeline.clone(),
            cache.clone(),
            clock.clone(),
        );

        tracing::info!("Sync engine ready (backend: {})", backend.backend_name());

        Self {
            backend,
            config,
            pipeline,
            cache,
            clock,
            reconciler,
            news: RwLock::new(NewsState::NotLoaded),
            news_gate: Mutex::new(()),
            sentiment: RwLock::new(Arc::new(HashMap::new())),
            index: RwLock::new(None),
            last_focus_millis: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> ReconcilePhase {
        self.reconciler.phase()
    }

    /// Whether `kind` is due for a refresh right now.
    pub fn needs_refresh(&self, kind: ResourceKind) -> bool {
        self.cache.should_refresh(kind, self.clock.now_millis())
    }

    // -- Favorites -----------------------------------------------------------

    /// Reconcile the displayed stocks against `current`.
    ///
    /// A missing token, or one the backend rejects, clears the session and
    /// returns [`SyncError::Unauthenticated`] so the host can send the user
    /// back to login. Every other failure is absorbed into the report.
    pub async fn reconcile(
        &self,
        current: &[String],
        auth_token: Option<&str>,
    ) -> SyncResult<ReconcileReport> {
        let token = self.session_token(auth_token).await?;
        let result = self.reconciler.reconcile(current, token).await;
        self.on_auth_failure(result).await
    }

    pub async fn handle_trigger(
        &self,
        trigger: Trigger,
        auth_token: Option<&str>,
    ) -> SyncResult<ReconcileReport> {
        let token = self.session_token(auth_token).await?;
        let is_focus = trigger == Trigger::ScreenFocus;

        if is_focus && !self.claim_focus_window().await {
            tracing::debug!("Screen focus inside cooldown, skipping");
            return Ok(ReconcileReport::new(ReconcileOutcome::Skipped));
        }

        let favorites = match trigger {
            Trigger::FavoritesMutated(list) => list,
            Trigger::AuthChanged | Trigger::ScreenFocus => {
                let backend = &self.backend;
                let fetched = self
                    .pipeline
                    .fetch_with_retry("favorites", || backend.fetch_favorites(token))
                    .await;
                match fetched {
                    Ok(list) => list,
                    Err(e) if requires_auth(&e) => {
                        self.clear_session().await;
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!("Favorites unavailable, keeping current view: {}", e);
                        return Ok(ReconcileReport::new(ReconcileOutcome::FavoritesUnavailable));
                    }
                }
            }
        };

        let report = self.reconcile(&favorites, Some(token)).await?;

        if is_focus {
            let (news, sentiment, index, prices) = tokio::join!(
                self.refresh_news(Some(token)),
                self.refresh_sentiment(),
                self.refresh_index(),
                self.refresh_prices_except(token, &report.enriched),
            );
            tracing::debug!(
                "Focus refresh: news={:?} sentiment={:?} index={:?} prices={:?}",
                news,
                sentiment,
                index,
                prices
            );
            news?;
            prices?;
        }

        Ok(report)
    }

    pub async fn displayed_stocks(&self) -> Arc<Vec<EnrichedStock>> {
        self.reconciler.displayed().await
    }

    /// Re-price every favorite once the stocks entry has gone stale.
    ///
    /// Successful quotes replace their records; failed symbols keep the last
    /// known values. Without a single success the entry stays stale.
    pub async fn refresh_prices(&self, auth_token: Option<&str>) -> SyncResult<RefreshStatus> {
        let token = self.session_token(auth_token).await?;
        self.refresh_prices_except(token, &[]).await
    }

    /// `priced` holds symbols quoted moments ago by a reconciliation.
    async fn refresh_prices_except(&self, token: &str, priced: &[String]) -> SyncResult<RefreshStatus> {
        if !self.needs_refresh(ResourceKind::Stocks) {
            return Ok(RefreshStatus::Fresh);
        }

        let report = self
            .on_auth_failure(self.reconciler.refresh_all(token, priced).await)
            .await?;
        Ok(match report.outcome {
            ReconcileOutcome::Skipped | ReconcileOutcome::Discarded => RefreshStatus::Busy,
            ReconcileOutcome::Unchanged => RefreshStatus::Fresh,
            _ if report.enriched.is_empty() => RefreshStatus::Failed,
            _ => RefreshStatus::Refreshed,
        })
    }

    // -- News ----------------------------------------------------------------

    /// Load the first news page unless the feed is still fresh.
    ///
    /// When every attempt fails the feed switches to
    /// [`NewsState::Unavailable`] instead of serving the old items.
    pub async fn refresh_news(&self, auth_token: Option<&str>) -> SyncResult<RefreshStatus> {
        let token = self.session_token(auth_token).await?;
        let _gate = self.news_gate.lock().await;

        if self.news.read().await.is_loaded() && !self.needs_refresh(ResourceKind::News) {
            return Ok(RefreshStatus::Fresh);
        }

        match self.fetch_news_page(token, 1).await {
            Ok((items, exhausted)) => {
                tracing::info!("Loaded {} news items", items.len());
                *self.news.write().await = NewsState::Loaded {
                    items,
                    page: 1,
                    exhausted,
                };
                self.cache
                    .mark_refreshed(ResourceKind::News, self.clock.now_millis());
                Ok(RefreshStatus::Refreshed)
            }
            Err(e) if requires_auth(&e) => self.on_auth_failure(Err(e)).await,
            Err(e) => {
                *self.news.write().await = NewsState::Unavailable {
                    reason: e.to_string(),
                };
                Ok(RefreshStatus::Failed)
            }
        }
    }

    /// Append the next news page, skipping items already in the feed.
    ///
    /// A failed page keeps what is already loaded.
    pub async fn load_more_news(&self, auth_token: Option<&str>) -> SyncResult<RefreshStatus> {
        let token = self.session_token(auth_token).await?;
        let _gate = self.news_gate.lock().await;

        let (current, page) = match &*self.news.read().await {
            NewsState::Loaded { exhausted: true, .. } => return Ok(RefreshStatus::Fresh),
            NewsState::Loaded { items, page, .. } => (items.clone(), *page),
            _ => (Vec::new(), 0),
        };
        let next_page = page + 1;

        match self.fetch_news_page(token, next_page).await {
            Ok((items, exhausted)) => {
                let merged = merge_pages(&current, items);
                tracing::debug!("News page {} loaded, {} items total", next_page, merged.len());
                *self.news.write().await = NewsState::Loaded {
                    items: merged,
                    page: next_page,
                    exhausted,
                };
                if next_page == 1 {
                    self.cache
                        .mark_refreshed(ResourceKind::News, self.clock.now_millis());
                }
                Ok(RefreshStatus::Refreshed)
            }
            Err(e) if requires_auth(&e) => self.on_auth_failure(Err(e)).await,
            Err(e) => {
                if current.is_empty() {
                    *self.news.write().await = NewsState::Unavailable {
                        reason: e.to_string(),
                    };
                }
                Ok(RefreshStatus::Failed)
            }
        }
    }

    pub async fn news(&self) -> Vec<NewsItem> {
        self.news.read().await.items().to_vec()
    }

    pub async fn news_state(&self) -> NewsState {
        self.news.read().await.clone()
    }

    async fn fetch_news_page(&self, token: &str, page: u32) -> SyncResult<(Vec<NewsItem>, bool)> {
        let query = NewsQuery {
            page,
            page_size: self.config.news_page_size,
            sort_field: self.config.news_sort_field.clone(),
            sort_order: self.config.news_sort_order,
        };
        let backend = &self.backend;
        let query = &query;

        let rows = self
            .pipeline
            .fetch_with_retry("news page", || backend.fetch_news_page(token, query))
            .await?;

        let exhausted = (rows.len() as u32) < self.config.news_page_size;
        Ok((normalize_page(&rows), exhausted))
    }

    // -- Sentiment -----------------------------------------------------------

    /// Replace the aggregate sentiment map unless it is still fresh.
    ///
    /// On failure the map is emptied so every symbol falls back to its
    /// price-derived sentiment.
    pub async fn refresh_sentiment(&self) -> RefreshStatus {
        if !self.needs_refresh(ResourceKind::Sentiment) {
            return RefreshStatus::Fresh;
        }

        let backend = &self.backend;
        let fetched = self
            .pipeline
            .fetch_with_retry("aggregate sentiment", || backend.fetch_aggregate_sentiment())
            .await;

        match fetched {
            Ok(rows) => {
                let records = index_sentiment(&rows);
                tracing::info!("Aggregate sentiment loaded for {} symbols", records.len());
                *self.sentiment.write().await = Arc::new(records);
                self.cache
                    .mark_refreshed(ResourceKind::Sentiment, self.clock.now_millis());
                RefreshStatus::Refreshed
            }
            Err(_) => {
                *self.sentiment.write().await = Arc::new(HashMap::new());
                RefreshStatus::Failed
            }
        }
    }

    /// Effective sentiment for a displayed symbol.
    pub async fn sentiment(&self, symbol: &str) -> Option<EffectiveSentiment> {
        let symbol = symbol.trim().to_uppercase();
        let stocks = self.displayed_stocks().await;
        let stock = stocks.iter().find(|s| s.symbol == symbol)?;

        let records = self.sentiment.read().await.clone();
        Some(effective_sentiment(stock, records.get(&symbol)))
    }

    /// Effective sentiment for every displayed stock, in display order.
    pub async fn sentiments(&self) -> Vec<EffectiveSentiment> {
        let stocks = self.displayed_stocks().await;
        let records = self.sentiment.read().await.clone();

        stocks
            .iter()
            .map(|stock| effective_sentiment(stock, records.get(&stock.symbol)))
            .collect()
    }

    pub async fn sentiment_summary(&self) -> SentimentSummary {
        SentimentSummary::from_effective(&self.sentiments().await)
    }

    // -- Index ---------------------------------------------------------------

    pub async fn refresh_index(&self) -> RefreshStatus {
        if !self.needs_refresh(ResourceKind::IndexPrice) {
            return RefreshStatus::Fresh;
        }

        let backend = &self.backend;
        let fetched = self
            .pipeline
            .fetch_with_retry("index price", || backend.fetch_index_price())
            .await;

        match fetched {
            Ok(quote) => {
                tracing::debug!("Index {} at {}", quote.symbol, quote.price);
                *self.index.write().await = Some(quote);
                self.cache
                    .mark_refreshed(ResourceKind::IndexPrice, self.clock.now_millis());
                RefreshStatus::Refreshed
            }
            Err(_) => {
                *self.index.write().await = None;
                RefreshStatus::Failed
            }
        }
    }

    pub async fn index_quote(&self) -> Option<IndexQuote> {
        self.index.read().await.clone()
    }

    // -- Preferences ---------------------------------------------------------

    /// Sector names for the preferences screen; empty when unavailable.
    pub async fn load_sectors(&self, auth_token: Option<&str>) -> Vec<String> {
        let Some(token) = usable_token(auth_token) else {
            return Vec::new();
        };

        let backend = &self.backend;
        self.pipeline
            .fetch_with_retry("sectors", || backend.fetch_sectors(token))
            .await
            .unwrap_or_default()
    }

    // -- Session -------------------------------------------------------------

    /// Forget everything tied to the current session.
    pub async fn logout(&self) {
        self.clear_session().await;
        tracing::info!("Session cleared");
    }

    async fn clear_session(&self) {
        self.reconciler.clear().await;
        *self.news.write().await = NewsState::NotLoaded;
        *self.sentiment.write().await = Arc::new(HashMap::new());
        *self.index.write().await = None;
        *self.last_focus_millis.lock().await = None;
        self.cache.clear();
    }

    async fn session_token<'a>(&self, auth_token: Option<&'a str>) -> SyncResult<&'a str> {
        match usable_token(auth_token) {
            Some(token) => Ok(token),
            None => {
                tracing::warn!("No auth token, clearing session");
                self.clear_session().await;
                Err(SyncError::Unauthenticated)
            }
        }
    }

    async fn on_auth_failure<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        if let Err(e) = &result {
            if requires_auth(e) {
                tracing::warn!("Backend rejected the session, clearing state");
                self.clear_session().await;
            }
        }
        result
    }

    /// True when the focus trigger may run; records the attempt.
    async fn claim_focus_window(&self) -> bool {
        let now = self.clock.now_millis();
        let cooldown = self.config.focus_cooldown.as_millis() as i64;
        let mut last = self.last_focus_millis.lock().await;

        match *last {
            Some(at) if now - at < cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

fn usable_token(auth_token: Option<&str>) -> Option<&str> {
    auth_token.map(str::trim).filter(|t| !t.is_empty())
}
