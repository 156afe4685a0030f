//! Client-side market data synchronization.
//!
//! [`SyncEngine`] keeps a user's favorite stocks, the news feed, aggregate
//! sentiment and the index quote in step with a [`market_core::MarketBackend`],
//! fetching only what changed or went stale.

pub mod cache;
pub mod config;
pub mod engine;
pub mod news;
pub mod pipeline;
pub mod reconciler;
pub mod sentiment;
pub mod telemetry;

pub use cache::{CacheEntry, CacheManager, Clock, ManualClock, ResourceKind, SystemClock};
pub use config::SyncConfig;
pub use engine::{RefreshStatus, SyncEngine, Trigger};
pub use news::{normalize_news_item, NewsState};
pub use pipeline::{EnrichmentBatch, FetchPipeline, RetryPolicy};
pub use reconciler::{
    FavoriteDelta, FavoriteReconciler, ReconcileOutcome, ReconcilePhase, ReconcileReport,
};
pub use sentiment::{
    effective_sentiment, EffectiveSentiment, SentimentSource, SentimentSummary,
};
pub use telemetry::init_tracing;
