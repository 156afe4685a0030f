use async_trait::async_trait;
use market_core::{
    CatalogEntry, IndexQuote, MarketBackend, NewsQuery, PriceQuote, RawNewsItem, RawSentiment,
    SyncError, SyncResult,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection settings for the market backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl BackendConfig {
    /// Read `MARKET_API_URL` and `MARKET_API_TIMEOUT_SECS`, loading `.env` first.
    pub fn from_env() -> SyncResult<Self> {
        dotenvy::dotenv().ok();

        let base_url = std::env::var("MARKET_API_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs: u64 = std::env::var("MARKET_API_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_TIMEOUT_SECS.to_string())
            .parse()
            .map_err(|e| SyncError::Config(format!("MARKET_API_TIMEOUT_SECS: {}", e)))?;

        if base_url.trim().is_empty() {
            return Err(SyncError::Config("MARKET_API_URL is empty".to_string()));
        }

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// HTTP implementation of [`MarketBackend`].
///
/// One method, one request. No retries happen here: the sync engine's fetch
/// pipeline owns retry and pacing so they are applied exactly once.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_env() -> SyncResult<Self> {
        Ok(Self::new(BackendConfig::from_env()?))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request and decode the JSON body, mapping HTTP failures onto `SyncError`.
    async fn get_json<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> SyncResult<T> {
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SyncError::Unauthenticated);
        }

        if !status.is_success() {
            return Err(SyncError::Backend(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl MarketBackend for HttpBackend {
    async fn fetch_catalog(&self, auth_token: &str) -> SyncResult<Vec<CatalogEntry>> {
        self.get_json(
            self.client
                .get(self.url("/api/stocks/catalog"))
                .bearer_auth(auth_token),
        )
        .await
    }

    async fn fetch_sectors(&self, auth_token: &str) -> SyncResult<Vec<String>> {
        let rows: Vec<SectorRow> = self
            .get_json(
                self.client
                    .get(self.url("/api/stocks/sectors"))
                    .bearer_auth(auth_token),
            )
            .await?;

        Ok(rows.into_iter().map(SectorRow::into_name).collect())
    }

    async fn fetch_price(&self, symbol: &str) -> SyncResult<PriceQuote> {
        let envelope: ApiEnvelope<PriceQuote> = self
            .get_json(self.client.get(self.url(&format!("/api/stocks/{}/price", symbol))))
            .await?;

        envelope.into_data(&format!("price for {}", symbol))
    }

    async fn fetch_index_price(&self) -> SyncResult<IndexQuote> {
        let envelope: ApiEnvelope<IndexQuote> = self
            .get_json(self.client.get(self.url("/api/market/index")))
            .await?;

        envelope.into_data("index price")
    }

    async fn fetch_news_page(
        &self,
        auth_token: &str,
        query: &NewsQuery,
    ) -> SyncResult<Vec<RawNewsItem>> {
        let envelope: ApiEnvelope<NewsPage> = self
            .get_json(
                self.client
                    .get(self.url("/api/news"))
                    .bearer_auth(auth_token)
                    .query(&[
                        ("page", query.page.to_string()),
                        ("limit", query.page_size.to_string()),
                        ("sortBy", query.sort_field.clone()),
                        ("sortOrder", query.sort_order.as_str().to_string()),
                    ]),
            )
            .await?;

        Ok(envelope.into_data("news page")?.news)
    }

    async fn fetch_aggregate_sentiment(&self) -> SyncResult<Vec<RawSentiment>> {
        let envelope: ApiEnvelope<SentimentPayload> = self
            .get_json(self.client.get(self.url("/api/sentiment/aggregate")))
            .await?;

        Ok(envelope.into_data("aggregate sentiment")?.symbols)
    }

    async fn fetch_favorites(&self, auth_token: &str) -> SyncResult<Vec<String>> {
        let body: FavoritesResponse = self
            .get_json(
                self.client
                    .get(self.url("/api/users/favorites"))
                    .bearer_auth(auth_token),
            )
            .await?;

        Ok(body.favorite_stocks)
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

// Response structures

/// `{ success, data }` wrapper used by most endpoints
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// An unsuccessful or empty envelope counts as a failed request.
    fn into_data(self, what: &str) -> SyncResult<T> {
        if !self.success {
            let reason = self
                .message
                .unwrap_or_else(|| "backend reported failure".to_string());
            tracing::debug!("Unsuccessful envelope for {}: {}", what, reason);
            return Err(SyncError::Backend(format!("{}: {}", what, reason)));
        }

        self.data
            .ok_or_else(|| SyncError::InvalidResponse(format!("{}: missing data", what)))
    }
}

#[derive(Debug, Deserialize)]
struct NewsPage {
    #[serde(default)]
    news: Vec<RawNewsItem>,
}

#[derive(Debug, Deserialize)]
struct SentimentPayload {
    #[serde(default)]
    symbols: Vec<RawSentiment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoritesResponse {
    #[serde(default)]
    favorite_stocks: Vec<String>,
}

/// Sector endpoint rows come either as bare names or as `{ name }` objects
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SectorRow {
    Name(String),
    Object {
        #[serde(alias = "sector")]
        name: String,
    },
}

impl SectorRow {
    fn into_name(self) -> String {
        match self {
            SectorRow::Name(name) | SectorRow::Object { name } => name,
        }
    }
}
