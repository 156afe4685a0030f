use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static catalog row: symbol with its company name and sector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub symbol: String,
    pub name: String,
    pub sector: String,
}

/// Live price lookup for a single symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub price: f64,
    #[serde(default)]
    pub change: f64,
    #[serde(default)]
    pub change_percent: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Aggregate market index price (dashboard header)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexQuote {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change: f64,
    #[serde(default)]
    pub change_percent: f64,
}

/// A favorite symbol as shown on the dashboard: catalog row merged with a live price.
///
/// Records are never patched field by field; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedStock {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub current_price: f64,
    pub change_absolute: f64,
    pub change_percent: f64,
    pub volume: f64,
}

impl EnrichedStock {
    pub fn from_parts(entry: &CatalogEntry, quote: &PriceQuote) -> Self {
        Self {
            symbol: entry.symbol.clone(),
            name: entry.name.clone(),
            sector: entry.sector.clone(),
            current_price: quote.price,
            change_absolute: quote.change,
            change_percent: quote.change_percent,
            volume: quote.volume,
        }
    }
}

/// Sentiment classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Mixed => "mixed",
        }
    }

    /// Parse a backend label, accepting a few common spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "positive" | "bullish" => Some(SentimentLabel::Positive),
            "negative" | "bearish" => Some(SentimentLabel::Negative),
            "neutral" => Some(SentimentLabel::Neutral),
            "mixed" => Some(SentimentLabel::Mixed),
            _ => None,
        }
    }

    /// Display color for the label
    pub fn color(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "#16a34a",
            SentimentLabel::Negative => "#dc2626",
            SentimentLabel::Neutral => "#6b7280",
            SentimentLabel::Mixed => "#d97706",
        }
    }
}

/// Aggregate sentiment for one symbol, as reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentRecord {
    pub symbol: String,
    pub label: SentimentLabel,
    /// 0.0 - 1.0
    pub confidence_score: f64,
    pub sample_size: u32,
}

/// A JSON object exactly as the backend sent it.
///
/// Backend versions disagree on field names (`title` vs `headline`, `_id` vs
/// `id`, ...) and sometimes send several spellings at once, so rows are kept
/// as untyped objects and probed during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawObject(pub serde_json::Map<String, serde_json::Value>);

impl RawObject {
    /// First non-null value among `names`, in priority order.
    pub fn field(&self, names: &[&str]) -> Option<&serde_json::Value> {
        names
            .iter()
            .find_map(|name| self.0.get(*name).filter(|v| !v.is_null()))
    }

    /// First value among `names` that is a non-blank string.
    pub fn text(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| {
            self.0
                .get(*name)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
    }

    /// First value among `names` that is a number, or a string holding one.
    pub fn number(&self, names: &[&str]) -> Option<f64> {
        names.iter().find_map(|name| match self.0.get(*name)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

impl From<serde_json::Value> for RawObject {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => RawObject(map),
            _ => RawObject::default(),
        }
    }
}

/// Aggregate sentiment row as received
pub type RawSentiment = RawObject;

/// News item as received
pub type RawNewsItem = RawObject;

/// Canonical news item produced at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub related_symbols: Vec<String>,
    /// 1 - 5
    pub adaptation_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Paging and ordering for a news page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsQuery {
    pub page: u32,
    pub page_size: u32,
    pub sort_field: String,
    pub sort_order: SortOrder,
}
