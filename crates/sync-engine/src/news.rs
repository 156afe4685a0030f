//! News ingestion.
//!
//! Backend news rows arrive with inconsistent field names. They are turned
//! into canonical [`NewsItem`]s here, once, and nothing downstream probes raw
//! fields. Rows missing an id or a title are dropped.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use market_core::{NewsItem, RawNewsItem};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

pub const DEFAULT_ADAPTATION_LEVEL: u8 = 3;

const ID_FIELDS: &[&str] = &["id", "_id", "uuid"];
const TITLE_FIELDS: &[&str] = &["title", "headline"];
const BODY_FIELDS: &[&str] = &["body", "content", "summary", "description"];
const PUBLISHED_FIELDS: &[&str] = &[
    "publishedAt",
    "published_at",
    "publishedUtc",
    "published_utc",
    "createdAt",
    "date",
];
const SYMBOL_FIELDS: &[&str] = &["relatedSymbols", "related_symbols", "symbols", "tickers"];
const LEVEL_FIELDS: &[&str] = &["adaptationLevel", "adaptation_level", "level"];

/// What the news screen should show
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NewsState {
    NotLoaded,
    Loaded {
        items: Vec<NewsItem>,
        /// Last page fetched (1-based)
        page: u32,
        /// The last page came back short, so there is nothing more to load
        exhausted: bool,
    },
    /// Every attempt failed; the screen shows "no data" rather than stale items
    Unavailable { reason: String },
}

impl NewsState {
    pub fn items(&self) -> &[NewsItem] {
        match self {
            NewsState::Loaded { items, .. } => items,
            _ => &[],
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, NewsState::Loaded { .. })
    }
}

pub fn normalize_news_item(raw: &RawNewsItem) -> Option<NewsItem> {
    let id = match raw.field(ID_FIELDS)? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let title = raw.text(TITLE_FIELDS)?.to_string();

    Some(NewsItem {
        id,
        title,
        body: raw.text(BODY_FIELDS).unwrap_or_default().to_string(),
        published_at: raw.field(PUBLISHED_FIELDS).and_then(parse_timestamp),
        related_symbols: raw
            .field(SYMBOL_FIELDS)
            .map(parse_symbols)
            .unwrap_or_default(),
        adaptation_level: raw
            .number(LEVEL_FIELDS)
            .filter(|level| level.is_finite())
            .map(|level| level.round().clamp(1.0, 5.0) as u8)
            .unwrap_or(DEFAULT_ADAPTATION_LEVEL),
    })
}

/// Normalize a page, dropping rows that fail validation.
pub fn normalize_page(rows: &[RawNewsItem]) -> Vec<NewsItem> {
    let items: Vec<NewsItem> = rows.iter().filter_map(normalize_news_item).collect();

    let dropped = rows.len() - items.len();
    if dropped > 0 {
        tracing::warn!("Dropped {} news items missing an id or title", dropped);
    }
    items
}

/// Append `next` to `existing`, skipping ids that are already present.
pub fn merge_pages(existing: &[NewsItem], next: Vec<NewsItem>) -> Vec<NewsItem> {
    let mut seen: HashSet<String> = existing.iter().map(|item| item.id.clone()).collect();
    let mut merged = existing.to_vec();

    for item in next {
        if seen.insert(item.id.clone()) {
            merged.push(item);
        }
    }
    merged
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|dt| Utc.from_utc_datetime(&dt))
                })
        }
        Value::Number(n) => {
            let raw = n.as_i64()?;
            // Epoch seconds vs epoch milliseconds
            if raw.abs() < 100_000_000_000 {
                DateTime::from_timestamp(raw, 0)
            } else {
                DateTime::from_timestamp_millis(raw)
            }
        }
        _ => None,
    }
}

fn parse_symbols(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj
                    .get("symbol")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
