//! Sentiment composition.
//!
//! An aggregate sentiment record wins when it is backed by at least one
//! sample; otherwise the label falls back to the sign of the day's price
//! change. The fallback never yields `Mixed`.

use market_core::{EnrichedStock, RawSentiment, SentimentLabel, SentimentRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where an effective sentiment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentSource {
    Aggregate,
    PriceChange,
}

/// Presentation-ready sentiment for one displayed stock
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveSentiment {
    pub symbol: String,
    pub label: SentimentLabel,
    pub source: SentimentSource,
    pub color: &'static str,
    /// Bar fill intensity, 0.0 - 1.0
    pub weight: f64,
    /// Bar width in percent, 0 - 100
    pub bar_width: f64,
}

/// Compose the sentiment shown for `stock`.
pub fn effective_sentiment(
    stock: &EnrichedStock,
    external: Option<&SentimentRecord>,
) -> EffectiveSentiment {
    let (label, source, bar_width) = match external {
        Some(record) if record.sample_size > 0 => (
            record.label,
            SentimentSource::Aggregate,
            clamp_width(record.confidence_score * 100.0),
        ),
        _ => (
            fallback_label(stock.change_percent),
            SentimentSource::PriceChange,
            clamp_width(stock.change_percent.abs() * 10.0),
        ),
    };

    EffectiveSentiment {
        symbol: stock.symbol.clone(),
        label,
        source,
        color: label.color(),
        weight: bar_width / 100.0,
        bar_width,
    }
}

fn fallback_label(change_percent: f64) -> SentimentLabel {
    if change_percent > 0.0 {
        SentimentLabel::Positive
    } else if change_percent < 0.0 {
        SentimentLabel::Negative
    } else {
        SentimentLabel::Neutral
    }
}

fn clamp_width(width: f64) -> f64 {
    if width.is_nan() {
        0.0
    } else {
        width.clamp(0.0, 100.0)
    }
}

/// Validate one backend sentiment row. Rows without a symbol or with an
/// unknown label are dropped.
pub fn normalize_sentiment(raw: &RawSentiment) -> Option<SentimentRecord> {
    let symbol = raw.text(&["symbol", "ticker"])?.to_uppercase();
    let label = raw
        .text(&["sentiment", "label", "overallSentiment"])
        .and_then(SentimentLabel::parse)?;

    let confidence_score = raw
        .number(&["confidenceScore", "confidence", "score"])
        .filter(|c| c.is_finite())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let sample_size = raw
        .number(&["sampleSize", "sample_size", "count", "mentions"])
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n as u32)
        .unwrap_or(0);

    Some(SentimentRecord {
        symbol,
        label,
        confidence_score,
        sample_size,
    })
}

/// Normalize a whole payload into a symbol-keyed map.
pub fn index_sentiment(rows: &[RawSentiment]) -> HashMap<String, SentimentRecord> {
    let mut dropped = 0usize;
    let mut records = HashMap::with_capacity(rows.len());

    for raw in rows {
        match normalize_sentiment(raw) {
            Some(record) => {
                records.insert(record.symbol.clone(), record);
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::warn!("Dropped {} malformed sentiment rows", dropped);
    }
    records
}

/// Label counts across the displayed collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentSummary {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub mixed: usize,
}

impl SentimentSummary {
    pub fn from_effective<'a>(items: impl IntoIterator<Item = &'a EffectiveSentiment>) -> Self {
        let mut summary = Self::default();
        for item in items {
            match item.label {
                SentimentLabel::Positive => summary.positive += 1,
                SentimentLabel::Negative => summary.negative += 1,
                SentimentLabel::Neutral => summary.neutral += 1,
                SentimentLabel::Mixed => summary.mixed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.positive + self.negative + self.neutral + self.mixed
    }

    /// Dominant label; ties and an empty summary read as neutral.
    pub fn mood(&self) -> SentimentLabel {
        if self.positive > self.negative {
            SentimentLabel::Positive
        } else if self.negative > self.positive {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_core::RawObject;
    use serde_json::json;

    fn stock(symbol: &str, change_percent: f64) -> EnrichedStock {
        EnrichedStock {
            symbol: symbol.to_string(),
            name: format!("{} S.A.", symbol),
            sector: "Energy".to_string(),
            current_price: 100.0,
            change_absolute: change_percent,
            change_percent,
            volume: 10_000.0,
        }
    }

    fn record(symbol: &str, label: SentimentLabel, confidence: f64, samples: u32) -> SentimentRecord {
        SentimentRecord {
            symbol: symbol.to_string(),
            label,
            confidence_score: confidence,
            sample_size: samples,
        }
    }

    #[test]
    fn test_fallback_negative_change() {
        let s = effective_sentiment(&stock("GGAL", -3.4), None);
        assert_eq!(s.label, SentimentLabel::Negative);
        assert_eq!(s.source, SentimentSource::PriceChange);
        assert!((s.bar_width - 34.0).abs() < 1e-9);
        assert!((s.weight - 0.34).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_caps_at_100() {
        let s = effective_sentiment(&stock("YPFD", 17.5), None);
        assert_eq!(s.label, SentimentLabel::Positive);
        assert_eq!(s.bar_width, 100.0);
    }

    #[test]
    fn test_fallback_flat_is_neutral() {
        let s = effective_sentiment(&stock("PAMP", 0.0), None);
        assert_eq!(s.label, SentimentLabel::Neutral);
        assert_eq!(s.bar_width, 0.0);
    }

    #[test]
    fn test_aggregate_record_wins() {
        let r = record("GGAL", SentimentLabel::Mixed, 0.62, 40);
        let s = effective_sentiment(&stock("GGAL", -3.4), Some(&r));
        assert_eq!(s.label, SentimentLabel::Mixed);
        assert_eq!(s.source, SentimentSource::Aggregate);
        assert!((s.bar_width - 62.0).abs() < 1e-9);
        assert_eq!(s.color, SentimentLabel::Mixed.color());
    }

    #[test]
    fn test_empty_sample_falls_back_to_price() {
        let r = record("GGAL", SentimentLabel::Positive, 0.9, 0);
        let s = effective_sentiment(&stock("GGAL", -1.0), Some(&r));
        assert_eq!(s.label, SentimentLabel::Negative);
        assert_eq!(s.source, SentimentSource::PriceChange);
    }

    #[test]
    fn test_confidence_over_one_is_capped() {
        let r = record("GGAL", SentimentLabel::Positive, 1.7, 3);
        let s = effective_sentiment(&stock("GGAL", 1.0), Some(&r));
        assert_eq!(s.bar_width, 100.0);
    }

    #[test]
    fn test_normalize_sentiment_rows() {
        let good = RawObject::from(json!({
            "ticker": "ypfd", "label": "Bullish", "score": 0.8, "count": 12
        }));
        let r = normalize_sentiment(&good).unwrap();
        assert_eq!(r.symbol, "YPFD");
        assert_eq!(r.label, SentimentLabel::Positive);
        assert_eq!(r.confidence_score, 0.8);
        assert_eq!(r.sample_size, 12);

        let no_samples = RawObject::from(json!({"symbol": "GGAL", "sentiment": "neutral"}));
        assert_eq!(normalize_sentiment(&no_samples).unwrap().sample_size, 0);

        let bad_label = RawObject::from(json!({"symbol": "GGAL", "sentiment": "sideways"}));
        assert!(normalize_sentiment(&bad_label).is_none());

        let no_symbol = RawObject::from(json!({"sentiment": "positive"}));
        assert!(normalize_sentiment(&no_symbol).is_none());
    }

    #[test]
    fn test_index_sentiment_keys_by_symbol() {
        let rows = vec![
            RawObject::from(json!({"symbol": "GGAL", "sentiment": "negative", "sampleSize": 5})),
            RawObject::from(json!({"symbol": "YPFD", "sentiment": "??"})),
        ];
        let map = index_sentiment(&rows);
        assert_eq!(map.len(), 1);
        assert_eq!(map["GGAL"].label, SentimentLabel::Negative);
    }

    #[test]
    fn test_summary_mood() {
        let items = vec![
            effective_sentiment(&stock("A", 1.0), None),
            effective_sentiment(&stock("B", 2.0), None),
            effective_sentiment(&stock("C", -1.0), None),
        ];
        let summary = SentimentSummary::from_effective(&items);
        assert_eq!(summary.positive, 2);
        assert_eq!(summary.negative, 1);
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.mood(), SentimentLabel::Positive);
        assert_eq!(SentimentSummary::default().mood(), SentimentLabel::Neutral);
    }
}
