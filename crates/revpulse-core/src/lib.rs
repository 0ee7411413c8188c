//! Core domain model for revpulse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "revpulse-core";

/// Sentiment category assigned once at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

/// Normalized review as emitted by a source adapter, before classification.
///
/// `identity` is the deduplication key: stable for the same underlying review
/// across retries and pagination re-runs, unique per (source, origin id) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDraft {
    pub identity: String,
    pub source_id: String,
    pub product_ref: Option<String>,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
    /// True when the origin provided no parseable date and `occurred_at` is
    /// the ingestion time instead.
    pub occurred_at_estimated: bool,
}

impl ReviewDraft {
    pub fn into_review(self, sentiment: Sentiment, is_defect_signal: bool) -> Review {
        Review {
            identity: self.identity,
            source_id: self.source_id,
            product_ref: self.product_ref,
            text: self.text,
            occurred_at: self.occurred_at,
            occurred_at_estimated: self.occurred_at_estimated,
            sentiment,
            is_defect_signal,
        }
    }
}

/// Classified review. Immutable once stored; re-ingestion of the same
/// identity never overwrites the stored classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub identity: String,
    pub source_id: String,
    pub product_ref: Option<String>,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
    pub occurred_at_estimated: bool,
    pub sentiment: Sentiment,
    pub is_defect_signal: bool,
}

/// Half-open `[start, end)` time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Sentiment counts over one source and one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentBreakdown {
    pub total: u64,
    pub positive: u64,
    pub neutral: u64,
    pub negative: u64,
}

impl SentimentBreakdown {
    pub fn record(&mut self, sentiment: Sentiment) {
        self.total += 1;
        match sentiment {
            Sentiment::Positive => self.positive += 1,
            Sentiment::Neutral => self.neutral += 1,
            Sentiment::Negative => self.negative += 1,
        }
    }
}

/// One source's figures within a report. Sources are summarized
/// independently and concatenated, never blended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceWindowSummary {
    pub source_id: String,
    pub range: TimeRange,
    pub counts: SentimentBreakdown,
}
