//! Deduplicating review storage + HTTP fetch utilities for revpulse.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use revpulse_core::{Review, Sentiment, TimeRange};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

pub const CRATE_NAME: &str = "revpulse-store";

/// Result of an insert attempt. `AlreadyPresent` is a success no-op, never
/// an error: the stored record keeps its original text and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("review store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

/// Keyed review storage with at-most-once insertion per identity.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Atomic per identity: concurrent or repeated cycles inserting the same
    /// identity observe exactly one `Inserted`.
    async fn insert_if_new(&self, review: &Review) -> Result<InsertOutcome, StoreError>;

    /// Reviews for one source whose `occurred_at` falls in the half-open
    /// range. Read contract for the aggregator only.
    async fn query(&self, source_id: &str, range: TimeRange) -> Result<Vec<Review>, StoreError>;
}

/// SQLite-backed store. The UNIQUE constraint on `identity` is the
/// synchronization primitive: the insert treats a conflict as
/// `AlreadyPresent` instead of an error, so there is no check-then-insert
/// window.
#[derive(Debug, Clone)]
pub struct SqliteReviewStore {
    pool: SqlitePool,
}

impl SqliteReviewStore {
    /// Connect and ensure the schema exists. `url` is an sqlx SQLite URL,
    /// e.g. `sqlite://revpulse.db?mode=rwc` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL UNIQUE,
                source_id TEXT NOT NULL,
                product_ref TEXT,
                text TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                occurred_at_estimated INTEGER NOT NULL,
                sentiment TEXT NOT NULL,
                is_defect_signal INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reviews_source_occurred
             ON reviews(source_id, occurred_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for SqliteReviewStore {
    async fn insert_if_new(&self, review: &Review) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO reviews
                (identity, source_id, product_ref, text, occurred_at,
                 occurred_at_estimated, sentiment, is_defect_signal)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(identity) DO NOTHING
            "#,
        )
        .bind(&review.identity)
        .bind(&review.source_id)
        .bind(&review.product_ref)
        .bind(&review.text)
        .bind(review.occurred_at.timestamp())
        .bind(review.occurred_at_estimated)
        .bind(review.sentiment.as_str())
        .bind(review.is_defect_signal)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(identity = %review.identity, "identity already stored");
            Ok(InsertOutcome::AlreadyPresent)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn query(&self, source_id: &str, range: TimeRange) -> Result<Vec<Review>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT identity, source_id, product_ref, text, occurred_at,
                   occurred_at_estimated, sentiment, is_defect_signal
              FROM reviews
             WHERE source_id = ?1
               AND occurred_at >= ?2
               AND occurred_at < ?3
             ORDER BY occurred_at
            "#,
        )
        .bind(source_id)
        .bind(range.start.timestamp())
        .bind(range.end.timestamp())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let occurred_secs: i64 = row.try_get("occurred_at")?;
            let occurred_at = DateTime::<Utc>::from_timestamp(occurred_secs, 0)
                .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {occurred_secs}")))?;
            let sentiment_text: String = row.try_get("sentiment")?;
            let sentiment = Sentiment::parse(&sentiment_text)
                .ok_or_else(|| StoreError::Corrupt(format!("bad sentiment {sentiment_text:?}")))?;
            out.push(Review {
                identity: row.try_get("identity")?,
                source_id: row.try_get("source_id")?,
                product_ref: row.try_get("product_ref")?,
                text: row.try_get("text")?,
                occurred_at,
                occurred_at_estimated: row.try_get("occurred_at_estimated")?,
                sentiment,
                is_defect_signal: row.try_get("is_defect_signal")?,
            });
        }
        Ok(out)
    }
}

/// In-memory store with the same contract. Injectable fake for pipeline
/// tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryReviewStore {
    reviews: StdMutex<BTreeMap<String, Review>>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reviews.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, identity: &str) -> Option<Review> {
        self.reviews
            .lock()
            .expect("store lock poisoned")
            .get(identity)
            .cloned()
    }
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn insert_if_new(&self, review: &Review) -> Result<InsertOutcome, StoreError> {
        let mut reviews = self.reviews.lock().expect("store lock poisoned");
        if reviews.contains_key(&review.identity) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        reviews.insert(review.identity.clone(), review.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn query(&self, source_id: &str, range: TimeRange) -> Result<Vec<Review>, StoreError> {
        let reviews = self.reviews.lock().expect("store lock poisoned");
        Ok(reviews
            .values()
            .filter(|r| r.source_id == source_id && range.contains(r.occurred_at))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Seam between adapters and the network. `HttpFetcher` is the production
/// implementation; tests script responses through this trait.
#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get_text(
        &self,
        source_id: &str,
        url: &str,
        bearer_token: Option<&str>,
    ) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher with a bounded timeout, retry with capped
/// exponential backoff, and global + per-source concurrency limits.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }
}

#[async_trait]
impl HttpGet for HttpFetcher {
    async fn get_text(
        &self,
        source_id: &str,
        url: &str,
        bearer_token: Option<&str>,
    ) -> Result<String, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source.acquire().await.expect("semaphore not closed");

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let mut request = self.client.get(url);
            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(source_id, url, %status, attempt, "retrying after http status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(source_id, url, error = %err, attempt, "retrying after transport error");
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}
