//! Source adapter contracts + the three marketplace feed adapters.
//!
//! Each adapter turns one origin's raw payloads into normalized
//! [`ReviewDraft`]s for a single polling cycle. Malformed individual entries
//! are skipped with an observable reason; only a source-level failure (dead
//! endpoint, undecodable body) surfaces as an [`AdapterError`], and the cycle
//! orchestrator isolates that per source.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use revpulse_core::ReviewDraft;
use revpulse_store::{FetchError, HttpGet};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "revpulse-adapters";

/// Which ingestion mechanism a configured source uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// Authenticated REST endpoint returning a JSON review envelope.
    BrandApi,
    /// Public HTML page scraped for review blocks.
    HtmlFeed,
    /// Paginated per-product JSON endpoint.
    PagedJson,
}

/// One configured source. Deserialized from the application config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub kind: AdapterKind,
    /// Endpoint or endpoint template. `paged-json` substitutes `{product}`
    /// and `{page}` placeholders.
    pub endpoint: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether newly stored defect reviews from this source may alert.
    /// Competitor feeds are typically ingested for reporting only.
    #[serde(default = "default_true")]
    pub alerts: bool,
    /// Name of the environment variable holding the bearer token, for
    /// `brand-api` sources. Resolved once at adapter construction.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Product identifiers to poll, for `paged-json` sources.
    #[serde(default)]
    pub product_refs: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Nominal full-page size; a shorter page is taken as end-of-results.
    #[serde(default = "default_page_size")]
    pub nominal_page_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_pages() -> u32 {
    5
}

fn default_page_size() -> usize {
    10
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("undecodable body from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Why an individual raw entry was dropped during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The origin entry had no non-empty review text.
    EmptyText,
    /// The origin entry carried no usable native identifier.
    MissingId,
    /// The origin entry did not match the source's expected shape.
    ShapeMismatch,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SkipReason::EmptyText => "empty text",
            SkipReason::MissingId => "missing origin id",
            SkipReason::ShapeMismatch => "shape mismatch",
        };
        f.write_str(reason)
    }
}

/// Everything one adapter produced in one cycle: normalized drafts plus the
/// reasons individual entries were dropped.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub drafts: Vec<ReviewDraft>,
    pub skipped: Vec<SkipReason>,
}

/// Shared context for one polling cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    pub fetched_at: DateTime<Utc>,
}

/// Produce zero or more normalized review drafts for one polling cycle.
/// The sequence is finite; adapters never loop without a termination bound.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch(
        &self,
        http: &dyn HttpGet,
        ctx: &CycleContext,
    ) -> Result<FetchOutcome, AdapterError>;
}

/// Build the adapter for one configured source. Bearer tokens are resolved
/// from the environment here, once, at process start.
pub fn adapter_for(config: &SourceConfig) -> Box<dyn SourceAdapter> {
    match config.kind {
        AdapterKind::BrandApi => {
            let api_key = config.api_key_env.as_deref().and_then(|var| {
                let value = std::env::var(var).ok();
                if value.is_none() {
                    warn!(source_id = %config.source_id, var, "configured api key variable is not set");
                }
                value
            });
            Box::new(BrandApiAdapter {
                config: config.clone(),
                api_key,
            })
        }
        AdapterKind::HtmlFeed => Box::new(HtmlFeedAdapter {
            config: config.clone(),
        }),
        AdapterKind::PagedJson => Box::new(PagedJsonAdapter {
            config: config.clone(),
        }),
    }
}

/// Stable identity for origins that expose no native review id: hash of the
/// whitespace-normalized, lowercased text, so trivial formatting differences
/// between fetches map to the same identity.
pub fn content_identity(text: &str) -> String {
    let normalized = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Origin ids arrive as JSON strings or numbers depending on the source.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OriginId {
    Text(String),
    Number(i64),
}

impl OriginId {
    fn into_string(self) -> Option<String> {
        match self {
            OriginId::Text(s) => {
                let trimmed = s.trim().to_string();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            OriginId::Number(n) => Some(n.to_string()),
        }
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Parse an origin timestamp, falling back to the ingestion time. The
/// fallback is explicit: it is logged and flagged on the draft so estimated
/// dates are never mistaken for origin dates downstream.
fn parse_origin_datetime(
    raw: Option<&str>,
    source_id: &str,
    ctx: &CycleContext,
) -> (DateTime<Utc>, bool) {
    if let Some(raw) = raw {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return (dt.with_timezone(&Utc), false);
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return (naive.and_utc(), false);
            }
        }
    }
    warn!(
        source_id,
        raw = raw.unwrap_or(""),
        "origin date missing or unparseable; using ingestion time"
    );
    (ctx.fetched_at, true)
}

/// One GET against an authenticated REST endpoint; the body is a JSON
/// envelope with the review array under `reviews` or `data`.
struct BrandApiAdapter {
    config: SourceConfig,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEntry {
    #[serde(default, alias = "reviewId", alias = "review_id")]
    id: Option<OriginId>,
    #[serde(default, alias = "comment")]
    text: Option<String>,
    #[serde(default, alias = "created_at")]
    date: Option<String>,
}

impl BrandApiAdapter {
    fn normalize(&self, raw: JsonValue, ctx: &CycleContext) -> Result<ReviewDraft, SkipReason> {
        let entry: ApiEntry =
            serde_json::from_value(raw).map_err(|_| SkipReason::ShapeMismatch)?;
        let text = non_empty(entry.text).ok_or(SkipReason::EmptyText)?;
        let origin_id = entry
            .id
            .and_then(OriginId::into_string)
            .ok_or(SkipReason::MissingId)?;
        let (occurred_at, occurred_at_estimated) =
            parse_origin_datetime(entry.date.as_deref(), &self.config.source_id, ctx);
        Ok(ReviewDraft {
            identity: format!("{}:{}", self.config.source_id, origin_id),
            source_id: self.config.source_id.clone(),
            product_ref: None,
            text,
            occurred_at,
            occurred_at_estimated,
        })
    }
}

#[async_trait]
impl SourceAdapter for BrandApiAdapter {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    async fn fetch(
        &self,
        http: &dyn HttpGet,
        ctx: &CycleContext,
    ) -> Result<FetchOutcome, AdapterError> {
        let body = http
            .get_text(
                &self.config.source_id,
                &self.config.endpoint,
                self.api_key.as_deref(),
            )
            .await?;
        let envelope: JsonValue =
            serde_json::from_str(&body).map_err(|err| AdapterError::Decode {
                url: self.config.endpoint.clone(),
                message: err.to_string(),
            })?;
        let entries = envelope
            .get("reviews")
            .or_else(|| envelope.get("data"))
            .and_then(JsonValue::as_array)
            .ok_or_else(|| AdapterError::Decode {
                url: self.config.endpoint.clone(),
                message: "no reviews/data array in envelope".to_string(),
            })?;

        let mut outcome = FetchOutcome::default();
        for raw in entries {
            match self.normalize(raw.clone(), ctx) {
                Ok(draft) => outcome.drafts.push(draft),
                Err(reason) => outcome.skipped.push(reason),
            }
        }
        Ok(outcome)
    }
}

/// One GET of a public brand page, scraped for review blocks. This source
/// exposes no native review id, so identities are content hashes.
struct HtmlFeedAdapter {
    config: SourceConfig,
}

const FEED_ITEM_SELECTOR: &str = ".feedback__item";
const FEED_TEXT_SELECTOR: &str = ".feedback__text";
const FEED_DATE_SELECTOR: &str = ".feedback__date";
const FEED_DATE_FORMAT: &str = "%d.%m.%Y";

fn parse_selector(selector: &str, url: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|err| AdapterError::Decode {
        url: url.to_string(),
        message: err.to_string(),
    })
}

fn first_text(block: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    block
        .select(selector)
        .next()
        .map(|node| node.text().collect::<String>())
        .and_then(|text| non_empty(Some(text)))
}

impl HtmlFeedAdapter {
    fn parse_page(&self, body: &str, ctx: &CycleContext) -> Result<FetchOutcome, AdapterError> {
        let item_sel = parse_selector(FEED_ITEM_SELECTOR, &self.config.endpoint)?;
        let text_sel = parse_selector(FEED_TEXT_SELECTOR, &self.config.endpoint)?;
        let date_sel = parse_selector(FEED_DATE_SELECTOR, &self.config.endpoint)?;

        let document = Html::parse_document(body);
        let mut outcome = FetchOutcome::default();

        for block in document.select(&item_sel) {
            let Some(text) = first_text(&block, &text_sel) else {
                outcome.skipped.push(SkipReason::EmptyText);
                continue;
            };

            let date_raw = first_text(&block, &date_sel);
            let (occurred_at, occurred_at_estimated) = match date_raw
                .as_deref()
                .and_then(|raw| NaiveDate::parse_from_str(raw, FEED_DATE_FORMAT).ok())
            {
                Some(date) => (
                    date.and_hms_opt(0, 0, 0)
                        .expect("midnight is always valid")
                        .and_utc(),
                    false,
                ),
                None => {
                    warn!(
                        source_id = %self.config.source_id,
                        raw = date_raw.as_deref().unwrap_or(""),
                        "feed date missing or unparseable; using ingestion time"
                    );
                    (ctx.fetched_at, true)
                }
            };

            outcome.drafts.push(ReviewDraft {
                identity: format!("{}:{}", self.config.source_id, content_identity(&text)),
                source_id: self.config.source_id.clone(),
                product_ref: None,
                text,
                occurred_at,
                occurred_at_estimated,
            });
        }
        Ok(outcome)
    }
}

#[async_trait]
impl SourceAdapter for HtmlFeedAdapter {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    async fn fetch(
        &self,
        http: &dyn HttpGet,
        ctx: &CycleContext,
    ) -> Result<FetchOutcome, AdapterError> {
        let body = http
            .get_text(&self.config.source_id, &self.config.endpoint, None)
            .await?;
        self.parse_page(&body, ctx)
    }
}

/// Sequential page fetches per configured product. Stops on an empty page,
/// on a page shorter than the nominal full-page size (heuristic
/// end-of-results signal; the origin exposes no "has more" field), or at the
/// max page cap, whichever comes first.
struct PagedJsonAdapter {
    config: SourceConfig,
}

#[derive(Debug, Default, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    data: PageData,
}

#[derive(Debug, Default, Deserialize)]
struct PageData {
    #[serde(default)]
    orders: PageOrders,
}

#[derive(Debug, Default, Deserialize)]
struct PageOrders {
    #[serde(default)]
    data: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct PagedEntry {
    #[serde(default, rename = "reviewId")]
    review_id: Option<OriginId>,
    #[serde(default, rename = "reviewText")]
    text: Option<String>,
    #[serde(default, rename = "dateCreated")]
    date: Option<String>,
}

impl PagedJsonAdapter {
    fn page_url(&self, product_ref: &str, page: u32) -> String {
        self.config
            .endpoint
            .replace("{product}", product_ref)
            .replace("{page}", &page.to_string())
    }

    fn normalize(
        &self,
        raw: JsonValue,
        product_ref: &str,
        ctx: &CycleContext,
    ) -> Result<ReviewDraft, SkipReason> {
        let entry: PagedEntry =
            serde_json::from_value(raw).map_err(|_| SkipReason::ShapeMismatch)?;
        let text = non_empty(entry.text).ok_or(SkipReason::EmptyText)?;
        let origin_id = entry
            .review_id
            .and_then(OriginId::into_string)
            .ok_or(SkipReason::MissingId)?;
        let (occurred_at, occurred_at_estimated) =
            parse_origin_datetime(entry.date.as_deref(), &self.config.source_id, ctx);
        Ok(ReviewDraft {
            identity: format!(
                "{}:{}:{}",
                self.config.source_id, product_ref, origin_id
            ),
            source_id: self.config.source_id.clone(),
            product_ref: Some(product_ref.to_string()),
            text,
            occurred_at,
            occurred_at_estimated,
        })
    }

    async fn fetch_product(
        &self,
        http: &dyn HttpGet,
        ctx: &CycleContext,
        product_ref: &str,
        outcome: &mut FetchOutcome,
    ) -> Result<(), AdapterError> {
        for page in 1..=self.config.max_pages {
            let url = self.page_url(product_ref, page);
            let body = http.get_text(&self.config.source_id, &url, None).await?;
            let envelope: PageEnvelope =
                serde_json::from_str(&body).map_err(|err| AdapterError::Decode {
                    url: url.clone(),
                    message: err.to_string(),
                })?;

            let entries = envelope.data.orders.data;
            if entries.is_empty() {
                break;
            }
            let page_len = entries.len();

            for raw in entries {
                match self.normalize(raw, product_ref, ctx) {
                    Ok(draft) => outcome.drafts.push(draft),
                    Err(reason) => outcome.skipped.push(reason),
                }
            }

            if page_len < self.config.nominal_page_size {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for PagedJsonAdapter {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    async fn fetch(
        &self,
        http: &dyn HttpGet,
        ctx: &CycleContext,
    ) -> Result<FetchOutcome, AdapterError> {
        let mut outcome = FetchOutcome::default();
        for product_ref in &self.config.product_refs {
            // A dead product endpoint must not cost the rest of the source's
            // products their results this cycle.
            if let Err(err) = self
                .fetch_product(http, ctx, product_ref, &mut outcome)
                .await
            {
                warn!(
                    source_id = %self.config.source_id,
                    product_ref = %product_ref,
                    error = %err,
                    "product fetch failed; keeping partial results"
                );
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct ScriptedHttp {
        bodies: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedHttp {
        fn new(bodies: impl IntoIterator<Item = (String, String)>) -> Self {
            Self {
                bodies: bodies.into_iter().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpGet for ScriptedHttp {
        async fn get_text(
            &self,
            _source_id: &str,
            url: &str,
            _bearer_token: Option<&str>,
        ) -> Result<String, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            Ok(self.bodies.get(url).cloned().unwrap_or_else(|| {
                r#"{"data":{"orders":{"data":[]}}}"#.to_string()
            }))
        }
    }

    fn ctx() -> CycleContext {
        CycleContext {
            fetched_at: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).single().unwrap(),
        }
    }

    fn paged_config(max_pages: u32) -> SourceConfig {
        SourceConfig {
            source_id: "wildberries".to_string(),
            kind: AdapterKind::PagedJson,
            endpoint: "https://cards.example/detail?nm={product}&page={page}".to_string(),
            enabled: true,
            alerts: true,
            api_key_env: None,
            product_refs: vec!["306924358".to_string()],
            max_pages,
            nominal_page_size: 10,
        }
    }

    fn page_body(product: &str, first_id: u32, count: usize) -> String {
        let entries = (0..count)
            .map(|i| {
                format!(
                    r#"{{"reviewId":"{product}-{id}","reviewText":"review {id}","dateCreated":"2024-05-0{day}T12:00:00"}}"#,
                    id = first_id + i as u32,
                    day = (i % 9) + 1,
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"data":{{"orders":{{"data":[{entries}]}}}}}}"#)
    }

    fn page_url(product: &str, page: u32) -> String {
        format!("https://cards.example/detail?nm={product}&page={page}")
    }

    #[tokio::test]
    async fn short_page_ends_pagination() {
        let http = ScriptedHttp::new([
            (page_url("306924358", 1), page_body("306924358", 0, 10)),
            (page_url("306924358", 2), page_body("306924358", 10, 10)),
            (page_url("306924358", 3), page_body("306924358", 20, 4)),
        ]);
        let adapter = PagedJsonAdapter {
            config: paged_config(10),
        };

        let outcome = adapter.fetch(&http, &ctx()).await.unwrap();

        assert_eq!(http.call_count(), 3);
        assert_eq!(outcome.drafts.len(), 24);
    }

    #[tokio::test]
    async fn max_pages_caps_pagination_even_on_full_pages() {
        let http = ScriptedHttp::new((1..=6).map(|page| {
            (
                page_url("306924358", page),
                page_body("306924358", (page - 1) * 10, 10),
            )
        }));
        let adapter = PagedJsonAdapter {
            config: paged_config(4),
        };

        let outcome = adapter.fetch(&http, &ctx()).await.unwrap();

        assert_eq!(http.call_count(), 4);
        assert_eq!(outcome.drafts.len(), 40);
    }

    #[tokio::test]
    async fn empty_first_page_ends_pagination_immediately() {
        let http = ScriptedHttp::new([(
            page_url("306924358", 1),
            r#"{"data":{"orders":{"data":[]}}}"#.to_string(),
        )]);
        let adapter = PagedJsonAdapter {
            config: paged_config(5),
        };

        let outcome = adapter.fetch(&http, &ctx()).await.unwrap();

        assert_eq!(http.call_count(), 1);
        assert!(outcome.drafts.is_empty());
    }

    #[tokio::test]
    async fn paged_identities_carry_source_product_and_origin_id() {
        let http = ScriptedHttp::new([(
            page_url("306924358", 1),
            page_body("306924358", 7, 1),
        )]);
        let adapter = PagedJsonAdapter {
            config: paged_config(5),
        };

        let outcome = adapter.fetch(&http, &ctx()).await.unwrap();

        assert_eq!(outcome.drafts[0].identity, "wildberries:306924358:306924358-7");
        assert_eq!(
            outcome.drafts[0].product_ref.as_deref(),
            Some("306924358")
        );
        assert!(!outcome.drafts[0].occurred_at_estimated);
    }

    fn api_config() -> SourceConfig {
        SourceConfig {
            source_id: "stilma".to_string(),
            kind: AdapterKind::BrandApi,
            endpoint: "https://api.example/reviews".to_string(),
            enabled: true,
            alerts: true,
            api_key_env: None,
            product_refs: Vec::new(),
            max_pages: 5,
            nominal_page_size: 10,
        }
    }

    #[tokio::test]
    async fn api_adapter_accepts_aliased_fields_and_skips_malformed_entries() {
        let body = r#"{
            "reviews": [
                {"reviewId": 101, "comment": "Отличное качество", "created_at": "2024-05-20T09:30:00"},
                {"id": "102", "text": "", "date": "2024-05-21T10:00:00"},
                {"text": "Нет идентификатора"},
                "not-an-object",
                {"review_id": "103", "text": "Пришел брак", "date": "not a date"}
            ]
        }"#;
        let http = ScriptedHttp::new([("https://api.example/reviews".to_string(), body.to_string())]);
        let adapter = BrandApiAdapter {
            config: api_config(),
            api_key: None,
        };

        let outcome = adapter.fetch(&http, &ctx()).await.unwrap();

        assert_eq!(outcome.drafts.len(), 2);
        assert_eq!(outcome.drafts[0].identity, "stilma:101");
        assert!(!outcome.drafts[0].occurred_at_estimated);
        assert_eq!(outcome.drafts[1].identity, "stilma:103");
        assert!(outcome.drafts[1].occurred_at_estimated);
        assert_eq!(outcome.drafts[1].occurred_at, ctx().fetched_at);
        assert_eq!(
            outcome.skipped,
            vec![
                SkipReason::EmptyText,
                SkipReason::MissingId,
                SkipReason::ShapeMismatch
            ]
        );
    }

    #[tokio::test]
    async fn api_adapter_fails_on_unrecognized_envelope() {
        let http = ScriptedHttp::new([(
            "https://api.example/reviews".to_string(),
            r#"{"items": []}"#.to_string(),
        )]);
        let adapter = BrandApiAdapter {
            config: api_config(),
            api_key: None,
        };

        let err = adapter.fetch(&http, &ctx()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Decode { .. }));
    }

    fn html_config() -> SourceConfig {
        SourceConfig {
            source_id: "wb-brand-page".to_string(),
            kind: AdapterKind::HtmlFeed,
            endpoint: "https://market.example/brands/stilma".to_string(),
            enabled: true,
            alerts: true,
            api_key_env: None,
            product_refs: Vec::new(),
            max_pages: 5,
            nominal_page_size: 10,
        }
    }

    const FEED_HTML: &str = r#"
        <html><body>
          <div class="feedback__item">
            <p class="feedback__text">Отличный товар, рекомендую</p>
            <span class="feedback__date">15.05.2024</span>
          </div>
          <div class="feedback__item">
            <p class="feedback__text"></p>
            <span class="feedback__date">16.05.2024</span>
          </div>
          <div class="feedback__item">
            <p class="feedback__text">Поломка через неделю</p>
            <span class="feedback__date">вчера</span>
          </div>
        </body></html>
    "#;

    #[tokio::test]
    async fn html_adapter_scrapes_blocks_and_flags_date_fallback() {
        let http = ScriptedHttp::new([(
            "https://market.example/brands/stilma".to_string(),
            FEED_HTML.to_string(),
        )]);
        let adapter = HtmlFeedAdapter {
            config: html_config(),
        };

        let outcome = adapter.fetch(&http, &ctx()).await.unwrap();

        assert_eq!(outcome.drafts.len(), 2);
        assert_eq!(outcome.skipped, vec![SkipReason::EmptyText]);

        let first = &outcome.drafts[0];
        assert_eq!(
            first.occurred_at,
            Utc.with_ymd_and_hms(2024, 5, 15, 0, 0, 0).single().unwrap()
        );
        assert!(!first.occurred_at_estimated);

        let second = &outcome.drafts[1];
        assert!(second.occurred_at_estimated);
        assert_eq!(second.occurred_at, ctx().fetched_at);
    }

    #[test]
    fn content_identity_ignores_trivial_formatting() {
        let a = content_identity("Пришел  брак,\nвозврат оформлен");
        let b = content_identity("  пришел брак, возврат   оформлен ");
        assert_eq!(a, b);
        assert_ne!(a, content_identity("другой отзыв"));
    }

    #[test]
    fn origin_id_accepts_strings_and_numbers_but_not_blank() {
        assert_eq!(
            OriginId::Text("abc".to_string()).into_string().as_deref(),
            Some("abc")
        );
        assert_eq!(OriginId::Number(42).into_string().as_deref(), Some("42"));
        assert_eq!(OriginId::Text("  ".to_string()).into_string(), None);
    }
}
