//! Ingestion and report pipeline orchestration for revpulse.
//!
//! Ties the crates together: configuration, the sentiment/defect classifier,
//! the alert dispatcher, windowed aggregation with report rendering, the
//! calendar scheduler, and the per-cycle orchestration that fans adapter
//! fetches out and serializes their results into the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, Utc, Weekday};
use revpulse_adapters::{adapter_for, CycleContext, SourceAdapter, SourceConfig};
use revpulse_core::{
    Review, Sentiment, SentimentBreakdown, SourceWindowSummary, TimeRange,
};
use revpulse_store::{
    HttpClientConfig, HttpGet, InsertOutcome, ReviewStore, StoreError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "revpulse-pipeline";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("unparseable time of day {0:?} (expected HH:MM)")]
    BadTime(String),
    #[error("unknown weekday {0:?}")]
    BadWeekday(String),
    #[error("monthly day {0} outside 1..=28")]
    BadMonthDay(u32),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: "revpulse-bot/0.1".to_string(),
        }
    }
}

impl HttpSettings {
    pub fn client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: StdDuration::from_secs(self.timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub positive_above: f64,
    pub negative_below: f64,
    pub defect_keywords: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            positive_above: 0.1,
            negative_below: -0.1,
            defect_keywords: default_defect_keywords(),
        }
    }
}

impl ClassifierSettings {
    pub fn thresholds(&self) -> SentimentThresholds {
        SentimentThresholds {
            positive_above: self.positive_above,
            negative_below: self.negative_below,
        }
    }
}

fn default_defect_keywords() -> Vec<String> {
    ["брак", "некачественный", "поломка", "дефект", "возврат"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Raw schedule rule as written in the config file; `build` converts it to
/// the validated [`ScheduleRule`], failing closed on bad times or days.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "every", rename_all = "lowercase")]
pub enum ScheduleRuleConfig {
    Day { at: String },
    Week { weekday: String, at: String },
    Month { day: u32, at: String },
}

impl ScheduleRuleConfig {
    pub fn build(&self) -> Result<ScheduleRule, ConfigError> {
        match self {
            ScheduleRuleConfig::Day { at } => Ok(ScheduleRule::Daily {
                at: parse_time_of_day(at)?,
            }),
            ScheduleRuleConfig::Week { weekday, at } => Ok(ScheduleRule::Weekly {
                weekday: weekday
                    .parse::<Weekday>()
                    .map_err(|_| ConfigError::BadWeekday(weekday.clone()))?,
                at: parse_time_of_day(at)?,
            }),
            ScheduleRuleConfig::Month { day, at } => {
                if !(1..=28).contains(day) {
                    return Err(ConfigError::BadMonthDay(*day));
                }
                Ok(ScheduleRule::Monthly {
                    day: *day,
                    at: parse_time_of_day(at)?,
                })
            }
        }
    }
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ConfigError::BadTime(raw.to_string()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportScheduleConfig {
    pub period: ReportPeriod,
    pub schedule: ScheduleRuleConfig,
}

/// Full configuration surface, read once at process start. No hot reload.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default)]
    pub http: HttpSettings,
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default = "default_ingest_schedule")]
    pub ingest: ScheduleRuleConfig,
    #[serde(default = "default_report_schedules")]
    pub reports: Vec<ReportScheduleConfig>,
}

fn default_database_url() -> String {
    "sqlite://revpulse.db?mode=rwc".to_string()
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

fn default_ingest_schedule() -> ScheduleRuleConfig {
    ScheduleRuleConfig::Day {
        at: "10:00".to_string(),
    }
}

fn default_report_schedules() -> Vec<ReportScheduleConfig> {
    vec![
        ReportScheduleConfig {
            period: ReportPeriod::Weekly,
            schedule: ScheduleRuleConfig::Week {
                weekday: "mon".to_string(),
                at: "10:05".to_string(),
            },
        },
        ReportScheduleConfig {
            period: ReportPeriod::Monthly,
            schedule: ScheduleRuleConfig::Month {
                day: 1,
                at: "10:10".to_string(),
            },
        },
    ]
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: AppConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
                path: path.display().to_string(),
                source,
            })?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.ingest.build()?;
        for report in &self.reports {
            report.schedule.build()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("polarity model failure: {0}")]
pub struct PolarityError(pub String);

/// External text-polarity collaborator: a scalar score in [-1, 1].
pub trait PolarityModel: Send + Sync {
    fn score(&self, text: &str) -> Result<f64, PolarityError>;
}

/// Built-in word-list scorer. Counts positive and negative stem hits and
/// returns their normalized difference; zero when no stem matches.
pub struct WordListModel {
    positive: Vec<String>,
    negative: Vec<String>,
}

impl Default for WordListModel {
    fn default() -> Self {
        let stems = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            positive: stems(&[
                "отличн",
                "хорош",
                "супер",
                "рекоменду",
                "нравится",
                "доволен",
                "great",
                "good",
                "excellent",
                "love",
            ]),
            negative: stems(&[
                "плох",
                "ужасн",
                "брак",
                "дефект",
                "полом",
                "не работает",
                "разочаров",
                "возврат",
                "bad",
                "terrible",
                "awful",
            ]),
        }
    }
}

impl PolarityModel for WordListModel {
    fn score(&self, text: &str) -> Result<f64, PolarityError> {
        let lower = text.to_lowercase();
        let positive = self
            .positive
            .iter()
            .filter(|stem| lower.contains(stem.as_str()))
            .count();
        let negative = self
            .negative
            .iter()
            .filter(|stem| lower.contains(stem.as_str()))
            .count();
        if positive + negative == 0 {
            return Ok(0.0);
        }
        Ok((positive as f64 - negative as f64) / (positive + negative) as f64)
    }
}

/// Sentiment cutoffs. The boundary values themselves classify as neutral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentThresholds {
    pub positive_above: f64,
    pub negative_below: f64,
}

impl Default for SentimentThresholds {
    fn default() -> Self {
        Self {
            positive_above: 0.1,
            negative_below: -0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub sentiment: Sentiment,
    pub is_defect_signal: bool,
}

/// Assigns sentiment and the defect flag. Pure given the configured
/// thresholds/keywords and a deterministic polarity model.
pub struct Classifier {
    model: Arc<dyn PolarityModel>,
    thresholds: SentimentThresholds,
    keywords: Vec<String>,
}

impl Classifier {
    pub fn new(
        model: Arc<dyn PolarityModel>,
        thresholds: SentimentThresholds,
        keywords: &[String],
    ) -> Self {
        Self {
            model,
            thresholds,
            keywords: keywords.iter().map(|kw| kw.to_lowercase()).collect(),
        }
    }

    pub fn from_settings(model: Arc<dyn PolarityModel>, settings: &ClassifierSettings) -> Self {
        Self::new(model, settings.thresholds(), &settings.defect_keywords)
    }

    pub fn classify(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        let is_defect_signal = self.keywords.iter().any(|kw| lower.contains(kw.as_str()));

        // A model failure never drops the record: sentiment falls back to
        // neutral and the keyword flag above still stands.
        let sentiment = match self.model.score(text) {
            Ok(score) if score > self.thresholds.positive_above => Sentiment::Positive,
            Ok(score) if score < self.thresholds.negative_below => Sentiment::Negative,
            Ok(_) => Sentiment::Neutral,
            Err(err) => {
                warn!(error = %err, "polarity model failed; falling back to neutral");
                Sentiment::Neutral
            }
        };

        Classification {
            sentiment,
            is_defect_signal,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub identity: String,
    pub source_id: String,
    pub occurred_at: DateTime<Utc>,
    pub text: String,
}

/// Decides which newly stored reviews warrant immediate notification.
/// Runs only on the `Inserted` outcome, so an identity alerts at most once
/// across cycles.
pub struct AlertDispatcher;

impl AlertDispatcher {
    pub fn evaluate(outcome: InsertOutcome, review: &Review) -> Option<AlertEvent> {
        if outcome == InsertOutcome::Inserted
            && review.sentiment == Sentiment::Negative
            && review.is_defect_signal
        {
            Some(AlertEvent {
                identity: review.identity.clone(),
                source_id: review.source_id.clone(),
                occurred_at: review.occurred_at,
                text: review.text.clone(),
            })
        } else {
            None
        }
    }
}

pub fn render_alert(event: &AlertEvent) -> String {
    format!(
        "Defect complaint!\nreview: {}\nsource: {}\ndate: {}\ntext: {}",
        event.identity,
        event.source_id,
        event.occurred_at.format("%Y-%m-%d %H:%M"),
        event.text,
    )
}

/// Delivery collaborator; the concrete transport (chat bot, messaging API)
/// lives outside this core.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &AlertEvent, rendered: &str) -> anyhow::Result<()>;
}

/// Default sink: surfaces alerts in the process log.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, event: &AlertEvent, rendered: &str) -> anyhow::Result<()> {
        warn!(
            identity = %event.identity,
            source_id = %event.source_id,
            "{rendered}"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aggregation + reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportPeriod::Weekly => "weekly",
            ReportPeriod::Monthly => "monthly",
        }
    }

    /// Trailing window ending at `end`, half-open.
    pub fn window_ending(&self, end: DateTime<Utc>) -> TimeRange {
        let days = match self {
            ReportPeriod::Weekly => 7,
            ReportPeriod::Monthly => 30,
        };
        TimeRange::new(end - Duration::days(days), end)
    }
}

/// Count reviews per source whose `occurred_at` falls in the range,
/// partitioned by sentiment. Pure over the store's read contract; sources
/// stay separate so each one's figures remain attributable.
pub async fn summarize(
    store: &dyn ReviewStore,
    source_ids: &[String],
    range: TimeRange,
) -> Result<Vec<SourceWindowSummary>, StoreError> {
    let mut summaries = Vec::with_capacity(source_ids.len());
    for source_id in source_ids {
        let reviews = store.query(source_id, range).await?;
        let mut counts = SentimentBreakdown::default();
        for review in &reviews {
            counts.record(review.sentiment);
        }
        summaries.push(SourceWindowSummary {
            source_id: source_id.clone(),
            range,
            counts,
        });
    }
    Ok(summaries)
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub period: ReportPeriod,
    pub generated_at: DateTime<Utc>,
    pub body: String,
}

pub fn render_report(
    period: ReportPeriod,
    range: TimeRange,
    summaries: &[SourceWindowSummary],
) -> String {
    let mut lines = vec![
        format!("# {} review report", capitalize(period.as_str())),
        String::new(),
        format!(
            "Window: {} to {} (end exclusive)",
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d"),
        ),
        String::new(),
    ];
    for summary in summaries {
        lines.push(format!("## {}", summary.source_id));
        lines.push(format!("- total: {}", summary.counts.total));
        lines.push(format!("- positive: {}", summary.counts.positive));
        lines.push(format!("- neutral: {}", summary.counts.neutral));
        lines.push(format!("- negative: {}", summary.counts.negative));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Delivery collaborator for rendered reports; the concrete destination
/// (email body, uploaded file) lives outside this core.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn deliver(&self, report: &RenderedReport) -> anyhow::Result<()>;
}

/// Default sink: timestamped markdown files under a reports directory.
pub struct FileReportSink {
    dir: PathBuf,
}

impl FileReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn deliver(&self, report: &RenderedReport) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!(
            "{}_{}.md",
            report.generated_at.format("%Y%m%d_%H%M%S"),
            report.period.as_str(),
        );
        let path = self.dir.join(name);
        tokio::fs::write(&path, &report.body).await?;
        info!(path = %path.display(), "report written");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Calendar rule for one trigger. `Monthly` uses true calendar-month
/// arithmetic: one firing per month at the configured day and time; the day
/// is validated to 1..=28 at config load so every month has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRule {
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
    Monthly { day: u32, at: NaiveTime },
}

impl ScheduleRule {
    /// Next scheduled instant strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        match *self {
            ScheduleRule::Daily { at } => {
                let candidate = today.and_time(at).and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            ScheduleRule::Weekly { weekday, at } => {
                let days_ahead = (weekday.num_days_from_monday() + 7
                    - today.weekday().num_days_from_monday())
                    % 7;
                let candidate = (today + Duration::days(days_ahead as i64))
                    .and_time(at)
                    .and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(7)
                }
            }
            ScheduleRule::Monthly { day, at } => {
                // day is validated to 1..=28 at config load
                let this_month = today.with_day(day).unwrap_or(today);
                let candidate = this_month.and_time(at).and_utc();
                if candidate > now {
                    candidate
                } else {
                    (this_month + Months::new(1)).and_time(at).and_utc()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Due,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Ingest,
    Report(ReportPeriod),
}

#[derive(Debug)]
struct Trigger {
    name: String,
    rule: ScheduleRule,
    job: JobKind,
    next_due: DateTime<Utc>,
    state: TriggerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueJob {
    pub name: String,
    pub job: JobKind,
}

/// Cooperative trigger set. Exposes "time until next due" so tests drive
/// time without sleeping; at most one job runs at a time.
#[derive(Debug, Default)]
pub struct Scheduler {
    triggers: Vec<Trigger>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trigger(
        &mut self,
        name: impl Into<String>,
        rule: ScheduleRule,
        job: JobKind,
        now: DateTime<Utc>,
    ) {
        self.triggers.push(Trigger {
            name: name.into(),
            rule,
            job,
            next_due: rule.next_after(now),
            state: TriggerState::Idle,
        });
    }

    pub fn time_until_next_due(&self, now: DateTime<Utc>) -> Option<StdDuration> {
        self.triggers
            .iter()
            .map(|t| t.next_due)
            .min()
            .map(|due| (due - now).to_std().unwrap_or(StdDuration::ZERO))
    }

    /// Mark triggers whose instant has passed as due and hand out the
    /// earliest one, moving it to `Running`. Returns `None` while a job is
    /// running or nothing is due.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<DueJob> {
        if self.triggers.iter().any(|t| t.state == TriggerState::Running) {
            return None;
        }
        for trigger in &mut self.triggers {
            if trigger.state == TriggerState::Idle && now >= trigger.next_due {
                trigger.state = TriggerState::Due;
            }
        }
        let index = self
            .triggers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == TriggerState::Due)
            .min_by_key(|(_, t)| t.next_due)
            .map(|(i, _)| i)?;
        let trigger = &mut self.triggers[index];
        trigger.state = TriggerState::Running;
        Some(DueJob {
            name: trigger.name.clone(),
            job: trigger.job,
        })
    }

    /// Recompute the trigger's next instant from its rule and return it to
    /// `Idle`.
    pub fn complete(&mut self, name: &str, now: DateTime<Utc>) {
        if let Some(trigger) = self.triggers.iter_mut().find(|t| t.name == name) {
            trigger.state = TriggerState::Idle;
            trigger.next_due = trigger.rule.next_after(now);
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline orchestration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub drafts: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub alerts_sent: usize,
}

/// The assembled pipeline. All collaborators are injected; there are no
/// process-wide handles.
pub struct Pipeline {
    config: AppConfig,
    store: Arc<dyn ReviewStore>,
    http: Arc<dyn HttpGet>,
    classifier: Classifier,
    alert_sink: Arc<dyn AlertSink>,
    report_sink: Arc<dyn ReportSink>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ReviewStore>,
        http: Arc<dyn HttpGet>,
        classifier: Classifier,
        alert_sink: Arc<dyn AlertSink>,
        report_sink: Arc<dyn ReportSink>,
    ) -> Self {
        Self {
            config,
            store,
            http,
            classifier,
            alert_sink,
            report_sink,
        }
    }

    /// One ingestion cycle across all enabled configured sources.
    pub async fn run_cycle(&self) -> Result<CycleSummary, StoreError> {
        let adapters = self
            .config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .map(adapter_for)
            .collect();
        self.run_cycle_with(adapters).await
    }

    /// Cycle body with explicit adapters. Fetches fan out concurrently;
    /// store writes stay serialized so the store's atomic insert is the only
    /// synchronization needed. A store failure aborts the cycle (it is
    /// retried at the next trigger); a source failure only costs that
    /// source's results.
    pub async fn run_cycle_with(
        &self,
        adapters: Vec<Box<dyn SourceAdapter>>,
    ) -> Result<CycleSummary, StoreError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let ctx = CycleContext {
            fetched_at: started_at,
        };
        info!(%run_id, sources = adapters.len(), "ingestion cycle started");

        let mut tasks = JoinSet::new();
        for adapter in adapters {
            let http = Arc::clone(&self.http);
            tasks.spawn(async move {
                let source_id = adapter.source_id().to_string();
                let outcome = adapter.fetch(http.as_ref(), &ctx).await;
                (source_id, outcome)
            });
        }

        let mut summary = CycleSummary {
            run_id,
            started_at,
            finished_at: started_at,
            sources_ok: 0,
            sources_failed: 0,
            drafts: 0,
            skipped: 0,
            inserted: 0,
            already_present: 0,
            alerts_sent: 0,
        };

        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source_id, Ok(outcome))) => {
                    summary.sources_ok += 1;
                    summary.skipped += outcome.skipped.len();
                    for reason in &outcome.skipped {
                        debug!(source_id = %source_id, %reason, "entry skipped during normalization");
                    }
                    fetched.push((source_id, outcome));
                }
                Ok((source_id, Err(err))) => {
                    warn!(source_id = %source_id, error = %err, "source fetch failed; cycle continues");
                    summary.sources_failed += 1;
                }
                Err(err) => {
                    warn!(error = %err, "source fetch task aborted");
                    summary.sources_failed += 1;
                }
            }
        }

        let alerts_enabled: HashMap<&str, bool> = self
            .config
            .sources
            .iter()
            .map(|s| (s.source_id.as_str(), s.alerts))
            .collect();

        for (source_id, outcome) in fetched {
            let alerts = alerts_enabled
                .get(source_id.as_str())
                .copied()
                .unwrap_or(true);
            summary.drafts += outcome.drafts.len();
            for draft in outcome.drafts {
                let classification = self.classifier.classify(&draft.text);
                let review =
                    draft.into_review(classification.sentiment, classification.is_defect_signal);
                match self.store.insert_if_new(&review).await? {
                    InsertOutcome::Inserted => {
                        summary.inserted += 1;
                        if !alerts {
                            continue;
                        }
                        if let Some(event) =
                            AlertDispatcher::evaluate(InsertOutcome::Inserted, &review)
                        {
                            let rendered = render_alert(&event);
                            match self.alert_sink.deliver(&event, &rendered).await {
                                Ok(()) => summary.alerts_sent += 1,
                                Err(err) => {
                                    warn!(identity = %event.identity, error = %err, "alert delivery failed");
                                }
                            }
                        }
                    }
                    InsertOutcome::AlreadyPresent => summary.already_present += 1,
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            %run_id,
            inserted = summary.inserted,
            already_present = summary.already_present,
            skipped = summary.skipped,
            alerts = summary.alerts_sent,
            failed_sources = summary.sources_failed,
            "ingestion cycle finished"
        );
        Ok(summary)
    }

    /// Build, render, and deliver one report for the period's trailing
    /// window ending at `now`.
    pub async fn run_report(
        &self,
        period: ReportPeriod,
        now: DateTime<Utc>,
    ) -> anyhow::Result<RenderedReport> {
        let range = period.window_ending(now);
        let source_ids: Vec<String> = self
            .config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.source_id.clone())
            .collect();
        let summaries = summarize(self.store.as_ref(), &source_ids, range).await?;
        let body = render_report(period, range, &summaries);
        let report = RenderedReport {
            period,
            generated_at: now,
            body,
        };
        self.report_sink.deliver(&report).await?;
        info!(period = period.as_str(), sources = summaries.len(), "report delivered");
        Ok(report)
    }

    /// Long-running cooperative loop: sleep until the earliest trigger is
    /// due, run that one job to completion, reschedule, repeat. A failed
    /// job is logged and retried at its next instant; nothing here crashes
    /// the process.
    pub async fn run_scheduler(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut scheduler = Scheduler::new();
        scheduler.add_trigger("ingest", self.config.ingest.build()?, JobKind::Ingest, now);
        for (index, report) in self.config.reports.iter().enumerate() {
            scheduler.add_trigger(
                format!("report-{index}-{}", report.period.as_str()),
                report.schedule.build()?,
                JobKind::Report(report.period),
                now,
            );
        }
        info!(triggers = self.config.reports.len() + 1, "scheduler loop started");

        loop {
            let now = Utc::now();
            match scheduler.poll(now) {
                Some(due) => {
                    info!(trigger = %due.name, "trigger due");
                    match due.job {
                        JobKind::Ingest => {
                            if let Err(err) = self.run_cycle().await {
                                error!(error = %err, "ingestion cycle aborted; retrying at next trigger");
                            }
                        }
                        JobKind::Report(period) => {
                            if let Err(err) = self.run_report(period, Utc::now()).await {
                                error!(error = %err, "report job failed");
                            }
                        }
                    }
                    scheduler.complete(&due.name, Utc::now());
                }
                None => {
                    let wait = scheduler
                        .time_until_next_due(now)
                        .unwrap_or(StdDuration::from_secs(60))
                        .max(StdDuration::from_millis(250));
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
