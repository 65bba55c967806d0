//! Runs one polling worker per provider and pushes releases through the
//! pipeline: fetch → parse → materiality → classify → store.
//!
//! Workers are independent tokio tasks. The only state they share is the
//! [`Pipeline`]: the HTTP client, the completion pool and the set of URLs
//! already handled. A worker never stops on an error; it logs, sleeps its
//! poll interval and tries again.

use crate::error::{CycleError, OrchestratorError};
use crate::feed::FeedReader;
use crate::fetcher::Fetcher;
use crate::llm::CompletionPool;
use crate::materiality::{MaterialityFilter, MaterialitySettings};
use crate::models::{ArticleDraft, Category, ClassificationResult, FeedItem, FeedMode, FinalArticle};
use crate::providers::Provider;
use crate::store::{SaveOutcome, StoreClient};
use crate::transformer::{ArticleTransformer, TransformerSettings};
use crate::utils::truncate_chars;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Characters of raw text kept as the summary when classification fails.
const FALLBACK_SUMMARY_CHARS: usize = 500;

/// URLs that must not be fetched again during this process.
#[derive(Debug, Default)]
pub struct ProcessedUrls {
    inner: Mutex<HashSet<String>>,
}

impl ProcessedUrls {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().contains(url)
    }

    /// Returns false when the URL was already present.
    pub fn insert(&self, url: &str) -> bool {
        self.lock().insert(url.to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub store_endpoint: String,
    /// Pause after each item that reached the network.
    pub article_delay: Duration,
    pub materiality: MaterialitySettings,
    pub transformer: TransformerSettings,
}

/// Shared stages used by every worker.
pub struct Pipeline {
    fetcher: Arc<Fetcher>,
    pool: Arc<CompletionPool>,
    materiality: Option<MaterialityFilter>,
    transformer: ArticleTransformer,
    store: StoreClient,
    processed: ProcessedUrls,
    article_delay: Duration,
}

impl Pipeline {
    pub fn new(fetcher: Arc<Fetcher>, pool: Arc<CompletionPool>, settings: PipelineSettings) -> Self {
        let materiality = settings
            .materiality
            .enabled
            .then(|| MaterialityFilter::new(pool.clone(), settings.materiality.clone()));
        Self {
            transformer: ArticleTransformer::new(pool.clone(), settings.transformer),
            store: StoreClient::new(fetcher.clone(), settings.store_endpoint),
            fetcher,
            pool,
            materiality,
            processed: ProcessedUrls::default(),
            article_delay: settings.article_delay,
        }
    }

    pub fn processed(&self) -> &ProcessedUrls {
        &self.processed
    }
}

/// Counts for one poll cycle of one provider.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub already_processed: usize,
    pub stored: usize,
    /// Parsed but discarded (no body, no tickers, immaterial).
    pub dropped: usize,
    /// Fetch or store failures; these may be retried in a later cycle.
    pub failed: usize,
}

enum ItemOutcome {
    AlreadyProcessed,
    Stored,
    Dropped,
    Failed,
}

enum Discovery {
    Feed(FeedReader),
    Listing(String),
}

struct Worker {
    provider: Arc<dyn Provider>,
    discovery: Discovery,
    pipeline: Arc<Pipeline>,
}

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    workers: Vec<Worker>,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            workers: Vec::new(),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn provider_count(&self) -> usize {
        self.workers.len()
    }

    /// Attach a provider. Feed-mode providers get their own [`FeedReader`].
    ///
    /// Scrape mode needs a provider that supports listing pages and a
    /// listing URL; feed mode needs a feed URL.
    pub fn register_provider(&mut self, provider: Arc<dyn Provider>) -> Result<(), OrchestratorError> {
        let config = provider.config();
        let misconfigured = |reason: &str| OrchestratorError::Misconfigured {
            provider: config.name.clone(),
            reason: reason.to_string(),
        };

        let discovery = match config.mode {
            FeedMode::Rss => {
                let url = config
                    .feed_url
                    .clone()
                    .ok_or_else(|| misconfigured("feed mode without a feed URL"))?;
                Discovery::Feed(FeedReader::new(self.pipeline.fetcher.clone(), url))
            }
            FeedMode::Scrape => {
                if !provider.supports_listing() {
                    return Err(misconfigured("provider has no listing-page support"));
                }
                let url = config
                    .listing_url
                    .clone()
                    .ok_or_else(|| misconfigured("scrape mode without a listing URL"))?;
                Discovery::Listing(url)
            }
        };

        info!(
            provider = %config.name,
            mode = %config.mode,
            interval_secs = config.poll_interval.as_secs(),
            "Registered provider"
        );
        self.workers.push(Worker {
            provider,
            discovery,
            pipeline: self.pipeline.clone(),
        });
        Ok(())
    }

    /// Poll every provider forever, one task each.
    ///
    /// Only returns early when nothing is registered. A panicking worker is
    /// logged; the others keep running.
    pub async fn run(self) -> Result<(), OrchestratorError> {
        if self.workers.is_empty() {
            return Err(OrchestratorError::NoProviders);
        }
        info!(
            providers = ?self.workers.iter().map(|w| w.provider.name().to_string()).collect::<Vec<_>>(),
            "Starting provider workers"
        );

        let (names, handles): (Vec<_>, Vec<_>) = self
            .workers
            .into_iter()
            .map(|worker| (worker.provider.name().to_string(), tokio::spawn(worker.run_forever())))
            .unzip();

        for (name, result) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                error!(provider = %name, error = %e, "Provider worker crashed");
            }
        }
        Ok(())
    }

    /// Run exactly one cycle for every provider, concurrently.
    pub async fn run_once(&mut self) -> Result<Vec<(String, CycleReport)>, OrchestratorError> {
        if self.workers.is_empty() {
            return Err(OrchestratorError::NoProviders);
        }
        let cycles = self.workers.iter_mut().map(|worker| async move {
            let name = worker.provider.name().to_string();
            let report = worker.cycle().await;
            (name, report)
        });
        Ok(join_all(cycles).await)
    }
}

impl Worker {
    async fn run_forever(mut self) {
        let interval = self.provider.config().poll_interval;
        info!(provider = self.provider.name(), "Polling loop started");
        loop {
            self.cycle().await;
            debug!(provider = self.provider.name(), secs = interval.as_secs(), "Sleeping");
            sleep(interval).await;
        }
    }

    /// One cycle; errors are logged and reported as an empty cycle.
    async fn cycle(&mut self) -> CycleReport {
        match self.poll_once().await {
            Ok(report) => {
                if report.stored > 0 || report.failed > 0 {
                    info!(provider = self.provider.name(), ?report, "Cycle finished");
                } else {
                    debug!(provider = self.provider.name(), ?report, "Cycle finished");
                }
                debug!(stats = ?self.pipeline.pool.stats(), "Completion pool");
                report
            }
            Err(e) => {
                error!(provider = self.provider.name(), error = %e, "Poll cycle failed");
                CycleReport::default()
            }
        }
    }

    #[instrument(level = "info", skip_all, fields(provider = %self.provider.name()))]
    async fn poll_once(&mut self) -> Result<CycleReport, CycleError> {
        let items = self.candidates().await?;
        let mut report = CycleReport {
            candidates: items.len(),
            ..CycleReport::default()
        };

        for item in &items {
            match self.process_item(item).await {
                ItemOutcome::AlreadyProcessed => {
                    report.already_processed += 1;
                    continue;
                }
                ItemOutcome::Stored => report.stored += 1,
                ItemOutcome::Dropped => report.dropped += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
            if !self.pipeline.article_delay.is_zero() {
                sleep(self.pipeline.article_delay).await;
            }
        }
        Ok(report)
    }

    async fn candidates(&mut self) -> Result<Vec<FeedItem>, CycleError> {
        match &mut self.discovery {
            Discovery::Feed(reader) => Ok(reader.fetch_new_items().await?),
            Discovery::Listing(url) => {
                let html = self.pipeline.fetcher.get(url).await?;
                Ok(self.provider.get_listing_urls(&html)?)
            }
        }
    }

    async fn process_item(&self, item: &FeedItem) -> ItemOutcome {
        let pipeline = &self.pipeline;
        let provider = self.provider.name();
        let url = item.link.as_str();

        if pipeline.processed.contains(url) {
            return ItemOutcome::AlreadyProcessed;
        }
        info!(%provider, %url, title = %item.title, "Processing release");

        let html = match pipeline.fetcher.get(url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(%provider, error = %e, "Release fetch failed");
                return ItemOutcome::Failed;
            }
        };

        let Some(draft) = self.provider.parse_article(url, &html, item) else {
            pipeline.processed.insert(url);
            return ItemOutcome::Dropped;
        };
        if draft.tickers.is_empty() {
            info!(%provider, %url, "No NYSE/NASDAQ ticker; skipping");
            pipeline.processed.insert(url);
            return ItemOutcome::Dropped;
        }

        let assessment = match &pipeline.materiality {
            Some(filter) => match filter.assess(&draft.title, &draft.article_text).await {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!(%provider, %url, error = %e, "Materiality check failed; continuing without it");
                    None
                }
            },
            None => None,
        };
        let gate_closed = pipeline
            .materiality
            .as_ref()
            .is_some_and(|f| f.settings().drop_immaterial);
        if let Some(a) = assessment.as_ref().filter(|a| gate_closed && !a.is_material) {
            info!(%provider, %url, score = a.score, reason = %a.reason, "Immaterial; skipping");
            pipeline.processed.insert(url);
            return ItemOutcome::Dropped;
        }

        let classification = match pipeline
            .transformer
            .transform(&draft.title, &draft.article_text, None)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(%provider, %url, error = %e, "Classification failed; storing raw summary");
                fallback_classification(&draft)
            }
        };

        let article = FinalArticle::assemble(draft, classification, assessment.as_ref(), Utc::now());
        match pipeline.store.save(&article).await {
            Ok(SaveOutcome::Created | SaveOutcome::AlreadyExists) => {
                pipeline.processed.insert(url);
                ItemOutcome::Stored
            }
            Err(e) => {
                error!(%provider, %url, error = %e, "Store rejected article; will retry next cycle");
                ItemOutcome::Failed
            }
        }
    }
}

/// Stand-in classification when the model could not be reached.
fn fallback_classification(draft: &ArticleDraft) -> ClassificationResult {
    let head = truncate_chars(&draft.article_text, FALLBACK_SUMMARY_CHARS);
    let summary = if head.len() < draft.article_text.len() {
        format!("{head}...")
    } else {
        head.to_string()
    };
    ClassificationResult {
        title: draft.title.clone(),
        bullets: Vec::new(),
        summary,
        category: Category::General,
        confidence: 0.0,
    }
}
