//! Scheduled synchronization of the quote store with the content source.
//!
//! One pass fetches the whole feed, downloads the background images that
//! changed, and applies the result to the store in a single transaction. A
//! pass that fails anywhere before the transaction leaves the store exactly as
//! it was, so request serving keeps working from the last good catalog.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::RenderCache;
use crate::error::Error;
use crate::quote::Quote;
use crate::schedule::SyncSchedule;
use crate::source::{QuoteSource, SourceQuote};
use crate::store::Store;

/// Wait after a failed pass before rescheduling.
pub const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Quotes written to the store
    pub synced: usize,
    /// Feed entries ignored (blank id or text, duplicate id)
    pub skipped: usize,
    /// Stored quotes removed because the feed no longer lists them
    pub deleted: usize,
    /// Background images downloaded
    pub images_fetched: usize,
    /// Background downloads that failed
    pub image_failures: usize,
}

/// Pulls the catalog from a [`QuoteSource`] into the [`Store`].
#[derive(Debug)]
pub struct SyncJob<S> {
    source: S,
    store: Store,
    cache: Option<Arc<RenderCache>>,
    schedule: SyncSchedule,
}

struct StoredImage {
    url: Option<String>,
    has_bytes: bool,
}

impl<S: QuoteSource> SyncJob<S> {
    /// Create a job running on the default schedule (daily at midnight UTC).
    pub fn new(source: S, store: Store) -> Self {
        Self {
            source,
            store,
            cache: None,
            schedule: SyncSchedule::default(),
        }
    }

    /// Clear `cache` after every successful pass.
    #[must_use]
    pub fn with_cache(mut self, cache: Option<Arc<RenderCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Run on `schedule` instead of the default.
    #[must_use]
    pub fn with_schedule(mut self, schedule: SyncSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Run one pass.
    pub async fn run_once(&self) -> Result<SyncReport, Error> {
        let started = std::time::Instant::now();
        let entries = self.source.fetch_quotes().await?;

        let stored: HashMap<String, StoredImage> = self
            .store
            .image_index()?
            .into_iter()
            .map(|(id, url, has_bytes)| (id, StoredImage { url, has_bytes }))
            .collect();

        let mut report = SyncReport::default();
        let mut seen = HashSet::new();
        let mut quotes = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.id.trim().is_empty() || entry.text.trim().is_empty() {
                tracing::debug!(id = %entry.id, "Skipping feed entry without id or text");
                report.skipped += 1;
                continue;
            }
            if !seen.insert(entry.id.clone()) {
                tracing::warn!(id = %entry.id, "Duplicate quote id in feed, keeping the first");
                report.skipped += 1;
                continue;
            }
            let previous = stored.get(&entry.id);
            let quote = self.build_quote(entry, previous, &mut report).await?;
            quotes.push(quote);
        }

        let change = self.store.apply_catalog(&quotes)?;
        report.synced = change.upserted;
        report.deleted = change.deleted;

        if let Some(cache) = &self.cache {
            cache.clear();
        }

        tracing::info!(
            synced = report.synced,
            skipped = report.skipped,
            deleted = report.deleted,
            images_fetched = report.images_fetched,
            image_failures = report.image_failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync complete"
        );
        Ok(report)
    }

    async fn build_quote(
        &self,
        entry: SourceQuote,
        stored: Option<&StoredImage>,
        report: &mut SyncReport,
    ) -> Result<Quote, Error> {
        let eligible = entry.is_eligible();
        let mut quote = Quote::new(entry.id, entry.text)
            .with_title(entry.title.unwrap_or_default())
            .with_author(entry.author.unwrap_or_default())
            .with_display(eligible);

        let previous_url = stored.and_then(|s| s.url.clone());
        let has_bytes = stored.map(|s| s.has_bytes).unwrap_or(false);
        let unchanged = entry.image_url.is_some() && entry.image_url == previous_url && has_bytes;

        match entry.image_url {
            Some(url) if eligible && !unchanged => match self.source.fetch_image(&url).await {
                Ok(bytes) => {
                    report.images_fetched += 1;
                    quote.image_url = Some(url);
                    quote.background = Some(bytes);
                }
                Err(err) => {
                    tracing::warn!(quote_id = %quote.id, url = %url, error = %err, "Image download failed");
                    report.image_failures += 1;
                    // Keep the old URL so the next pass tries again
                    quote.image_url = previous_url;
                    quote.background = self.store.background(&quote.id)?;
                }
            },
            Some(url) if url_matches(&previous_url, &url) => {
                quote.image_url = Some(url);
                quote.background = self.store.background(&quote.id)?;
            }
            // Ineligible with a new URL: fetched once it is displayed
            Some(_) => {
                quote.image_url = previous_url;
                quote.background = self.store.background(&quote.id)?;
            }
            None => {}
        }
        Ok(quote)
    }

    /// Run passes on the schedule until the task is dropped.
    ///
    /// Failures are logged and retried after [`RETRY_DELAY`]; they never stop
    /// the loop.
    pub async fn run_forever(self) {
        loop {
            let wait = match self.schedule.until_next_run() {
                Ok(wait) => wait,
                Err(err) => {
                    tracing::error!(error = %err, "Invalid sync schedule, background sync stopped");
                    return;
                }
            };
            tracing::info!(wait_secs = wait.as_secs(), "Waiting for next scheduled sync");
            tokio::time::sleep(wait).await;

            if let Err(err) = self.run_once().await {
                tracing::error!(
                    error = %err,
                    retry_secs = RETRY_DELAY.as_secs(),
                    "Sync failed, keeping last good catalog"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

fn url_matches(previous: &Option<String>, url: &str) -> bool {
    previous.as_deref() == Some(url)
}
