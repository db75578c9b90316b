use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::delay::RateLimiter;
use crate::extract::{extract_page, ExtractedValue, Extractor, NodeSelector};
use crate::fetch::{FailureKind, Fetch, FetchOutcome, ScrapeTarget};
use crate::settings::Settings;

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    /// Fetched and parsed, whether or not anything was found.
    pub fetched: usize,
    pub found: usize,
    pub missed: usize,
    pub failed: BTreeMap<FailureKind, usize>,
    /// Never processed because the run was cancelled.
    pub skipped: usize,
}

impl RunStats {
    pub fn failures(&self) -> usize {
        self.failed.values().sum()
    }
}

/// One value per target, in target order.
#[derive(Debug)]
pub struct RunReport {
    pub values: Vec<ExtractedValue>,
    pub stats: RunStats,
    pub cancelled: bool,
}

enum RowResult {
    Extracted(ExtractedValue),
    Failed(FailureKind),
    Cancelled,
}

/// Delay → fetch → parse → extract for every target, keeping results row-aligned.
pub struct Pipeline<F> {
    fetcher: F,
    limiter: RateLimiter,
    /// Serializes delays so the request rate stays bounded with several rows in flight.
    pacing: Mutex<()>,
    selector: NodeSelector,
    extractor: Box<dyn Extractor>,
    concurrency: usize,
    show_progress: bool,
}

impl<F: Fetch> Pipeline<F> {
    pub fn new(
        fetcher: F,
        limiter: RateLimiter,
        selector: NodeSelector,
        extractor: Box<dyn Extractor>,
    ) -> Self {
        Pipeline {
            fetcher,
            limiter,
            pacing: Mutex::new(()),
            selector,
            extractor,
            concurrency: 1,
            show_progress: false,
        }
    }

    pub fn from_settings(settings: &Settings, fetcher: F) -> Self {
        Pipeline::new(
            fetcher,
            settings.rate_limiter(),
            settings.selector.clone(),
            settings.mode.extractor(),
        )
        .with_concurrency(settings.concurrency)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn extractor(&self) -> &dyn Extractor {
        self.extractor.as_ref()
    }

    /// Process every target. The returned `values` always has `targets.len()` entries;
    /// failed, empty and cancelled rows hold the extractor's empty sentinel.
    pub async fn run(&self, targets: &[ScrapeTarget], cancel: &CancellationToken) -> RunReport {
        let total = targets.len();
        let pb = self.progress_bar(total);
        let mut slots: Vec<Option<ExtractedValue>> = vec![None; total];
        let mut stats = RunStats {
            total,
            ..Default::default()
        };

        let mut rows = stream::iter(targets.iter().enumerate())
            .map(|(i, target)| async move { (i, self.process(target, total, cancel).await) })
            .buffer_unordered(self.concurrency);

        while let Some((i, result)) = rows.next().await {
            match result {
                RowResult::Extracted(value) => {
                    debug_assert_eq!(value.arity(), self.extractor.fields().len());
                    stats.fetched += 1;
                    if value.is_blank() {
                        stats.missed += 1;
                    } else {
                        stats.found += 1;
                    }
                    slots[i] = Some(value);
                }
                RowResult::Failed(kind) => {
                    *stats.failed.entry(kind).or_default() += 1;
                    slots[i] = Some(self.extractor.empty());
                }
                RowResult::Cancelled => {}
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let values: Vec<ExtractedValue> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    stats.skipped += 1;
                    self.extractor.empty()
                })
            })
            .collect();

        let cancelled = stats.skipped > 0;
        if cancelled {
            warn!(
                skipped = stats.skipped,
                "run cancelled; {} of {} rows left unprocessed",
                stats.skipped,
                total
            );
        }
        info!(
            "Scraped {} rows ({} fetched, {} failed, {} {} found)",
            total,
            stats.fetched,
            stats.failures(),
            stats.found,
            self.extractor.name()
        );

        RunReport {
            values,
            stats,
            cancelled,
        }
    }

    async fn process(&self, target: &ScrapeTarget, total: usize, cancel: &CancellationToken) -> RowResult {
        if cancel.is_cancelled() {
            return RowResult::Cancelled;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RowResult::Cancelled,
            outcome = async {
                self.pace().await;
                self.fetcher.fetch(target, total).await
            } => outcome,
        };

        match outcome {
            FetchOutcome::Success { body } => RowResult::Extracted(extract_page(
                &body,
                &self.selector,
                self.extractor.as_ref(),
            )),
            FetchOutcome::Failure { kind, .. } => {
                debug!(row = target.row, kind = %kind, "row left empty");
                RowResult::Failed(kind)
            }
        }
    }

    async fn pace(&self) {
        if !self.limiter.is_enabled() {
            return;
        }
        let _turn = self.pacing.lock().await;
        self.limiter.pause().await;
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb
    }
}

/// Canned fetcher for pipeline and runner tests.
#[cfg(test)]
pub(crate) mod stub {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::fetch::{parse_http_url, FailureKind, Fetch, FetchOutcome, ScrapeTarget};

    #[derive(Default)]
    pub struct StubFetcher {
        pages: HashMap<String, FetchOutcome>,
        latency: HashMap<String, Duration>,
        cancel_after: Option<(String, CancellationToken)>,
        log: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(
                url.to_string(),
                FetchOutcome::Success {
                    body: html.as_bytes().to_vec(),
                },
            );
            self
        }

        pub fn fail(mut self, url: &str, kind: FailureKind) -> Self {
            self.pages.insert(
                url.to_string(),
                FetchOutcome::Failure {
                    kind,
                    reason: "stubbed".into(),
                },
            );
            self
        }

        pub fn slow(mut self, url: &str, latency: Duration) -> Self {
            self.latency.insert(url.to_string(), latency);
            self
        }

        /// Cancel `token` once `url` has been fetched.
        pub fn cancel_after(mut self, url: &str, token: CancellationToken) -> Self {
            self.cancel_after = Some((url.to_string(), token));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Fetch for StubFetcher {
        async fn fetch(&self, target: &ScrapeTarget, _total: usize) -> FetchOutcome {
            self.log.lock().unwrap().push(target.url.clone());
            if let Some(latency) = self.latency.get(&target.url) {
                tokio::time::sleep(*latency).await;
            }
            let outcome = if let Err(reason) = parse_http_url(&target.url) {
                FetchOutcome::Failure {
                    kind: FailureKind::InvalidUrl,
                    reason,
                }
            } else {
                self.pages.get(&target.url).cloned().unwrap_or(FetchOutcome::Failure {
                    kind: FailureKind::OtherNetworkError,
                    reason: "no such host".into(),
                })
            };
            if let Some((url, token)) = &self.cancel_after {
                if *url == target.url {
                    token.cancel();
                }
            }
            outcome
        }
    }
}
