use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fetch::{Fetch, ScrapeTarget};
use crate::pipeline::{Pipeline, RunStats};
use crate::settings::Settings;
use crate::table::{self, TableError};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Processing,
    Finalizing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Processing => "processing",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct RunSummary {
    /// Data rows in the input (header excluded).
    pub rows: usize,
    /// Lines written to the output, header included.
    pub written: usize,
    pub stats: RunStats,
    pub cancelled: bool,
}

/// One load → scrape → write cycle over the configured table.
pub struct Runner<'a, F> {
    settings: &'a Settings,
    pipeline: Pipeline<F>,
    limit: Option<usize>,
    phase: Phase,
}

impl<'a, F: Fetch> Runner<'a, F> {
    pub fn new(settings: &'a Settings, fetcher: F) -> Self {
        Runner {
            settings,
            pipeline: Pipeline::from_settings(settings, fetcher),
            limit: None,
            phase: Phase::Idle,
        }
    }

    /// Only scrape the first `limit` data rows; the rest are written with empty cells.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.pipeline = self.pipeline.with_progress(show);
        self
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, "phase");
        self.phase = next;
    }

    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<RunSummary, TableError> {
        let settings = self.settings;

        self.enter(Phase::Loading);
        let urls = table::read_column(&settings.input, settings.column, settings.has_header)?;
        info!("total urls: {}", urls.len());

        let take = self.limit.map_or(urls.len(), |n| n.min(urls.len()));
        let targets: Vec<ScrapeTarget> = urls
            .iter()
            .take(take)
            .enumerate()
            .map(|(row, url)| ScrapeTarget {
                row,
                url: url.clone(),
            })
            .collect();

        self.enter(Phase::Processing);
        let report = self.pipeline.run(&targets, cancel).await;

        self.enter(Phase::Finalizing);
        let mut values = report.values;
        values.resize(urls.len(), self.pipeline.extractor().empty());
        info!(
            "total {} scraped: {}",
            self.pipeline.extractor().name(),
            values.iter().filter(|v| !v.is_blank()).count()
        );

        debug!("dumping output csv ...");
        let written = table::write_augmented(
            &settings.input,
            &settings.output,
            settings.out_mode,
            settings.out_delimiter,
            settings.header_names(),
            &values,
        )?;
        info!("wrote {} line(s) to {}", written, settings.output.display());

        self.enter(Phase::Done);
        Ok(RunSummary {
            rows: urls.len(),
            written,
            stats: report.stats,
            cancelled: report.cancelled,
        })
    }
}
