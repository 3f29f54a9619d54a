//! Crawl orchestration.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use scraper::Selector;
use tokio::fs;

use crate::archive::{ArchiveProcessor, PaperHandle};
use crate::config::Config;
use crate::download::Downloader;
use crate::page::{self, Page};
use crate::paper::{PaperOutcome, PaperProcessor};
use crate::task::{Aborted, Pool};
use crate::Error;

/// Archive links on the root page, current and legacy layouts.
pub const ARCHIVE_SELECTORS: &str = r#"a[href^="/paper_files/paper/"], a[href^="/book/"]"#;

static ARCHIVE_LINKS: LazyLock<Selector> = LazyLock::new(|| page::selector(ARCHIVE_SELECTORS));

/// Time left to workers to wind down once their pending tasks have been dropped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Counters gathered over a crawl.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    /// Whether the root page could not be fetched.
    pub root_failed: bool,
    /// Archive links found on the root page.
    pub archives: usize,
    /// Archive pages that could not be fetched.
    pub failed_archives: usize,
    /// Paper tasks submitted to the pool.
    pub papers: usize,
    pub saved: usize,
    /// Papers without any PDF link.
    pub skipped: usize,
    pub failed: usize,
    /// Papers still queued or running when the shutdown timeout elapsed.
    pub abandoned: usize,
}

impl CrawlStats {
    /// Whether every discovery step succeeded, individual papers aside.
    #[inline]
    pub fn is_complete(&self) -> bool {
        !self.root_failed && self.failed_archives == 0
    }

    fn record(&mut self, result: Result<PaperOutcome, Aborted>) {
        match result {
            Ok(PaperOutcome::Saved(_)) => self.saved += 1,
            Ok(PaperOutcome::NoPdfLink) => self.skipped += 1,
            Ok(outcome) => {
                debug_assert!(outcome.is_failure());
                self.failed += 1
            }
            Err(Aborted) => self.abandoned += 1,
        }
    }
}

impl fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} archives ({} failed), {} papers: {} saved, {} without PDF, {} failed, {} abandoned",
            self.archives, self.failed_archives, self.papers, self.saved, self.skipped, self.failed, self.abandoned
        )
    }
}

/// Crawls a paper archive site, from its root page down to the PDF files.
///
/// Root and archive pages are processed one after the other, papers run concurrently on a pool of
/// [`Config::pool_size()`] workers shared by all archives.
#[derive(Debug)]
pub struct Crawler {
    config: Config,
    client: Client,
    archives: ArchiveProcessor,
}

impl Crawler {
    pub fn new(config: Config) -> Result<Self, Error> {
        let client = config.client()?;

        let downloader = Downloader::new(config.output_dir()).with_client(client.clone());
        let papers = PaperProcessor::new(client.clone(), downloader)
            .with_max_attempts(config.max_attempts())
            .with_retry_backoff(config.retry_backoff());
        let archives = ArchiveProcessor::new(client.clone(), papers);

        Ok(Self {
            config,
            client,
            archives,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the whole crawl.
    ///
    /// Individual failures are logged and counted, only an unusable output directory stops the crawl with an error.
    pub async fn run(&self) -> Result<CrawlStats, Error> {
        let output_dir = self.config.output_dir();

        if let Err(err) = fs::create_dir_all(output_dir).await {
            tracing::error!("Cannot create output directory `{}`: {err}", output_dir.display());
            return Err(err.into());
        }

        let mut stats = CrawlStats::default();

        let mut pool = Pool::default();
        pool.start(self.config.pool_size());

        let handles = self.discover(&pool, &mut stats).await;
        stats.papers = handles.len();

        tracing::info!("Discovery done, waiting for {} paper tasks...", handles.len());

        self.drain(handles, &mut stats).await;

        if !pool.close_timeout(SHUTDOWN_GRACE).await {
            tracing::warn!("Some workers did not stop in time and have been aborted.");
        }

        tracing::info!("Crawl finished: {stats}");

        Ok(stats)
    }

    async fn discover(&self, pool: &Pool, stats: &mut CrawlStats) -> Vec<PaperHandle> {
        let root_url = self.config.root_url();

        tracing::info!("Connecting to main page: `{root_url}`");

        let root = match Page::fetch(&self.client, root_url.clone()).await {
            Ok(page) => page,
            Err(err) => {
                tracing::error!("Failed to fetch main page `{root_url}`: {err}");
                stats.root_failed = true;
                return vec![];
            }
        };

        let archive_urls = root.links(&ARCHIVE_LINKS);
        stats.archives = archive_urls.len();

        tracing::info!("Found {} paper archive links.", archive_urls.len());

        let mut seen = HashSet::new();
        let mut handles = vec![];

        for url in archive_urls {
            tracing::info!("Processing paper archive: `{url}`");

            match self.archives.process(url, pool, &mut seen).await {
                Ok(submitted) => handles.extend(submitted),
                Err(_) => stats.failed_archives += 1,
            }
        }

        handles
    }

    /// Collect paper outcomes as they complete, for at most the configured shutdown timeout.
    ///
    /// Handles still pending afterwards are dropped, which cancels their tasks.
    async fn drain(&self, handles: Vec<PaperHandle>, stats: &mut CrawlStats) {
        let timeout = self.config.shutdown_timeout();
        let mut pending: FuturesUnordered<_> = handles.into_iter().collect();

        let collect = async {
            while let Some(result) = pending.next().await {
                stats.record(result);
            }
        };

        if tokio::time::timeout(timeout, collect).await.is_err() {
            stats.abandoned += pending.len();

            tracing::warn!("Abandoning {} paper tasks after {timeout:?}.", pending.len());
        }
    }
}
