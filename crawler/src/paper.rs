//! Per-paper processing: detail page, PDF link, download.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::download::Downloader;
use crate::page::{LinkRule, Page};

/// PDF link rules, tried in order on a paper detail page.
pub const PDF_LINK_RULES: &[LinkRule] = &[
    LinkRule::HrefSuffix("Paper.pdf"),
    LinkRule::HrefSuffix("Paper-Conference.pdf"),
    LinkRule::Text("Paper PDF"),
    LinkRule::Text("Full Text"),
];

const PDF_SUFFIX: &str = ".pdf";

/// How a single paper task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaperOutcome {
    /// The PDF has been saved to this path.
    Saved(PathBuf),
    /// The detail page has no PDF link.
    NoPdfLink,
    /// The detail page could not be fetched, even after retrying.
    FetchFailed { attempts: u32 },
    /// The PDF could not be downloaded or written.
    DownloadFailed,
    /// The task panicked.
    Panicked,
}

impl PaperOutcome {
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::FetchFailed { .. } | Self::DownloadFailed | Self::Panicked)
    }
}

/// Turns paper detail pages into PDF files.
///
/// Each call to [`PaperProcessor::process()`] is self-contained and never fails: every error ends up logged and reported
/// as a [`PaperOutcome`], so that a paper can never take its siblings down.
#[derive(Debug, Clone)]
pub struct PaperProcessor {
    client: Client,
    downloader: Downloader,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl PaperProcessor {
    pub fn new(client: Client, downloader: Downloader) -> Self {
        Self {
            client,
            downloader,
            max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            retry_backoff: crate::config::DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Set the number of detail page fetch attempts (at least 1).
    #[inline]
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// Wait `attempt * retry_backoff` before the next attempt.
    #[inline]
    pub fn with_retry_backoff(self, retry_backoff: Duration) -> Self {
        Self { retry_backoff, ..self }
    }

    #[inline]
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Process the paper whose detail page lives at `url`.
    ///
    /// Only the detail page fetch is retried. A page without PDF link and a failed download both end the task at once.
    /// Links already pointing to a PDF file are downloaded directly.
    pub async fn process(&self, url: Url) -> PaperOutcome {
        if url.path().ends_with(PDF_SUFFIX) {
            tracing::info!("Downloading direct PDF link: `{url}`");

            let name = file_stem(&url);
            return self.save(url, &name).await;
        }

        let mut attempt = 1;

        let page = loop {
            tracing::info!("Processing paper: `{url}` (attempt {attempt}/{})", self.max_attempts);

            match Page::fetch(&self.client, url.clone()).await {
                Ok(page) => break page,
                Err(err) if attempt >= self.max_attempts => {
                    tracing::error!("Failed to process paper after {attempt} attempts: `{url}`: {err}");
                    return PaperOutcome::FetchFailed { attempts: attempt };
                }
                Err(err) => {
                    tracing::warn!("Failed to fetch paper `{url}` (attempt {attempt}): {err}");

                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
            }
        };

        let Some(pdf_url) = page.find_link(PDF_LINK_RULES) else {
            tracing::info!("No PDF link found for: `{url}`");
            return PaperOutcome::NoPdfLink;
        };

        tracing::info!("Found PDF link: `{pdf_url}`");

        let name = page.title().unwrap_or_else(|| file_stem(page.url()));

        self.save(pdf_url, &name).await
    }

    /// Delay following failed attempt number `attempt`, saturating at [`Duration::MAX`].
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff.checked_mul(attempt).unwrap_or(Duration::MAX)
    }

    async fn save(&self, url: Url, name: &str) -> PaperOutcome {
        match self.downloader.download(url.clone(), name).await {
            Ok(path) => PaperOutcome::Saved(path),
            Err(err) => {
                tracing::error!("Failed to download PDF `{url}`: {err}");
                PaperOutcome::DownloadFailed
            }
        }
    }
}

/// Last non-empty path segment of `url`, without its extension.
fn file_stem(url: &Url) -> String {
    let segment = url.path_segments().and_then(|segments| segments.filter(|s| !s.is_empty()).last()).unwrap_or_default();

    match segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_owned(),
        _ => segment.to_owned(),
    }
}
