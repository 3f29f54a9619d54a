//! Archive pages: paper discovery and submission to the pool.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use reqwest::Client;
use scraper::Selector;
use tracing::Instrument;
use url::Url;

use crate::page::{self, Page};
use crate::paper::{PaperOutcome, PaperProcessor};
use crate::task::{Aborted, Pool, RemoteHandle};
use crate::Error;

/// Paper links across the successive archive page layouts.
pub const PAPER_SELECTORS: &str = r#"ul.paper-list li a[href$="Abstract.html"],
    ul.paper-list li a[href$="Abstract-Conference.html"],
    div.book ul.links li a[href$=".pdf"],
    div.main div.accordion a[href$=".pdf"]"#;

static PAPER_LINKS: LazyLock<Selector> = LazyLock::new(|| page::selector(PAPER_SELECTORS));

/// A remote handle on a submitted paper task.
pub type PaperHandle = RemoteHandle<Result<PaperOutcome, Aborted>>;

/// Discovers the papers of an archive page and hands them over to the pool.
#[derive(Debug, Clone)]
pub struct ArchiveProcessor {
    client: Client,
    papers: Arc<PaperProcessor>,
}

impl ArchiveProcessor {
    pub fn new(client: Client, papers: PaperProcessor) -> Self {
        Self {
            client,
            papers: Arc::new(papers),
        }
    }

    /// Fetch the archive page at `url` and submit every paper found on it to `pool`.
    ///
    /// Papers already in `seen` are skipped, new ones are added to it. Submitted tasks are not awaited: a handle is
    /// returned for each of them instead. A fetch failure is logged and returned, nothing is submitted then.
    pub async fn process(&self, url: Url, pool: &Pool, seen: &mut HashSet<Url>) -> Result<Vec<PaperHandle>, Error> {
        let page = match Page::fetch(&self.client, url.clone()).await {
            Ok(page) => page,
            Err(err) => {
                tracing::error!("Failed to process paper archive `{url}`: {err}");
                return Err(err);
            }
        };

        let links = page.links(&PAPER_LINKS);
        let found = links.len();

        let handles: Vec<_> = links
            .into_iter()
            .filter(|link| seen.insert(link.clone()))
            .map(|link| self.submit(link, pool))
            .collect();

        tracing::info!("Found {found} paper links in archive `{url}` ({} new)", handles.len());

        Ok(handles)
    }

    fn submit(&self, url: Url, pool: &Pool) -> PaperHandle {
        let papers = Arc::clone(&self.papers);
        let span = tracing::info_span!("paper", %url);

        let task = async move {
            match AssertUnwindSafe(papers.process(url.clone())).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!("Paper task panicked: `{url}`");
                    PaperOutcome::Panicked
                }
            }
        };

        let (remote_handle, _) = pool.execute(task.instrument(span));

        remote_handle
    }
}
