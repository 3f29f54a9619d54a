//! Fetched HTML pages and the queries run against them.
//!
//! A [`Page`] only keeps the final URL and the raw body, parsing happens on every query. This keeps `Page` `Send` so it can
//! be held across suspension points inside pool tasks, which the parsed [`Html`] tree cannot.

use std::sync::LazyLock;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::Error;

/// A rule selecting a link on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRule {
    /// The link target ends with the given suffix.
    HrefSuffix(&'static str),
    /// The visible link text contains the given label, ignoring case.
    Text(&'static str),
}

impl LinkRule {
    fn matches(&self, link: &ElementRef<'_>) -> bool {
        match *self {
            Self::HrefSuffix(suffix) => link.value().attr("href").is_some_and(|href| href.trim().ends_with(suffix)),
            Self::Text(label) => {
                let text: String = link.text().collect();

                text.to_lowercase().contains(&label.to_lowercase())
            }
        }
    }
}

/// An HTML page, as retrieved from its final location.
#[derive(Debug, Clone)]
pub struct Page {
    url: Url,
    body: String,
}

impl Page {
    /// Fetch the page at `url`, following redirects.
    ///
    /// Any transport error, timeout or non-success status is returned as an error.
    pub async fn fetch(client: &Client, url: Url) -> Result<Self, Error> {
        let resp = client.get(url).send().await?.error_for_status()?;

        let url = resp.url().clone();
        let body = resp.text().await?;

        Ok(Self { url, body })
    }

    /// Build a page from an already retrieved body.
    pub fn new(url: Url, body: impl Into<String>) -> Self {
        Self { url, body: body.into() }
    }

    /// The final page URL, used as a base for relative links.
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[inline]
    fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// Return absolute targets of all elements matching `selector`, in document order.
    ///
    /// Elements without an `href` or with one that cannot be resolved are skipped.
    pub fn links(&self, selector: &Selector) -> Vec<Url> {
        self.document().select(selector).filter_map(|link| self.resolve(&link)).collect()
    }

    /// Return the absolute target of the first link matching any of `rules`, trying rules in order.
    ///
    /// ```
    /// # use crawler::page::{LinkRule, Page};
    /// let page = Page::new(
    ///     "https://example.org/paper/".parse().unwrap(),
    ///     r#"<a href="full.html">Full Text</a> <a href="file-Paper.pdf">Download</a>"#,
    /// );
    ///
    /// let link = page.find_link(&[LinkRule::HrefSuffix("Paper.pdf"), LinkRule::Text("Full Text")]);
    ///
    /// assert_eq!(link.unwrap().as_str(), "https://example.org/paper/file-Paper.pdf");
    /// ```
    pub fn find_link(&self, rules: &[LinkRule]) -> Option<Url> {
        static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

        let document = self.document();
        let links: Vec<_> = document.select(&ANCHOR).collect();

        rules
            .iter()
            .find_map(|rule| links.iter().filter(|link| rule.matches(link)).find_map(|link| self.resolve(link)))
    }

    /// Return the whitespace-normalized `<title>` text, if any.
    pub fn title(&self) -> Option<String> {
        static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));

        let document = self.document();
        let title = document.select(&TITLE).next()?;
        let title = title.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");

        (!title.is_empty()).then_some(title)
    }

    fn resolve(&self, link: &ElementRef<'_>) -> Option<Url> {
        let href = link.value().attr("href")?.trim();

        match self.url.join(href) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::debug!("Skipping unresolvable link `{href}` on `{}`: {err}", self.url);
                None
            }
        }
    }
}

/// Parse a selector known at compile time.
///
/// # Panics
/// This function panics if `selectors` is not a valid CSS selector group.
pub(crate) fn selector(selectors: &str) -> Selector {
    match Selector::parse(selectors) {
        Ok(selector) => selector,
        Err(err) => panic!("invalid selector `{selectors}`: {err}"),
    }
}
