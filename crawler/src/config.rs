//! Crawl configuration.

use std::num::NonZeroU8;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use url::Url;

pub const DEFAULT_ROOT_URL: &str = "https://papers.nips.cc";
pub const DEFAULT_OUTPUT_DIR: &str = "pdfs";
pub const DEFAULT_POOL_SIZE: NonZeroU8 = unsafe { NonZeroU8::new_unchecked(20) };
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Everything a [`Crawler`](crate::Crawler) needs to know before starting.
#[derive(Debug, Clone)]
pub struct Config {
    root_url: Url,
    output_dir: PathBuf,
    pool_size: NonZeroU8,
    max_attempts: u32,
    retry_backoff: Duration,
    timeout: Duration,
    shutdown_timeout: Duration,
    user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_url: Url::parse(DEFAULT_ROOT_URL).expect("default root url is valid"),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            pool_size: DEFAULT_POOL_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl Config {
    /// Create a configuration crawling `root_url` into `output_dir`, with defaults for everything else.
    pub fn new(root_url: Url, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_url,
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_pool_size(self, pool_size: NonZeroU8) -> Self {
        Self { pool_size, ..self }
    }

    /// Set the number of detail page fetch attempts per paper (at least 1).
    #[inline]
    pub fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self
        }
    }

    /// Set the base delay between fetch attempts, multiplied by the attempt number.
    #[inline]
    pub fn with_retry_backoff(self, retry_backoff: Duration) -> Self {
        Self { retry_backoff, ..self }
    }

    /// Set the timeout applied to connecting and to every read from the network.
    #[inline]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Set how long to wait for outstanding paper tasks once discovery is over.
    #[inline]
    pub fn with_shutdown_timeout(self, shutdown_timeout: Duration) -> Self {
        Self { shutdown_timeout, ..self }
    }

    #[inline]
    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..self
        }
    }

    #[inline]
    pub fn root_url(&self) -> &Url {
        &self.root_url
    }

    #[inline]
    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_path()
    }

    #[inline]
    pub fn pool_size(&self) -> NonZeroU8 {
        self.pool_size
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[inline]
    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    #[inline]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Build the HTTP client shared by every stage of the crawl.
    ///
    /// The configured timeout bounds connecting and every single read, so that a stalled server is given up on while a
    /// large document still streaming is not. Redirects are followed.
    pub fn client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.timeout)
            .read_timeout(self.timeout)
            .build()
    }
}
