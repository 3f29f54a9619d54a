//! Command line entry point of the paper crawler.

use std::num::NonZeroU8;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crawler::config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_OUTPUT_DIR, DEFAULT_POOL_SIZE, DEFAULT_RETRY_BACKOFF, DEFAULT_ROOT_URL,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};
use crawler::{Config, Crawler};
use url::Url;

/// Download every PDF of a paper archive site.
#[derive(Parser, Debug)]
#[command(name = "paper-crawler")]
#[command(author, version, about)]
struct Args {
    /// Root index page linking to the yearly archives
    #[arg(long, default_value = DEFAULT_ROOT_URL)]
    root: Url,

    /// Directory the PDF files are saved to
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Number of papers processed concurrently
    #[arg(short = 'j', long, default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: NonZeroU8,

    /// Detail page fetch attempts per paper
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Base delay between fetch attempts, in seconds (multiplied by the attempt number)
    #[arg(long, default_value_t = DEFAULT_RETRY_BACKOFF.as_secs(), value_parser = clap::value_parser!(u64).range(..=3_600))]
    retry_backoff: u64,

    /// Connect and read inactivity timeout, in seconds
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT.as_secs(), value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// How long to wait for outstanding papers once discovery is over, in seconds
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
    shutdown_timeout: u64,

    /// User agent sent with every request
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Exit with a failure status when the root page or any archive page could not be fetched
    #[arg(long)]
    strict: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn config(&self) -> Config {
        Config::new(self.root.clone(), &self.output)
            .with_pool_size(self.pool_size)
            .with_max_attempts(self.max_attempts)
            .with_retry_backoff(Duration::from_secs(self.retry_backoff))
            .with_timeout(Duration::from_secs(self.timeout))
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout))
            .with_user_agent(self.user_agent.as_str())
    }

    fn log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // RUST_LOG takes precedence over verbosity flags
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level()));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(?args, "CLI arguments parsed");

    let crawler = Crawler::new(args.config()).context("cannot build HTTP client")?;
    let stats = crawler
        .run()
        .await
        .with_context(|| format!("crawl into `{}` failed", args.output.display()))?;

    if args.strict && !stats.is_complete() {
        tracing::error!("Some pages could not be crawled.");
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
