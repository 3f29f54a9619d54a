//! A concurrent crawler downloading the PDF files of a paper archive site.
//!
//! The site is expected to be laid out as a three-level hierarchy:
//!
//! ```text
//!     root index page
//!       L archive page (one per year)
//!         L paper detail page
//!           L PDF file
//! ```
//!
//! Discovery of the first two levels is sequential and cheap. Every paper found is then handed over to a fixed-size
//! [`Pool`](task::Pool) of workers, shared by all archives, which fetches its detail page, looks for a PDF link and
//! streams the document to the output directory. Paper tasks are isolated from each other: whatever happens to one of
//! them only ends up as a [`PaperOutcome`] counted in the final [`CrawlStats`].
//!
//! ```no_run
//! # tokio_test::block_on(async {
//! use crawler::{Config, Crawler};
//!
//! let config = Config::new("https://papers.nips.cc".parse().unwrap(), "pdfs");
//! let stats = Crawler::new(config)?.run().await?;
//!
//! println!("{stats}");
//! # Ok::<_, crawler::Error>(())
//! # });
//! ```

mod error;
pub use error::Error;

pub mod archive;
pub mod config;
pub mod crawl;
pub mod download;
pub mod page;
pub mod paper;
pub mod sanitize;
pub mod task;

pub use archive::ArchiveProcessor;
pub use config::Config;
pub use crawl::{CrawlStats, Crawler};
pub use download::Downloader;
pub use paper::{PaperOutcome, PaperProcessor};
pub use sanitize::sanitize;
