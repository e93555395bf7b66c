mod client;
mod config;
pub mod export;
mod job;
mod model;
mod pipeline;
mod progress;
mod query;
mod resolver;
mod retry;
mod service;

pub use client::{ApiClient, DEFAULT_API_URL};
pub use config::{DownloaderConfig, DownloaderConfigBuilder, DownloaderConfigBuilderError};
pub use export::{Container, ExportFormat, Grouping};
pub use job::{DownloadJob, JobState};
pub use model::{Chapter, Manga, Page};
pub use pipeline::{Pipeline, Report};
pub use progress::{LogWriter, ProgressReporter};
pub use query::{ChapterList, FeedQuery};
pub use resolver::{ChapterSelection, Reference, Resolved, Resolver};
pub use retry::{classify_error, classify_status, FailureType, RetryDecision, RetryPolicy};
pub use service::{ChapterDownload, ChapterDownloadRequest, ChapterDownloader, FailedPage};

#[derive(Debug, thiserror::Error)]
pub enum MangadexError {
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
    #[error(transparent)]
    DeserializeError(#[from] serde_json::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    ZipError(#[from] zip::result::ZipError),
    #[error(transparent)]
    ImageError(#[from] image::ImageError),
    #[error(transparent)]
    ConfigError(#[from] DownloaderConfigBuilderError),
    #[error("invalid url '{0}'")]
    UrlParseError(String),
    #[error("mangadex responded with {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("chapter {0} is hosted outside of mangadex")]
    ExternalChapter(String),
    #[error("checksum mismatch for '{file}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },
    #[error("unknown format '{0}'")]
    UnknownFormat(String),
    #[error("job '{name}' cannot go from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: String,
        to: String,
    },
    #[error("{failed} page(s) of '{name}' could not be downloaded")]
    IncompleteDownload { name: String, failed: usize },
    #[error("'{0}' has no page to export")]
    EmptyExport(String),
}
