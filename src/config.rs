use crate::client::DEFAULT_API_URL;
use crate::export::ExportFormat;
use crate::retry::RetryPolicy;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use std::path::PathBuf;
use std::time::Duration;

/// Everything a download run needs to know, filled from the command line.
///
/// ```
/// use mangadex::{DownloaderConfigBuilder, ExportFormat};
///
/// let config = DownloaderConfigBuilder::default()
///     .languages(vec!["fr".to_string()])
///     .format("cbz-volume".parse::<ExportFormat>().unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency(), 8);
/// ```
#[derive(Debug, Clone, Builder, Getters, CopyGetters)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct DownloaderConfig {
    #[builder(default = "String::from(DEFAULT_API_URL)")]
    #[getset(get = "pub")]
    api_url: String,
    #[builder(default = "vec![String::from(\"en\")]")]
    #[getset(get = "pub")]
    languages: Vec<String>,
    #[builder(default)]
    #[getset(get = "pub")]
    groups: Vec<String>,
    #[builder(default = "PathBuf::from(\".\")")]
    #[getset(get = "pub")]
    path: PathBuf,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    format: ExportFormat,
    #[builder(default)]
    #[getset(get = "pub")]
    retry: RetryPolicy,
    /// Serve compressed images from the data-saver endpoint.
    #[builder(default = "true")]
    #[getset(get_copy = "pub")]
    data_saver: bool,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    replace: bool,
    /// Keep every scanlation of a chapter instead of the first one listed.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    all_groups: bool,
    #[builder(default = "8")]
    #[getset(get_copy = "pub")]
    concurrency: usize,
    #[builder(default = "true")]
    #[getset(get_copy = "pub")]
    verify_checksums: bool,
    #[builder(default)]
    #[getset(get_copy = "pub")]
    no_progress_bar: bool,
    /// Minimum delay between two chapters hitting the at-home server.
    #[builder(default = "Duration::from_secs(2)")]
    #[getset(get_copy = "pub")]
    chapter_interval: Duration,
    #[builder(default = "Duration::from_secs(30)")]
    #[getset(get_copy = "pub")]
    timeout: Duration,
}

impl DownloaderConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.concurrency == Some(0) {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.chapter_interval.is_some_and(|x| x.is_zero()) {
            return Err("chapter interval must be greater than zero".to_string());
        }
        if self.languages.as_ref().is_some_and(|x| x.is_empty()) {
            return Err("at least one language is required".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DownloaderConfigBuilder::default().build().unwrap();
        assert_eq!(config.api_url(), DEFAULT_API_URL);
        assert_eq!(config.languages(), &vec!["en".to_string()]);
        assert!(config.data_saver());
        assert!(config.verify_checksums());
        assert!(!config.replace());
        assert_eq!(config.chapter_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_validation() {
        assert!(DownloaderConfigBuilder::default()
            .concurrency(0usize)
            .build()
            .is_err());
        assert!(DownloaderConfigBuilder::default()
            .chapter_interval(Duration::ZERO)
            .build()
            .is_err());
        assert!(DownloaderConfigBuilder::default()
            .languages(Vec::<String>::new())
            .build()
            .is_err());
    }
}
