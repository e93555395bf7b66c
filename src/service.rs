use super::MangadexError;
use crate::client::ApiClient;
use crate::model::Page;
use crate::resolver::Reference;
use crate::retry::{FailureType, RetryDecision};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use getset::Getters;
use indicatif::ProgressBar;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tower::Service;
use tracing::{debug, debug_span, instrument, warn, Instrument};

const DEFAULT_CONCURRENCY: usize = 8;

/// Downloads every page of one chapter. Wrap it with
/// `ServiceBuilder::rate_limit` to stay under the at-home server limits.
#[derive(Debug, Clone)]
pub struct ChapterDownloader {
    client: ApiClient,
    concurrency: usize,
    verify_checksums: bool,
}

pub struct ChapterDownloadRequest {
    pub(crate) id: String,
    pub(crate) data_saver: bool,
    pub(crate) path: PathBuf,
    pub(crate) progress: Option<ProgressBar>,
}

impl fmt::Debug for ChapterDownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChapterDownloadRequest")
            .field("id", &self.id)
            .field("data_saver", &self.data_saver)
            .field("path", &self.path)
            .finish()
    }
}

/// What happened to a chapter: the pages on disk and the ones that could not
/// be fetched.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct ChapterDownload {
    chapter_id: String,
    pages: Vec<Page>,
    failed: Vec<FailedPage>,
}

#[derive(Debug, Clone, Getters)]
#[getset(get = "pub")]
pub struct FailedPage {
    index: usize,
    url: String,
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChapterData {
    base_url: String,
    chapter: ChapterDownloadData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterDownloadData {
    hash: String,
    data: Vec<String>,
    data_saver: Vec<String>,
}

impl ChapterData {
    pub(crate) async fn fetch(client: &ApiClient, id: &str) -> Result<Self, MangadexError> {
        client.get_json(&format!("/at-home/server/{id}"), &[]).await
    }
}

impl ChapterDownloadRequest {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            data_saver: true,
            path: PathBuf::from("."),
            progress: None,
        }
    }

    pub fn from_url(url: &str) -> Result<Self, MangadexError> {
        match Reference::chapter(url)? {
            Reference::Chapter(id) => Ok(Self::new(&id)),
            _ => Err(MangadexError::UrlParseError(url.to_string())),
        }
    }

    pub fn data_saver(mut self, data_saver: bool) -> Self {
        self.data_saver = data_saver;
        self
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = path.as_ref().to_path_buf();
        self
    }

    pub fn progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl ChapterDownload {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_pages(self) -> Vec<Page> {
        self.pages
    }
}

impl ChapterDownloader {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
            verify_checksums: true,
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn verify_checksums(mut self, verify_checksums: bool) -> Self {
        self.verify_checksums = verify_checksums;
        self
    }

    #[instrument(skip(self, req), fields(id = %req.id))]
    async fn download_chapter(
        &self,
        req: ChapterDownloadRequest,
    ) -> Result<ChapterDownload, MangadexError> {
        let chapter = ChapterData::fetch(&self.client, &req.id).await?;
        tokio::fs::create_dir_all(&req.path).await?;

        let ChapterData {
            base_url,
            chapter: data,
        } = chapter;
        let (quality, files) = if req.data_saver {
            ("data-saver", data.data_saver)
        } else {
            ("data", data.data)
        };
        if let Some(progress) = &req.progress {
            progress.set_length(files.len() as u64);
        }
        let width = files.len().checked_ilog10().unwrap_or(0) as usize + 1;
        let base_url = base_url.trim_end_matches('/').to_string();

        let jobs: Vec<(usize, String, Option<String>, PathBuf)> = files
            .into_iter()
            .enumerate()
            .map(|(i, file)| {
                let url = format!("{base_url}/{quality}/{}/{file}", data.hash);
                let ext = Path::new(&file)
                    .extension()
                    .and_then(|x| x.to_str())
                    .unwrap_or("jpg")
                    .to_string();
                let target = req.path.join(format!("page_{i:0width$}.{ext}"));
                let checksum = if self.verify_checksums {
                    Page::checksum_from_file_name(&file)
                } else {
                    None
                };
                (i, url, checksum, target)
            })
            .collect();

        let results: Vec<(usize, String, Result<Page, MangadexError>)> =
            futures::stream::iter(jobs)
                .map(|(i, url, checksum, target)| {
                    let this = self.clone();
                    let progress = req.progress.clone();
                    async move {
                        let result = this.download_page(i, &url, checksum, target).await;
                        if let Some(progress) = progress {
                            progress.inc(1);
                        }
                        (i, url, result)
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut pages = Vec::new();
        let mut failed = Vec::new();
        for (index, url, result) in results {
            match result {
                Ok(page) => pages.push(page),
                Err(e) => {
                    warn!(index, %url, error = %e, "page failed");
                    failed.push(FailedPage {
                        index,
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }
        pages.sort_by_key(|p| *p.index());
        failed.sort_by_key(|p| p.index);
        debug!(pages = pages.len(), failed = failed.len(), "chapter done");

        Ok(ChapterDownload {
            chapter_id: req.id,
            pages,
            failed,
        })
    }

    async fn download_page(
        &self,
        index: usize,
        url: &str,
        checksum: Option<String>,
        target: PathBuf,
    ) -> Result<Page, MangadexError> {
        if let Ok(existing) = tokio::fs::read(&target).await {
            if !existing.is_empty() && verify(&target, &existing, checksum.as_deref()).is_ok() {
                debug!("Skip {}, already downloaded", target.display());
                return Ok(Page::new(index, url, checksum, target));
            }
        }

        debug!("Download {}", target.display());
        let mut attempt = 1;
        let bytes = loop {
            let bytes = self.client.get_bytes(url).await?;
            match verify(&target, &bytes, checksum.as_deref()) {
                Ok(()) => break bytes,
                Err(e) => match self.client.retry_policy().should_retry(
                    FailureType::Transient,
                    attempt,
                    None,
                ) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next,
                    } => {
                        warn!(%url, error = %e, "corrupted page, downloading again");
                        tokio::time::sleep(delay).await;
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { .. } => return Err(e),
                },
            }
        };

        // write next to the target first so an interrupted run never leaves a
        // truncated page that looks complete
        let partial = target.with_extension("part");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &target).await?;
        Ok(Page::new(index, url, checksum, target))
    }
}

fn verify(target: &Path, bytes: &[u8], checksum: Option<&str>) -> Result<(), MangadexError> {
    let Some(expected) = checksum else {
        return Ok(());
    };
    let actual = format!("{:x}", Sha256::digest(bytes));
    if actual == expected {
        Ok(())
    } else {
        Err(MangadexError::ChecksumMismatch {
            file: target.display().to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

impl Service<ChapterDownloadRequest> for ChapterDownloader {
    type Response = ChapterDownload;
    type Error = MangadexError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ChapterDownloadRequest) -> Self::Future {
        let this = self.clone();
        let span = debug_span!("chapter_downloader", id = %req.id);
        async move {
            debug!(?req);
            this.download_chapter(req).await
        }
        .instrument(span)
        .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_from_url() {
        let req = ChapterDownloadRequest::from_url(
            "https://mangadex.org/chapter/af456519-3791-47c3-af8a-23ed894b5dd8/1",
        )
        .unwrap()
        .data_saver(false)
        .path("out");
        assert_eq!(req.id, "af456519-3791-47c3-af8a-23ed894b5dd8");
        assert!(!req.data_saver);
        assert_eq!(req.path, PathBuf::from("out"));
        assert!(ChapterDownloadRequest::from_url(
            "https://mangadex.org/title/af456519-3791-47c3-af8a-23ed894b5dd8"
        )
        .is_err());
    }

    #[test]
    fn test_verify_checksum() {
        let path = Path::new("page_0.png");
        let hash = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        assert!(verify(path, b"test", Some(hash)).is_ok());
        assert!(verify(path, b"tset", None).is_ok());
        assert!(matches!(
            verify(path, b"tset", Some(hash)),
            Err(MangadexError::ChecksumMismatch { .. })
        ));
    }
}
