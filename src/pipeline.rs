use super::MangadexError;
use crate::client::ApiClient;
use crate::config::DownloaderConfig;
use crate::export::{plan_units, sanitize_filename, ExportChapter, ExportUnit, Exporter};
use crate::job::{DownloadJob, JobState};
use crate::model::Manga;
use crate::progress::ProgressReporter;
use crate::resolver::{Resolved, Resolver};
use crate::service::{ChapterDownload, ChapterDownloadRequest, ChapterDownloader};
use getset::Getters;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tower::{Service, ServiceBuilder, ServiceExt};
use tracing::{debug, info, instrument, warn};

/// Pages are downloaded here before export. A failed job leaves its pages
/// behind so the next run only fetches what is missing.
const WORK_DIR: &str = ".mangadex-dl";

#[derive(Debug)]
pub struct Pipeline {
    config: DownloaderConfig,
    client: ApiClient,
    progress: ProgressReporter,
}

#[derive(Debug, Default, Getters)]
#[getset(get = "pub")]
pub struct Report {
    jobs: Vec<DownloadJob>,
    failed_pages: usize,
}

impl Report {
    pub fn exported(&self) -> usize {
        self.count(|s| *s == JobState::Exported)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == JobState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, JobState::Failed(_)))
    }

    fn count(&self, f: impl Fn(&JobState) -> bool) -> usize {
        self.jobs.iter().filter(|j| f(j.state())).count()
    }
}

impl Pipeline {
    pub fn new(config: DownloaderConfig) -> Result<Self, MangadexError> {
        let client = ApiClient::new(&config)?;
        let progress = ProgressReporter::new(!config.no_progress_bar());
        Ok(Self {
            config,
            client,
            progress,
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.client.clone(), &self.config)
    }

    /// Download and export every chapter of `resolved`.
    ///
    /// A job that fails does not stop the others; look at the returned
    /// [`Report`] to know what happened.
    #[instrument(skip_all, fields(manga = %resolved.manga.title()))]
    pub async fn run(&self, resolved: &Resolved) -> Result<Report, MangadexError> {
        let format = self.config.format();
        let exporter: Arc<dyn Exporter> = Arc::from(format.exporter());
        let base = self
            .config
            .path()
            .join(sanitize_filename(resolved.manga.title()));
        let plans = plan_units(format.grouping, &resolved.manga, &resolved.chapters);
        if plans.is_empty() {
            warn!("no chapter to download");
        }

        let mut downloader = ServiceBuilder::new()
            .rate_limit(1, self.config.chapter_interval())
            .service(
                ChapterDownloader::new(self.client.clone())
                    .concurrency(self.config.concurrency())
                    .verify_checksums(self.config.verify_checksums()),
            );

        let jobs_bar = self.progress.jobs(plans.len());
        let mut report = Report::default();
        for plan in plans {
            let target = exporter.target(&base, &plan.name);
            let mut job = DownloadJob::new(&plan.name, plan.chapters, format, &target);
            jobs_bar.set_message(plan.name);

            if target.exists() {
                if self.config.replace() {
                    debug!("replacing {}", target.display());
                    remove_path(&target)?;
                } else {
                    info!("'{}' already exists, skipping", target.display());
                    job.skip()?;
                    report.jobs.push(job);
                    jobs_bar.inc(1);
                    continue;
                }
            }

            job.start()?;
            info!(job = %job.name(), chapters = job.chapters().len(), "downloading");
            let result = self
                .process(
                    &mut downloader,
                    &job,
                    &resolved.manga,
                    &base,
                    exporter.clone(),
                    &mut report,
                )
                .await;
            match result {
                Ok(()) => {
                    job.finish()?;
                    info!("'{}' exported", job.target().display());
                }
                Err(e) => {
                    warn!(job = %job.name(), error = %e, "job failed");
                    job.fail(e)?;
                }
            }
            report.jobs.push(job);
            jobs_bar.inc(1);
        }
        jobs_bar.finish_and_clear();

        // only succeeds once nothing is left to resume
        let _ = std::fs::remove_dir(base.join(WORK_DIR));
        Ok(report)
    }

    async fn process<S>(
        &self,
        downloader: &mut S,
        job: &DownloadJob,
        manga: &Manga,
        base: &Path,
        exporter: Arc<dyn Exporter>,
        report: &mut Report,
    ) -> Result<(), MangadexError>
    where
        S: Service<ChapterDownloadRequest, Response = ChapterDownload, Error = MangadexError>,
    {
        let work = base.join(WORK_DIR).join(job.name());
        let mut chapters = Vec::new();
        let mut failed = 0;
        for (i, chapter) in job.chapters().iter().enumerate() {
            let bar = self.progress.pages(&chapter.simplified_name());
            let request = ChapterDownloadRequest::new(chapter.id())
                .data_saver(self.config.data_saver())
                .path(work.join(ExportUnit::chapter_dir(i, chapter)))
                .progress(bar.clone());
            let download = downloader.ready().await?.call(request).await;
            bar.finish_and_clear();
            let download = download?;

            for page in download.failed() {
                warn!(
                    chapter = %chapter.simplified_name(),
                    page = page.index(),
                    error = %page.error(),
                    "page missing"
                );
            }
            failed += download.failed().len();
            chapters.push(ExportChapter {
                chapter: chapter.clone(),
                pages: download.into_pages(),
            });
        }
        report.failed_pages += failed;
        if failed > 0 {
            return Err(MangadexError::IncompleteDownload {
                name: job.name().clone(),
                failed,
            });
        }

        let unit = ExportUnit {
            name: job.name().clone(),
            series: manga.title().clone(),
            grouping: job.format().grouping,
            chapters,
        };
        let target = job.target().clone();
        tokio::task::spawn_blocking(move || exporter.export(&unit, &target))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        if let Err(e) = tokio::fs::remove_dir_all(&work).await {
            warn!(dir = %work.display(), error = %e, "could not clean up downloaded pages");
        }
        Ok(())
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
