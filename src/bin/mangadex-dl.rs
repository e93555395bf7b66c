use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Args, Parser};
use mangadex::{
    ChapterSelection, DownloaderConfigBuilder, ExportFormat, Pipeline, ProgressReporter, Reference,
    RetryPolicy, DEFAULT_API_URL,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "mangadex-dl",
    version,
    author,
    about = "CLI tool to download manga from mangadex as raw images, cbz or pdf"
)]
struct Arguments {
    #[arg(help = "manga url, chapter url, manga id or title to search")]
    manga: String,
    #[arg(
        short,
        long,
        default_value = "raw",
        help = "raw, cbz or pdf, optionally suffixed with -volume or -single"
    )]
    format: ExportFormat,
    #[arg(short, long = "language", default_values_t = [String::from("en")], help = "translation language")]
    languages: Vec<String>,
    #[arg(short, long, help = "translation group id")]
    groups: Vec<String>,
    #[arg(short, long, group = "range")]
    chapters: Vec<f32>,
    #[arg(short, long, group = "range")]
    volumes: Vec<f32>,
    #[command(flatten)]
    chapter_range: ChapterRange,
    #[command(flatten)]
    volume_range: VolumeRange,
    #[arg(short, long, default_value = ".", help = "destination folder")]
    path: PathBuf,
    #[arg(
        short = 'r',
        long = "raw",
        action=ArgAction::SetFalse,
        default_value_t = true,
        help = "download uncompressed images"
    )]
    data_saver: bool,
    #[arg(long, help = "overwrite files that already exist")]
    replace: bool,
    #[arg(long, help = "keep every scanlation of a chapter")]
    all_groups: bool,
    #[arg(long, help = "treat the input as a chapter id")]
    chapter_id: bool,
    #[arg(long, default_value_t = 8, help = "pages downloaded at the same time")]
    concurrency: usize,
    #[arg(long, default_value_t = 5, help = "attempts per request")]
    retries: u32,
    #[arg(long, default_value_t = 2000, help = "milliseconds between two chapters")]
    chapter_interval: u64,
    #[arg(long = "no-verify", action = ArgAction::SetFalse, default_value_t = true, help = "do not check page checksums")]
    verify_checksums: bool,
    #[arg(long)]
    no_progress_bar: bool,
    #[arg(long, default_value = DEFAULT_API_URL, hide = true)]
    api_url: String,
    #[arg(long, action = ArgAction::Count, help = "more logs, repeat for even more")]
    verbose: u8,
    #[arg(short, long, conflicts_with = "verbose", help = "only log errors")]
    quiet: bool,
}

#[derive(Debug, Clone, Args)]
#[group(
    id = "chapter_range",
    multiple = true,
    conflicts_with = "range",
    conflicts_with = "volume_range"
)]
struct ChapterRange {
    #[arg(long)]
    min_chapter: Option<f32>,
    #[arg(long)]
    max_chapter: Option<f32>,
}

#[derive(Debug, Clone, Args)]
#[group(id = "volume_range", multiple = true, conflicts_with = "range")]
struct VolumeRange {
    #[arg(long)]
    min_volume: Option<f32>,
    #[arg(long)]
    max_volume: Option<f32>,
}

fn init_tracing(verbose: u8, quiet: bool, progress: ProgressReporter) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "mangadex=debug,info",
            _ => "trace",
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(progress)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    let show_progress = !(args.no_progress_bar || args.quiet);
    let progress = ProgressReporter::new(show_progress);
    init_tracing(args.verbose, args.quiet, progress.clone());
    debug!(?args);

    let config = DownloaderConfigBuilder::default()
        .api_url(args.api_url.clone())
        .languages(args.languages.clone())
        .groups(args.groups.clone())
        .path(args.path.clone())
        .format(args.format)
        .data_saver(args.data_saver)
        .replace(args.replace)
        .all_groups(args.all_groups)
        .concurrency(args.concurrency)
        .retry(RetryPolicy::with_max_attempts(args.retries))
        .verify_checksums(args.verify_checksums)
        .no_progress_bar(!show_progress)
        .chapter_interval(Duration::from_millis(args.chapter_interval))
        .build()?;

    let reference = if args.chapter_id {
        Reference::chapter(&args.manga)?
    } else {
        Reference::parse(&args.manga)?
    };
    let selection = ChapterSelection {
        volumes: args.volumes,
        chapters: args.chapters,
        min_chapter: args.chapter_range.min_chapter,
        max_chapter: args.chapter_range.max_chapter,
        min_volume: args.volume_range.min_volume,
        max_volume: args.volume_range.max_volume,
    };

    let pipeline = Pipeline::new(config)?.with_progress(progress);
    let resolved = pipeline
        .resolver()
        .resolve(&reference, &selection)
        .await
        .with_context(|| format!("cannot find '{}' on mangadex", args.manga))?;
    info!(
        "Download {} chapter(s) of \"{}\" as {}",
        resolved.chapters.len(),
        resolved.manga.title(),
        args.format
    );

    let report = pipeline.run(&resolved).await?;
    info!(
        exported = report.exported(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Done."
    );
    if report.failed() > 0 {
        for job in report.jobs().iter().filter(|j| j.is_failed()) {
            warn!("{}: {}", job.name(), job.state());
        }
        anyhow::bail!(
            "{} of {} job(s) failed, run again to resume",
            report.failed(),
            report.jobs().len()
        );
    }
    Ok(())
}
