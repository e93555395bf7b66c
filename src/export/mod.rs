//! Turning downloaded pages into the files the user asked for.
//!
//! An [`ExportFormat`] is a container (raw images, cbz, pdf) combined with a
//! grouping (one file per chapter, per volume, or a single file).

mod cbz;
mod pdf;
mod raw;

pub use cbz::CbzExporter;
pub use pdf::PdfExporter;
pub use raw::RawExporter;

use crate::model::{Chapter, Manga, Page};
use crate::MangadexError;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
    #[default]
    Raw,
    Cbz,
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Grouping {
    #[default]
    Chapter,
    Volume,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportFormat {
    pub container: Container,
    pub grouping: Grouping,
}

impl ExportFormat {
    pub const NAMES: [&'static str; 9] = [
        "raw",
        "raw-volume",
        "raw-single",
        "cbz",
        "cbz-volume",
        "cbz-single",
        "pdf",
        "pdf-volume",
        "pdf-single",
    ];

    pub fn new(container: Container, grouping: Grouping) -> Self {
        Self {
            container,
            grouping,
        }
    }

    pub fn exporter(&self) -> Box<dyn Exporter> {
        match self.container {
            Container::Raw => Box::new(RawExporter),
            Container::Cbz => Box::new(CbzExporter),
            Container::Pdf => Box::new(PdfExporter),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = MangadexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let (container, grouping) = match normalized.split_once('-') {
            Some((container, grouping)) => (container, Some(grouping)),
            None => (normalized.as_str(), None),
        };
        let container = match container {
            "raw" => Container::Raw,
            "cbz" => Container::Cbz,
            "pdf" => Container::Pdf,
            _ => return Err(MangadexError::UnknownFormat(s.to_string())),
        };
        let grouping = match grouping {
            None => Grouping::Chapter,
            Some("volume") => Grouping::Volume,
            Some("single") => Grouping::Single,
            Some(_) => return Err(MangadexError::UnknownFormat(s.to_string())),
        };
        Ok(Self::new(container, grouping))
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let container = match self.container {
            Container::Raw => "raw",
            Container::Cbz => "cbz",
            Container::Pdf => "pdf",
        };
        match self.grouping {
            Grouping::Chapter => write!(f, "{container}"),
            Grouping::Volume => write!(f, "{container}-volume"),
            Grouping::Single => write!(f, "{container}-single"),
        }
    }
}

/// Chapters that end up in the same output file.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    pub name: String,
    pub chapters: Vec<Chapter>,
}

/// Split the chapters according to the grouping. Chapters keep their order;
/// volumes are ordered by number with chapters outside any volume last.
pub fn plan_units(grouping: Grouping, manga: &Manga, chapters: &[Chapter]) -> Vec<UnitPlan> {
    if chapters.is_empty() {
        return Vec::new();
    }
    let mut plans = match grouping {
        Grouping::Chapter => chapters
            .iter()
            .map(|c| UnitPlan {
                name: c.simplified_name(),
                chapters: vec![c.clone()],
            })
            .collect(),
        Grouping::Single => vec![UnitPlan {
            name: sanitize_filename(manga.title()),
            chapters: chapters.to_vec(),
        }],
        Grouping::Volume => {
            let mut volumes: Vec<(Option<String>, Vec<Chapter>)> = Vec::new();
            for chapter in chapters {
                match volumes.iter_mut().find(|(v, _)| v == chapter.volume()) {
                    Some((_, list)) => list.push(chapter.clone()),
                    None => volumes.push((chapter.volume().clone(), vec![chapter.clone()])),
                }
            }
            volumes.sort_by(|(x, _), (y, _)| {
                let key = |v: &Option<String>| {
                    v.as_deref()
                        .map(|v| v.parse::<f32>().unwrap_or(f32::MAX))
                        .unwrap_or(f32::INFINITY)
                };
                key(x).total_cmp(&key(y))
            });
            volumes
                .into_iter()
                .map(|(volume, chapters)| UnitPlan {
                    name: match volume {
                        Some(v) => sanitize_filename(&format!("Vol. {v}")),
                        None => String::from("No Volume"),
                    },
                    chapters,
                })
                .collect()
        }
    };

    let mut seen = HashSet::new();
    for plan in plans.iter_mut() {
        let base = plan.name.clone();
        let mut n = 2;
        while !seen.insert(plan.name.clone()) {
            plan.name = format!("{base} ({n})");
            n += 1;
        }
    }
    plans
}

/// A chapter with its pages already on disk, in reading order.
#[derive(Debug, Clone)]
pub struct ExportChapter {
    pub chapter: Chapter,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone)]
pub struct ExportUnit {
    pub name: String,
    pub series: String,
    pub grouping: Grouping,
    pub chapters: Vec<ExportChapter>,
}

impl ExportUnit {
    pub fn page_count(&self) -> usize {
        self.chapters.iter().map(|c| c.pages.len()).sum()
    }

    /// Folder name used for a chapter inside a grouped export, keeps reading
    /// order when sorted by name.
    pub(crate) fn chapter_dir(index: usize, chapter: &Chapter) -> String {
        format!("{:05}_{}", index, chapter.simplified_name())
    }
}

pub trait Exporter: Send + Sync {
    /// File extension of the output, `None` when the output is a directory.
    fn extension(&self) -> Option<&'static str>;

    fn export(&self, unit: &ExportUnit, target: &Path) -> Result<(), MangadexError>;

    fn target(&self, dir: &Path, name: &str) -> PathBuf {
        match self.extension() {
            Some(ext) => dir.join(format!("{name}.{ext}")),
            None => dir.join(name),
        }
    }
}

/// Replace characters that are invalid on common filesystems.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let sanitized = sanitized.trim().trim_end_matches('.').trim_end();
    match sanitized {
        "" | "." | ".." => String::from("_"),
        s => s.to_string(),
    }
}
