use super::MangadexError;
use crate::client::ApiClient;
use crate::config::DownloaderConfig;
use crate::model::{Chapter, Manga};
use crate::query::{ChapterList, FeedQuery};
use reqwest::Url;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const SEARCH_LIMIT: usize = 10;

/// What the user asked for on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Manga(String),
    Chapter(String),
    Search(String),
}

impl Reference {
    /// Accepts a mangadex title or chapter url, a bare manga id, or free text
    /// which is used as a title search.
    pub fn parse(input: &str) -> Result<Self, MangadexError> {
        let input = input.trim();
        if input.starts_with("http://")
            || input.starts_with("https://")
            || input.contains("mangadex.org")
        {
            return Self::from_url(input);
        }
        if Uuid::parse_str(input).is_ok() {
            return Ok(Self::Manga(input.to_string()));
        }
        Ok(Self::Search(input.to_string()))
    }

    pub fn chapter(id: &str) -> Result<Self, MangadexError> {
        let id = id.trim();
        if id.contains("mangadex.org") {
            return match Self::from_url(id)? {
                chapter @ Self::Chapter(_) => Ok(chapter),
                _ => Err(MangadexError::UrlParseError(id.to_string())),
            };
        }
        Uuid::parse_str(id)
            .map(|_| Self::Chapter(id.to_string()))
            .map_err(|_| MangadexError::UrlParseError(id.to_string()))
    }

    fn from_url(input: &str) -> Result<Self, MangadexError> {
        let invalid = || MangadexError::UrlParseError(input.to_string());
        let with_scheme;
        let raw = if input.contains("://") {
            input
        } else {
            with_scheme = format!("https://{input}");
            &with_scheme
        };
        let url = Url::parse(raw).map_err(|_| invalid())?;
        if !url
            .domain()
            .is_some_and(|x| x == "mangadex.org" || x == "www.mangadex.org")
        {
            return Err(invalid());
        }
        let mut segments = url.path_segments().ok_or_else(invalid)?;
        let kind = segments.next().ok_or_else(invalid)?;
        let id = segments
            .next()
            .filter(|x| Uuid::parse_str(x).is_ok())
            .ok_or_else(invalid)?
            .to_string();
        match kind {
            "title" | "manga" => Ok(Self::Manga(id)),
            "chapter" => Ok(Self::Chapter(id)),
            _ => Err(invalid()),
        }
    }
}

/// Narrow down the chapters of a manga.
///
/// Only one criterion applies, checked in this order: explicit volumes,
/// explicit chapters, chapter range, volume range.
#[derive(Debug, Clone, Default)]
pub struct ChapterSelection {
    pub volumes: Vec<f32>,
    pub chapters: Vec<f32>,
    pub min_chapter: Option<f32>,
    pub max_chapter: Option<f32>,
    pub min_volume: Option<f32>,
    pub max_volume: Option<f32>,
}

impl ChapterSelection {
    pub fn apply(&self, chapters: Vec<Chapter>) -> Vec<Chapter> {
        if !self.volumes.is_empty() {
            chapters
                .into_iter()
                .filter(|c| {
                    self.volumes
                        .contains(&c.volume_number().unwrap_or(f32::INFINITY))
                })
                .collect()
        } else if !self.chapters.is_empty() {
            chapters
                .into_iter()
                .filter(|c| self.chapters.contains(&c.number().unwrap_or(f32::INFINITY)))
                .collect()
        } else if self.min_chapter.is_some() || self.max_chapter.is_some() {
            let min_chap = self.min_chapter.unwrap_or(f32::NEG_INFINITY);
            let max_chap = self.max_chapter.unwrap_or(f32::INFINITY);
            chapters
                .into_iter()
                .filter(|c| {
                    let c = c.number().unwrap_or(-1.0);
                    c >= min_chap && c <= max_chap
                })
                .collect()
        } else {
            let min_vol = self.min_volume.unwrap_or(f32::NEG_INFINITY);
            let max_vol = self.max_volume.unwrap_or(f32::INFINITY);
            chapters
                .into_iter()
                .filter(|c| {
                    let v = c.volume_number().unwrap_or(-1.0);
                    v >= min_vol && v <= max_vol
                })
                .collect()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub manga: Manga,
    pub chapters: Vec<Chapter>,
}

/// Turns a [`Reference`] into the concrete chapters to download.
#[derive(Debug, Clone)]
pub struct Resolver {
    client: ApiClient,
    languages: Vec<String>,
    groups: Vec<String>,
    all_groups: bool,
}

impl Resolver {
    pub fn new(client: ApiClient, config: &DownloaderConfig) -> Self {
        Self {
            client,
            languages: config.languages().clone(),
            groups: config.groups().clone(),
            all_groups: config.all_groups(),
        }
    }

    #[instrument(skip(self, selection))]
    pub async fn resolve(
        &self,
        reference: &Reference,
        selection: &ChapterSelection,
    ) -> Result<Resolved, MangadexError> {
        match reference {
            Reference::Manga(id) => self.resolve_manga(id, selection).await,
            Reference::Chapter(id) => self.resolve_chapter(id).await,
            Reference::Search(title) => {
                let manga = self.search(title).await?;
                self.resolve_manga(manga.id(), selection).await
            }
        }
    }

    async fn search(&self, title: &str) -> Result<Manga, MangadexError> {
        let mut found = self.client.search(title, SEARCH_LIMIT).await?.into_iter();
        let manga = found
            .next()
            .ok_or_else(|| MangadexError::NotFound(format!("manga matching '{title}'")))?;
        info!(title = %manga.title(), id = %manga.id(), "search matched");
        for other in found {
            info!(title = %other.title(), id = %other.id(), "other match");
        }
        Ok(manga)
    }

    async fn resolve_manga(
        &self,
        id: &str,
        selection: &ChapterSelection,
    ) -> Result<Resolved, MangadexError> {
        let manga = self.client.manga(id).await?;

        let mut query = FeedQuery::new(id);
        for language in &self.languages {
            query = query.language(language);
        }
        for group in &self.groups {
            query = query.group(group);
        }

        let mut chapters: Vec<Chapter> = query
            .execute(&self.client)
            .await?
            .into_iter()
            .filter(|c| {
                if c.is_external() {
                    warn!(chapter = %c.simplified_name(), id = %c.id(), "skipping chapter hosted outside mangadex");
                    return false;
                }
                true
            })
            .collect();
        chapters.sort_chapters();
        if !self.all_groups {
            chapters.dedup_chapters();
        }
        let chapters = selection.apply(chapters);
        info!(title = %manga.title(), chapters = chapters.len(), "resolved manga");
        Ok(Resolved { manga, chapters })
    }

    async fn resolve_chapter(&self, id: &str) -> Result<Resolved, MangadexError> {
        let chapter = self.client.chapter(id).await?;
        if chapter.is_external() {
            return Err(MangadexError::ExternalChapter(id.to_string()));
        }
        let manga = match chapter.manga_id() {
            Some(manga_id) => self.client.manga(manga_id).await?,
            None => Manga::new(id, chapter.simplified_name()),
        };
        Ok(Resolved {
            manga,
            chapters: vec![chapter],
        })
    }
}
