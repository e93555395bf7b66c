use crate::export::sanitize_filename;
use getset::Getters;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// Wire types of the mangadex JSON API.

#[derive(Debug, Deserialize)]
pub(crate) struct EntityResponse<T> {
    pub(crate) data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Collection<T> {
    pub(crate) data: Vec<T>,
    #[serde(default)]
    pub(crate) total: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Entity<A> {
    pub(crate) id: String,
    pub(crate) attributes: A,
    #[serde(default)]
    pub(crate) relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Relationship {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) attributes: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChapterAttributes {
    volume: Option<String>,
    chapter: Option<String>,
    title: Option<String>,
    translated_language: String,
    #[serde(default)]
    pages: usize,
    external_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct Manga {
    id: String,
    title: String,
}

impl Manga {
    pub fn new(id: impl ToString, title: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
        }
    }

    pub(crate) fn from_entity(entity: Entity<MangaAttributes>) -> Self {
        let attributes = entity.attributes;
        let title = preferred_title(&attributes.title)
            .or_else(|| attributes.alt_titles.iter().find_map(preferred_title))
            .unwrap_or_else(|| entity.id.clone());
        Self::new(entity.id, title)
    }
}

fn preferred_title(titles: &HashMap<String, String>) -> Option<String> {
    titles
        .get("en")
        .or_else(|| titles.get("ja-ro"))
        .or_else(|| titles.values().next())
        .cloned()
}

#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct Chapter {
    id: String,
    volume: Option<String>,
    chapter: Option<String>,
    title: Option<String>,
    language: String,
    pages: usize,
    groups: Vec<String>,
    group_ids: Vec<String>,
    manga_id: Option<String>,
    external_url: Option<String>,
}

impl Chapter {
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            volume: None,
            chapter: None,
            title: None,
            language: String::from("en"),
            pages: 0,
            groups: Vec::new(),
            group_ids: Vec::new(),
            manga_id: None,
            external_url: None,
        }
    }

    pub fn with_volume(mut self, volume: impl ToString) -> Self {
        self.volume = Some(volume.to_string());
        self
    }

    pub fn with_number(mut self, chapter: impl ToString) -> Self {
        self.chapter = Some(chapter.to_string());
        self
    }

    pub fn with_title(mut self, title: impl ToString) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_group(mut self, group: impl ToString) -> Self {
        self.groups.push(group.to_string());
        self
    }

    pub fn with_group_id(mut self, id: impl ToString) -> Self {
        self.group_ids.push(id.to_string());
        self
    }

    /// Whether one of the scanlation groups that uploaded this chapter is in
    /// `ids`.
    pub fn is_from_group(&self, ids: &[String]) -> bool {
        self.group_ids.iter().any(|id| ids.contains(id))
    }

    pub(crate) fn from_entity(entity: Entity<ChapterAttributes>) -> Self {
        let mut groups = Vec::new();
        let mut group_ids = Vec::new();
        let mut manga_id = None;
        for relationship in &entity.relationships {
            match relationship.kind.as_str() {
                "scanlation_group" => {
                    group_ids.push(relationship.id.clone());
                    groups.push(
                        relationship
                            .attributes
                            .as_ref()
                            .and_then(|x| x.get("name"))
                            .and_then(|x| x.as_str())
                            .map(str::to_string)
                            .unwrap_or_else(|| relationship.id.clone()),
                    )
                }
                "manga" => manga_id = Some(relationship.id.clone()),
                _ => {}
            }
        }

        let attributes = entity.attributes;
        Self {
            id: entity.id,
            volume: attributes.volume.filter(|x| !x.is_empty()),
            chapter: attributes.chapter.filter(|x| !x.is_empty()),
            title: attributes.title.filter(|x| !x.trim().is_empty()),
            language: attributes.translated_language,
            pages: attributes.pages,
            groups,
            group_ids,
            manga_id,
            external_url: attributes.external_url,
        }
    }

    pub fn number(&self) -> Option<f32> {
        self.chapter.as_deref().and_then(|x| x.parse().ok())
    }

    pub fn volume_number(&self) -> Option<f32> {
        self.volume.as_deref().and_then(|x| x.parse().ok())
    }

    /// Chapters only linked from mangadex have no pages we can fetch.
    pub fn is_external(&self) -> bool {
        self.external_url.is_some() || self.pages == 0
    }

    /// Human readable, filesystem safe name like `Vol. 2 Ch. 10.5 - Title`.
    pub fn simplified_name(&self) -> String {
        let mut name = match (&self.volume, &self.chapter) {
            (Some(v), Some(c)) => format!("Vol. {v} Ch. {c}"),
            (None, Some(c)) => format!("Ch. {c}"),
            (Some(v), None) => format!("Vol. {v} Oneshot"),
            (None, None) => String::from("Oneshot"),
        };
        if let Some(title) = &self.title {
            name.push_str(" - ");
            name.push_str(title.trim());
        }
        sanitize_filename(&name)
    }
}

/// A page image stored on disk.
#[derive(Debug, Clone, PartialEq, Getters)]
#[getset(get = "pub")]
pub struct Page {
    index: usize,
    url: String,
    checksum: Option<String>,
    path: PathBuf,
}

impl Page {
    pub(crate) fn new(
        index: usize,
        url: impl ToString,
        checksum: Option<String>,
        path: impl AsRef<Path>,
    ) -> Self {
        Self {
            index,
            url: url.to_string(),
            checksum,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// At-home file names look like `1-<sha256>.png`; the hash is the checksum
    /// of the image bytes.
    pub fn checksum_from_file_name(file_name: &str) -> Option<String> {
        let stem = file_name.rsplit_once('.').map_or(file_name, |(x, _)| x);
        let hash = stem.rsplit('-').next()?;
        (hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit()))
            .then(|| hash.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chapter_from_entity() {
        let json = serde_json::json!({
            "id": "a54c491c-8e4c-4e97-8873-5b79e59da210",
            "type": "chapter",
            "attributes": {
                "volume": "3",
                "chapter": "21.5",
                "title": "Extra",
                "translatedLanguage": "en",
                "pages": 18,
                "externalUrl": null
            },
            "relationships": [
                {"id": "g1", "type": "scanlation_group", "attributes": {"name": "Group One"}},
                {"id": "m1", "type": "manga"},
                {"id": "u1", "type": "user"}
            ]
        });
        let entity: Entity<ChapterAttributes> = serde_json::from_value(json).unwrap();
        let chapter = Chapter::from_entity(entity);
        assert_eq!(chapter.number(), Some(21.5));
        assert_eq!(chapter.volume_number(), Some(3.0));
        assert_eq!(chapter.groups(), &vec!["Group One".to_string()]);
        assert_eq!(chapter.group_ids(), &vec!["g1".to_string()]);
        assert!(chapter.is_from_group(&["g1".to_string()]));
        assert!(!chapter.is_from_group(&["m1".to_string()]));
        assert_eq!(chapter.manga_id().as_deref(), Some("m1"));
        assert!(!chapter.is_external());
        assert_eq!(chapter.simplified_name(), "Vol. 3 Ch. 21.5 - Extra");
    }

    #[test]
    fn test_external_chapter() {
        let json = serde_json::json!({
            "id": "c1",
            "attributes": {
                "volume": null,
                "chapter": "1",
                "title": "",
                "translatedLanguage": "en",
                "pages": 0,
                "externalUrl": "https://example.com/read/1"
            }
        });
        let entity: Entity<ChapterAttributes> = serde_json::from_value(json).unwrap();
        let chapter = Chapter::from_entity(entity);
        assert!(chapter.is_external());
        assert_eq!(chapter.title(), &None);
        assert_eq!(chapter.simplified_name(), "Ch. 1");
    }

    #[test]
    fn test_manga_title_fallback() {
        let json = serde_json::json!({
            "id": "m1",
            "attributes": {
                "title": {"ja": "カフェテラス"},
                "altTitles": [{"en": "The Cafe Terrace and Its Goddesses"}]
            }
        });
        let entity: Entity<MangaAttributes> = serde_json::from_value(json).unwrap();
        // title map wins over alt titles even when it is not english
        assert_eq!(Manga::from_entity(entity).title(), "カフェテラス");

        let json = serde_json::json!({"id": "m2", "attributes": {"title": {}, "altTitles": []}});
        let entity: Entity<MangaAttributes> = serde_json::from_value(json).unwrap();
        assert_eq!(Manga::from_entity(entity).title(), "m2");
    }

    #[test]
    fn test_simplified_name() {
        assert_eq!(Chapter::new("x").simplified_name(), "Oneshot");
        assert_eq!(
            Chapter::new("x").with_volume("1").simplified_name(),
            "Vol. 1 Oneshot"
        );
        assert_eq!(
            Chapter::new("x").with_number("4").with_title("Who? What/Why").simplified_name(),
            "Ch. 4 - Who_ What_Why"
        );
    }

    #[test]
    fn test_checksum_from_file_name() {
        let hash = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        assert_eq!(
            Page::checksum_from_file_name(&format!("1-{hash}.png")).as_deref(),
            Some(hash)
        );
        assert_eq!(
            Page::checksum_from_file_name(&format!("x12-{}.jpg", hash.to_uppercase())).as_deref(),
            Some(hash)
        );
        assert_eq!(Page::checksum_from_file_name("1-abc.png"), None);
        assert_eq!(Page::checksum_from_file_name("cover.jpg"), None);
    }
}
