use super::MangadexError;
use crate::client::{ApiClient, CONTENT_RATINGS};
use crate::model::{Chapter, ChapterAttributes, Entity};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::instrument;

const FEED_PAGE_SIZE: usize = 100;

/// Query the chapter feed of a manga.
#[derive(Debug, Clone)]
pub struct FeedQuery {
    pub(crate) id: String,
    pub(crate) groups: Vec<String>,
    pub(crate) translated_language: Vec<String>,
}

impl FeedQuery {
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            groups: Vec::new(),
            translated_language: Vec::new(),
        }
    }

    pub fn group(mut self, group: impl ToString) -> Self {
        self.groups.push(group.to_string());
        self
    }

    pub fn language(mut self, language: impl ToString) -> Self {
        self.translated_language.push(language.to_string());
        self
    }

    #[instrument(skip(client))]
    pub async fn execute(&self, client: &ApiClient) -> Result<Vec<Chapter>, MangadexError> {
        let mut query = vec![
            ("order[volume]", String::from("asc")),
            ("order[chapter]", String::from("asc")),
            ("includes[]", String::from("scanlation_group")),
        ];
        for language in &self.translated_language {
            query.push(("translatedLanguage[]", language.clone()));
        }
        query.extend(CONTENT_RATINGS.map(|x| ("contentRating[]", x.to_string())));

        let entities: Vec<Entity<ChapterAttributes>> = client
            .paginate(&format!("/manga/{}/feed", self.id), &query, FEED_PAGE_SIZE)
            .await?;
        // the feed endpoint cannot filter by group, only exclude groups
        Ok(entities
            .into_iter()
            .map(Chapter::from_entity)
            .filter(|c| self.groups.is_empty() || c.is_from_group(&self.groups))
            .collect())
    }
}

/// Ordering and de-duplication of a list of chapters.
pub trait ChapterList {
    /// Sort by chapter number, unnumbered chapters first, volume breaks ties.
    fn sort_chapters(&mut self);
    /// Keep only the first upload of each numbered chapter.
    fn dedup_chapters(&mut self);
}

impl ChapterList for Vec<Chapter> {
    fn sort_chapters(&mut self) {
        self.sort_by(|x, y| {
            compare_numbers(x.number(), y.number())
                .then_with(|| compare_numbers(x.volume_number(), y.volume_number()))
        });
    }

    fn dedup_chapters(&mut self) {
        let mut seen = HashSet::new();
        self.retain(|c| match c.chapter() {
            Some(number) => seen.insert((c.volume().clone(), number.clone())),
            None => true,
        });
    }
}

fn compare_numbers(x: Option<f32>, y: Option<f32>) -> Ordering {
    match (x, y) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(c1), Some(c2)) => c1.total_cmp(&c2),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sort_chapters() {
        let mut chapters = vec![
            Chapter::new("c10").with_number("10"),
            Chapter::new("c2").with_number("2"),
            Chapter::new("oneshot"),
            Chapter::new("c2.5").with_number("2.5"),
            Chapter::new("c1-v2").with_volume("2").with_number("1"),
            Chapter::new("c1-v1").with_volume("1").with_number("1"),
        ];
        chapters.sort_chapters();
        let ids: Vec<&str> = chapters.iter().map(|c| c.id().as_str()).collect();
        assert_eq!(ids, ["oneshot", "c1-v1", "c1-v2", "c2", "c2.5", "c10"]);
    }

    #[test]
    fn test_dedup_chapters() {
        let mut chapters = vec![
            Chapter::new("a").with_number("1").with_group("A"),
            Chapter::new("b").with_number("1").with_group("B"),
            Chapter::new("c").with_volume("2").with_number("1"),
            Chapter::new("d"),
            Chapter::new("e"),
        ];
        chapters.dedup_chapters();
        let ids: Vec<&str> = chapters.iter().map(|c| c.id().as_str()).collect();
        assert_eq!(ids, ["a", "c", "d", "e"]);
    }
}
