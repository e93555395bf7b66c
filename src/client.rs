use super::MangadexError;
use crate::config::DownloaderConfig;
use crate::model::{
    Chapter, ChapterAttributes, Collection, Entity, EntityResponse, Manga, MangaAttributes,
};
use crate::retry::{classify_error, FailureType, RetryDecision, RetryPolicy};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

pub const DEFAULT_API_URL: &str = "https://api.mangadex.org";

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

// mangadex refuses collection requests past offset + limit > 10000
const MAX_COLLECTION_WINDOW: usize = 10_000;

pub(crate) const CONTENT_RATINGS: [&str; 4] = ["safe", "suggestive", "erotica", "pornographic"];

type Query<'a> = [(&'a str, String)];

/// Thin wrapper around a shared `reqwest::Client` speaking to the mangadex API.
///
/// Every request goes through the configured [`RetryPolicy`]: 429 and 5xx are
/// retried, honouring the rate limit headers mangadex sends back.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    title: Option<String>,
    detail: Option<String>,
}

impl ApiClient {
    pub fn new(config: &DownloaderConfig) -> Result<Self, MangadexError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_url().trim_end_matches('/').to_string(),
            retry: config.retry().clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Query<'_>,
    ) -> Result<T, MangadexError> {
        let url = format!("{}{}", self.base_url, path);
        let bytes = self
            .send_with_retry(|| self.http.get(&url).query(query))
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Fetch raw bytes from any url, typically a page on an at-home server.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, MangadexError> {
        self.send_with_retry(|| self.http.get(url)).await
    }

    /// Read a whole `limit`/`offset` collection.
    #[instrument(skip(self, query))]
    pub async fn paginate<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Query<'_>,
        page_size: usize,
    ) -> Result<Vec<T>, MangadexError> {
        let page_size = page_size.clamp(1, 500);
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let limit = page_size.min(MAX_COLLECTION_WINDOW.saturating_sub(offset));
            if limit == 0 {
                warn!(offset, "collection is larger than mangadex allows to read, stopping");
                break;
            }
            let mut page_query = query.to_vec();
            page_query.push(("limit", limit.to_string()));
            page_query.push(("offset", offset.to_string()));

            let page: Collection<T> = self.get_json(path, &page_query).await?;
            let received = page.data.len();
            debug!(offset, received, total = page.total, "collection page");
            items.extend(page.data);
            offset += received;
            if received == 0 || offset >= page.total {
                break;
            }
        }
        Ok(items)
    }

    pub async fn manga(&self, id: &str) -> Result<Manga, MangadexError> {
        let response: EntityResponse<Entity<MangaAttributes>> =
            self.get_json(&format!("/manga/{id}"), &[]).await?;
        Ok(Manga::from_entity(response.data))
    }

    pub async fn chapter(&self, id: &str) -> Result<Chapter, MangadexError> {
        let query = [
            ("includes[]", String::from("scanlation_group")),
            ("includes[]", String::from("manga")),
        ];
        let response: EntityResponse<Entity<ChapterAttributes>> =
            self.get_json(&format!("/chapter/{id}"), &query).await?;
        Ok(Chapter::from_entity(response.data))
    }

    pub async fn search(&self, title: &str, limit: usize) -> Result<Vec<Manga>, MangadexError> {
        let mut query = vec![
            ("title", title.to_string()),
            ("limit", limit.to_string()),
            ("order[relevance]", String::from("desc")),
        ];
        query.extend(CONTENT_RATINGS.map(|x| ("contentRating[]", x.to_string())));
        let response: Collection<Entity<MangaAttributes>> =
            self.get_json("/manga", &query).await?;
        Ok(response.data.into_iter().map(Manga::from_entity).collect())
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Vec<u8>, MangadexError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            let (error, retry_after) = match send_once(build()).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => e,
            };
            let failure = classify_error(&error);
            // rate limit headers come with every response but only apply to a 429
            let retry_after = retry_after.filter(|_| failure == FailureType::RateLimited);
            match self.retry.should_retry(failure, attempt, retry_after) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying");
                    return Err(error);
                }
            }
        }
    }
}

async fn send_once(
    request: RequestBuilder,
) -> Result<Vec<u8>, (MangadexError, Option<Duration>)> {
    let response = request.send().await.map_err(|e| (e.into(), None))?;
    let status = response.status();
    if status.is_success() {
        return response
            .bytes()
            .await
            .map(|x| x.to_vec())
            .map_err(|e| (e.into(), None));
    }
    let retry_after = retry_after(response.headers());
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            debug!(%status, error = %e, "could not read error body");
            Default::default()
        }
    };
    Err((api_error(status, &body), retry_after))
}

fn api_error(status: StatusCode, body: &[u8]) -> MangadexError {
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|x| {
            x.errors
                .into_iter()
                .filter_map(|e| e.detail.or(e.title))
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|x| !x.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected response")
                .to_string()
        });
    MangadexError::Api {
        status: status.as_u16(),
        detail,
    }
}

/// Wait requested by the server. mangadex sends `X-RateLimit-Retry-After` as a
/// unix timestamp, generic servers send `Retry-After` in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|x| x.to_str().ok())
            .and_then(|x| x.trim().parse::<u64>().ok())
    };
    if let Some(at) = header("x-ratelimit-retry-after") {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        return Some(Duration::from_secs(at.saturating_sub(now)));
    }
    header("retry-after").map(Duration::from_secs)
}

#[cfg(test)]
mod test {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        headers.insert(
            "x-ratelimit-retry-after",
            HeaderValue::from_str(&(now + 30).to_string()).unwrap(),
        );
        let wait = retry_after(&headers).unwrap();
        assert!(wait <= Duration::from_secs(30) && wait >= Duration::from_secs(28));

        headers.insert("x-ratelimit-retry-after", HeaderValue::from_static("1"));
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_api_error_detail() {
        let body = br#"{"result":"error","errors":[{"id":"x","status":404,"title":"not_found_http_exception","detail":"Manga not found"}]}"#;
        match api_error(StatusCode::NOT_FOUND, body) {
            MangadexError::Api { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "Manga not found");
            }
            other => panic!("unexpected {other:?}"),
        }
        match api_error(StatusCode::BAD_GATEWAY, b"<html>") {
            MangadexError::Api { detail, .. } => assert_eq!(detail, "Bad Gateway"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unreadable_error_body() {
        match api_error(StatusCode::TOO_MANY_REQUESTS, &[]) {
            MangadexError::Api { status, detail } => {
                assert_eq!(status, 429);
                assert_eq!(detail, "Too Many Requests");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
