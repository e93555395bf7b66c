use mangadex::{
    ApiClient, ChapterDownloadRequest, ChapterDownloader, DownloaderConfigBuilder, MangadexError,
    RetryPolicy,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::{self, Duration, SystemTime, UNIX_EPOCH};
use tower::{Service, ServiceBuilder, ServiceExt};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ApiClient {
    let config = DownloaderConfigBuilder::default()
        .api_url(server.uri())
        .retry(RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(20),
            2.0,
        ))
        .build()
        .unwrap();
    ApiClient::new(&config).unwrap()
}

async fn mount_chapter(server: &MockServer, id: &str, files: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/at-home/server/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok",
            "baseUrl": server.uri(),
            "chapter": {"hash": "hash", "data": files, "dataSaver": files}
        })))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, file: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/data-saver/hash/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

fn sha256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[tokio::test]
async fn test_chapter_download_service() {
    let server = MockServer::start().await;
    mount_chapter(&server, "c1", &["1-a.png", "2-b.jpg"]).await;
    mount_page(&server, "1-a.png", b"first").await;
    mount_page(&server, "2-b.jpg", b"second").await;

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(client(&server));
    let req = ChapterDownloadRequest::new("c1")
        .data_saver(true)
        .path(tmpdir.path());
    let download = downloader
        .ready()
        .await
        .unwrap()
        .call(req)
        .await
        .expect("Some error");

    assert!(download.is_complete());
    assert_eq!(download.pages().len(), 2);
    assert_eq!(std::fs::read(tmpdir.path().join("page_0.png")).unwrap(), b"first");
    assert_eq!(std::fs::read(tmpdir.path().join("page_1.jpg")).unwrap(), b"second");
    assert_eq!(download.pages()[1].path(), &tmpdir.path().join("page_1.jpg"));
}

#[tokio::test]
async fn test_limit_download_speed() {
    let server = MockServer::start().await;
    let ids = vec!["e5c1c16c", "dbe91557"];
    for id in &ids {
        mount_chapter(&server, id, &["1-a.png"]).await;
    }
    mount_page(&server, "1-a.png", b"page").await;

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ServiceBuilder::new()
        .rate_limit(1, Duration::from_secs(1))
        .service(ChapterDownloader::new(client(&server)));

    let clock = time::Instant::now();
    for id in ids {
        let req = ChapterDownloadRequest::new(id)
            .data_saver(true)
            .path(tmpdir.path().join(id));
        downloader.ready().await.unwrap().call(req).await.unwrap();
    }
    assert!(clock.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_checksum_mismatch_is_partial_failure() {
    let server = MockServer::start().await;
    let good = format!("1-{}.png", sha256(b"good"));
    let corrupted = format!("2-{}.png", sha256(b"expected"));
    mount_chapter(&server, "c1", &[&good, &corrupted]).await;
    mount_page(&server, &good, b"good").await;
    Mock::given(method("GET"))
        .and(path(format!("/data-saver/hash/{corrupted}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"garbage".to_vec()))
        .expect(3)
        .mount(&server)
        .await;

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(client(&server));
    let download = downloader
        .call(ChapterDownloadRequest::new("c1").path(tmpdir.path()))
        .await
        .unwrap();

    assert!(!download.is_complete());
    assert_eq!(download.pages().len(), 1);
    assert_eq!(download.failed().len(), 1);
    assert_eq!(*download.failed()[0].index(), 1);
    assert!(download.failed()[0].error().contains("checksum"));
    assert!(!tmpdir.path().join("page_1.png").exists());
    assert!(!tmpdir.path().join("page_1.part").exists());
}

#[tokio::test]
async fn test_checksum_can_be_disabled() {
    let server = MockServer::start().await;
    let file = format!("1-{}.png", sha256(b"expected"));
    mount_chapter(&server, "c1", &[&file]).await;
    mount_page(&server, &file, b"whatever").await;

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(client(&server)).verify_checksums(false);
    let download = downloader
        .call(ChapterDownloadRequest::new("c1").path(tmpdir.path()))
        .await
        .unwrap();
    assert!(download.is_complete());
    assert_eq!(download.pages()[0].checksum(), &None);
}

#[tokio::test]
async fn test_retry_after_server_error() {
    let server = MockServer::start().await;
    mount_chapter(&server, "c1", &["1-a.png"]).await;
    Mock::given(method("GET"))
        .and(path("/data-saver/hash/1-a.png"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "1-a.png", b"page").await;

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(client(&server));
    let download = downloader
        .call(ChapterDownloadRequest::new("c1").path(tmpdir.path()))
        .await
        .unwrap();
    assert!(download.is_complete());
    assert_eq!(std::fs::read(tmpdir.path().join("page_0.png")).unwrap(), b"page");
}

#[tokio::test]
async fn test_rate_limited_at_home_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/at-home/server/c1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_chapter(&server, "c1", &["1-a.png"]).await;
    mount_page(&server, "1-a.png", b"page").await;

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(client(&server));
    let download = downloader
        .call(ChapterDownloadRequest::new("c1").path(tmpdir.path()))
        .await
        .unwrap();
    assert!(download.is_complete());
}

#[tokio::test]
async fn test_resume_skips_existing_pages() {
    let server = MockServer::start().await;
    mount_chapter(&server, "c1", &["1-a.png", "2-b.png"]).await;
    Mock::given(method("GET"))
        .and(path("/data-saver/hash/1-a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
        .expect(0)
        .mount(&server)
        .await;
    mount_page(&server, "2-b.png", b"second").await;

    let tmpdir = tempfile::tempdir().unwrap();
    std::fs::write(tmpdir.path().join("page_0.png"), b"already here").unwrap();

    let mut downloader = ChapterDownloader::new(client(&server));
    let download = downloader
        .call(ChapterDownloadRequest::new("c1").path(tmpdir.path()))
        .await
        .unwrap();
    assert!(download.is_complete());
    assert_eq!(
        std::fs::read(tmpdir.path().join("page_0.png")).unwrap(),
        b"already here"
    );
}

#[tokio::test]
async fn test_missing_chapter_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/at-home/server/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "result": "error",
            "errors": [{"status": 404, "title": "not_found", "detail": "Chapter not found"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(client(&server));
    let err = downloader
        .call(ChapterDownloadRequest::new("missing").path(tmpdir.path()))
        .await
        .unwrap_err();
    match err {
        MangadexError::Api { status, detail } => {
            assert_eq!(status, 404);
            assert_eq!(detail, "Chapter not found");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_paginate_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok", "data": [1, 2], "limit": 2, "offset": 0, "total": 3
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok", "data": [3], "limit": 2, "offset": 2, "total": 3
        })))
        .mount(&server)
        .await;

    let items: Vec<u32> = client(&server).paginate("/items", &[], 2).await.unwrap();
    assert_eq!(items, [1, 2, 3]);
}

#[tokio::test]
async fn test_download_on_spawned_task() {
    let server = MockServer::start().await;
    mount_chapter(&server, "c1", &["1-a.png", "2-b.png", "3-c.png"]).await;
    for file in ["1-a.png", "2-b.png", "3-c.png"] {
        mount_page(&server, file, file.as_bytes()).await;
    }

    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(client(&server)).concurrency(2);
    let task = downloader.call(ChapterDownloadRequest::new("c1").path(tmpdir.path()));
    let download = tokio::spawn(task).await.unwrap().unwrap();

    assert!(download.is_complete());
    let indices: Vec<usize> = download.pages().iter().map(|p| *p.index()).collect();
    assert_eq!(indices, [0, 1, 2]);
    assert_eq!(std::fs::read(tmpdir.path().join("page_2.png")).unwrap(), b"3-c.png");
}

#[tokio::test]
async fn test_rate_limit_header_ignored_on_server_error() {
    let server = MockServer::start().await;
    mount_chapter(&server, "c1", &["1-a.png"]).await;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    Mock::given(method("GET"))
        .and(path("/data-saver/hash/1-a.png"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("X-RateLimit-Retry-After", (now + 30).to_string().as_str()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_page(&server, "1-a.png", b"page").await;

    let config = DownloaderConfigBuilder::default()
        .api_url(server.uri())
        .retry(RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_secs(30),
            2.0,
        ))
        .build()
        .unwrap();
    let tmpdir = tempfile::tempdir().unwrap();
    let mut downloader = ChapterDownloader::new(ApiClient::new(&config).unwrap());

    let clock = time::Instant::now();
    let download = downloader
        .call(ChapterDownloadRequest::new("c1").path(tmpdir.path()))
        .await
        .unwrap();
    assert!(download.is_complete());
    assert!(clock.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_paginate_stops_at_collection_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .and(query_param("offset", "9900"))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok", "data": vec![0u32; 100], "total": 50000
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .and(query_param("limit", "300"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "ok", "data": vec![0u32; 300], "total": 50000
        })))
        .expect(33)
        .mount(&server)
        .await;

    let items: Vec<u32> = client(&server).paginate("/big", &[], 300).await.unwrap();
    assert_eq!(items.len(), 10_000);
}
