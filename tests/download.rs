use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum_bigblob::{router, AppState, DownloadConfig, FileBlob, MemoryBlob, SessionRegistry};
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, COOKIE, RANGE,
};
use reqwest::StatusCode;

const SESSION: &str = "session-under-test";

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(config: DownloadConfig) -> TestServer {
        let state = AppState::new(config, Arc::new(SessionRegistry::new()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TestServer { addr, state, client: reqwest::Client::new() }
    }

    fn register(&self, blob: MemoryBlob) -> String {
        self.state.sessions().register(SESSION, Arc::new(blob))
    }

    async fn get(&self, handle: &str, range: Option<&str>) -> reqwest::Response {
        let url = format!("http://{}{}", self.addr, self.state.download_path(handle));
        let mut request = self
            .client
            .get(url)
            .header(COOKIE, format!("{}={SESSION}", self.state.config().session_cookie));
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        request.send().await.unwrap()
    }
}

fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn header<'a>(response: &'a reqwest::Response, name: reqwest::header::HeaderName) -> Option<&'a str> {
    response.headers().get(name)?.to_str().ok()
}

#[tokio::test]
async fn test_full_download() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let data = payload(1000);
    let handle = server.register(
        MemoryBlob::new(data.clone())
            .with_filename("report.pdf")
            .with_mime_type("application/pdf"),
    );

    let response = server.get(&handle, None).await;
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(Some("1000"), header(&response, CONTENT_LENGTH));
    assert_eq!(Some("application/pdf"), header(&response, CONTENT_TYPE));
    assert_eq!(
        Some("attachment; filename=\"report.pdf\"; filename*=UTF-8''report.pdf"),
        header(&response, CONTENT_DISPOSITION)
    );
    assert_eq!(None, header(&response, CONTENT_RANGE));
    assert_eq!(&data[..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_first_hundred_bytes() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let data = payload(1000);
    let handle = server.register(MemoryBlob::new(data.clone()));

    let response = server.get(&handle, Some("bytes=0-99")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(Some("bytes"), header(&response, ACCEPT_RANGES));
    assert_eq!(Some("bytes 0-99/1000"), header(&response, CONTENT_RANGE));
    assert_eq!(Some("100"), header(&response, CONTENT_LENGTH));
    assert_eq!(&data[..100], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_last_hundred_bytes() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let data = payload(1000);
    let handle = server.register(MemoryBlob::new(data.clone()));

    let response = server.get(&handle, Some("bytes=-100")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(Some("bytes 900-999/1000"), header(&response, CONTENT_RANGE));
    assert_eq!(&data[900..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_open_ended_range() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let data = payload(1000);
    let handle = server.register(MemoryBlob::new(data.clone()));

    let response = server.get(&handle, Some("bytes=500-")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(Some("bytes 500-999/1000"), header(&response, CONTENT_RANGE));
    assert_eq!(Some("500"), header(&response, CONTENT_LENGTH));
    assert_eq!(&data[500..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_malformed_range_sends_everything() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let data = payload(1000);
    let handle = server.register(MemoryBlob::new(data.clone()));

    let response = server.get(&handle, Some("bytes=abc-def")).await;
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(Some("1000"), header(&response, CONTENT_LENGTH));
    assert_eq!(None, header(&response, CONTENT_RANGE));
    assert_eq!(&data[..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_multi_range_sends_everything() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let data = payload(1000);
    let handle = server.register(MemoryBlob::new(data.clone()));

    let response = server.get(&handle, Some("bytes=0-10,20-30")).await;
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(&data[..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_unknown_handle_is_no_content() {
    let server = TestServer::start(DownloadConfig::default()).await;

    let response = server.get("never-registered", None).await;
    assert_eq!(StatusCode::NO_CONTENT, response.status());
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_handle_is_single_use() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let handle = server.register(MemoryBlob::new(payload(10)));

    let first = server.get(&handle, None).await;
    assert_eq!(StatusCode::OK, first.status());
    assert_eq!(10, first.bytes().await.unwrap().len());

    let second = server.get(&handle, None).await;
    assert_eq!(StatusCode::NO_CONTENT, second.status());
    assert!(second.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_gone_handle_is_not_found() {
    let server = TestServer::start(DownloadConfig::default()).await;
    server.state.sessions().mark_gone(SESSION, "expired");

    let response = server.get("expired", None).await;
    assert_eq!(StatusCode::NOT_FOUND, response.status());
    assert!(response.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_other_session_cannot_take_handle() {
    let server = TestServer::start(DownloadConfig::default()).await;
    let handle = server
        .state
        .sessions()
        .register("someone-else", Arc::new(MemoryBlob::new(payload(10))));

    let response = server.get(&handle, None).await;
    assert_eq!(StatusCode::NO_CONTENT, response.status());
    assert_eq!(1, server.state.sessions().pending("someone-else"));
}

#[tokio::test]
async fn test_context_path_and_large_file() {
    let config = DownloadConfig {
        context_path: "/app".to_string(),
        chunk_size: 64 * 1024,
        ..DownloadConfig::default()
    };
    let server = TestServer::start(config).await;

    let data = payload(3 * 1024 * 1024 + 17);
    let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let blob = FileBlob::from_path(file.path()).await.unwrap();
    let handle = server.state.sessions().register(SESSION, Arc::new(blob));

    let response = server.get(&handle, Some("bytes=1048576-")).await;
    assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());
    assert_eq!(
        Some(format!("bytes 1048576-{}/{}", data.len() - 1, data.len()).as_str()),
        header(&response, CONTENT_RANGE)
    );
    assert_eq!(Some("application/octet-stream"), header(&response, CONTENT_TYPE));
    assert_eq!(&data[1024 * 1024..], &response.bytes().await.unwrap()[..]);
}

#[tokio::test]
async fn test_abandoned_download_does_not_affect_others() {
    let config = DownloadConfig { chunk_size: 64 * 1024, ..DownloadConfig::default() };
    let server = TestServer::start(config).await;
    let big = server.register(MemoryBlob::new(payload(8 * 1024 * 1024)));
    let small = server.register(MemoryBlob::new(payload(100)));

    let mut response = server.get(&big, None).await;
    assert_eq!(StatusCode::OK, response.status());
    assert!(response.chunk().await.unwrap().is_some());
    drop(response);

    let response = server.get(&small, None).await;
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(100, response.bytes().await.unwrap().len());
}
