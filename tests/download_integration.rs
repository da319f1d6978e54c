//! Integration tests over real sockets: `Client` on `TokioNetwork` against a
//! wiremock HTTP server.

use downloader_client::download::channel;
use downloader_client::{Client, ClientConfig, DownloadError, HostOptions, OwnedEvent};
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::mock_network::payload;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn drain(rx: &mut UnboundedReceiver<OwnedEvent>) -> Vec<OwnedEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn body_of(events: &[OwnedEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            OwnedEvent::Fragment(bytes) => Some(bytes.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

async fn download(server: &MockServer, file: &str, resume_offset: usize) -> Vec<OwnedEvent> {
    let (handler, mut rx) = channel();
    let client = Client::new(ClientConfig::default().with_buffer_size(1024), handler).unwrap();
    client
        .get(&format!("{}/{file}", server.uri()), HostOptions::default(), resume_offset)
        .unwrap();
    client.wait_idle().await;
    client.shutdown().await.unwrap();
    drain(&mut rx)
}

#[tokio::test]
async fn test_download_whole_file_over_tcp() {
    let server = require_mock_server!();
    let content = payload(5000);
    Mock::given(method("GET"))
        .and(path("/fw/app.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let events = download(&server, "fw/app.bin", 0).await;

    assert_eq!(body_of(&events), content);
    let fragments = events
        .iter()
        .filter(|e| matches!(e, OwnedEvent::Fragment(_)))
        .count();
    assert!(fragments >= 5, "5000 bytes cannot fit one 1024-byte buffer");
    assert_eq!(
        events[events.len() - 2..],
        [OwnedEvent::Done, OwnedEvent::Deinitialized]
    );
}

#[tokio::test]
async fn test_download_resume_sends_range_header() {
    let server = require_mock_server!();
    let content = payload(300);
    Mock::given(method("GET"))
        .and(path("/f.bin"))
        .and(header("range", "bytes=100-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(content[100..].to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let events = download(&server, "f.bin", 100).await;

    assert_eq!(body_of(&events), content[100..]);
    assert!(events.contains(&OwnedEvent::Done));
}

#[tokio::test]
async fn test_download_follows_redirect() {
    let server = require_mock_server!();
    let content = payload(64);
    Mock::given(method("GET"))
        .and(path("/old.bin"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new.bin"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let events = download(&server, "old.bin", 0).await;

    assert_eq!(body_of(&events), content);
    assert!(!events.iter().any(|e| matches!(e, OwnedEvent::Error(_))));
}

#[tokio::test]
async fn test_download_missing_file_is_malformed() {
    let server = require_mock_server!();

    let events = download(&server, "missing.bin", 0).await;

    assert!(
        matches!(
            events.first(),
            Some(OwnedEvent::Error(DownloadError::Malformed { reason })) if reason.contains("404")
        ),
        "unexpected events: {events:?}"
    );
    assert!(!events.contains(&OwnedEvent::Done));
}
