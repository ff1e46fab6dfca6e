//! Integration tests for resuming from on-disk chunk files.

use std::time::Duration;

use downpour::{ChunkSize, Download, DownloadError, DownloadEvent, DownloadOptions};
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn quick_options() -> DownloadOptions {
    DownloadOptions {
        connections: 4,
        chunk_size: ChunkSize::Fixed(250),
        retry_delay: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(5),
        report_interval: Duration::ZERO,
        ..DownloadOptions::default()
    }
}

async fn collect_events(mut rx: UnboundedReceiver<DownloadEvent>) -> Vec<DownloadEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(event)) => {
                let closed = matches!(event, DownloadEvent::Close);
                events.push(event);
                if closed {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => panic!("timed out waiting for events, got so far: {events:?}"),
        }
    }
    events
}

async fn mount_probe(server: &MockServer, len: usize) {
    Mock::given(method("HEAD"))
        .and(path("/file.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", &*len.to_string())
                .insert_header("accept-ranges", "bytes"),
        )
        .mount(server)
        .await;
}

async fn mount_range(server: &MockServer, content: &[u8], lo: usize, hi: usize) {
    Mock::given(method("GET"))
        .and(path("/file.bin"))
        .and(header("Range", &*format!("bytes={lo}-{hi}")))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(content[lo..=hi].to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_resume_downloads_only_missing_chunks() {
    let server = MockServer::start().await;
    let content = body(1000);
    mount_probe(&server, 1000).await;
    // only the chunks that are not on disk get a mock; any other range
    // request would 404 and fail the session
    mount_range(&server, &content, 250, 499).await;
    mount_range(&server, &content, 750, 999).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file.bin");
    std::fs::write(dir.path().join("file.bin.$$0"), &content[0..250]).unwrap();
    std::fs::write(dir.path().join("file.bin.$$2"), &content[500..750]).unwrap();

    let download = Download::new(format!("{}/file.bin", server.uri()), &dest, quick_options());
    let rx = download.subscribe();
    download.start();
    let events = collect_events(rx).await;

    let Some(DownloadEvent::Metadata(metadata)) = events.first() else {
        panic!("expected metadata first, got {events:?}");
    };
    assert!(metadata.is_resume);
    assert_eq!(metadata.progress, vec![100.0, 0.0, 100.0, 0.0]);

    assert!(events.iter().any(|e| matches!(e, DownloadEvent::End)));
    assert_eq!(std::fs::read(&dest).unwrap(), content);
    for id in 0..4 {
        assert!(!dir.path().join(format!("file.bin.$${id}")).exists());
    }
}

#[tokio::test]
async fn test_resume_with_all_chunks_skips_the_network() {
    let server = MockServer::start().await;
    let content = body(1000);
    // the probe is the only allowed request
    mount_probe(&server, 1000).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file.bin");
    for (id, lo) in (0..1000).step_by(250).enumerate() {
        std::fs::write(
            dir.path().join(format!("file.bin.$${id}")),
            &content[lo..lo + 250],
        )
        .unwrap();
    }

    let download = Download::new(format!("{}/file.bin", server.uri()), &dest, quick_options());
    let rx = download.subscribe();
    download.start();
    let events = collect_events(rx).await;

    let Some(DownloadEvent::Metadata(metadata)) = events.first() else {
        panic!("expected metadata first, got {events:?}");
    };
    assert!(metadata.is_resume);
    assert_eq!(metadata.progress, vec![100.0; 4]);

    assert!(events.iter().any(|e| matches!(e, DownloadEvent::End)));
    assert_eq!(std::fs::read(&dest).unwrap(), content);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.method.to_string() == "HEAD"));
}

#[tokio::test]
async fn test_undersized_chunk_file_is_redownloaded() {
    let server = MockServer::start().await;
    let content = body(1000);
    mount_probe(&server, 1000).await;
    for lo in (0..1000).step_by(250) {
        mount_range(&server, &content, lo, lo + 249).await;
    }

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file.bin");
    // a short final chunk is not trusted and gets fetched whole again
    std::fs::write(dir.path().join("file.bin.$$3"), &content[750..850]).unwrap();

    let download = Download::new(format!("{}/file.bin", server.uri()), &dest, quick_options());
    assert!(download.wait().await.unwrap());
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_oversized_chunk_file_is_fatal() {
    let server = MockServer::start().await;
    let content = body(1000);
    mount_probe(&server, 1000).await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("file.bin");
    let oversized = dir.path().join("file.bin.$$1");
    std::fs::write(&oversized, vec![0u8; 400]).unwrap();
    std::fs::write(dir.path().join("file.bin.$$0"), &content[0..250]).unwrap();

    let download = Download::new(format!("{}/file.bin", server.uri()), &dest, quick_options());
    let result = download.wait().await;
    assert!(matches!(result, Err(DownloadError::OnDiskInconsistency(_))));

    // the disk state is left for the operator to inspect
    assert!(oversized.exists());
    assert!(dir.path().join("file.bin.$$0").exists());
    assert!(!dest.exists());
}
