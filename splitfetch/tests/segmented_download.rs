//! Integration tests for segmented downloads.
//!
//! These tests run the full pipeline against a local HTTP server:
//! - HEAD size discovery → planning → concurrent range fetches → merge
//! - Failure of one segment → cleanup of every segment, no output file
//! - A connection dropped before its declared length arrives
//! - Zero-byte files and eager cancellation
//!
//! Run with: `cargo test --test segmented_download`

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use splitfetch::config::DownloadConfig;
use splitfetch::download::{plan, staging_path, ProgressSink, SegmentedDownloader};
use splitfetch::error::DownloadError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

// ============================================================================
// Helper Functions
// ============================================================================

const MIB: usize = 1024 * 1024;

/// Sink that records every line into shared vectors.
#[derive(Clone, Default)]
struct SharedSink {
    statuses: Arc<Mutex<Vec<String>>>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl ProgressSink for SharedSink {
    fn status(&mut self, line: &str) {
        self.statuses.lock().unwrap().push(line.to_string());
    }

    fn progress(&mut self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

impl SharedSink {
    fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

/// Deterministic, non-repeating-looking test content.
fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7919) % 251) as u8).collect()
}

/// Parse `bytes=start-end` into inclusive bounds.
fn requested_range(req: &Request) -> (usize, usize) {
    let value = req.headers.get("Range").unwrap().to_str().unwrap();
    let (start, end) = value
        .strip_prefix("bytes=")
        .unwrap()
        .split_once('-')
        .unwrap();
    (start.parse().unwrap(), end.parse().unwrap())
}

/// Mount a HEAD mock advertising `len` bytes.
async fn mount_head(server: &MockServer, file: &str, len: usize) {
    Mock::given(method("HEAD"))
        .and(path(file))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Accept-Ranges", "bytes")
                .append_header("Content-Length", len.to_string()),
        )
        .mount(server)
        .await;
}

/// Mount a GET mock serving ranges of `body`. A range starting at
/// `truncate_at` gets only half of its bytes.
async fn mount_ranges(
    server: &MockServer,
    file: &str,
    body: Arc<Vec<u8>>,
    truncate_at: Option<usize>,
    requests: Arc<AtomicUsize>,
) {
    Mock::given(method("GET"))
        .and(path(file))
        .respond_with(move |req: &Request| {
            requests.fetch_add(1, Ordering::SeqCst);
            let (start, end) = requested_range(req);
            let mut chunk = body[start..=end].to_vec();
            if truncate_at == Some(start) {
                chunk.truncate(chunk.len() / 2);
            }
            ResponseTemplate::new(206)
                .append_header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", start, end, body.len()),
                )
                .set_body_bytes(chunk)
        })
        .mount(server)
        .await;
}

/// Read one request head and return its method and `Range` bounds.
async fn read_request(socket: &mut TcpStream) -> (String, Option<(usize, usize)>) {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&head).into_owned();
    let method = head.split_whitespace().next().unwrap_or_default().to_string();
    let range = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("range").then(|| value.trim().to_string())
        })
        .and_then(|value| {
            let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
            Some((start.parse().ok()?, end.parse().ok()?))
        });
    (method, range)
}

/// Serve `body` over plain HTTP/1.1. The range starting at `drop_at`
/// declares its full length but the socket closes after half of it.
async fn spawn_dropping_server(body: Arc<Vec<u8>>, drop_at: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = Arc::clone(&body);
            tokio::spawn(async move {
                let (method, range) = read_request(&mut socket).await;
                if method == "HEAD" {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    return;
                }

                let Some((start, end)) = range else {
                    let _ = socket
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    return;
                };
                let chunk = &body[start..=end];
                let head = format!(
                    "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\n\
                     Content-Range: bytes {}-{}/{}\r\nConnection: close\r\n\r\n",
                    chunk.len(),
                    start,
                    end,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let sent = if start == drop_at {
                    &chunk[..chunk.len() / 2]
                } else {
                    chunk
                };
                let _ = socket.write_all(sent).await;
                let _ = socket.flush().await;
            });
        }
    });

    format!("http://{}", addr)
}

fn test_config(scratch: &Path) -> DownloadConfig {
    DownloadConfig::default()
        .with_progress_interval(Duration::from_millis(10))
        .with_temp_dir(scratch.to_path_buf())
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A 25 MiB file with default bounds downloads as three ranges and merges
/// byte-for-byte.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_25_mib_in_three_parts() {
    let server = MockServer::start().await;
    let body = Arc::new(content(25 * MIB));
    let requests = Arc::new(AtomicUsize::new(0));
    mount_head(&server, "/big.bin", body.len()).await;
    mount_ranges(&server, "/big.bin", Arc::clone(&body), None, Arc::clone(&requests)).await;

    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("big.bin");
    let sink = SharedSink::default();

    let downloader = SegmentedDownloader::new(test_config(scratch.path())).unwrap();
    let outcome = downloader
        .download_with_sink(
            &format!("{}/big.bin", server.uri()),
            Some(&output),
            sink.clone(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.parts, 3);
    assert_eq!(outcome.total_size, 25 * MIB as u64);
    assert_eq!(outcome.bytes_reported, 25 * MIB as u64);
    assert_eq!(requests.load(Ordering::SeqCst), 3);

    let written = std::fs::read(&output).unwrap();
    assert_eq!(written.len(), body.len());
    assert!(written == *body, "merged content differs from source");

    assert!(!staging_path(&output).exists());
    assert!(dir_is_empty(scratch.path()));

    let statuses = sink.statuses();
    assert_eq!(statuses[0], "File size : 26214400 (25.0MiB)");
    assert!(statuses[1].starts_with("file total parts 3"));
    assert!(statuses.contains(&"download started".to_string()));
    assert!(statuses.contains(&"merging parts".to_string()));
    assert!(!sink.lines.lock().unwrap().is_empty());
}

/// The three planned ranges for 25 MiB are the ones requested from the server.
#[test]
fn test_25_mib_plan_matches_expected_ranges() {
    let plan = plan(25 * MIB as u64, None, None).unwrap();
    let bounds: Vec<(u64, u64)> = plan.ranges.iter().map(|r| (r.start, r.end)).collect();
    assert_eq!(
        bounds,
        vec![
            (0, 8_738_133),
            (8_738_134, 17_476_267),
            (17_476_268, 26_214_399)
        ]
    );
}

/// Part 2 returning a short body fails the download and leaves nothing
/// behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_part_cleans_up_everything() {
    let server = MockServer::start().await;
    let body = Arc::new(content(3 * 1024));
    let requests = Arc::new(AtomicUsize::new(0));
    mount_head(&server, "/data.bin", body.len()).await;
    // Bounds of exactly 1 KiB give three 1 KiB parts; part 2 starts at 1024.
    mount_ranges(
        &server,
        "/data.bin",
        Arc::clone(&body),
        Some(1024),
        Arc::clone(&requests),
    )
    .await;

    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("data.bin");
    let sink = SharedSink::default();

    let config = test_config(scratch.path()).with_chunk_bounds(1024, 1024);
    let downloader = SegmentedDownloader::new(config).unwrap();
    let err = downloader
        .download_with_sink(
            &format!("{}/data.bin", server.uri()),
            Some(&output),
            sink.clone(),
        )
        .await
        .unwrap_err();

    match err {
        DownloadError::SegmentsFailed { failed, total } => {
            assert_eq!(failed, vec![2]);
            assert_eq!(total, 3);
        }
        other => panic!("expected SegmentsFailed, got {:?}", other),
    }

    assert_eq!(requests.load(Ordering::SeqCst), 3);
    assert!(!output.exists());
    assert!(!staging_path(&output).exists());
    assert!(dir_is_empty(scratch.path()));
    assert!(sink
        .statuses()
        .contains(&"deleting partial parts".to_string()));
    assert!(!sink.statuses().contains(&"merging parts".to_string()));
}

/// Part 2's connection closing before its declared length fails the
/// download and leaves nothing behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_connection_cleans_up_everything() {
    let body = Arc::new(content(3 * 1024));
    let base = spawn_dropping_server(Arc::clone(&body), 1024).await;

    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("data.bin");
    let sink = SharedSink::default();

    let config = test_config(scratch.path()).with_chunk_bounds(1024, 1024);
    let downloader = SegmentedDownloader::new(config).unwrap();
    let err = downloader
        .download_with_sink(&format!("{}/data.bin", base), Some(&output), sink.clone())
        .await
        .unwrap_err();

    match err {
        DownloadError::SegmentsFailed { failed, total } => {
            assert_eq!(failed, vec![2]);
            assert_eq!(total, 3);
        }
        other => panic!("expected SegmentsFailed, got {:?}", other),
    }

    assert!(!output.exists());
    assert!(!staging_path(&output).exists());
    assert!(dir_is_empty(scratch.path()));
    assert!(sink
        .statuses()
        .contains(&"deleting partial parts".to_string()));
}

/// A zero-byte file succeeds immediately without any range request.
#[tokio::test]
async fn test_zero_byte_file() {
    let server = MockServer::start().await;
    let requests = Arc::new(AtomicUsize::new(0));
    mount_head(&server, "/empty.txt", 0).await;
    mount_ranges(
        &server,
        "/empty.txt",
        Arc::new(Vec::new()),
        None,
        Arc::clone(&requests),
    )
    .await;

    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("empty.txt");
    let downloader = SegmentedDownloader::new(test_config(out.path())).unwrap();

    let outcome = downloader
        .download_with_sink(
            &format!("{}/empty.txt", server.uri()),
            Some(&output),
            SharedSink::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.parts, 0);
    assert_eq!(requests.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::metadata(&output).unwrap().len(), 0);
}

/// A failing HEAD request aborts before any download starts.
#[tokio::test]
async fn test_head_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let out = tempfile::tempdir().unwrap();
    let downloader = SegmentedDownloader::new(test_config(out.path())).unwrap();
    let err = downloader
        .download_with_sink(
            &format!("{}/missing.bin", server.uri()),
            Some(&out.path().join("missing.bin")),
            SharedSink::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::HeadRequestFailed { .. }));
    assert!(dir_is_empty(out.path()));
}

/// With eager cancellation, one failing part stops slow siblings early.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eager_cancel_stops_siblings() {
    let server = MockServer::start().await;
    let body = Arc::new(content(3 * 1024));
    mount_head(&server, "/slow.bin", body.len()).await;

    let served = Arc::clone(&body);
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(move |req: &Request| {
            let (start, end) = requested_range(req);
            if start == 0 {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(206)
                    .set_body_bytes(served[start..=end].to_vec())
                    .set_delay(Duration::from_secs(30))
            }
        })
        .mount(&server)
        .await;

    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let output = out.path().join("slow.bin");
    let config = test_config(scratch.path())
        .with_chunk_bounds(1024, 1024)
        .with_eager_cancel(true);
    let downloader = SegmentedDownloader::new(config).unwrap();

    let started = Instant::now();
    let err = downloader
        .download_with_sink(
            &format!("{}/slow.bin", server.uri()),
            Some(&output),
            SharedSink::default(),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(20));
    match err {
        DownloadError::SegmentsFailed { failed, .. } => assert_eq!(failed, vec![1]),
        other => panic!("expected SegmentsFailed, got {:?}", other),
    }
    assert!(!output.exists());
    assert!(dir_is_empty(scratch.path()));
}
