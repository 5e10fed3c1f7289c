use anyhow::Result;
use download_task::{
    AuthScheme, DownloadAction, DownloadError, ProgressSink, ProxyEndpoint, ProxySettings, UseETag,
    VerifyAction,
};
use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{basic_auth, body_string, header, header_exists, method, path},
};

const LAST_MODIFIED: &str = "Sun, 06 Nov 1994 08:49:37 GMT";
const LAST_MODIFIED_SECS: i64 = 784_111_777;

async fn serve(server: &MockServer, file: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(file))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn part_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
                .count()
        })
        .unwrap_or(0)
}

fn mtime_secs(file: &Path) -> i64 {
    FileTime::from_last_modification_time(&fs::metadata(file).unwrap()).unix_seconds()
}

#[derive(Debug, Clone, PartialEq)]
enum DownloadProgress {
    Started { description: String },
    Progress { message: String },
    Completed,
}

/// Records progress events; clones share the same event list
#[derive(Debug, Clone, Default)]
struct RecordingProgress {
    events: Arc<Mutex<Vec<DownloadProgress>>>,
}

impl RecordingProgress {
    fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> Vec<DownloadProgress> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn started(&mut self, description: &str) {
        self.events.lock().unwrap().push(DownloadProgress::Started {
            description: description.to_string(),
        });
    }

    fn progress(&mut self, message: &str) {
        self.events.lock().unwrap().push(DownloadProgress::Progress {
            message: message.to_string(),
        });
    }

    fn completed(&mut self) {
        self.events.lock().unwrap().push(DownloadProgress::Completed);
    }
}

/// Redirects `/hop/<n>` to `/hop/<n + 1>` until `last` is reached
struct RedirectChain {
    last: usize,
}

impl Respond for RedirectChain {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let hop: usize = request
            .url
            .path()
            .trim_start_matches("/hop/")
            .parse()
            .unwrap_or(0);
        if hop >= self.last {
            ResponseTemplate::new(200).set_body_string("end of chain")
        } else {
            ResponseTemplate::new(302).insert_header("Location", format!("/hop/{}", hop + 1))
        }
    }
}

/// Reads each request and closes the connection without answering.
/// Returns the URL and the number of connections accepted so far.
async fn hang_up_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        }
    });
    (format!("http://{}/a.txt", addr), accepted)
}

/// Answers every request with a body shorter than its Content-Length
async fn truncated_body_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}/broken.txt", addr)
}

#[tokio::test]
async fn test_download_into_directory() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/a.txt", "X").await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path());
    action.execute().await?;

    let file = temp_dir.path().join("a.txt");
    assert_eq!(fs::read_to_string(&file)?, "X");
    assert!(!action.is_up_to_date());
    assert!(!action.is_skipped());
    assert_eq!(action.output_files()?, vec![file]);
    Ok(())
}

#[tokio::test]
async fn test_existing_file_without_overwrite_makes_no_request() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("new"))
        .expect(0)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    fs::write(temp_dir.path().join("a.txt"), "old")?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .overwrite(false);
    action.execute().await?;

    assert!(action.is_up_to_date());
    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "old");
    Ok(())
}

#[tokio::test]
async fn test_not_found_leaves_no_file() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let url = format!("{}/missing.txt", server.uri());

    let mut action = DownloadAction::new().src(url.as_str()).dest(temp_dir.path());
    let err = action.execute().await.unwrap_err();

    match &err {
        DownloadError::HttpStatus { code, url: u, .. } => {
            assert_eq!(*code, 404);
            assert_eq!(u, &url);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        err.to_string(),
        format!("Not Found (HTTP status code: 404, URL: {})", url)
    );
    assert!(!temp_dir.path().join("missing.txt").exists());
    assert!(!action.is_up_to_date());
    Ok(())
}

#[tokio::test]
async fn test_many_sources_need_directory_destination() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let target = temp_dir.path().join("plain.txt");
    fs::write(&target, "keep")?;

    let mut action = DownloadAction::new()
        .src(vec![
            format!("{}/a.txt", server.uri()),
            format!("{}/b.txt", server.uri()),
        ])
        .dest(target.as_path());
    let err = action.execute().await.unwrap_err();

    assert!(matches!(err, DownloadError::Configuration(_)));
    assert_eq!(fs::read_to_string(&target)?, "keep");
    Ok(())
}

#[tokio::test]
async fn test_many_sources_in_order() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/a.txt", "A").await;
    serve(&server, "/dir/b.txt", "B").await;
    let temp_dir = TempDir::new()?;
    let dest = temp_dir.path().join("out");

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .src(format!("{}/dir/b.txt", server.uri()))
        .dest(dest.as_path());
    action.execute().await?;

    assert_eq!(fs::read_to_string(dest.join("a.txt"))?, "A");
    assert_eq!(fs::read_to_string(dest.join("b.txt"))?, "B");

    let requests = server.received_requests().await.unwrap_or_default();
    let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(paths, vec!["/a.txt", "/dir/b.txt"]);
    Ok(())
}

#[tokio::test]
async fn test_first_failure_aborts_remaining_sources() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/a.txt", "A").await;
    Mock::given(method("GET"))
        .and(path("/c.txt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src([
            format!("{}/a.txt", server.uri()),
            format!("{}/b.txt", server.uri()),
            format!("{}/c.txt", server.uri()),
        ])
        .dest(temp_dir.path());
    let err = action.execute().await.unwrap_err();

    assert!(matches!(err, DownloadError::HttpStatus { code: 404, .. }));
    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "A");
    assert!(!temp_dir.path().join("c.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_offline_mode() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let url = format!("{}/a.txt", server.uri());

    let mut action = DownloadAction::new()
        .src(url.as_str())
        .dest(temp_dir.path())
        .offline(true);
    let err = action.execute().await.unwrap_err();
    assert!(matches!(err, DownloadError::OfflineUnavailable { url: u } if u == url));

    fs::write(temp_dir.path().join("a.txt"), "cached")?;
    let mut action = DownloadAction::new()
        .src(url.as_str())
        .dest(temp_dir.path())
        .offline(true);
    action.execute().await?;
    assert!(action.is_up_to_date());
    assert!(action.is_skipped());
    Ok(())
}

#[tokio::test]
async fn test_follows_redirects() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.txt"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/b.txt", server.uri())),
        )
        .mount(&server)
        .await;
    serve(&server, "/b.txt", "redirected").await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path());
    action.execute().await?;

    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "redirected");
    Ok(())
}

#[tokio::test]
async fn test_redirect_limit() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(RedirectChain { last: 10 })
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/hop/0", server.uri()))
        .dest(temp_dir.path().join("ten.txt"));
    action.execute().await?;
    assert_eq!(fs::read_to_string(temp_dir.path().join("ten.txt"))?, "end of chain");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(RedirectChain { last: 35 })
        .mount(&server)
        .await;

    let mut action = DownloadAction::new()
        .src(format!("{}/hop/0", server.uri()))
        .dest(temp_dir.path().join("too-many.txt"));
    let err = action.execute().await.unwrap_err();

    assert!(matches!(err, DownloadError::Request { .. }), "{err:?}");
    assert!(!temp_dir.path().join("too-many.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_cross_host_redirect_drops_credentials() -> Result<()> {
    let origin = MockServer::start().await;
    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.txt"))
        .and(basic_auth("user", "secret"))
        .and(header("Cookie", "session=1"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/b.txt", other.uri())),
        )
        .expect(1)
        .mount(&origin)
        .await;
    serve(&other, "/b.txt", "moved").await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", origin.uri()))
        .dest(temp_dir.path())
        .username("user")
        .password("secret")
        .header("Cookie", "session=1");
    action.execute().await?;

    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "moved");
    let requests = other.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
    assert!(!requests[0].headers.contains_key("cookie"));
    Ok(())
}

#[tokio::test]
async fn test_only_if_modified_over_http() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("if-modified-since"))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("content")
                .insert_header("Last-Modified", LAST_MODIFIED),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let file = temp_dir.path().join("a.txt");

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .only_if_modified(true);
    action.execute().await?;
    assert!(!action.is_up_to_date());
    assert_eq!(mtime_secs(&file), LAST_MODIFIED_SECS);

    action.execute().await?;
    assert!(action.is_up_to_date());

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].headers.contains_key("if-modified-since"));
    assert_eq!(
        requests[1].headers.get("if-modified-since").and_then(|v| v.to_str().ok()),
        Some(LAST_MODIFIED)
    );
    Ok(())
}

#[tokio::test]
async fn test_unchanged_last_modified_is_up_to_date() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("content")
                .insert_header("Last-Modified", LAST_MODIFIED),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let file = temp_dir.path().join("a.txt");
    fs::write(&file, "local")?;
    filetime::set_file_mtime(&file, FileTime::from_unix_time(LAST_MODIFIED_SECS, 0))?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(file.as_path())
        .only_if_newer(true);
    action.execute().await?;

    assert!(action.is_up_to_date());
    assert_eq!(fs::read_to_string(&file)?, "local");
    Ok(())
}

#[tokio::test]
async fn test_only_if_modified_for_file_url() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let src = temp_dir.path().join("source.bin");
    fs::write(&src, "v1")?;
    filetime::set_file_mtime(&src, FileTime::from_unix_time(1_600_000_000, 0))?;
    let src_url = reqwest::Url::from_file_path(&src).unwrap();
    let dest = temp_dir.path().join("copy.bin");

    let mut action = DownloadAction::new()
        .src(src_url.clone())
        .dest(dest.as_path())
        .only_if_modified(true);
    action.execute().await?;
    assert!(!action.is_up_to_date());
    assert_eq!(fs::read_to_string(&dest)?, "v1");
    assert_eq!(mtime_secs(&dest), 1_600_000_000);

    action.execute().await?;
    assert!(action.is_up_to_date());

    fs::write(&src, "v2")?;
    filetime::set_file_mtime(&src, FileTime::from_unix_time(1_700_000_000, 0))?;
    let mut action = DownloadAction::new()
        .src(src_url)
        .dest(dest.as_path())
        .only_if_modified(true);
    action.execute().await?;
    assert!(!action.is_up_to_date());
    assert_eq!(fs::read_to_string(&dest)?, "v2");
    Ok(())
}

#[tokio::test]
async fn test_etag_round_trip() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("tagged")
                .insert_header("ETag", "\"v1\""),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let work_dir = temp_dir.path().join("work");
    let dest = temp_dir.path().join("dest");

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(download_task::DestSpec::directory(&dest))
        .only_if_modified(true)
        .use_etag(true)
        .work_dir(&work_dir);
    action.execute().await?;
    assert!(!action.is_up_to_date());

    let cache = fs::read_to_string(work_dir.join("etags.json"))?;
    assert_eq!(
        cache,
        format!(r#"{{"{}":{{"/a.txt":{{"ETag":"\"v1\""}}}}}}"#, server.uri())
    );

    action.execute().await?;
    assert!(action.is_up_to_date());
    assert_eq!(fs::read_to_string(dest.join("a.txt"))?, "tagged");
    Ok(())
}

#[tokio::test]
async fn test_strong_only_ignores_weak_etags() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("weak")
                .insert_header("ETag", "W/\"v1\""),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let etags = temp_dir.path().join("cache").join("etags.json");

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .only_if_modified(true)
        .use_etag("strongOnly".parse::<UseETag>()?)
        .cached_etags_file(&etags);
    action.execute().await?;

    assert!(!etags.exists());
    Ok(())
}

#[tokio::test]
async fn test_temp_and_move() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/a.txt", "fresh").await;
    let temp_dir = TempDir::new()?;
    let work_dir = temp_dir.path().join("work");
    let file = temp_dir.path().join("a.txt");
    fs::write(&file, "old")?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .temp_and_move(true)
        .work_dir(&work_dir);
    action.execute().await?;

    assert_eq!(fs::read_to_string(&file)?, "fresh");
    assert_eq!(part_files(&work_dir), 0);
    Ok(())
}

#[tokio::test]
async fn test_temp_and_move_failure_keeps_destination() -> Result<()> {
    let url = truncated_body_server().await;
    let temp_dir = TempDir::new()?;
    let work_dir = temp_dir.path().join("work");
    let file = temp_dir.path().join("broken.txt");
    fs::write(&file, "old")?;

    let mut action = DownloadAction::new()
        .src(url)
        .dest(temp_dir.path())
        .temp_and_move(true)
        .work_dir(&work_dir);
    let err = action.execute().await.unwrap_err();

    assert!(matches!(err, DownloadError::Request { .. }));
    assert_eq!(fs::read_to_string(&file)?, "old");
    assert_eq!(part_files(&work_dir), 0);
    Ok(())
}

#[tokio::test]
async fn test_direct_stream_failure_removes_partial_file() -> Result<()> {
    let url = truncated_body_server().await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new().src(url).dest(temp_dir.path());
    assert!(action.execute().await.is_err());

    assert!(!temp_dir.path().join("broken.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_retries_service_unavailable() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    serve(&server, "/a.txt", "finally").await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .retries(1);
    action.execute().await?;

    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "finally");
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_no_retries_by_default() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "0"))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path());
    let err = action.execute().await.unwrap_err();

    assert!(matches!(err, DownloadError::HttpStatus { code: 503, .. }));
    Ok(())
}

#[tokio::test]
async fn test_transport_errors_retry_only_idempotent_methods() -> Result<()> {
    let temp_dir = TempDir::new()?;

    let (url, accepted) = hang_up_server().await;
    let mut action = DownloadAction::new()
        .src(url.as_str())
        .dest(temp_dir.path())
        .method("POST")
        .body("payload")
        .retries(2);
    let err = action.execute().await.unwrap_err();
    assert!(matches!(err, DownloadError::Request { .. }), "{err:?}");
    assert_eq!(accepted.load(Ordering::SeqCst), 1);

    let (url, accepted) = hang_up_server().await;
    let mut action = DownloadAction::new()
        .src(url.as_str())
        .dest(temp_dir.path())
        .retries(1);
    let err = action.execute().await.unwrap_err();
    assert!(matches!(err, DownloadError::Request { .. }), "{err:?}");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert!(!temp_dir.path().join("a.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_read_timeout() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .read_timeout(Duration::from_millis(300));
    let err = action.execute().await.unwrap_err();

    assert!(matches!(err, DownloadError::Request { .. }), "{err:?}");
    assert!(!temp_dir.path().join("a.txt").exists());
    Ok(())
}

/// "Hello world", gzip-compressed
const GZIP_HELLO: [u8; 31] = [
    0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0xf3, 0x48, 0xcd, 0xc9, 0xc9,
    0x57, 0x28, 0xcf, 0x2f, 0xca, 0x49, 0x01, 0x00, 0x52, 0x9e, 0xd6, 0x8b, 0x0b, 0x00, 0x00,
    0x00,
];

#[tokio::test]
async fn test_compressed_response_is_decoded() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Accept-Encoding", "gzip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(GZIP_HELLO.to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/hello.txt", server.uri()))
        .dest(temp_dir.path());
    action.execute().await?;

    assert_eq!(
        fs::read_to_string(temp_dir.path().join("hello.txt"))?,
        "Hello world"
    );
    Ok(())
}

#[tokio::test]
async fn test_compression_disabled() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/a.txt", "plain").await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .compress(false);
    action.execute().await?;

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("accept-encoding"));
    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "plain");
    Ok(())
}

#[tokio::test]
async fn test_requests_go_through_proxy() -> Result<()> {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.txt"))
        .and(header_exists("proxy-authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_string("via proxy"))
        .expect(1)
        .mount(&proxy)
        .await;
    let address = proxy.address();
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src("http://download.invalid/a.txt")
        .dest(temp_dir.path())
        .proxy(ProxySettings {
            http: Some(ProxyEndpoint {
                host: address.ip().to_string(),
                port: address.port(),
                username: Some("proxyuser".to_string()),
                password: Some("proxypass".to_string()),
            }),
            https: None,
        });
    action.execute().await?;

    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "via proxy");
    Ok(())
}

#[tokio::test]
async fn test_basic_auth() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(basic_auth("user", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("private"))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .username("user")
        .password("secret");
    action.execute().await?;

    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "private");
    Ok(())
}

#[tokio::test]
async fn test_digest_auth() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_string("digested"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            r#"Digest realm="test", qop="auth", nonce="abc123", opaque="xyz""#,
        ))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .username("user")
        .password("secret")
        .auth_scheme(AuthScheme::Digest);
    action.execute().await?;

    assert_eq!(fs::read_to_string(temp_dir.path().join("a.txt"))?, "digested");

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    let authorization = requests[1]
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(authorization.starts_with("Digest username=\"user\", realm=\"test\""));
    assert!(authorization.contains("uri=\"/a.txt\""));
    assert!(authorization.contains("opaque=\"xyz\""));
    Ok(())
}

#[tokio::test]
async fn test_custom_method_headers_and_body() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(header("X-Custom", "value"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("created"))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new()?;
    let file = temp_dir.path().join("response.txt");

    let mut action = DownloadAction::new()
        .src(format!("{}/api", server.uri()))
        .dest(file.as_path())
        .method("post")
        .header("X-Custom", "value")
        .body("payload");
    action.execute().await?;

    assert_eq!(fs::read_to_string(&file)?, "created");
    Ok(())
}

#[tokio::test]
async fn test_progress_events() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/big.bin", &"x".repeat(3000)).await;
    let temp_dir = TempDir::new()?;
    let url = format!("{}/big.bin", server.uri());
    let recorder = RecordingProgress::new();

    let mut action = DownloadAction::new()
        .src(url.as_str())
        .dest(temp_dir.path())
        .progress(recorder.clone());
    action.execute().await?;

    let events = recorder.events();
    assert_eq!(
        events.first(),
        Some(&DownloadProgress::Started { description: url })
    );
    assert_eq!(events.last(), Some(&DownloadProgress::Completed));
    let last_message = events.iter().rev().find_map(|e| match e {
        DownloadProgress::Progress { message } => Some(message.as_str()),
        _ => None,
    });
    assert_eq!(last_message, Some("2 KB/2 KB downloaded"));
    Ok(())
}

#[tokio::test]
async fn test_quiet_suppresses_progress() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/a.txt", "X").await;
    let temp_dir = TempDir::new()?;
    let recorder = RecordingProgress::new();

    let mut action = DownloadAction::new()
        .src(format!("{}/a.txt", server.uri()))
        .dest(temp_dir.path())
        .quiet(true)
        .progress(recorder.clone());
    action.execute().await?;

    assert!(recorder.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_verify_downloaded_file() -> Result<()> {
    let server = MockServer::start().await;
    serve(&server, "/hello.txt", "Hello world").await;
    let temp_dir = TempDir::new()?;

    let mut action = DownloadAction::new()
        .src(format!("{}/hello.txt", server.uri()))
        .dest(temp_dir.path());
    action.execute().await?;
    let file = temp_dir.path().join("hello.txt");

    VerifyAction::new()
        .src(&file)
        .algorithm("MD5")
        .checksum("3e25960a79dbc69b674cd4ec67a72c62")
        .execute()
        .await?;

    let err = VerifyAction::new()
        .src(&file)
        .checksum("deadbeef")
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::ChecksumMismatch { .. }));

    let err = VerifyAction::new()
        .src(&file)
        .algorithm("CRC32")
        .checksum("deadbeef")
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::UnsupportedAlgorithm(_)));
    Ok(())
}
