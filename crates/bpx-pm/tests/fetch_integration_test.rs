/// Integration tests for fetching over HTTP against a local server
///
/// A tiny_http server stands in for the download origin.

use bpx_pm::config::Context;
use bpx_pm::digest::{digest_bytes, DigestAlgorithm};
use bpx_pm::downloader::{Downloader, DownloaderRegistry, HttpDownloader};
use bpx_pm::http::HttpClient;
use bpx_pm::{BuildpackError, DirectInstall, FetchFailure, Installer};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tiny_http::{Response, Server, StatusCode};

struct Origin {
    base: String,
    hits: Arc<AtomicUsize>,
}

/// Serve `routes` (path -> body) and answer 404 for anything else and 500 for `/broken`
fn origin(routes: HashMap<&'static str, Vec<u8>>) -> Origin {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            counter.fetch_add(1, Ordering::SeqCst);
            let path = request.url().split('?').next().unwrap_or_default().to_string();
            let response = match routes.get(path.as_str()) {
                Some(body) => Response::from_data(body.clone()),
                None if path == "/broken" => Response::from_data(b"oops".to_vec()).with_status_code(StatusCode(500)),
                None => Response::from_data(b"missing".to_vec()).with_status_code(StatusCode(404)),
            };
            let _ = request.respond(response);
        }
    });

    Origin {
        base: format!("http://127.0.0.1:{}", port),
        hits,
    }
}

fn downloader() -> HttpDownloader {
    HttpDownloader::new(Arc::new(HttpClient::new().unwrap()))
}

#[tokio::test]
async fn test_download_success() {
    let origin = origin(HashMap::from([("/files/a.txt", b"Hello World!".to_vec())]));
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("a.txt");

    downloader()
        .download(&format!("{}/files/a.txt", origin.base), &dest)
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(&dest).unwrap(), "Hello World!");
    assert!(!temp.path().join("a.txt.part").exists());
}

#[tokio::test]
async fn test_download_not_found() {
    let origin = origin(HashMap::new());
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("a.txt");

    let err = downloader()
        .download(&format!("{}/files/a.txt", origin.base), &dest)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(!dest.exists());
    assert!(!temp.path().join("a.txt.part").exists());
}

#[tokio::test]
async fn test_download_server_error() {
    let origin = origin(HashMap::new());
    let temp = TempDir::new().unwrap();

    let err = downloader()
        .download(&format!("{}/broken", origin.base), &temp.path().join("b"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BuildpackError::Fetch { failure: FetchFailure::Status(500), .. }
    ));
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn test_download_direct_reads_first_token() {
    let origin = origin(HashMap::from([(
        "/files/a.txt.sha256",
        b"7F83B1657FF1FC53B92DC18148A1D65DFC2D4B1FA3D677284ADDD200126D9069  a.txt\n".to_vec(),
    )]));

    let digest = downloader()
        .download_direct(&format!("{}/files/a.txt.sha256", origin.base))
        .await
        .unwrap();

    assert_eq!(digest, "7F83B1657FF1FC53B92DC18148A1D65DFC2D4B1FA3D677284ADDD200126D9069");
}

#[tokio::test]
async fn test_installer_end_to_end_over_http() {
    let payload = b"#!/bin/sh\necho hi\n".to_vec();
    let digest = digest_bytes(DigestAlgorithm::Sha256, &payload);
    let origin = origin(HashMap::from([
        ("/bin/hello.sh", payload),
        ("/bin/hello.sh.sha256", format!("{}  hello.sh\n", digest).into_bytes()),
    ]));

    let temp = TempDir::new().unwrap();
    let ctx = Arc::new(Context::from_pairs([
        ("CACHE_DIR", temp.path().join("cache").display().to_string()),
        ("TMPDIR", temp.path().join("tmp").display().to_string()),
        ("DOWNLOAD_METHOD", "native".to_string()),
    ]));
    let installer = Installer::with_registry(ctx, &DownloaderRegistry::new()).unwrap();
    let dest = temp.path().join("app").join("bin");
    let install = DirectInstall::new(
        format!("{}/bin/hello.sh?token=abc", origin.base),
        format!("{}/bin/hello.sh.sha256", origin.base),
        &dest,
    );

    let cold = installer.install_direct(&install).await.unwrap();
    assert!(!cold.from_cache);
    assert!(dest.join("hello.sh").is_file());
    assert!(temp.path().join("cache/hello.sh").is_file());
    assert_eq!(origin.hits.load(Ordering::SeqCst), 2);

    let warm = installer.install_direct(&install).await.unwrap();
    assert!(warm.from_cache);
    // Only the digest file is fetched again
    assert_eq!(origin.hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_installer_reports_missing_payload() {
    let origin = origin(HashMap::new());
    let temp = TempDir::new().unwrap();
    let ctx = Arc::new(Context::from_pairs([
        ("CACHE_DIR", temp.path().join("cache").display().to_string()),
        ("TMPDIR", temp.path().join("tmp").display().to_string()),
    ]));
    let installer = Installer::from_context(ctx).unwrap();

    let install = DirectInstall::new(format!("{}/nope.tgz", origin.base), "abc", temp.path().join("d"));
    let err = installer.install_direct(&install).await.unwrap_err();

    assert!(err.is_not_found());
    assert!(err.to_string().contains("/nope.tgz"));
    assert!(!temp.path().join("cache/nope.tgz").exists());
}
