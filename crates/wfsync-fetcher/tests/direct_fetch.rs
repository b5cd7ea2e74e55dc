//! Direct file and HTTP fetchers against real local resources.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wfsync_fetcher::{new_fetcher, ArtifactFetcher, FetchError, GatewayRequest};

fn request(url: &str) -> GatewayRequest {
    GatewayRequest {
        url: url.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_file_fetcher() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("test.txt"), b"test content").unwrap();

    let fetcher = new_fetcher(&format!("file://{}", dir.path().display())).unwrap();
    let cancel = CancellationToken::new();

    let data = fetcher
        .fetch(&cancel, "msg", &request("test.txt"))
        .await
        .unwrap();
    assert_eq!(data, b"test content");

    let absolute = dir.path().join("test.txt");
    let data = fetcher
        .fetch(&cancel, "msg", &request(&absolute.display().to_string()))
        .await
        .unwrap();
    assert_eq!(data, b"test content");

    let data = fetcher
        .fetch(
            &cancel,
            "msg",
            &request(&format!("file://{}", absolute.display())),
        )
        .await
        .unwrap();
    assert_eq!(data, b"test content");

    let err = fetcher
        .fetch(&cancel, "msg", &request("nonexistent.txt"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to read file"));

    let err = fetcher
        .fetch(&cancel, "msg", &request("../../etc/passwd"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not within the basePath"));
}

#[tokio::test]
async fn test_file_fetcher_honours_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("test.txt"), b"test content").unwrap();
    let fetcher = new_fetcher(&format!("file://{}", dir.path().display())).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fetcher
        .fetch(&cancel, "msg", &request("test.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));
}

/// Serve `count` connections: `/ok.bin` answers 200, anything else 404.
async fn serve(count: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for _ in 0..count {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();
            let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

            let response = if path == "/files/ok.bin" {
                "HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\npayload".to_string()
            } else {
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    .to_string()
            };
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });

    format!("http://{}/files", addr)
}

#[tokio::test]
async fn test_http_fetcher() {
    let base = serve(2).await;
    let fetcher = new_fetcher(&base).unwrap();
    let cancel = CancellationToken::new();

    let data = fetcher.fetch(&cancel, "msg", &request("ok.bin")).await.unwrap();
    assert_eq!(data, b"payload");

    let err = fetcher
        .fetch(&cancel, "msg", &request("missing.bin"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "HTTP request failed with status code: 404"
    );
}

#[tokio::test]
async fn test_http_fetcher_honours_cancellation() {
    let fetcher = new_fetcher("http://127.0.0.1:9/files").unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fetcher
        .fetch(&cancel, "msg", &request("ok.bin"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Cancelled));
}
