//! End-to-end scenarios from spec.md §8's table, driven through the real
//! `server::run` dispatcher and `client::Client` driver rather than hand-
//! rolled protocol helpers — the wire codec and engine already have their
//! own focused unit tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use tftp_rs::client::Client;
use tftp_rs::config::ServerConfig;
use tftp_rs::engine::SessionOptions;
use tftp_rs::server::{self, ServerEvent};

/// Probe a free UDP port, then start the dispatcher bound to it. Returns the
/// server's listen address and a shutdown handle.
async fn start_server(dir: PathBuf) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = Arc::new(ServerConfig {
        port,
        base_dir: Some(dir.clone()),
        log_level: "error".into(),
        read_timeout_secs: 5,
        write_timeout_secs: 5,
        num_tries: 5,
        no_tui: true,
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let _ = server::run(config, dir, tx, shutdown_rx).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (SocketAddr::from(([127, 0, 0, 1], port)), shutdown_tx, handle)
}

fn fast_client() -> Client {
    Client::new(SessionOptions {
        retries: 5,
        read_timeout: Duration::from_secs(2),
        write_timeout: Duration::from_secs(2),
        trace: false,
    })
}

#[tokio::test]
async fn get_small_file() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("hello.txt"), b"hi\n").await.unwrap();
    let (addr, shutdown, _h) = start_server(dir.path().to_path_buf()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let outcome = client.get("hello.txt", &out_dir.path().join("hello.txt")).await.unwrap();

    assert_eq!(outcome.blocks, 1);
    let written = tokio::fs::read(out_dir.path().join("hello.txt")).await.unwrap();
    assert_eq!(written, b"hi\n");

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn get_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("empty.bin"), b"").await.unwrap();
    let (addr, shutdown, _h) = start_server(dir.path().to_path_buf()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let outcome = client.get("empty.bin", &out_dir.path().join("empty.bin")).await.unwrap();

    assert_eq!(outcome, tftp_rs::engine::SessionOutcome { blocks: 1, bytes: 0 });
    let written = tokio::fs::read(out_dir.path().join("empty.bin")).await.unwrap();
    assert!(written.is_empty());

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn get_exact_multiple_of_block_size_sends_terminating_empty_block() {
    let dir = tempfile::tempdir().unwrap();
    let content = vec![0xABu8; 512];
    tokio::fs::write(dir.path().join("exactly512.bin"), &content).await.unwrap();
    let (addr, shutdown, _h) = start_server(dir.path().to_path_buf()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let outcome = client.get("exactly512.bin", &out_dir.path().join("out.bin")).await.unwrap();

    assert_eq!(outcome.blocks, 2); // DATA(1, 512 bytes) + DATA(2, 0 bytes)
    let written = tokio::fs::read(out_dir.path().join("out.bin")).await.unwrap();
    assert_eq!(written, content);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn put_multi_block_upload() {
    let server_dir = tempfile::tempdir().unwrap();
    let (addr, shutdown, _h) = start_server(server_dir.path().to_path_buf()).await;

    let src_dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..1025u32).map(|i| (i % 251) as u8).collect();
    let src_path = src_dir.path().join("upload.bin");
    tokio::fs::write(&src_path, &content).await.unwrap();

    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let outcome = client.put("upload.bin", &src_path).await.unwrap();

    assert_eq!(outcome.blocks, 3); // 512 + 512 + 1
    let written = tokio::fs::read(server_dir.path().join("upload.bin")).await.unwrap();
    assert_eq!(written, content);

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn get_missing_file_surfaces_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, shutdown, _h) = start_server(dir.path().to_path_buf()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let err = client
        .get("missing.txt", &out_dir.path().join("missing.txt"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("missing.txt"));
    assert!(!out_dir.path().join("missing.txt").exists());

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn put_existing_file_surfaces_already_exists() {
    let server_dir = tempfile::tempdir().unwrap();
    tokio::fs::write(server_dir.path().join("existing.txt"), b"already here").await.unwrap();
    let (addr, shutdown, _h) = start_server(server_dir.path().to_path_buf()).await;

    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("existing.txt");
    tokio::fs::write(&src_path, b"new content").await.unwrap();

    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let err = client.put("existing.txt", &src_path).await.unwrap_err();

    assert!(err.to_string().contains("existing.txt"));
    let unchanged = tokio::fs::read(server_dir.path().join("existing.txt")).await.unwrap();
    assert_eq!(unchanged, b"already here");

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn rrq_rejects_path_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, shutdown, _h) = start_server(dir.path().to_path_buf()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let err = client
        .get("../../../../etc/passwd", &out_dir.path().join("passwd"))
        .await
        .unwrap_err();

    assert!(!out_dir.path().join("passwd").exists());
    let _ = err; // any terminal session error is acceptable; the point is no escape

    let _ = shutdown.send(true);
}

#[tokio::test]
async fn get_into_existing_destination_does_not_clobber_it() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("hello.txt"), b"hi\n").await.unwrap();
    let (addr, shutdown, _h) = start_server(dir.path().to_path_buf()).await;

    let out_dir = tempfile::tempdir().unwrap();
    let dest = out_dir.path().join("hello.txt");
    tokio::fs::write(&dest, b"pre-existing local content").await.unwrap();

    let mut client = fast_client();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    let result = client.get("hello.txt", &dest).await;

    assert!(result.is_err());
    let unchanged = tokio::fs::read(&dest).await.unwrap();
    assert_eq!(unchanged, b"pre-existing local content");

    let _ = shutdown.send(true);
}
