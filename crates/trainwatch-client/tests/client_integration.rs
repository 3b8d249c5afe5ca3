//! Integration tests for the retrying client with an actual training server
//!
//! These tests spin up the full server with a scripted trainer and drive it
//! through the client library.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trainwatch_client::{
    ChannelOptions, RetryPolicy, RetryingClient, WatchEnd, WatchOptions, watch,
};
use trainwatch_server::testing::{Script, scripted};
use trainwatch_server::{Server, ServerConfig};
use trainwatch_test_utils::{find_available_port, sample_metric, wait_for_tcp_ready};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        jitter: false,
    }
}

fn client_for(addr: SocketAddr) -> RetryingClient {
    RetryingClient::connect(
        &format!("http://{}", addr),
        ChannelOptions::for_streaming(),
        fast_policy(),
    )
    .expect("Client should build")
}

/// Start a server on `addr` and return its script and shutdown token
fn spawn_server(addr: SocketAddr) -> (Script, CancellationToken) {
    let config = ServerConfig {
        listen_addr: addr,
        report_interval: 1,
        poll_timeout_ms: 100,
        shutdown_grace_secs: 2,
        ..ServerConfig::default()
    };
    let (trainer, script) = scripted();
    let server = Server::new(config, Arc::new(trainer));
    let shutdown_token = server.shutdown_token();
    tokio::spawn(server.run());
    (script, shutdown_token)
}

async fn start_test_server() -> (SocketAddr, Script, CancellationToken) {
    let port = find_available_port().await;
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (script, shutdown_token) = spawn_server(addr);

    wait_for_tcp_ready(&addr.to_string(), Duration::from_secs(5))
        .await
        .expect("Test server should be ready");

    (addr, script, shutdown_token)
}

#[tokio::test]
async fn test_status_and_start() {
    let (addr, script, shutdown_token) = start_test_server().await;
    let client = client_for(addr);

    let status = client.status().await.unwrap();
    assert_eq!(status.state, "ready");

    let reply = client.start(0, true).await.unwrap();
    assert_eq!(reply.status, "started");
    assert_eq!(reply.epochs, 3);

    let reply = client.start(5, true).await.unwrap();
    assert_eq!(reply.status, "already_running");
    assert_eq!(reply.epochs, 3);

    script.finish(3, false);
    shutdown_token.cancel();
}

#[tokio::test]
async fn test_watch_starts_run_and_forwards_metrics() {
    let (addr, script, shutdown_token) = start_test_server().await;
    let client = client_for(addr);
    let (tx, mut rx) = mpsc::channel(16);

    let options = WatchOptions {
        start: true,
        epochs: 2,
        confirmed: true,
        max_events: Some(3),
        ..WatchOptions::default()
    }
    .with_channel(tx);

    let watcher = tokio::spawn(async move { watch(&client, options).await });

    // Publish once the run is under way
    let mut runs = script.runs();
    for _ in 0..500 {
        if !runs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        runs = script.runs();
    }
    assert_eq!(runs, vec![2]);

    for batch in 0..4 {
        script.publish(sample_metric(0, batch));
    }

    let summary = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("Watch should finish within timeout")
        .unwrap()
        .unwrap();
    assert_eq!(summary.events, 3);
    assert_eq!(summary.end, WatchEnd::LimitReached);
    assert_eq!(summary.start.unwrap().status, "started");

    let mut batches = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert!(event.validate().is_ok());
        batches.push(event.batch);
    }
    assert_eq!(batches, vec![0, 1, 2]);

    script.finish(2, false);
    shutdown_token.cancel();
}

#[tokio::test]
async fn test_watch_without_confirmation_fails() {
    let (addr, script, shutdown_token) = start_test_server().await;
    let client = client_for(addr);
    let (tx, _rx) = mpsc::channel(16);

    let options = WatchOptions {
        start: true,
        confirmed: false,
        ..WatchOptions::default()
    }
    .with_channel(tx);

    let err = watch(&client, options).await.unwrap_err();
    assert!(err.to_string().contains("Training not started"), "{err:#}");
    assert!(script.runs().is_empty());

    shutdown_token.cancel();
}

#[tokio::test]
async fn test_watch_ends_when_server_stops() {
    let (addr, _script, shutdown_token) = start_test_server().await;
    let client = client_for(addr);
    let (tx, _rx) = mpsc::channel(16);

    let watcher = tokio::spawn(async move {
        watch(&client, WatchOptions::default().with_channel(tx)).await
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_token.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("Watch should finish within timeout")
        .unwrap()
        .unwrap();
    assert_eq!(summary.events, 0);
    assert_eq!(summary.end, WatchEnd::StreamEnded);
}

#[tokio::test]
async fn test_unreachable_server_returns_unavailable() {
    let port = find_available_port().await;
    let client = RetryingClient::connect(
        &format!("http://127.0.0.1:{}", port),
        ChannelOptions::for_polling(),
        fast_policy(),
    )
    .unwrap();

    let status = client.status().await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unavailable);
}

#[tokio::test]
async fn test_control_call_bounded_on_streaming_channel() {
    // Accepts connections but never speaks gRPC
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = client_for(addr).with_request_timeout(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let status = tokio::time::timeout(Duration::from_secs(10), client.status())
        .await
        .expect("Control call should be bounded by its request timeout")
        .unwrap_err();

    assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    // Three attempts of 200ms plus 10ms and 20ms backoff
    assert!(started.elapsed() >= Duration::from_millis(600));
}

#[tokio::test]
async fn test_wait_for_ready_survives_late_start() {
    let port = find_available_port().await;
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let client = client_for(addr);

    let late_server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        spawn_server(addr)
    });

    let status = client
        .wait_for_ready(Duration::from_secs(10))
        .await
        .expect("Server should become ready");
    assert_eq!(status.state, "ready");

    let (_script, shutdown_token) = late_server.await.unwrap();
    shutdown_token.cancel();
}
