//! Integration tests for the training server over real gRPC
//!
//! These tests start the full server (bus, controller and service) on a free
//! local port with a scripted trainer, and talk to it with the generated
//! tonic client.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use trainwatch_common::proto::{
    StartRequest, StatusRequest, SubscribeRequest, TrainingClient, TrainingMetric,
};
use trainwatch_server::testing::{Script, scripted};
use trainwatch_server::{Server, ServerConfig};
use trainwatch_test_utils::{find_available_port, sample_metric, wait_for_tcp_ready};

struct TestServer {
    addr: SocketAddr,
    script: Script,
    shutdown_token: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let port = find_available_port().await;
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let config = ServerConfig {
            listen_addr: addr,
            report_interval: 1,
            poll_timeout_ms: 100,
            shutdown_grace_secs: 2,
            ..ServerConfig::default()
        };

        let (trainer, script) = scripted();
        let server = Server::new(config, std::sync::Arc::new(trainer));
        let shutdown_token = server.shutdown_token();
        let handle = tokio::spawn(server.run());

        wait_for_tcp_ready(&addr.to_string(), Duration::from_secs(5))
            .await
            .expect("Test server should be ready");

        Self {
            addr,
            script,
            shutdown_token,
            handle,
        }
    }

    async fn client(&self) -> TrainingClient<Channel> {
        TrainingClient::connect(format!("http://{}", self.addr))
            .await
            .expect("Should connect to test server")
    }

    async fn stop(self) {
        self.shutdown_token.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("Server should stop within timeout")
            .expect("Server task should not panic")
            .expect("Server should shut down cleanly");
    }
}

async fn next_metric(stream: &mut tonic::Streaming<TrainingMetric>) -> TrainingMetric {
    tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("Should receive metric within timeout")
        .expect("Stream should not fail")
        .expect("Stream should not end")
}

#[tokio::test]
async fn test_start_status_and_first_metric() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let reply = client
        .start(StartRequest {
            num_epochs: 3,
            confirmed: true,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.status, "started");
    assert_eq!(reply.epochs, 3);

    let status = client.status(StatusRequest {}).await.unwrap().into_inner();
    assert_eq!(status.state, "training");
    assert_eq!(status.current_epoch, 0);
    assert_eq!(status.epochs_requested, 3);

    let mut stream = client
        .subscribe(SubscribeRequest {})
        .await
        .unwrap()
        .into_inner();

    let expected = sample_metric(0, 0);
    server.script.publish(expected.clone());
    server.script.publish(sample_metric(0, 1));

    let first = next_metric(&mut stream).await;
    assert_eq!(first.epoch, 0);
    assert_eq!(first.batch, 0);
    assert_eq!(first.batch_size, 16);
    assert_eq!(first.batch_loss, 2.31);
    assert_eq!(first.predictions, expected.predictions);
    assert_eq!(first.truths, expected.truths);
    assert_eq!(next_metric(&mut stream).await.batch, 1);

    server.script.finish(3, false);
    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn test_every_subscriber_receives_every_metric() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client
        .start(StartRequest {
            num_epochs: 1,
            confirmed: true,
        })
        .await
        .unwrap();

    let mut first = client
        .subscribe(SubscribeRequest {})
        .await
        .unwrap()
        .into_inner();
    let mut second = server
        .client()
        .await
        .subscribe(SubscribeRequest {})
        .await
        .unwrap()
        .into_inner();

    for batch in 0..5 {
        server.script.publish(sample_metric(0, batch));
    }

    for stream in [&mut first, &mut second] {
        let mut batches = Vec::new();
        for _ in 0..5 {
            batches.push(next_metric(stream).await.batch);
        }
        assert_eq!(batches, vec![0, 1, 2, 3, 4]);
    }

    server.script.finish(1, false);
    drop(first);
    drop(second);
    server.stop().await;
}

#[tokio::test]
async fn test_unconfirmed_and_negative_start() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let reply = client
        .start(StartRequest {
            num_epochs: 3,
            confirmed: false,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.status, "not_confirmed");

    let err = client
        .start(StartRequest {
            num_epochs: -2,
            confirmed: true,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);

    let status = client.status(StatusRequest {}).await.unwrap().into_inner();
    assert_eq!(status.state, "ready");
    assert!(server.script.runs().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_completed_run_reported_in_status() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    client
        .start(StartRequest {
            num_epochs: 0,
            confirmed: true,
        })
        .await
        .unwrap();
    server.script.finish(2, true);

    let mut status = client.status(StatusRequest {}).await.unwrap().into_inner();
    for _ in 0..200 {
        if status.state == "ready" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = client.status(StatusRequest {}).await.unwrap().into_inner();
    }

    assert_eq!(status.state, "ready");
    assert_eq!(status.last_outcome, "converged after 2 epochs");
    assert_eq!(status.epochs_requested, 3);
    assert_eq!(server.script.runs(), vec![3]);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_ends_stream_cleanly() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    let mut stream = client
        .subscribe(SubscribeRequest {})
        .await
        .unwrap()
        .into_inner();

    let status = client.status(StatusRequest {}).await.unwrap().into_inner();
    assert_eq!(status.subscribers, 1);

    server.shutdown_token.cancel();

    let end = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("Stream should end within timeout");
    assert!(matches!(end, Ok(None)), "Expected clean end, got {:?}", end);

    server.stop().await;
}
