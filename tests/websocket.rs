//! End-to-end checks of the telemetry feed over a real socket

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use aperture_cli::server::{self, Sources};
use aperture_cli::utils::{AppConfig, WS_PATH};

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
    _static_dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let static_dir = tempfile::tempdir().unwrap();

        let mut config = AppConfig::default();
        config.server.static_path = static_dir.path().to_path_buf();
        config.hub.system_interval = Duration::from_millis(100);
        config.hub.container_interval = Duration::from_millis(150);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            server::serve(listener, &config, Sources::demo(), async {
                let _ = rx.await;
            })
            .await
        });

        Self {
            addr,
            shutdown: Some(tx),
            handle,
            _static_dir: static_dir,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, WS_PATH)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Read text frames until one of the given type arrives
async fn next_of_type<S>(stream: &mut S, kind: &str) -> serde_json::Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = stream
            .next()
            .await
            .expect("stream ended")
            .expect("websocket error");

        if let Message::Text(text) = message {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    }
}

#[tokio::test]
async fn test_client_receives_both_feeds() {
    let server = TestServer::start().await;
    let (socket, _) = connect_async(server.ws_url()).await.unwrap();
    let (_sink, mut stream) = socket.split();

    let stats = tokio::time::timeout(Duration::from_secs(5), next_of_type(&mut stream, "stats"))
        .await
        .expect("no stats frame");
    assert_eq!(stats["payload"]["hostname"], "debug-server");
    assert!(stats["payload"]["memoryTotal"].as_u64().unwrap() > 0);

    let containers = tokio::time::timeout(
        Duration::from_secs(5),
        next_of_type(&mut stream, "container_stats"),
    )
    .await
    .expect("no container_stats frame");
    let entries = containers["payload"]["containers"].as_object().unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.contains_key("a1b2c3d4e5f6"));
    assert!(containers["payload"]["timestamp"].as_i64().unwrap() > 0);

    server.stop().await;
}

#[tokio::test]
async fn test_every_client_gets_the_broadcast() {
    let server = TestServer::start().await;

    let (first, _) = connect_async(server.ws_url()).await.unwrap();
    let (second, _) = connect_async(server.ws_url()).await.unwrap();
    let (_first_sink, mut first) = first.split();
    let (_second_sink, mut second) = second.split();

    let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            next_of_type(&mut first, "stats"),
            next_of_type(&mut second, "stats")
        )
    })
    .await
    .expect("a client missed the stats feed");

    assert_eq!(a["payload"]["cpuCores"], 4);
    assert_eq!(b["payload"]["cpuCores"], 4);

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let server = TestServer::start().await;
    let (socket, _) = connect_async(server.ws_url()).await.unwrap();
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::Text("x".repeat(4096))).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "connection stayed open");

    server.stop().await;
}
