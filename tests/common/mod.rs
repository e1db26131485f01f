//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use rewrite_gateway::config::GatewayConfig;
use rewrite_gateway::{HttpServer, RuleSet, Shutdown};

/// Via fragment the test gateway appends.
pub const GATEWAY_VIA: &str = "1.1 gw1";

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Compile `rules` and serve them in front of `next_stage` (or the default
/// 404 stage).
pub async fn start_gateway(rules: &[&str], next_stage: Option<Router>) -> TestGateway {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.proxy.via_identity = Some(GATEWAY_VIA.into());
    config.timeouts.connect_secs = 1;

    let rules = RuleSet::compile(rules).unwrap();
    let mut server = HttpServer::new(config, rules).unwrap();
    if let Some(stage) = next_stage {
        server = server.with_next_stage(stage);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });

    TestGateway { addr, shutdown }
}

/// Start an upstream that answers every request with `200 OK`, a
/// `Via: 1.0 upstream-box` header, and the raw request it received as the
/// body.
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    tokio::spawn(echo(socket));
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read until the end of the request head. Returns everything read so far
/// and the offset where the body starts.
async fn read_head(socket: &mut TcpStream) -> Option<(Vec<u8>, usize)> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
        if let Some(pos) = find(&received, b"\r\n\r\n") {
            return Some((received, pos + 4));
        }
    }
}

async fn echo(mut socket: TcpStream) {
    let Some((mut received, head_end)) = read_head(&mut socket).await else {
        return;
    };
    let mut buf = [0u8; 4096];

    let head = String::from_utf8_lossy(&received[..head_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while received.len() < head_end + content_length {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nVia: 1.0 upstream-box\r\nConnection: close\r\n\r\n",
        received.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.write_all(&received).await;
    let _ = socket.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Start an upstream that promises a 100 byte body, sends 10 bytes and
/// hangs up.
pub async fn start_truncating_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_head(&mut socket).await.is_none() {
                    return;
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start an upstream that reads every connection to the end without
/// answering. The byte count of each connection is sent once the peer
/// closes it.
pub async fn start_draining_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut total = 0;
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => total += n,
                    }
                }
                let _ = tx.send(total);
            });
        }
    });

    (addr, rx)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Client that neither follows redirects nor uses system proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
