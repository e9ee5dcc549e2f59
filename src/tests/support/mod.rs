//! Test harness: an in-process server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::cache::{Cache, Options};
use crate::net::server::serve_tcp_listener;
use crate::net::Shared;
use crate::stats::Stats;
use crate::time;

pub struct TestServer {
    pub addr: SocketAddr,
    pub shared: Arc<Shared>,
    token: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Starts a server with a small cache on an ephemeral port.
pub async fn start_server() -> TestServer {
    start_server_with_auth(None).await
}

pub async fn start_server_with_auth(auth: Option<&str>) -> TestServer {
    let token = CancellationToken::new();
    let cache = Arc::new(Cache::new(Options {
        nshards: 16,
        usecas: true,
        allowshrink: true,
        ..Default::default()
    }));
    let shared = Arc::new(Shared {
        cache,
        auth: auth.map(str::to_string),
        lowmem: Arc::new(AtomicBool::new(false)),
        stats: Arc::new(Stats::default()),
        started_at: time::now_nanos(),
        maxconns: 0,
        shutdown: token.clone(),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_shared = shared.clone();
    tokio::task::spawn(async move {
        serve_tcp_listener(listener, serve_shared).await;
    });
    TestServer {
        addr,
        shared,
        token,
    }
}

pub async fn connect(server: &TestServer) -> TcpStream {
    TcpStream::connect(server.addr).await.unwrap()
}

/// Reads a reply: waits for the first bytes, then drains until the
/// stream goes idle or closes.
pub async fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => out.extend_from_slice(&buf[..n]),
        _ => return out,
    }
    loop {
        match tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => out.extend_from_slice(&buf[..n]),
            _ => break,
        }
    }
    out
}

/// Sends one request and reads the reply on an existing connection.
/// Write errors are ignored so a closed-connection probe reads empty.
pub async fn roundtrip(stream: &mut TcpStream, input: &[u8]) -> Vec<u8> {
    let _ = stream.write_all(input).await;
    read_reply(stream).await
}

/// One-shot request on a fresh connection, reading until the server
/// closes (the HTTP pattern).
pub async fn oneshot(server: &TestServer, input: &[u8]) -> Vec<u8> {
    let mut stream = connect(server).await;
    stream.write_all(input).await.unwrap();
    let mut out = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await;
    out
}
