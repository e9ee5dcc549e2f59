//! Listeners and the per-connection processing loop.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, UnixListener};
use tracing::{debug, info, warn};

use crate::cmds;
use crate::proto::{parse_command, ParserCtx, Protocol, Step};

use super::conn::Conn;
use super::Shared;

/// Read buffer granted to each connection.
const READ_CHUNK: usize = 64 * 1024;

/// Hold-over packet capacity released once drained past this.
const MAX_PACKET: usize = 1024 * 1024;

/// Binds the TCP listener and, when configured, the Unix socket
/// listener, then serves until shutdown.
pub async fn serve(
    shared: Arc<Shared>,
    host: &str,
    port: u16,
    backlog: u32,
    unixsock: Option<&str>,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let sockaddr: std::net::SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid listen address {}", addr))?;
    let socket = if sockaddr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .context("failed to create socket")?;
    socket.set_reuseaddr(true).ok();
    socket
        .bind(sockaddr)
        .with_context(|| format!("failed to bind {}", addr))?;
    let listener = socket
        .listen(backlog)
        .with_context(|| format!("failed to listen on {}", addr))?;
    info!(
        component = "server",
        event = "listening",
        addr = %addr,
        "network listener established"
    );

    if let Some(path) = unixsock {
        let path = path.to_string();
        // A stale socket file from a previous run blocks the bind.
        if Path::new(&path).exists() {
            let _ = std::fs::remove_file(&path);
        }
        let unix = UnixListener::bind(&path)
            .with_context(|| format!("failed to bind unix socket {}", path))?;
        info!(
            component = "server",
            event = "listening",
            path = %path,
            "unix socket listener established"
        );
        let shared_unix = shared.clone();
        tokio::task::spawn(async move {
            serve_unix_listener(unix, shared_unix).await;
        });
    }

    serve_tcp_listener(listener, shared).await;
    Ok(())
}

/// Accept loop over an already-bound TCP listener. Public so tests can
/// drive a listener on an ephemeral port.
pub async fn serve_tcp_listener(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        if at_capacity(&shared) {
                            debug!(
                                component = "server",
                                event = "conn_rejected",
                                peer = %peer,
                                "connection limit reached"
                            );
                            continue;
                        }
                        let shared = shared.clone();
                        tokio::task::spawn(async move {
                            shared.stats.conn_opened();
                            drive(stream, &shared).await;
                            shared.stats.conn_closed();
                        });
                    }
                    Err(e) => {
                        warn!(
                            component = "server",
                            event = "accept_failed",
                            error = %e,
                            "accept failed"
                        );
                    }
                }
            }
        }
    }
}

async fn serve_unix_listener(listener: UnixListener, shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        if at_capacity(&shared) {
                            continue;
                        }
                        let shared = shared.clone();
                        tokio::task::spawn(async move {
                            shared.stats.conn_opened();
                            drive(stream, &shared).await;
                            shared.stats.conn_closed();
                        });
                    }
                    Err(e) => {
                        warn!(
                            component = "server",
                            event = "accept_failed",
                            error = %e,
                            "unix accept failed"
                        );
                    }
                }
            }
        }
    }
}

fn at_capacity(shared: &Shared) -> bool {
    shared.maxconns > 0 && shared.stats.conns.load(Ordering::Relaxed) >= shared.maxconns as u64
}

/// Drives one connection: read, parse, dispatch, flush, until close.
pub async fn drive<S>(mut stream: S, shared: &Arc<Shared>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Conn::new();
    let mut packet = BytesMut::with_capacity(READ_CHUNK);
    loop {
        let read = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            read = stream.read_buf(&mut packet) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(component = "server", event = "read_failed", error = %e, "read failed");
                break;
            }
        }

        process(&mut conn, &mut packet, shared).await;
        conn.stats.fold_into(&shared.stats);

        if !conn.out.is_empty() {
            let out = conn.out.take();
            if let Err(e) = stream.write_all(&out).await {
                debug!(component = "server", event = "write_failed", error = %e, "write failed");
                conn.close();
            }
        }
        if conn.closed {
            break;
        }
        // Release an oversized hold-over buffer once it drains.
        if packet.is_empty() && packet.capacity() > MAX_PACKET {
            packet = BytesMut::with_capacity(READ_CHUNK);
        }
    }
    conn.stats.fold_into(&shared.stats);
    let _ = stream.shutdown().await;
}

/// Parses and dispatches every complete command in the packet buffer.
async fn process(conn: &mut Conn, packet: &mut BytesMut, shared: &Arc<Shared>) {
    while !packet.is_empty() && !conn.closed {
        let ctx = ParserCtx {
            auth: shared.auth.as_deref(),
        };
        let step = parse_command(
            &packet[..],
            &mut conn.proto,
            &mut conn.noreply,
            &mut conn.pg,
            &ctx,
        );
        match step {
            Ok(Step::Incomplete) => break,
            Ok(Step::Consumed { n, args }) => {
                packet.advance(n);
                if args.is_empty() {
                    match conn.proto() {
                        Protocol::Postgres => {
                            if !conn.flush_pg_replies() {
                                conn.close();
                            }
                        }
                        Protocol::Memcache => conn.write_error("ERROR"),
                        // RESP keeps reading until it gets arguments.
                        _ => {}
                    }
                } else {
                    let mark = conn.out.len();
                    cmds::dispatch(conn, shared, &args).await;
                    if conn.noreply {
                        conn.out.truncate(mark);
                    }
                }
                if conn.proto() == Protocol::Http {
                    // One request per connection.
                    conn.close();
                }
            }
            Err(err) => {
                conn.write_error(&err.message);
                match (conn.proto(), err.recover) {
                    (Protocol::Memcache, Some(recover)) => {
                        // Memcache recovers at the next line instead of
                        // dropping the connection.
                        packet.advance(recover.min(packet.len()));
                    }
                    _ => {
                        conn.close();
                    }
                }
            }
        }
    }
}
