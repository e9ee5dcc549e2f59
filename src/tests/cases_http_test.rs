//! HTTP wire cases. Every request uses a fresh connection because the
//! server closes after one response.

use crate::tests::support::{oneshot, start_server, start_server_with_auth};

fn body_of(reply: &[u8]) -> &[u8] {
    let pos = reply
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("reply must have a header/body split");
    &reply[pos + 4..]
}

fn status_of(reply: &[u8]) -> u16 {
    let line = reply.split(|&b| b == b'\r').next().unwrap();
    let text = std::str::from_utf8(line).unwrap();
    text.split(' ').nth(1).unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_put_get_delete_roundtrip() {
    let server = start_server().await;

    let reply = oneshot(
        &server,
        b"PUT /foo?ex=5&flags=7 HTTP/1.1\r\nContent-Length: 3\r\n\r\nbar",
    )
    .await;
    assert_eq!(status_of(&reply), 200);

    let reply = oneshot(&server, b"GET /foo HTTP/1.1\r\n\r\n").await;
    assert_eq!(status_of(&reply), 200);
    assert_eq!(body_of(&reply), b"bar");

    let reply = oneshot(&server, b"DELETE /foo HTTP/1.1\r\n\r\n").await;
    assert_eq!(status_of(&reply), 200);

    let reply = oneshot(&server, b"GET /foo HTTP/1.1\r\n\r\n").await;
    assert_eq!(status_of(&reply), 404);
}

#[tokio::test]
async fn test_ttl_applies() {
    let server = start_server().await;
    oneshot(
        &server,
        b"PUT /t?ttl=100 HTTP/1.1\r\nContent-Length: 1\r\n\r\nv",
    )
    .await;
    // The entry must carry an expiration, visible through RESP TTL.
    let mut stream = crate::tests::support::connect(&server).await;
    let ttl = crate::tests::support::roundtrip(&mut stream, b"TTL t\r\n").await;
    let text = String::from_utf8(ttl).unwrap();
    let secs: i64 = text
        .trim_start_matches(':')
        .trim_end()
        .parse()
        .expect("ttl numeric");
    assert!((1..=100).contains(&secs), "ttl was {}", secs);
}

#[tokio::test]
async fn test_nx_conflict_maps_to_404() {
    let server = start_server().await;
    oneshot(
        &server,
        b"PUT /k HTTP/1.1\r\nContent-Length: 1\r\n\r\na",
    )
    .await;
    let reply = oneshot(
        &server,
        b"PUT /k?nx HTTP/1.1\r\nContent-Length: 1\r\n\r\nb",
    )
    .await;
    assert_eq!(status_of(&reply), 404);
}

#[tokio::test]
async fn test_help_page() {
    let server = start_server().await;
    let reply = oneshot(&server, b"GET / HTTP/1.1\r\n\r\n").await;
    assert_eq!(status_of(&reply), 200);
    assert!(body_of(&reply).starts_with(b"hotcache"));

    let reply = oneshot(&server, b"GET / HTTP/1.1\r\nAccept: text/html\r\n\r\n").await;
    assert_eq!(status_of(&reply), 200);
    assert!(body_of(&reply).starts_with(b"<!DOCTYPE html>"));
}

#[tokio::test]
async fn test_method_not_allowed() {
    let server = start_server().await;
    let reply = oneshot(&server, b"POST /k HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
    assert_eq!(status_of(&reply), 405);
}

#[tokio::test]
async fn test_auth() {
    let server = start_server_with_auth(Some("secret")).await;

    let reply = oneshot(&server, b"GET /k HTTP/1.1\r\n\r\n").await;
    assert_eq!(status_of(&reply), 401);

    let reply = oneshot(
        &server,
        b"PUT /k?auth=secret HTTP/1.1\r\nContent-Length: 1\r\n\r\nv",
    )
    .await;
    assert_eq!(status_of(&reply), 200);

    let reply = oneshot(
        &server,
        b"GET /k HTTP/1.1\r\nAuthorization: Bearer secret\r\n\r\n",
    )
    .await;
    assert_eq!(status_of(&reply), 200);
    assert_eq!(body_of(&reply), b"v");
}
