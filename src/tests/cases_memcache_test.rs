//! Memcache text wire cases.

use crate::tests::support::{connect, roundtrip, start_server};

#[tokio::test]
async fn test_set_get_delete() {
    let server = start_server().await;
    let mut stream = connect(&server).await;

    assert_eq!(
        roundtrip(&mut stream, b"set foo 7 0 3\r\nbar\r\n").await,
        b"STORED\r\n"
    );
    assert_eq!(
        roundtrip(&mut stream, b"get foo\r\n").await,
        b"VALUE foo 7 3\r\nbar\r\nEND\r\n"
    );
    assert_eq!(
        roundtrip(&mut stream, b"delete foo\r\n").await,
        b"DELETED\r\n"
    );
    assert_eq!(roundtrip(&mut stream, b"get foo\r\n").await, b"END\r\n");
    assert_eq!(
        roundtrip(&mut stream, b"delete foo\r\n").await,
        b"NOT_FOUND\r\n"
    );
}

#[tokio::test]
async fn test_add_replace() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    assert_eq!(
        roundtrip(&mut stream, b"replace k 0 0 1\r\nx\r\n").await,
        b"NOT_FOUND\r\n"
    );
    assert_eq!(
        roundtrip(&mut stream, b"add k 0 0 1\r\nx\r\n").await,
        b"STORED\r\n"
    );
    assert_eq!(
        roundtrip(&mut stream, b"add k 0 0 1\r\ny\r\n").await,
        b"EXISTS\r\n"
    );
    assert_eq!(
        roundtrip(&mut stream, b"replace k 0 0 1\r\nz\r\n").await,
        b"STORED\r\n"
    );
}

#[tokio::test]
async fn test_gets_then_cas() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    roundtrip(&mut stream, b"set c 0 0 2\r\nv0\r\n").await;

    let reply = roundtrip(&mut stream, b"gets c\r\n").await;
    let text = String::from_utf8(reply).unwrap();
    // VALUE <key> <flags> <bytes> <cas>
    let head = text.lines().next().unwrap();
    let cas: u64 = head.split(' ').nth(4).expect("cas field").parse().unwrap();

    let good = format!("cas c 0 0 2 {}\r\nv1\r\n", cas);
    assert_eq!(roundtrip(&mut stream, good.as_bytes()).await, b"STORED\r\n");
    let stale = format!("cas c 0 0 2 {}\r\nv2\r\n", cas);
    assert_eq!(roundtrip(&mut stream, stale.as_bytes()).await, b"EXISTS\r\n");
}

#[tokio::test]
async fn test_incr_decr() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    assert_eq!(
        roundtrip(&mut stream, b"incr n 1\r\n").await,
        b"NOT_FOUND\r\n"
    );
    roundtrip(&mut stream, b"set n 0 0 2\r\n10\r\n").await;
    assert_eq!(roundtrip(&mut stream, b"incr n 5\r\n").await, b"15\r\n");
    assert_eq!(roundtrip(&mut stream, b"decr n 3\r\n").await, b"12\r\n");
    // Decrement clamps at zero rather than wrapping.
    assert_eq!(roundtrip(&mut stream, b"decr n 100\r\n").await, b"0\r\n");
}

#[tokio::test]
async fn test_append_prepend() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    assert_eq!(
        roundtrip(&mut stream, b"append k 0 0 1\r\nx\r\n").await,
        b"NOT_STORED\r\n"
    );
    roundtrip(&mut stream, b"set k 0 0 1\r\nb\r\n").await;
    assert_eq!(
        roundtrip(&mut stream, b"append k 0 0 1\r\nc\r\n").await,
        b"STORED\r\n"
    );
    assert_eq!(
        roundtrip(&mut stream, b"prepend k 0 0 1\r\na\r\n").await,
        b"STORED\r\n"
    );
    assert_eq!(
        roundtrip(&mut stream, b"get k\r\n").await,
        b"VALUE k 0 3\r\nabc\r\nEND\r\n"
    );
}

#[tokio::test]
async fn test_noreply_suppresses_output() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    // The set produces no reply; the following get answers immediately.
    let reply = roundtrip(
        &mut stream,
        b"set q 0 0 1 noreply\r\nv\r\nget q\r\n",
    )
    .await;
    assert_eq!(reply, b"VALUE q 0 1\r\nv\r\nEND\r\n");
}

#[tokio::test]
async fn test_touch_and_version() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    assert_eq!(
        roundtrip(&mut stream, b"touch k 100\r\n").await,
        b"NOT_FOUND\r\n"
    );
    roundtrip(&mut stream, b"set k 0 0 1\r\nv\r\n").await;
    assert_eq!(
        roundtrip(&mut stream, b"touch k 100\r\n").await,
        b"TOUCHED\r\n"
    );
    let reply = roundtrip(&mut stream, b"version\r\n").await;
    assert!(reply.starts_with(b"VERSION "), "got {:?}", reply);
}

#[tokio::test]
async fn test_flush_all_and_stats() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    roundtrip(&mut stream, b"set a 0 0 1\r\nx\r\n").await;
    assert_eq!(roundtrip(&mut stream, b"flush_all\r\n").await, b"OK\r\n");
    assert_eq!(roundtrip(&mut stream, b"get a\r\n").await, b"END\r\n");

    let reply = roundtrip(&mut stream, b"stats\r\n").await;
    let text = String::from_utf8(reply).unwrap();
    assert!(text.starts_with("STAT "), "got {:?}", text);
    assert!(text.ends_with("END\r\n"));
    assert!(text.contains("STAT curr_items 0"));
}

#[tokio::test]
async fn test_bad_command_recovers() {
    let server = start_server().await;
    let mut stream = connect(&server).await;
    let reply = roundtrip(&mut stream, b"set broken\r\n").await;
    assert!(reply.starts_with(b"CLIENT_ERROR"), "got {:?}", reply);
    // The connection survives and the next command works.
    assert_eq!(
        roundtrip(&mut stream, b"set ok 0 0 1\r\nv\r\n").await,
        b"STORED\r\n"
    );
}
