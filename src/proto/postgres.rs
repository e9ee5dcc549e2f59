//! Postgres frontend/backend protocol (v3) parser.
//!
//! The connection state lives in [`Pg`]. The startup handshake
//! (SSLRequest refusal, StartupMessage, optional cleartext password auth)
//! is driven here; completed simple queries tokenize into dispatcher
//! arguments. Replies the handshake produces are queued on the state and
//! flushed by the connection. The extended query protocol is answered
//! with an error.

use byteorder::{BigEndian, ByteOrder};

use super::{resp, Args, ParseError, ParserCtx, Step};

const SSL_REQUEST_CODE: i32 = 80877103;
const CANCEL_REQUEST_CODE: i32 = 80877102;
const PROTOCOL_V3: i32 = 196608;

/// Largest startup packet accepted.
const MAX_STARTUP_LEN: usize = 10_240;

/// Largest typed message accepted.
const MAX_MESSAGE_LEN: usize = 512 * 1024 * 1024;

/// A queued backend reply produced by the handshake machinery.
#[derive(Debug, PartialEq, Eq)]
pub enum PgReply {
    /// Single `N` byte refusing SSL.
    SslRefuse,
    /// AuthenticationCleartextPassword.
    AuthCleartext,
    /// AuthenticationOk, parameter statuses, ReadyForQuery.
    AuthOk,
    /// ReadyForQuery (idle).
    Ready,
    /// EmptyQueryResponse plus ReadyForQuery.
    EmptyQuery,
    /// ErrorResponse plus ReadyForQuery.
    Error(String),
    /// ErrorResponse, then the connection closes.
    Fatal(String),
    /// Client sent Terminate; close silently.
    Terminate,
}

/// Per-connection Postgres state.
#[derive(Debug, Default)]
pub struct Pg {
    /// Startup message received.
    pub startup: bool,
    /// Authentication settled.
    pub auth: bool,
    /// Ready for simple queries.
    pub ready: bool,
    pub user: Option<String>,
    pub database: Option<String>,
    /// Replies for the connection to flush.
    pub replies: Vec<PgReply>,
}

fn read_cstr(data: &[u8]) -> Option<(&[u8], usize)> {
    let nul = data.iter().position(|&b| b == 0)?;
    Some((&data[..nul], nul + 1))
}

fn startup_params(pg: &mut Pg, mut payload: &[u8]) {
    while let Some((key, n)) = read_cstr(payload) {
        if key.is_empty() {
            break;
        }
        payload = &payload[n..];
        let Some((value, m)) = read_cstr(payload) else {
            break;
        };
        payload = &payload[m..];
        match key {
            b"user" => pg.user = Some(String::from_utf8_lossy(value).into_owned()),
            b"database" => pg.database = Some(String::from_utf8_lossy(value).into_owned()),
            _ => {}
        }
    }
}

fn consumed(n: usize) -> Result<Step, ParseError> {
    Ok(Step::Consumed {
        n,
        args: Args::new(),
    })
}

/// Parses one Postgres message.
pub fn parse(data: &[u8], pg: &mut Pg, ctx: &ParserCtx<'_>) -> Result<Step, ParseError> {
    if !pg.startup {
        // Length-prefixed startup traffic, no type byte.
        if data.len() < 8 {
            return Ok(Step::Incomplete);
        }
        let len = BigEndian::read_i32(&data[0..4]);
        if !(8..=MAX_STARTUP_LEN as i32).contains(&len) {
            return Err(ParseError::new("invalid startup packet"));
        }
        let len = len as usize;
        if data.len() < len {
            return Ok(Step::Incomplete);
        }
        let code = BigEndian::read_i32(&data[4..8]);
        if code == SSL_REQUEST_CODE {
            pg.replies.push(PgReply::SslRefuse);
            return consumed(len);
        }
        if code == CANCEL_REQUEST_CODE {
            pg.replies.push(PgReply::Terminate);
            return consumed(len);
        }
        if code != PROTOCOL_V3 {
            pg.replies
                .push(PgReply::Fatal("unsupported protocol version".into()));
            return consumed(len);
        }
        startup_params(pg, &data[8..len]);
        pg.startup = true;
        if ctx.auth.is_some() {
            pg.replies.push(PgReply::AuthCleartext);
        } else {
            pg.auth = true;
            pg.ready = true;
            pg.replies.push(PgReply::AuthOk);
        }
        return consumed(len);
    }

    // Typed messages: tag byte plus self-inclusive length.
    if data.len() < 5 {
        return Ok(Step::Incomplete);
    }
    let tag = data[0];
    let len = BigEndian::read_i32(&data[1..5]);
    if !(4..=MAX_MESSAGE_LEN as i32).contains(&len) {
        return Err(ParseError::new("invalid message length"));
    }
    let total = 1 + len as usize;
    if data.len() < total {
        return Ok(Step::Incomplete);
    }
    let payload = &data[5..total];

    match tag {
        b'p' => {
            let password = read_cstr(payload).map(|(p, _)| p).unwrap_or(payload);
            if Some(password) == ctx.auth.map(str::as_bytes) {
                pg.auth = true;
                pg.ready = true;
                pg.replies.push(PgReply::AuthOk);
            } else {
                pg.replies
                    .push(PgReply::Fatal("password authentication failed".into()));
            }
            consumed(total)
        }
        b'Q' => {
            if !pg.ready {
                pg.replies
                    .push(PgReply::Fatal("connection is not ready".into()));
                return consumed(total);
            }
            let mut query = read_cstr(payload).map(|(q, _)| q).unwrap_or(payload);
            while query.first().is_some_and(|b| b.is_ascii_whitespace()) {
                query = &query[1..];
            }
            while query.last().is_some_and(|b| b.is_ascii_whitespace()) {
                query = &query[..query.len() - 1];
            }
            let mut line = query.to_vec();
            while line.last() == Some(&b';') {
                line.pop();
            }
            line.push(b'\n');
            match resp::parse_inline(&line)? {
                Step::Consumed { args, .. } if !args.is_empty() => Ok(Step::Consumed {
                    n: total,
                    args,
                }),
                _ => {
                    pg.replies.push(PgReply::EmptyQuery);
                    consumed(total)
                }
            }
        }
        b'X' => {
            pg.replies.push(PgReply::Terminate);
            consumed(total)
        }
        b'S' => {
            // Sync outside the extended protocol just reports readiness.
            pg.replies.push(PgReply::Ready);
            consumed(total)
        }
        b'P' | b'B' | b'D' | b'E' | b'C' | b'H' | b'F' | b'd' | b'c' | b'f' => {
            pg.replies.push(PgReply::Error(
                "extended query protocol is not supported".into(),
            ));
            consumed(total)
        }
        _ => {
            pg.replies
                .push(PgReply::Fatal("unknown message type".into()));
            consumed(total)
        }
    }
}
