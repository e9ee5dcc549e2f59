//! Wire protocol sniffing and parsing.
//!
//! Every connection speaks one of four protocols, identified from the
//! first bytes of its first packet: RESP (binary when the packet opens
//! with `*`, inline otherwise), Postgres wire (a leading NUL from the
//! length-prefixed startup message), HTTP (first line ends in
//! ` HTTP/x.y\r`), or Memcache text. Once sniffed, the protocol sticks
//! for the connection lifetime.

pub mod args;
pub mod http;
pub mod memcache;
pub mod postgres;
pub mod resp;

#[cfg(test)]
mod http_test;
#[cfg(test)]
mod resp_test;

pub use args::{Args, MAX_ARGS, MAX_ARG_SIZE};
pub use postgres::Pg;

/// Identified wire protocol of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Resp,
    Memcache,
    Http,
    Postgres,
}

/// A parse failure, carrying the protocol-appropriate message.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    /// Position to resume parsing from; Memcache connections recover
    /// instead of closing.
    pub recover: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            recover: None,
        }
    }

    pub fn recoverable(message: impl Into<String>, recover: usize) -> ParseError {
        ParseError {
            message: message.into(),
            recover: Some(recover),
        }
    }
}

/// One parser step.
#[derive(Debug)]
pub enum Step {
    /// Not enough data for a full command.
    Incomplete,
    /// Consumed `n` bytes. `args` may be empty for protocol-internal
    /// traffic (handshakes, blank lines).
    Consumed { n: usize, args: Args },
}

/// Context the parsers need from the server configuration.
#[derive(Default, Clone, Copy)]
pub struct ParserCtx<'a> {
    /// Configured auth token, if any.
    pub auth: Option<&'a str>,
}

/// Sniffs the protocol from the first bytes of a connection.
/// Returns `Ok(None)` when more data is needed.
fn sniff(data: &[u8]) -> Result<Option<Protocol>, ParseError> {
    if data.is_empty() {
        return Ok(None);
    }
    if data[0] == b'*' {
        return Ok(Some(Protocol::Resp));
    }
    if data[0] == 0 {
        return Ok(Some(Protocol::Postgres));
    }
    // The text protocols need the complete first line to tell apart.
    let Some(n) = data.iter().position(|&b| b == b'\n').map(|i| i + 1) else {
        return Ok(None);
    };
    // Look for a " HTTP/x.y\r\n" suffix.
    if n >= 11
        && data[n - 11..n - 6] == *b" HTTP"
        && data[n - 6] == b'/'
        && data[n - 4] == b'.'
        && data[n - 2] == b'\r'
    {
        return Ok(Some(Protocol::Http));
    }
    // RESP inline and Memcache both allow leading spaces.
    let mut line = &data[..n];
    while line.first() == Some(&b' ') {
        line = &line[1..];
    }
    match line.first() {
        // A leading uppercase command letter is treated as RESP inline.
        Some(&c) if c.is_ascii_uppercase() => Ok(Some(Protocol::Resp)),
        Some(_) => Ok(Some(Protocol::Memcache)),
        None => Ok(None),
    }
}

/// Parses one command from `data`.
///
/// `proto` must be `None` for the connection's first command and the last
/// known protocol afterwards. `noreply` is set only for Memcache; the
/// `noreply` token is stripped from the args but surfaced here. `pg`
/// holds the Postgres state for the connection, created on demand.
pub fn parse_command(
    data: &[u8],
    proto: &mut Option<Protocol>,
    noreply: &mut bool,
    pg: &mut Option<Pg>,
    ctx: &ParserCtx<'_>,
) -> Result<Step, ParseError> {
    *noreply = false;
    if proto.is_none() {
        match sniff(data)? {
            Some(p) => *proto = Some(p),
            None => return Ok(Step::Incomplete),
        }
    }
    match proto.expect("protocol sniffed above") {
        Protocol::Resp => {
            if data.first() == Some(&b'*') {
                resp::parse(data)
            } else {
                resp::parse_inline(data)
            }
        }
        Protocol::Memcache => memcache::parse(data, noreply),
        Protocol::Http => http::parse(data, ctx),
        Protocol::Postgres => {
            let pg = pg.get_or_insert_with(Pg::default);
            postgres::parse(data, pg, ctx)
        }
    }
}
