//! HTTP/1.x front-end parser.
//!
//! Turns `GET /key`, `PUT /key <body>` and `DELETE /key` requests into
//! dispatcher arguments. Query parameters map onto store options
//! (`ex|ttl`, `flags`, `cas`, `xx`, `nx`) and `auth` or an
//! `Authorization: Bearer` header must match the configured token.
//! `GET /` resolves to the help page. The connection closes after every
//! response.

use super::{Args, ParseError, ParserCtx, Step, MAX_ARG_SIZE};

/// Keys must be short printable ASCII without URL metacharacters.
pub fn valid_key(key: &[u8]) -> bool {
    if key.is_empty() || key.len() > 250 {
        return false;
    }
    key.iter().all(|&b| {
        b > b' ' && b < 0x7F && !matches!(b, b'%' | b'+' | b'@' | b'$' | b'?' | b'=')
    })
}

struct Query<'a> {
    ex: Option<&'a [u8]>,
    flags: Option<&'a [u8]>,
    cas: Option<&'a [u8]>,
    auth: Option<Vec<u8>>,
    xx: bool,
    nx: bool,
}

fn parse_query(query: &[u8]) -> Query<'_> {
    let mut out = Query {
        ex: None,
        flags: None,
        cas: None,
        auth: None,
        xx: false,
        nx: false,
    };
    for pair in query.split(|&b| b == b'&') {
        let (key, value) = match pair.iter().position(|&b| b == b'=') {
            Some(eq) => (&pair[..eq], &pair[eq + 1..]),
            None => (pair, &pair[pair.len()..]),
        };
        match key {
            b"ex" | b"ttl" => out.ex = Some(value),
            b"flags" => out.flags = Some(value),
            b"cas" => out.cas = Some(value),
            b"xx" => out.xx = true,
            b"nx" => out.nx = true,
            b"auth" => out.auth = Some(urlencoding::decode_binary(value).into_owned()),
            _ => {}
        }
    }
    out
}

/// Parses one HTTP request into command arguments.
pub fn parse(data: &[u8], ctx: &ParserCtx<'_>) -> Result<Step, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(data) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(Step::Incomplete),
        Err(_) => return Err(ParseError::new("Bad Request")),
    };

    let mut content_length = 0usize;
    let mut html = false;
    let mut auth_header: Option<&[u8]> = None;
    for header in req.headers.iter() {
        if header.name.eq_ignore_ascii_case("content-length") {
            let parsed = std::str::from_utf8(header.value)
                .ok()
                .and_then(|s| s.parse::<usize>().ok());
            match parsed {
                Some(n) if n <= MAX_ARG_SIZE => content_length = n,
                _ => return Err(ParseError::new("Bad Request")),
            }
        } else if header.name.eq_ignore_ascii_case("accept") {
            if header
                .value
                .windows(b"text/html".len())
                .any(|w| w == b"text/html")
            {
                html = true;
            }
        } else if header.name.eq_ignore_ascii_case("authorization") {
            auth_header = Some(header.value);
        }
    }

    if data.len() < head_len + content_length {
        return Ok(Step::Incomplete);
    }
    let body = &data[head_len..head_len + content_length];
    let consumed = head_len + content_length;

    let method = req.method.unwrap_or("");
    let path = req.path.unwrap_or("").as_bytes();
    if path.is_empty() || path[0] != b'/' {
        return Err(ParseError::new("Bad Request"));
    }
    let path = &path[1..];
    let (key, query) = match path.iter().position(|&b| b == b'?') {
        Some(q) => (&path[..q], parse_query(&path[q + 1..])),
        None => (path, parse_query(b"")),
    };

    let mut args = Args::new();
    match method {
        "GET" => {
            if key.is_empty() {
                return Err(ParseError::new(if html {
                    "Show Help HTML"
                } else {
                    "Show Help TEXT"
                }));
            }
            if key[0] == b'@' {
                return Err(ParseError::new("Bad Request"));
            }
            if !valid_key(key) {
                return Err(ParseError::new("Invalid Key"));
            }
            args.push(b"get");
            args.push(key);
        }
        "PUT" => {
            if key.is_empty() || key[0] == b'@' {
                return Err(ParseError::new("Bad Request"));
            }
            if !valid_key(key) {
                return Err(ParseError::new("Invalid Key"));
            }
            args.push(b"set");
            args.push(key);
            args.push(body);
            if let Some(cas) = query.cas {
                args.push(b"cas");
                args.push(cas);
            }
            if let Some(ex) = query.ex {
                args.push(b"ex");
                args.push(ex);
            }
            if let Some(flags) = query.flags {
                args.push(b"flags");
                args.push(flags);
            }
            if query.xx {
                args.push(b"xx");
            }
            if query.nx {
                args.push(b"nx");
            }
        }
        "DELETE" => {
            if key.is_empty() || key[0] == b'@' {
                return Err(ParseError::new("Bad Request"));
            }
            if !valid_key(key) {
                return Err(ParseError::new("Invalid Key"));
            }
            args.push(b"del");
            args.push(key);
        }
        _ => return Err(ParseError::new("Method Not Allowed")),
    }

    // Authorization: the auth query param wins over the bearer header.
    let supplied: Option<Vec<u8>> = match (&query.auth, auth_header) {
        (Some(qauth), _) => Some(qauth.clone()),
        (None, Some(header)) => {
            if header.len() >= 7 && header[..7].eq_ignore_ascii_case(b"bearer ") {
                Some(header[7..].to_vec())
            } else {
                return Err(ParseError::new("Unauthorized"));
            }
        }
        (None, None) => None,
    };
    if ctx.auth.is_some() || supplied.is_some() {
        let expected = ctx.auth.unwrap_or("").as_bytes();
        if supplied.as_deref().unwrap_or(b"") != expected {
            return Err(ParseError::new("Unauthorized"));
        }
    }

    Ok(Step::Consumed { n: consumed, args })
}
