//! Memcache text protocol parser.
//!
//! Produces argument vectors in the dispatcher's vocabulary: retrievals
//! become `mget`/`mgets`, storage commands become `set` with the matching
//! option words, arithmetic becomes `uincrby`/`udecrby`. On a syntax
//! error the returned failure carries the position of the next line so
//! the connection can recover instead of closing.

use super::{Args, ParseError, Step, MAX_ARG_SIZE};

/// Splits one `\r\n`- (or `\n`-) terminated line into tokens.
/// Returns the tokens and the offset just past the line terminator.
fn split_line(data: &[u8]) -> Option<(Vec<&[u8]>, usize)> {
    let nl = data.iter().position(|&b| b == b'\n')?;
    let mut line = &data[..nl];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    let tokens = line
        .split(|&b| b == b' ')
        .filter(|t| !t.is_empty())
        .collect();
    Some((tokens, nl + 1))
}

fn client_error(msg: &str, recover: usize) -> ParseError {
    ParseError::recoverable(format!("CLIENT_ERROR {}", msg), recover)
}

/// Pulls a trailing `noreply` token, reporting it to the caller.
fn strip_noreply<'a>(tokens: &mut Vec<&'a [u8]>, noreply: &mut bool) {
    if tokens.last().map(|t| t.eq_ignore_ascii_case(b"noreply")) == Some(true) {
        tokens.pop();
        *noreply = true;
    }
}

fn parse_u64(token: &[u8]) -> Option<u64> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

/// Parses one Memcache text command.
pub fn parse(data: &[u8], noreply: &mut bool) -> Result<Step, ParseError> {
    let Some((mut tokens, line_len)) = split_line(data) else {
        return Ok(Step::Incomplete);
    };
    if tokens.is_empty() {
        // A blank line is an error; recover past it.
        return Err(client_error("bad command line format", line_len));
    }
    let name = tokens[0].to_ascii_lowercase();
    let mut args = Args::new();
    match name.as_slice() {
        b"get" | b"gets" => {
            if tokens.len() < 2 {
                return Err(client_error("bad command line format", line_len));
            }
            args.push(if name == b"gets" {
                b"mgets".as_slice()
            } else {
                b"mget".as_slice()
            });
            for key in &tokens[1..] {
                args.push(key);
            }
            Ok(Step::Consumed { n: line_len, args })
        }
        b"set" | b"add" | b"replace" | b"append" | b"prepend" | b"cas" => {
            strip_noreply(&mut tokens, noreply);
            let want = if name == b"cas" { 6 } else { 5 };
            if tokens.len() != want {
                return Err(client_error("bad command line format", line_len));
            }
            let key = tokens[1];
            let (Some(flags), Some(exptime), Some(nbytes)) = (
                parse_u64(tokens[2]),
                std::str::from_utf8(tokens[3])
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok()),
                parse_u64(tokens[4]),
            ) else {
                return Err(client_error("bad command line format", line_len));
            };
            if nbytes as usize > MAX_ARG_SIZE {
                return Err(client_error("object too large for cache", line_len));
            }
            let cas = if name == b"cas" {
                match parse_u64(tokens[5]) {
                    Some(cas) => Some(cas),
                    None => return Err(client_error("bad command line format", line_len)),
                }
            } else {
                None
            };
            // The data block plus its terminator must be complete.
            let total = line_len + nbytes as usize + 2;
            if data.len() < total {
                return Ok(Step::Incomplete);
            }
            let body = &data[line_len..line_len + nbytes as usize];
            if data[line_len + nbytes as usize..total] != *b"\r\n" {
                return Err(client_error("bad data chunk", total));
            }
            match name.as_slice() {
                b"append" | b"prepend" => {
                    args.push(&name);
                    args.push(key);
                    args.push(body);
                }
                _ => {
                    args.push(b"set");
                    args.push(key);
                    args.push(body);
                    if name == b"add" {
                        args.push(b"nx");
                    } else if name == b"replace" {
                        args.push(b"xx");
                    }
                    if let Some(cas) = cas {
                        args.push(b"cas");
                        args.push(cas.to_string().as_bytes());
                    }
                    if exptime != 0 {
                        args.push(b"ex");
                        args.push(exptime.to_string().as_bytes());
                    }
                    if flags != 0 {
                        args.push(b"flags");
                        args.push(flags.to_string().as_bytes());
                    }
                }
            }
            Ok(Step::Consumed { n: total, args })
        }
        b"delete" => {
            strip_noreply(&mut tokens, noreply);
            if tokens.len() != 2 {
                return Err(client_error("bad command line format", line_len));
            }
            args.push(b"del");
            args.push(tokens[1]);
            Ok(Step::Consumed { n: line_len, args })
        }
        b"incr" | b"decr" => {
            strip_noreply(&mut tokens, noreply);
            if tokens.len() != 3 {
                return Err(client_error("bad command line format", line_len));
            }
            if parse_u64(tokens[2]).is_none() {
                return Err(client_error(
                    "invalid numeric delta argument",
                    line_len,
                ));
            }
            args.push(if name == b"incr" { b"uincrby" } else { b"udecrby" });
            args.push(tokens[1]);
            args.push(tokens[2]);
            Ok(Step::Consumed { n: line_len, args })
        }
        b"touch" => {
            strip_noreply(&mut tokens, noreply);
            if tokens.len() != 3 {
                return Err(client_error("bad command line format", line_len));
            }
            args.push(b"touch");
            args.push(tokens[1]);
            args.push(tokens[2]);
            Ok(Step::Consumed { n: line_len, args })
        }
        b"flush_all" => {
            strip_noreply(&mut tokens, noreply);
            args.push(b"flushall");
            Ok(Step::Consumed { n: line_len, args })
        }
        b"stats" | b"version" | b"quit" => {
            args.push(&name);
            Ok(Step::Consumed { n: line_len, args })
        }
        _ => {
            // Unknown command; the dispatcher answers ERROR. Pass the raw
            // tokens through.
            for token in &tokens {
                args.push(token);
            }
            Ok(Step::Consumed { n: line_len, args })
        }
    }
}
