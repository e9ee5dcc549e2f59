//! RESP wire protocol parser, binary arrays and the inline form.

use super::{Args, ParseError, Step, MAX_ARGS, MAX_ARG_SIZE};

/// Reads a decimal number terminated by `\r\n` at the head of `bytes`.
/// Returns the value and the bytes consumed, `Ok(None)` when the line is
/// still incomplete.
fn read_num(
    bytes: &[u8],
    min: i64,
    max: i64,
    errmsg: &str,
) -> Result<Option<(i64, usize)>, ParseError> {
    let Some(pos) = bytes.iter().position(|&b| b == b'\r') else {
        if bytes.len() > 32 {
            return Err(ParseError::new(format!("ERR Protocol error: {}", errmsg)));
        }
        return Ok(None);
    };
    if pos + 1 >= bytes.len() {
        return Ok(None);
    }
    if bytes[pos + 1] != b'\n' {
        return Err(ParseError::new(format!("ERR Protocol error: {}", errmsg)));
    }
    let parsed = std::str::from_utf8(&bytes[..pos])
        .ok()
        .and_then(|s| s.parse::<i64>().ok());
    match parsed {
        Some(x) if x >= min && x <= max => Ok(Some((x, pos + 2))),
        _ => Err(ParseError::new(format!("ERR Protocol error: {}", errmsg))),
    }
}

/// Parses one RESP array of bulk strings: `*N\r\n` then N times
/// `$len\r\n<bytes>\r\n`.
pub fn parse(data: &[u8]) -> Result<Step, ParseError> {
    let mut pos = 0;
    if data.is_empty() {
        return Ok(Step::Incomplete);
    }
    if data[pos] != b'*' {
        return Err(ParseError::new("ERR Protocol error: expected '*'"));
    }
    pos += 1;
    let Some((nargs, n)) = read_num(
        &data[pos..],
        i64::MIN,
        MAX_ARGS as i64,
        "invalid multibulk length",
    )?
    else {
        return Ok(Step::Incomplete);
    };
    pos += n;
    let mut args = Args::new();
    for _ in 0..nargs.max(0) {
        if pos == data.len() {
            return Ok(Step::Incomplete);
        }
        if data[pos] != b'$' {
            return Err(ParseError::new(format!(
                "ERR Protocol error: expected '$', got '{}'",
                data[pos] as char
            )));
        }
        pos += 1;
        let Some((nbytes, n)) = read_num(&data[pos..], 0, MAX_ARG_SIZE as i64, "invalid bulk length")?
        else {
            return Ok(Step::Incomplete);
        };
        pos += n;
        let nbytes = nbytes as usize;
        if nbytes + 2 > data.len() - pos {
            return Ok(Step::Incomplete);
        }
        args.push(&data[pos..pos + nbytes]);
        pos += nbytes + 2;
    }
    Ok(Step::Consumed { n: pos, args })
}

/// Parses one inline command line: whitespace-separated tokens, single or
/// double quotes delimit, `\n`, `\r` and `\t` escapes inside quotes.
pub fn parse_inline(data: &[u8]) -> Result<Step, ParseError> {
    let mut args = Args::new();
    let mut arg: Vec<u8> = Vec::new();
    let mut in_arg = false;
    let mut quote = 0u8;
    let mut i = 0;
    while i < data.len() {
        let mut ch = data[i];
        if in_arg {
            if quote != 0 {
                if ch == b'\n' {
                    return Err(ParseError::new(
                        "ERR Protocol error: unbalanced quotes in request",
                    ));
                }
                if ch == quote {
                    args.push_vec(std::mem::take(&mut arg));
                    if args.len() > MAX_ARGS {
                        return Err(ParseError::new(
                            "ERR Protocol error: invalid multibulk length",
                        ));
                    }
                    i += 1;
                    if i == data.len() {
                        break;
                    }
                    ch = data[i];
                    in_arg = false;
                    if ch == b'\n' {
                        continue;
                    }
                    if !ch.is_ascii_whitespace() {
                        return Err(ParseError::new(
                            "ERR Protocol error: unbalanced quotes in request",
                        ));
                    }
                    i += 1;
                    continue;
                } else if ch == b'\\' {
                    i += 1;
                    if i == data.len() {
                        break;
                    }
                    ch = match data[i] {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => other,
                    };
                }
                arg.push(ch);
                if arg.len() > MAX_ARG_SIZE {
                    return Err(ParseError::new("ERR Protocol error: invalid bulk length"));
                }
            } else if ch == b'"' || ch == b'\'' {
                quote = ch;
            } else if ch.is_ascii_whitespace() {
                args.push_vec(std::mem::take(&mut arg));
                if args.len() > MAX_ARGS {
                    return Err(ParseError::new(
                        "ERR Protocol error: invalid multibulk length",
                    ));
                }
                if ch == b'\n' {
                    return Ok(Step::Consumed { n: i + 1, args });
                }
                in_arg = false;
            } else {
                arg.push(ch);
                if arg.len() > MAX_ARG_SIZE {
                    return Err(ParseError::new("ERR Protocol error: invalid bulk length"));
                }
            }
        } else {
            if ch == b'\n' {
                return Ok(Step::Consumed { n: i + 1, args });
            }
            if !ch.is_ascii_whitespace() {
                in_arg = true;
                if ch == b'"' || ch == b'\'' {
                    quote = ch;
                } else {
                    quote = 0;
                    arg.push(ch);
                }
            }
        }
        i += 1;
    }
    Ok(Step::Incomplete)
}
