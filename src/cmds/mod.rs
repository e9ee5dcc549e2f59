//! Command dispatch.
//!
//! Handlers are wire-agnostic: they run against the cache operation APIs
//! and translate outcomes into the connection's protocol dialect. The
//! name table is built once at first use.

mod server;
mod strings;

#[cfg(test)]
mod glob_test;

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::net::{Conn, Shared};
use crate::proto::{Args, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmd {
    Ping,
    Echo,
    Set,
    Setex,
    Psetex,
    Get,
    Mget,
    Mgets,
    Del,
    Exists,
    Ttl,
    Pttl,
    Expire,
    Incr,
    Decr,
    Incrby,
    Decrby,
    Uincrby,
    Udecrby,
    Append,
    Prepend,
    Touch,
    Dbsize,
    Flushall,
    Keys,
    Sweep,
    Stats,
    Auth,
    Quit,
    Version,
    Debug,
}

static COMMANDS: Lazy<HashMap<&'static str, Cmd>> = Lazy::new(|| {
    use Cmd::*;
    HashMap::from([
        ("ping", Ping),
        ("echo", Echo),
        ("set", Set),
        ("setex", Setex),
        ("psetex", Psetex),
        ("get", Get),
        ("mget", Mget),
        ("mgets", Mgets),
        ("del", Del),
        ("exists", Exists),
        ("ttl", Ttl),
        ("pttl", Pttl),
        ("expire", Expire),
        ("incr", Incr),
        ("decr", Decr),
        ("incrby", Incrby),
        ("decrby", Decrby),
        ("uincrby", Uincrby),
        ("udecrby", Udecrby),
        ("append", Append),
        ("prepend", Prepend),
        ("touch", Touch),
        ("dbsize", Dbsize),
        ("flushall", Flushall),
        ("keys", Keys),
        ("sweep", Sweep),
        ("stats", Stats),
        ("auth", Auth),
        ("quit", Quit),
        ("version", Version),
        ("debug", Debug),
    ])
});

/// Executes one parsed command against the connection.
pub async fn dispatch(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    let name = args.name();
    let cmd = COMMANDS.get(name.as_str()).copied();

    // Unauthenticated connections may only authenticate or leave. HTTP
    // requests were already authorized by the parser.
    if shared.auth.is_some()
        && !conn.auth_ok
        && conn.proto() != Protocol::Http
        && !matches!(cmd, Some(Cmd::Auth) | Some(Cmd::Quit))
    {
        conn.write_error("NOAUTH Authentication required.");
        return;
    }

    let Some(cmd) = cmd else {
        debug!(component = "cmds", event = "unknown_command", name = %name, "unknown command");
        conn.write_error(&format!("ERR unknown command '{}'", name));
        return;
    };

    match cmd {
        Cmd::Ping => server::ping(conn, args),
        Cmd::Echo => server::echo(conn, args),
        Cmd::Set => strings::set(conn, shared, args),
        Cmd::Setex => strings::setex(conn, shared, args, false),
        Cmd::Psetex => strings::setex(conn, shared, args, true),
        Cmd::Get => strings::get(conn, shared, args),
        Cmd::Mget | Cmd::Mgets => strings::mget(conn, shared, args),
        Cmd::Del => strings::del(conn, shared, args),
        Cmd::Exists => strings::exists(conn, shared, args),
        Cmd::Ttl => strings::ttl(conn, shared, args, false),
        Cmd::Pttl => strings::ttl(conn, shared, args, true),
        Cmd::Expire => strings::expire(conn, shared, args),
        Cmd::Incr => strings::incr(conn, shared, args, false, false),
        Cmd::Decr => strings::incr(conn, shared, args, true, false),
        Cmd::Incrby => strings::incrby(conn, shared, args, false, false),
        Cmd::Decrby => strings::incrby(conn, shared, args, true, false),
        Cmd::Uincrby => strings::incrby(conn, shared, args, false, true),
        Cmd::Udecrby => strings::incrby(conn, shared, args, true, true),
        Cmd::Append => strings::append(conn, shared, args, false),
        Cmd::Prepend => strings::append(conn, shared, args, true),
        Cmd::Touch => strings::touch(conn, shared, args),
        Cmd::Dbsize => server::dbsize(conn, shared, args),
        Cmd::Flushall => server::flushall(conn, shared, args).await,
        Cmd::Keys => server::keys(conn, shared, args).await,
        Cmd::Sweep => server::sweep(conn, shared, args).await,
        Cmd::Stats => server::stats(conn, shared, args),
        Cmd::Auth => server::auth(conn, shared, args),
        Cmd::Quit => server::quit(conn, args),
        Cmd::Version => server::version(conn, args),
        Cmd::Debug => server::debug(conn, shared, args).await,
    }
}

/// Glob pattern match: `*` any run, `?` any byte, `\` escapes.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    glob_match_depth(pattern, text, 0)
}

fn glob_match_depth(mut pattern: &[u8], mut text: &[u8], depth: usize) -> bool {
    if depth == 128 {
        return false;
    }
    while !pattern.is_empty() {
        let mut escaped = false;
        match pattern[0] {
            b'\\' => {
                if pattern.len() == 1 {
                    return false;
                }
                // The escaped byte is a pure literal, `*` and `?` included.
                pattern = &pattern[1..];
                escaped = true;
            }
            b'*' => {
                if pattern.len() == 1 {
                    return true;
                }
                if pattern[1] == b'*' {
                    pattern = &pattern[1..];
                    continue;
                }
                if glob_match_depth(&pattern[1..], text, depth + 1) {
                    return true;
                }
                if text.is_empty() {
                    return false;
                }
                text = &text[1..];
                continue;
            }
            _ => {}
        }
        if text.is_empty() {
            return false;
        }
        if escaped {
            if pattern[0] != text[0] {
                return false;
            }
        } else if pattern[0] != b'?' && pattern[0] != text[0] {
            return false;
        }
        pattern = &pattern[1..];
        text = &text[1..];
    }
    text.is_empty()
}
