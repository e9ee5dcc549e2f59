//! Server and administrative commands.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cache::{
    ClearOptions, CountOptions, IterAction, IterOptions, SizeOptions, StoreOptions, SweepOptions,
};
use crate::net::bgwork::bgwork;
use crate::net::{Conn, Shared, ERR_WRONG_NUM_ARGS};
use crate::proto::{Args, Protocol};
use crate::time;

use super::glob_match;
use super::strings::pg_simple_row;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// PING [message]
pub fn ping(conn: &mut Conn, args: &Args) {
    match conn.proto() {
        Protocol::Postgres => pg_simple_row(conn, "pong", b"PONG", "PING"),
        _ => {
            if args.len() > 1 {
                let msg = args.at(1).to_vec();
                conn.out.resp_bulk(&msg);
            } else {
                conn.out.resp_simple("PONG");
            }
        }
    }
}

// ECHO message
pub fn echo(conn: &mut Conn, args: &Args) {
    if args.len() != 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let msg = args.at(1).to_vec();
    if conn.proto() == Protocol::Postgres {
        pg_simple_row(conn, "message", &msg, "ECHO");
    } else {
        conn.out.resp_bulk(&msg);
    }
}

// AUTH [user] password
pub fn auth(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() != 2 && args.len() != 3 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    conn.stats.auth_cmds += 1;
    let Some(expected) = shared.auth.as_deref() else {
        conn.write_error("ERR Client sent AUTH, but no password is set.");
        return;
    };
    let supplied = args.at(args.len() - 1);
    if supplied == expected.as_bytes() {
        conn.auth_ok = true;
        if conn.proto() == Protocol::Postgres {
            pg_simple_row(conn, "ok", b"OK", "AUTH");
        } else {
            conn.out.resp_simple("OK");
        }
    } else {
        conn.stats.auth_errors += 1;
        conn.write_error("ERR invalid password");
    }
}

// QUIT
pub fn quit(conn: &mut Conn, _args: &Args) {
    if conn.proto() == Protocol::Resp {
        conn.out.resp_simple("OK");
    }
    conn.close();
}

// VERSION (Memcache) / also a generic command
pub fn version(conn: &mut Conn, _args: &Args) {
    match conn.proto() {
        Protocol::Memcache => {
            conn.out
                .write_raw(format!("VERSION {}\r\n", VERSION).as_bytes());
        }
        Protocol::Postgres => pg_simple_row(conn, "version", VERSION.as_bytes(), "VERSION"),
        _ => conn.out.resp_simple(VERSION),
    }
}

// DBSIZE
pub fn dbsize(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() != 1 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let count = shared.cache.count(&CountOptions::default()) as i64;
    if conn.proto() == Protocol::Postgres {
        pg_simple_row(conn, "count", count.to_string().as_bytes(), "DBSIZE");
    } else {
        conn.out.resp_int(count);
    }
}

// FLUSHALL [SYNC|ASYNC]
pub async fn flushall(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() > 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    if args.len() == 2 && !args.eq(1, "sync") && !args.eq(1, "async") {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let cache = shared.cache.clone();
    let now = time::now_nanos();
    let cleared = bgwork(conn, move || {
        cache.clear(&ClearOptions {
            time: now,
            ..Default::default()
        });
    })
    .await;
    if cleared.is_none() {
        conn.write_error("ERR failed to do work");
        return;
    }
    match conn.proto() {
        Protocol::Memcache => conn.out.write_raw(b"OK\r\n"),
        Protocol::Postgres => pg_simple_row(conn, "ok", b"OK", "FLUSHALL"),
        Protocol::Http => conn.out.http_response(200, "OK", b"OK\r\n"),
        Protocol::Resp => conn.out.resp_simple("OK"),
    }
}

// KEYS pattern
pub async fn keys(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() != 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let pattern = args.at(1).to_vec();
    let cache = shared.cache.clone();
    let now = time::now_nanos();
    let matched = bgwork(conn, move || {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        let match_all = pattern == b"*";
        cache.iter(
            &IterOptions {
                time: now,
                ..Default::default()
            },
            |view| {
                if match_all || glob_match(&pattern, &view.key) {
                    keys.push(view.key.to_vec());
                }
                IterAction::Continue
            },
        );
        keys
    })
    .await;
    let Some(keys) = matched else {
        conn.write_error("ERR failed to do work");
        return;
    };
    if conn.proto() == Protocol::Postgres {
        conn.out.pg_row_desc(&["key"]);
        for key in &keys {
            conn.out.pg_row_data(&[Some(key.as_slice())]);
        }
        conn.out.pg_complete(&format!("KEYS {}", keys.len()));
        conn.out.pg_ready();
    } else {
        conn.out.resp_array(keys.len());
        for key in &keys {
            conn.out.resp_bulk(key);
        }
    }
}

// SWEEP
pub async fn sweep(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() != 1 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let cache = shared.cache.clone();
    let now = time::now_nanos();
    let result = bgwork(conn, move || {
        cache.sweep(&SweepOptions {
            time: now,
            ..Default::default()
        })
    })
    .await;
    let Some((swept, _kept)) = result else {
        conn.write_error("ERR failed to do work");
        return;
    };
    if conn.proto() == Protocol::Postgres {
        pg_simple_row(conn, "swept", swept.to_string().as_bytes(), "SWEEP");
    } else {
        conn.out.resp_int(swept as i64);
    }
}

// STATS
pub fn stats(conn: &mut Conn, shared: &Arc<Shared>, _args: &Args) {
    // Fold this connection's deltas so the snapshot includes them.
    conn.stats.fold_into(&shared.stats);
    let s = &shared.stats;
    let pairs: Vec<(&str, String)> = vec![
        ("version", VERSION.to_string()),
        ("uptime", time::secs_since(shared.started_at).to_string()),
        (
            "curr_connections",
            s.conns.load(Ordering::Relaxed).to_string(),
        ),
        (
            "total_connections",
            s.total_conns.load(Ordering::Relaxed).to_string(),
        ),
        ("cmd_get", s.cmd_get.load(Ordering::Relaxed).to_string()),
        ("cmd_set", s.cmd_set.load(Ordering::Relaxed).to_string()),
        ("get_hits", s.get_hits.load(Ordering::Relaxed).to_string()),
        (
            "get_misses",
            s.get_misses.load(Ordering::Relaxed).to_string(),
        ),
        (
            "delete_hits",
            s.delete_hits.load(Ordering::Relaxed).to_string(),
        ),
        (
            "delete_misses",
            s.delete_misses.load(Ordering::Relaxed).to_string(),
        ),
        (
            "auth_errors",
            s.auth_errors.load(Ordering::Relaxed).to_string(),
        ),
        ("evictions", s.evictions.load(Ordering::Relaxed).to_string()),
        (
            "curr_items",
            shared.cache.count(&CountOptions::default()).to_string(),
        ),
        (
            "total_items",
            shared.cache.total(&CountOptions::default()).to_string(),
        ),
        (
            "bytes",
            shared
                .cache
                .size(&SizeOptions {
                    entries_only: true,
                    ..Default::default()
                })
                .to_string(),
        ),
        (
            "lowmem",
            u64::from(shared.lowmem.load(Ordering::Relaxed)).to_string(),
        ),
    ];
    match conn.proto() {
        Protocol::Memcache => {
            for (name, value) in &pairs {
                conn.out
                    .write_raw(format!("STAT {} {}\r\n", name, value).as_bytes());
            }
            conn.out.write_raw(b"END\r\n");
        }
        Protocol::Postgres => {
            conn.out.pg_row_desc(&["name", "value"]);
            for (name, value) in &pairs {
                conn.out
                    .pg_row_data(&[Some(name.as_bytes()), Some(value.as_bytes())]);
            }
            conn.out.pg_complete(&format!("STATS {}", pairs.len()));
            conn.out.pg_ready();
        }
        _ => {
            let mut body = String::new();
            for (name, value) in &pairs {
                body.push_str(name);
                body.push(':');
                body.push_str(value);
                body.push_str("\r\n");
            }
            conn.out.resp_bulk(body.as_bytes());
        }
    }
}

// DEBUG POPULATE count [prefix] / DEBUG SLEEP seconds
pub async fn debug(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() < 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    if args.eq(1, "populate") {
        if args.len() < 3 {
            conn.write_error(ERR_WRONG_NUM_ARGS);
            return;
        }
        let Some(count) = args.u64(2) else {
            conn.write_error(ERR_WRONG_NUM_ARGS);
            return;
        };
        let prefix = if args.len() > 3 {
            String::from_utf8_lossy(args.at(3)).into_owned()
        } else {
            "key:".to_string()
        };
        let cache = shared.cache.clone();
        let now = time::now_nanos();
        let done = bgwork(conn, move || {
            let opts = StoreOptions {
                time: now,
                ..Default::default()
            };
            for i in 0..count {
                let key = format!("{}{}", prefix, i);
                let value = format!("value:{}", i);
                cache.store(key.as_bytes(), value.as_bytes(), &opts);
            }
        })
        .await;
        if done.is_none() {
            conn.write_error("ERR failed to do work");
            return;
        }
        conn.out.resp_simple("OK");
    } else if args.eq(1, "sleep") {
        if args.len() < 3 {
            conn.write_error(ERR_WRONG_NUM_ARGS);
            return;
        }
        let secs = args
            .i64(2)
            .or_else(|| {
                std::str::from_utf8(args.at(2))
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .map(|f| f as i64)
            })
            .unwrap_or(0)
            .max(0);
        let done = bgwork(conn, move || {
            std::thread::sleep(std::time::Duration::from_secs(secs as u64));
        })
        .await;
        if done.is_none() {
            conn.write_error("ERR failed to do work");
            return;
        }
        conn.out.resp_simple("OK");
    } else {
        conn.write_error(&format!(
            "ERR unknown DEBUG subcommand '{}'",
            String::from_utf8_lossy(args.at(1))
        ));
    }
}
