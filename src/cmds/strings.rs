//! Key/value commands.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cache::{DeleteOptions, LoadOptions, Status, StoreOptions, Update, MILLISECOND, SECOND};
use crate::net::{Conn, Shared, ERR_OUT_OF_MEMORY, ERR_SYNTAX_ERROR, ERR_WRONG_NUM_ARGS};
use crate::proto::{Args, Protocol};
use crate::time;

const ERR_INVALID_INTEGER: &str = "ERR value is not an integer or out of range";
const ERR_INVALID_EXPIRE: &str = "ERR invalid expire time";

/// Thirty days in nanoseconds; beyond this a Memcache exptime is an
/// absolute Unix timestamp rather than an offset.
const MC_ABSOLUTE_CUTOFF: i64 = 30 * 24 * 3600 * SECOND;

fn lowmem(shared: &Shared) -> bool {
    shared.lowmem.load(Ordering::Relaxed)
}

/// Resolves an expiration offset in nanoseconds against the Memcache
/// absolute-time convention.
fn expiry_offset_to_expires(conn: &Conn, now: i64, offset: i64) -> i64 {
    if conn.proto() == Protocol::Memcache && offset > MC_ABSOLUTE_CUTOFF {
        // An absolute Unix time; already in the clock's epoch.
        if offset > now {
            offset
        } else {
            now
        }
    } else {
        now.saturating_add(offset)
    }
}

struct SetRequest<'a> {
    cmdname: &'a str,
    now: i64,
    key: &'a [u8],
    value: &'a [u8],
    expires: i64,
    nx: bool,
    xx: bool,
    get: bool,
    keepttl: bool,
    flags: u32,
    cas: u64,
    withcas: bool,
}

fn exec_set(conn: &mut Conn, shared: &Arc<Shared>, req: SetRequest<'_>) {
    conn.stats.cmd_set += 1;
    let opts = StoreOptions {
        time: req.now,
        expires: req.expires.max(0),
        cas: req.cas,
        flags: req.flags,
        keepttl: req.keepttl,
        casop: req.withcas,
        nx: req.nx,
        xx: req.xx,
        lowmem: lowmem(shared),
        ..Default::default()
    };
    let proto = conn.proto();
    let mut wrote_old = false;
    let status = if req.get {
        if proto == Protocol::Postgres {
            conn.out.pg_row_desc(&["value"]);
        }
        let out = &mut conn.out;
        let wrote = &mut wrote_old;
        shared.cache.store_with(req.key, req.value, &opts, |view| {
            match proto {
                Protocol::Postgres => out.pg_row_data(&[Some(view.value)]),
                _ => out.resp_bulk(view.value),
            }
            *wrote = true;
            true
        })
    } else {
        shared.cache.store(req.key, req.value, &opts)
    };
    if status == Status::NoMem {
        conn.stats.store_no_memory += 1;
        conn.write_error(ERR_OUT_OF_MEMORY);
        return;
    }
    if req.get {
        if proto == Protocol::Postgres {
            conn.out
                .pg_complete(&format!("{} {}", req.cmdname, usize::from(wrote_old)));
            conn.out.pg_ready();
        } else if !wrote_old {
            conn.out.resp_null();
        }
        return;
    }
    let stored = matches!(status, Status::Inserted | Status::Replaced);
    match proto {
        Protocol::Memcache => {
            if stored {
                conn.out.write_raw(b"STORED\r\n");
            } else if status == Status::Found {
                conn.out.write_raw(b"EXISTS\r\n");
            } else {
                conn.out.write_raw(b"NOT_FOUND\r\n");
            }
        }
        Protocol::Http => {
            if stored {
                conn.out.http_response(200, "OK", b"Stored\r\n");
            } else {
                conn.out.http_response(404, "Not Found", b"Not Found\r\n");
            }
        }
        Protocol::Postgres => {
            conn.out
                .pg_complete(&format!("{} {}", req.cmdname, usize::from(stored)));
            conn.out.pg_ready();
        }
        Protocol::Resp => {
            if stored {
                conn.out.resp_simple("OK");
            } else {
                conn.out.resp_null();
            }
        }
    }
}

// SET key value [NX | XX] [GET] [EX seconds | PX milliseconds |
//   EXAT unix-seconds | PXAT unix-milliseconds | KEEPTTL]
//   [FLAGS flags] [CAS cas]
pub fn set(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() < 3 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let mut expires = 0i64;
    let mut hasex = false;
    let mut nx = false;
    let mut xx = false;
    let mut get = false;
    let mut keepttl = false;
    let mut flags = 0u32;
    let mut cas = 0u64;
    let mut withcas = false;
    let mut i = 3;
    while i < args.len() {
        let exkind = if args.eq(i, "ex") {
            1
        } else if args.eq(i, "px") {
            2
        } else if args.eq(i, "exat") {
            3
        } else if args.eq(i, "pxat") {
            4
        } else {
            0
        };
        if exkind > 0 {
            i += 1;
            let Some(raw) = args.i64(i) else {
                if i >= args.len() {
                    conn.write_error(ERR_SYNTAX_ERROR);
                } else {
                    conn.write_error(ERR_INVALID_EXPIRE);
                }
                return;
            };
            if raw <= 0 {
                if conn.proto() == Protocol::Memcache {
                    // Memcache allows immediate expiration.
                    expires = now;
                } else {
                    conn.write_error(ERR_INVALID_EXPIRE);
                    return;
                }
            } else {
                expires = match exkind {
                    1 => expiry_offset_to_expires(conn, now, raw.saturating_mul(SECOND)),
                    2 => expiry_offset_to_expires(conn, now, raw.saturating_mul(MILLISECOND)),
                    3 => raw.saturating_mul(SECOND),
                    _ => raw.saturating_mul(MILLISECOND),
                };
            }
            hasex = true;
        } else if args.eq(i, "nx") {
            nx = true;
        } else if args.eq(i, "xx") {
            xx = true;
        } else if args.eq(i, "get") {
            get = true;
        } else if args.eq(i, "keepttl") {
            keepttl = true;
        } else if args.eq(i, "flags") {
            i += 1;
            let Some(x) = args.u64(i) else {
                conn.write_error(ERR_SYNTAX_ERROR);
                return;
            };
            flags = (x & u32::MAX as u64) as u32;
        } else if args.eq(i, "cas") {
            i += 1;
            let Some(x) = args.u64(i) else {
                conn.write_error(ERR_SYNTAX_ERROR);
                return;
            };
            cas = x;
            withcas = true;
        } else {
            conn.write_error(ERR_SYNTAX_ERROR);
            return;
        }
        i += 1;
    }
    if (keepttl && hasex) || (xx && nx) {
        conn.write_error(ERR_SYNTAX_ERROR);
        return;
    }
    exec_set(
        conn,
        shared,
        SetRequest {
            cmdname: "SET",
            now,
            key: args.at(1),
            value: args.at(2),
            expires,
            nx,
            xx,
            get,
            keepttl,
            flags,
            cas,
            withcas,
        },
    );
}

// SETEX key seconds value / PSETEX key milliseconds value
pub fn setex(conn: &mut Conn, shared: &Arc<Shared>, args: &Args, millis: bool) {
    if args.len() != 4 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let Some(raw) = args.i64(2) else {
        conn.write_error(ERR_INVALID_EXPIRE);
        return;
    };
    if raw <= 0 {
        conn.write_error(ERR_INVALID_EXPIRE);
        return;
    }
    let unit = if millis { MILLISECOND } else { SECOND };
    let expires = expiry_offset_to_expires(conn, now, raw.saturating_mul(unit));
    exec_set(
        conn,
        shared,
        SetRequest {
            cmdname: if millis { "PSETEX" } else { "SETEX" },
            now,
            key: args.at(1),
            value: args.at(3),
            expires,
            nx: false,
            xx: false,
            get: false,
            keepttl: false,
            flags: 0,
            cas: 0,
            withcas: false,
        },
    );
}

// GET key
pub fn get(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    conn.stats.cmd_get += 1;
    if args.len() != 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let proto = conn.proto();
    if proto == Protocol::Postgres {
        conn.out.pg_row_desc(&["value"]);
    }
    let out = &mut conn.out;
    let status = shared.cache.load_with(
        args.at(1),
        &LoadOptions {
            time: now,
            ..Default::default()
        },
        |view| {
            match proto {
                Protocol::Postgres => out.pg_row_data(&[Some(view.value)]),
                Protocol::Http => out.http_response(200, "OK", view.value),
                Protocol::Memcache => {
                    write_mc_value(out, &view.key, view.flags, view.value, None);
                    out.write_raw(b"END\r\n");
                }
                Protocol::Resp => out.resp_bulk(view.value),
            }
            None
        },
    );
    if status == Status::NotFound {
        conn.stats.get_misses += 1;
        match proto {
            Protocol::Http => conn.out.http_response(404, "Not Found", b"Not Found\r\n"),
            Protocol::Postgres => conn.out.pg_complete("GET 0"),
            Protocol::Memcache => conn.out.write_raw(b"END\r\n"),
            Protocol::Resp => conn.out.resp_null(),
        }
    } else {
        conn.stats.get_hits += 1;
        if proto == Protocol::Postgres {
            conn.out.pg_complete("GET 1");
        }
    }
    if proto == Protocol::Postgres {
        conn.out.pg_ready();
    }
}

fn write_mc_value(
    out: &mut crate::net::OutBuf,
    key: &[u8],
    flags: u32,
    value: &[u8],
    cas: Option<u64>,
) {
    out.write_raw(b"VALUE ");
    out.write_raw(key);
    out.write_raw(format!(" {} {}", flags, value.len()).as_bytes());
    if let Some(cas) = cas {
        out.write_raw(format!(" {}", cas).as_bytes());
    }
    out.write_raw(b"\r\n");
    out.write_raw(value);
    out.write_raw(b"\r\n");
}

// MGET key [key...] / MGETS key [key...] (with cas column)
pub fn mget(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() < 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let with_cas = args.eq(0, "mgets");
    let proto = conn.proto();
    match proto {
        Protocol::Postgres => {
            if with_cas {
                conn.out.pg_row_desc(&["key", "value", "cas"]);
            } else {
                conn.out.pg_row_desc(&["key", "value"]);
            }
        }
        Protocol::Resp => conn.out.resp_array(args.len() - 1),
        _ => {}
    }
    let mut found = 0usize;
    for i in 1..args.len() {
        conn.stats.cmd_get += 1;
        let out = &mut conn.out;
        let status = shared.cache.load_with(
            args.at(i),
            &LoadOptions {
                time: now,
                ..Default::default()
            },
            |view| {
                match proto {
                    Protocol::Postgres => {
                        let cas_text = view.cas.to_string();
                        if with_cas {
                            out.pg_row_data(&[
                                Some(view.key.as_ref()),
                                Some(view.value),
                                Some(cas_text.as_bytes()),
                            ]);
                        } else {
                            out.pg_row_data(&[Some(view.key.as_ref()), Some(view.value)]);
                        }
                    }
                    Protocol::Memcache => {
                        let cas = with_cas.then_some(view.cas);
                        write_mc_value(out, &view.key, view.flags, view.value, cas);
                    }
                    _ => {
                        if with_cas {
                            out.resp_array(2);
                            out.resp_uint(view.cas);
                        }
                        out.resp_bulk(view.value);
                    }
                }
                None
            },
        );
        if status == Status::NotFound {
            conn.stats.get_misses += 1;
            if proto == Protocol::Resp {
                conn.out.resp_null();
            }
        } else {
            conn.stats.get_hits += 1;
            found += 1;
        }
    }
    match proto {
        Protocol::Postgres => {
            conn.out.pg_complete(&format!("MGET {}", found));
            conn.out.pg_ready();
        }
        Protocol::Memcache => conn.out.write_raw(b"END\r\n"),
        _ => {}
    }
}

// DEL key [key...]
pub fn del(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() < 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let opts = DeleteOptions { time: now };
    let mut deleted = 0i64;
    for i in 1..args.len() {
        if shared.cache.delete(args.at(i), &opts) == Status::Deleted {
            conn.stats.delete_hits += 1;
            deleted += 1;
        } else {
            conn.stats.delete_misses += 1;
        }
    }
    match conn.proto() {
        Protocol::Memcache => {
            if deleted == 0 {
                conn.out.write_raw(b"NOT_FOUND\r\n");
            } else {
                conn.out.write_raw(b"DELETED\r\n");
            }
        }
        Protocol::Http => {
            if deleted == 0 {
                conn.out.http_response(404, "Not Found", b"Not Found\r\n");
            } else {
                conn.out.http_response(200, "OK", b"Deleted\r\n");
            }
        }
        Protocol::Postgres => {
            conn.out.pg_complete(&format!("DEL {}", deleted));
            conn.out.pg_ready();
        }
        Protocol::Resp => conn.out.resp_int(deleted),
    }
}

// EXISTS key [key...]
pub fn exists(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() < 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let opts = LoadOptions {
        time: now,
        notouch: true,
    };
    let mut found = 0i64;
    for i in 1..args.len() {
        if shared.cache.load(args.at(i), &opts) == Status::Found {
            found += 1;
        }
    }
    if conn.proto() == Protocol::Postgres {
        pg_simple_row(conn, "count", found.to_string().as_bytes(), "EXISTS");
    } else {
        conn.out.resp_int(found);
    }
}

pub(crate) fn pg_simple_row(conn: &mut Conn, col: &str, value: &[u8], tag: &str) {
    conn.out.pg_row_desc(&[col]);
    conn.out.pg_row_data(&[Some(value)]);
    conn.out.pg_complete(tag);
    conn.out.pg_ready();
}

// TTL key / PTTL key
pub fn ttl(conn: &mut Conn, shared: &Arc<Shared>, args: &Args, millis: bool) {
    if args.len() != 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let mut expires = 0i64;
    let status = shared.cache.load_with(
        args.at(1),
        &LoadOptions {
            time: now,
            notouch: true,
        },
        |view| {
            expires = view.expires;
            None
        },
    );
    let value = if status != Status::Found {
        -2
    } else if expires == 0 {
        -1
    } else {
        let unit = if millis { MILLISECOND } else { SECOND };
        ((expires - now).max(0) + unit - 1) / unit
    };
    if conn.proto() == Protocol::Postgres {
        let tag = if millis { "PTTL" } else { "TTL" };
        pg_simple_row(conn, "ttl", value.to_string().as_bytes(), tag);
    } else {
        conn.out.resp_int(value);
    }
}

// EXPIRE key seconds
pub fn expire(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() != 3 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let Some(secs) = args.i64(2) else {
        conn.write_error(ERR_INVALID_INTEGER);
        return;
    };
    let now = time::now_nanos();
    let expires = now.saturating_add(secs.saturating_mul(SECOND));
    let status = shared.cache.load_with(
        args.at(1),
        &LoadOptions {
            time: now,
            notouch: true,
        },
        |view| {
            Some(Update {
                value: view.value.to_vec(),
                flags: view.flags,
                expires,
            })
        },
    );
    let set = i64::from(status == Status::Found);
    if conn.proto() == Protocol::Postgres {
        pg_simple_row(conn, "set", set.to_string().as_bytes(), "EXPIRE");
    } else {
        conn.out.resp_int(set);
    }
}

// TOUCH key exptime (Memcache semantics for exptime)
pub fn touch(conn: &mut Conn, shared: &Arc<Shared>, args: &Args) {
    if args.len() != 3 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let Some(raw) = args.i64(2) else {
        conn.write_error(ERR_INVALID_INTEGER);
        return;
    };
    let now = time::now_nanos();
    let expires = if raw == 0 {
        0
    } else if raw < 0 {
        now
    } else {
        expiry_offset_to_expires(conn, now, raw.saturating_mul(SECOND))
    };
    let status = shared.cache.load_with(
        args.at(1),
        &LoadOptions {
            time: now,
            ..Default::default()
        },
        |view| {
            Some(Update {
                value: view.value.to_vec(),
                flags: view.flags,
                expires,
            })
        },
    );
    let hit = status == Status::Found;
    match conn.proto() {
        Protocol::Memcache => {
            if hit {
                conn.out.write_raw(b"TOUCHED\r\n");
            } else {
                conn.out.write_raw(b"NOT_FOUND\r\n");
            }
        }
        Protocol::Postgres => {
            pg_simple_row(conn, "touched", i64::from(hit).to_string().as_bytes(), "TOUCH")
        }
        _ => conn.out.resp_int(i64::from(hit)),
    }
}

// INCR key / DECR key
pub fn incr(conn: &mut Conn, shared: &Arc<Shared>, args: &Args, decr: bool, unsigned: bool) {
    if args.len() != 2 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    exec_incr(conn, shared, args.at(1), 1, decr, unsigned);
}

// INCRBY key delta / DECRBY key delta and the unsigned Memcache forms
pub fn incrby(conn: &mut Conn, shared: &Arc<Shared>, args: &Args, decr: bool, unsigned: bool) {
    if args.len() != 3 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let delta = if unsigned {
        args.u64(2).map(|v| v as i64)
    } else {
        args.i64(2)
    };
    let Some(delta) = delta else {
        if conn.proto() == Protocol::Memcache {
            conn.out
                .write_raw(b"CLIENT_ERROR invalid numeric delta argument\r\n");
        } else {
            conn.write_error(ERR_INVALID_INTEGER);
        }
        return;
    };
    exec_incr(conn, shared, args.at(1), delta, decr, unsigned);
}

fn exec_incr(
    conn: &mut Conn,
    shared: &Arc<Shared>,
    key: &[u8],
    delta: i64,
    decr: bool,
    unsigned: bool,
) {
    let now = time::now_nanos();
    let proto = conn.proto();
    let mut batch = shared.cache.begin();

    let mut numeric_i: Option<i64> = None;
    let mut numeric_u: Option<u64> = None;
    let mut bad_value = false;
    let mut expires = 0i64;
    let mut flags = 0u32;
    let status = batch.load_with(
        key,
        &LoadOptions {
            time: now,
            ..Default::default()
        },
        |view| {
            expires = view.expires;
            flags = view.flags;
            match std::str::from_utf8(view.value) {
                Ok(text) if unsigned => match text.parse::<u64>() {
                    Ok(v) => numeric_u = Some(v),
                    Err(_) => bad_value = true,
                },
                Ok(text) => match text.parse::<i64>() {
                    Ok(v) => numeric_i = Some(v),
                    Err(_) => bad_value = true,
                },
                Err(_) => bad_value = true,
            }
            None
        },
    );
    let found = status == Status::Found;
    if found && bad_value {
        if proto == Protocol::Memcache {
            conn.out.write_raw(
                b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n",
            );
        } else {
            conn.write_error(ERR_INVALID_INTEGER);
        }
        return;
    }
    if !found && proto == Protocol::Memcache {
        conn.out.write_raw(b"NOT_FOUND\r\n");
        return;
    }

    // Memcache clamps on overflow; everything else reports an error.
    let clamp = proto == Protocol::Memcache;
    let new_text: String;
    if unsigned {
        let cur = numeric_u.unwrap_or(0);
        let next = if decr {
            if clamp {
                Some(cur.saturating_sub(delta as u64))
            } else {
                cur.checked_sub(delta as u64)
            }
        } else if clamp {
            Some(cur.saturating_add(delta as u64))
        } else {
            cur.checked_add(delta as u64)
        };
        let Some(next) = next else {
            conn.write_error("ERR increment or decrement would overflow");
            return;
        };
        new_text = next.to_string();
    } else {
        let cur = numeric_i.unwrap_or(0);
        let next = if decr {
            if clamp {
                Some(cur.saturating_sub(delta))
            } else {
                cur.checked_sub(delta)
            }
        } else if clamp {
            Some(cur.saturating_add(delta))
        } else {
            cur.checked_add(delta)
        };
        let Some(next) = next else {
            conn.write_error("ERR increment or decrement would overflow");
            return;
        };
        new_text = next.to_string();
    }

    let status = batch.store(
        key,
        new_text.as_bytes(),
        &StoreOptions {
            time: now,
            expires,
            flags,
            lowmem: lowmem(shared),
            ..Default::default()
        },
    );
    batch.end();
    if status == Status::NoMem {
        conn.stats.store_no_memory += 1;
        conn.write_error(ERR_OUT_OF_MEMORY);
        return;
    }
    if proto == Protocol::Postgres {
        let tag = if decr { "DECR" } else { "INCR" };
        pg_simple_row(conn, "value", new_text.as_bytes(), tag);
    } else if proto == Protocol::Memcache {
        conn.out.write_raw(new_text.as_bytes());
        conn.out.write_raw(b"\r\n");
    } else {
        conn.out.resp_int(new_text.parse().unwrap_or(0));
    }
}

// APPEND key value / PREPEND key value
pub fn append(conn: &mut Conn, shared: &Arc<Shared>, args: &Args, prepend: bool) {
    if args.len() != 3 {
        conn.write_error(ERR_WRONG_NUM_ARGS);
        return;
    }
    let now = time::now_nanos();
    let proto = conn.proto();
    let key = args.at(1);
    let extra = args.at(2);
    let mut batch = shared.cache.begin();

    let mut existing: Option<Vec<u8>> = None;
    let mut expires = 0i64;
    let mut flags = 0u32;
    batch.load_with(
        key,
        &LoadOptions {
            time: now,
            ..Default::default()
        },
        |view| {
            existing = Some(view.value.to_vec());
            expires = view.expires;
            flags = view.flags;
            None
        },
    );
    if existing.is_none() && proto == Protocol::Memcache {
        // Memcache append requires the key to exist.
        batch.end();
        conn.out.write_raw(b"NOT_STORED\r\n");
        return;
    }
    let mut value = existing.unwrap_or_default();
    if prepend {
        let mut combined = Vec::with_capacity(extra.len() + value.len());
        combined.extend_from_slice(extra);
        combined.extend_from_slice(&value);
        value = combined;
    } else {
        value.extend_from_slice(extra);
    }
    let status = batch.store(
        key,
        &value,
        &StoreOptions {
            time: now,
            expires,
            flags,
            lowmem: lowmem(shared),
            ..Default::default()
        },
    );
    batch.end();
    if status == Status::NoMem {
        conn.stats.store_no_memory += 1;
        conn.write_error(ERR_OUT_OF_MEMORY);
        return;
    }
    conn.stats.cmd_set += 1;
    match proto {
        Protocol::Memcache => conn.out.write_raw(b"STORED\r\n"),
        Protocol::Postgres => {
            let tag = if prepend { "PREPEND" } else { "APPEND" };
            pg_simple_row(conn, "length", value.len().to_string().as_bytes(), tag);
        }
        _ => conn.out.resp_int(value.len() as i64),
    }
}
