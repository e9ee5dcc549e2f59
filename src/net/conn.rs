//! Connection state and response plumbing.

use crate::proto::postgres::PgReply;
use crate::proto::{Pg, Protocol};
use crate::stats::ConnStats;

use super::outbuf::OutBuf;

pub const HELP_TEXT: &str = "hotcache\r\n\
\r\n\
GET /<key>            fetch a value\r\n\
PUT /<key> <body>     store a value (query: ex|ttl, flags, cas, xx, nx)\r\n\
DELETE /<key>         delete a value\r\n\
\r\n\
Also speaks RESP, Memcache text, and the Postgres wire protocol\r\n\
on this same port.\r\n";

pub const HELP_HTML: &str = "<!DOCTYPE html>\n<html>\n<head><title>hotcache</title></head>\n\
<body>\n<h1>hotcache</h1>\n<p>A multi-protocol in-memory cache.</p>\n<pre>\n\
GET /&lt;key&gt;            fetch a value\n\
PUT /&lt;key&gt; &lt;body&gt;     store a value (query: ex|ttl, flags, cas, xx, nx)\n\
DELETE /&lt;key&gt;         delete a value\n</pre>\n\
<p>Also speaks RESP, Memcache text, and the Postgres wire protocol.</p>\n\
</body>\n</html>\n";

/// Per-connection state, owned by the connection task.
pub struct Conn {
    pub out: OutBuf,
    pub proto: Option<Protocol>,
    /// User passed authentication.
    pub auth_ok: bool,
    /// Memcache asked for no reply to the current command.
    pub noreply: bool,
    /// Postgres state, created when the protocol is sniffed.
    pub pg: Option<Pg>,
    pub closed: bool,
    /// Detached into background work.
    pub bg: bool,
    pub stats: ConnStats,
}

impl Conn {
    pub fn new() -> Conn {
        Conn {
            out: OutBuf::new(),
            proto: None,
            auth_ok: false,
            noreply: false,
            pg: None,
            closed: false,
            bg: false,
            stats: ConnStats::default(),
        }
    }

    pub fn proto(&self) -> Protocol {
        self.proto.unwrap_or(Protocol::Resp)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Writes an error in the connection's wire dialect. Inputs follow
    /// the `ERR ...` convention; special marker messages map to HTTP
    /// pages and statuses.
    pub fn write_error(&mut self, err: &str) {
        let server_class = err == super::ERR_OUT_OF_MEMORY;
        match self.proto() {
            Protocol::Memcache => {
                if let Some(rest) = err.strip_prefix("ERR ") {
                    if server_class {
                        self.out.write_raw(format!("SERVER_ERROR {}\r\n", rest).as_bytes());
                    } else {
                        self.out.write_raw(format!("CLIENT_ERROR {}\r\n", rest).as_bytes());
                    }
                } else if err.starts_with("NOAUTH") {
                    self.out
                        .write_raw(b"CLIENT_ERROR Authentication required\r\n");
                } else if err.starts_with("CLIENT_ERROR ") || err.starts_with("SERVER_ERROR ") {
                    self.out.write_raw(format!("{}\r\n", err).as_bytes());
                } else {
                    self.out.write_raw(b"ERROR\r\n");
                }
            }
            Protocol::Postgres => {
                let msg = err.strip_prefix("ERR ").unwrap_or(err);
                self.out.pg_error(msg);
                self.out.pg_ready();
            }
            Protocol::Http => {
                let msg = err.strip_prefix("ERR ").unwrap_or(err);
                match msg {
                    "Show Help HTML" => {
                        self.out
                            .http_response_typed(200, "OK", "text/html", HELP_HTML.as_bytes())
                    }
                    "Show Help TEXT" => self.out.http_response(200, "OK", HELP_TEXT.as_bytes()),
                    "Method Not Allowed" => {
                        self.out
                            .http_response(405, "Method Not Allowed", b"Method Not Allowed\r\n")
                    }
                    "Unauthorized" => {
                        self.out.http_response(401, "Unauthorized", b"Unauthorized\r\n")
                    }
                    "Bad Request" | "Invalid Key" => {
                        self.out.http_response(400, "Bad Request", b"Bad Request\r\n")
                    }
                    msg if msg.starts_with("NOAUTH") => {
                        self.out.http_response(401, "Unauthorized", b"Unauthorized\r\n")
                    }
                    msg => {
                        let body = format!("ERR {}\r\n", msg);
                        self.out.http_response(
                            500,
                            "Internal Server Error",
                            body.as_bytes(),
                        )
                    }
                }
            }
            Protocol::Resp => self.out.resp_error(err),
        }
    }

    /// Drains queued Postgres handshake replies onto the wire. Returns
    /// `false` when the connection must close.
    pub fn flush_pg_replies(&mut self) -> bool {
        let Some(pg) = self.pg.as_mut() else {
            return true;
        };
        let mut keep_open = true;
        for reply in pg.replies.drain(..) {
            match reply {
                PgReply::SslRefuse => self.out.pg_ssl_refuse(),
                PgReply::AuthCleartext => self.out.pg_auth_cleartext(),
                PgReply::AuthOk => {
                    // The handshake settled authentication for this
                    // connection; the dispatcher must not gate it again.
                    self.auth_ok = true;
                    self.out.pg_auth_ok();
                    self.out.pg_parameter_status("server_version", "16.0");
                    self.out.pg_parameter_status("client_encoding", "UTF8");
                    self.out.pg_ready();
                }
                PgReply::Ready => self.out.pg_ready(),
                PgReply::EmptyQuery => {
                    self.out.pg_empty_query();
                    self.out.pg_ready();
                }
                PgReply::Error(msg) => {
                    self.out.pg_error(&msg);
                    self.out.pg_ready();
                }
                PgReply::Fatal(msg) => {
                    self.out.pg_error(&msg);
                    keep_open = false;
                }
                PgReply::Terminate => keep_open = false,
            }
        }
        keep_open
    }
}

impl Default for Conn {
    fn default() -> Conn {
        Conn::new()
    }
}
