//! Networking: listeners, connection driving, background offload.

pub mod bgwork;
pub mod conn;
pub mod outbuf;
pub mod server;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::stats::Stats;

pub use conn::Conn;
pub use outbuf::OutBuf;

pub const ERR_OUT_OF_MEMORY: &str = "ERR out of memory";
pub const ERR_WRONG_NUM_ARGS: &str = "ERR wrong number of arguments";
pub const ERR_SYNTAX_ERROR: &str = "ERR syntax error";

/// Context shared by every connection task and worker.
pub struct Shared {
    pub cache: Arc<Cache>,
    /// Configured auth token; when set, commands require AUTH first.
    pub auth: Option<String>,
    /// Set by the memory monitor when RSS exceeds the limit.
    pub lowmem: Arc<AtomicBool>,
    pub stats: Arc<Stats>,
    /// Server start, Unix nanoseconds.
    pub started_at: i64,
    /// Open connection cap; zero means unlimited.
    pub maxconns: usize,
    pub shutdown: CancellationToken,
}
