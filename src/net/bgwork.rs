//! Background offload for long-running commands.
//!
//! A command that would stall the connection's processing loop (full
//! scans, bulk clears, debug population) hands a closure to the blocking
//! pool and suspends its connection task until the result is back. While
//! suspended the task reads no further input, so the connection is
//! effectively detached from the read side and reattaches when the work
//! completes; it still belongs to exactly one task throughout.

use tokio::task;

use super::conn::Conn;

/// Runs `work` off-loop and resumes with its result. Returns `None` when
/// the connection is closed or already detached, or when the worker
/// panicked.
pub async fn bgwork<T, F>(conn: &mut Conn, work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if conn.closed || conn.bg {
        return None;
    }
    conn.bg = true;
    let result = task::spawn_blocking(work).await.ok();
    conn.bg = false;
    result
}
