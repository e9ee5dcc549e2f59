//! Command argument vector.

/// Most arguments a single command may carry.
pub const MAX_ARGS: usize = 100_000;

/// Largest single argument, 500 MiB.
pub const MAX_ARG_SIZE: usize = 500 * 1024 * 1024;

/// An ordered list of byte-string arguments produced by the parsers.
#[derive(Debug, Default)]
pub struct Args {
    bufs: Vec<Vec<u8>>,
}

impl Args {
    pub fn new() -> Args {
        Args::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.bufs.push(data.to_vec());
    }

    pub fn push_vec(&mut self, data: Vec<u8>) {
        self.bufs.push(data);
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    pub fn at(&self, idx: usize) -> &[u8] {
        &self.bufs[idx]
    }

    /// Case-insensitive comparison of the argument at `idx` with `s`.
    pub fn eq(&self, idx: usize, s: &str) -> bool {
        match self.bufs.get(idx) {
            Some(arg) => arg.eq_ignore_ascii_case(s.as_bytes()),
            None => false,
        }
    }

    /// The command name: argument zero, lowercased.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.bufs[0]).to_ascii_lowercase()
    }

    pub fn u64(&self, idx: usize) -> Option<u64> {
        std::str::from_utf8(self.bufs.get(idx)?).ok()?.parse().ok()
    }

    pub fn i64(&self, idx: usize) -> Option<i64> {
        std::str::from_utf8(self.bufs.get(idx)?).ok()?.parse().ok()
    }
}
