//! Wire-level integration cases, driven over real TCP connections.

pub mod support;

mod cases_http_test;
mod cases_memcache_test;
