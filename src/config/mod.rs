// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const PROD: &str = "prod";
#[allow(dead_code)]
pub const DEV: &str = "dev";

/// Top-level config file wrapper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(rename = "cache")]
    pub cache: CacheBox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheBox {
    #[serde(default = "default_env")]
    pub env: String,
    pub logs: Option<Logs>,
    pub server: Option<Server>,
    pub auth: Option<Auth>,
    pub storage: Option<Storage>,
    pub limits: Option<Limits>,
    pub maintenance: Option<Maintenance>,
}

fn default_env() -> String {
    DEV.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Server {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(rename = "unixsock")]
    pub unixsock: Option<String>,
    /// Runtime worker threads; zero means all logical CPUs.
    pub threads: Option<usize>,
    pub backlog: Option<u32>,
    #[serde(rename = "maxconns")]
    pub maxconns: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Auth {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Storage {
    pub shards: Option<usize>,
    #[serde(rename = "loadfactor")]
    pub loadfactor: Option<u8>,
    #[serde(rename = "usecas")]
    pub usecas: Option<bool>,
    #[serde(rename = "nosixpack")]
    pub nosixpack: Option<bool>,
    #[serde(rename = "noevict")]
    pub noevict: Option<bool>,
    #[serde(rename = "allowshrink")]
    pub allowshrink: Option<bool>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Limits {
    /// RSS budget: bytes with an optional kb/mb/gb suffix, or a
    /// percentage of system memory ("80%"). Empty disables the monitor.
    #[serde(rename = "maxmemory")]
    pub maxmemory: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Maintenance {
    #[serde(rename = "sweep_interval", with = "humantime_serde", default)]
    pub sweep_interval: Option<Duration>,
    #[serde(rename = "sweep_threshold")]
    pub sweep_threshold: Option<f64>,
    #[serde(rename = "memory_interval", with = "humantime_serde", default)]
    pub memory_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            cache: CacheBox {
                env: default_env(),
                logs: None,
                server: None,
                auth: None,
                storage: None,
                limits: None,
                maintenance: None,
            },
        }
    }
}

impl Config {
    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(cfg)
    }

    pub fn is_prod(&self) -> bool {
        self.cache.env == PROD
    }

    pub fn log_level(&self) -> &str {
        self.cache
            .logs
            .as_ref()
            .and_then(|logs| logs.level.as_deref())
            .unwrap_or("info")
    }

    pub fn host(&self) -> String {
        self.cache
            .server
            .as_ref()
            .and_then(|s| s.host.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn port(&self) -> u16 {
        self.cache
            .server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(9401)
    }

    pub fn unixsock(&self) -> Option<String> {
        self.cache.server.as_ref().and_then(|s| s.unixsock.clone())
    }

    pub fn threads(&self) -> usize {
        let configured = self.cache.server.as_ref().and_then(|s| s.threads).unwrap_or(0);
        if configured == 0 {
            num_cpus::get().clamp(1, 4096)
        } else {
            configured.clamp(1, 4096)
        }
    }

    pub fn backlog(&self) -> u32 {
        self.cache
            .server
            .as_ref()
            .and_then(|s| s.backlog)
            .unwrap_or(1024)
    }

    pub fn maxconns(&self) -> usize {
        self.cache
            .server
            .as_ref()
            .and_then(|s| s.maxconns)
            .unwrap_or(0)
    }

    pub fn auth_token(&self) -> Option<String> {
        self.cache
            .auth
            .as_ref()
            .and_then(|a| a.token.clone())
            .filter(|t| !t.is_empty())
    }

    pub fn shards(&self) -> usize {
        self.cache
            .storage
            .as_ref()
            .and_then(|s| s.shards)
            .unwrap_or(4096)
    }

    pub fn loadfactor(&self) -> u8 {
        self.cache
            .storage
            .as_ref()
            .and_then(|s| s.loadfactor)
            .unwrap_or(0)
    }

    pub fn usecas(&self) -> bool {
        self.cache
            .storage
            .as_ref()
            .and_then(|s| s.usecas)
            .unwrap_or(true)
    }

    pub fn nosixpack(&self) -> bool {
        self.cache
            .storage
            .as_ref()
            .and_then(|s| s.nosixpack)
            .unwrap_or(false)
    }

    pub fn noevict(&self) -> bool {
        self.cache
            .storage
            .as_ref()
            .and_then(|s| s.noevict)
            .unwrap_or(false)
    }

    pub fn allowshrink(&self) -> bool {
        self.cache
            .storage
            .as_ref()
            .and_then(|s| s.allowshrink)
            .unwrap_or(true)
    }

    pub fn seed(&self) -> u64 {
        self.cache.storage.as_ref().and_then(|s| s.seed).unwrap_or(0)
    }

    /// The RSS limit in bytes; zero disables the memory monitor.
    pub fn memlimit(&self) -> u64 {
        let Some(raw) = self
            .cache
            .limits
            .as_ref()
            .and_then(|l| l.maxmemory.as_deref())
        else {
            return 0;
        };
        parse_memory(raw).unwrap_or(0)
    }

    pub fn sweep_interval(&self) -> Duration {
        self.cache
            .maintenance
            .as_ref()
            .and_then(|m| m.sweep_interval)
            .unwrap_or(Duration::from_secs(1))
    }

    pub fn sweep_threshold(&self) -> f64 {
        self.cache
            .maintenance
            .as_ref()
            .and_then(|m| m.sweep_threshold)
            .unwrap_or(0.20)
    }

    pub fn memory_interval(&self) -> Duration {
        self.cache
            .maintenance
            .as_ref()
            .and_then(|m| m.memory_interval)
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Parses a memory budget: plain bytes, a kb/mb/gb suffix, or a
/// percentage of total system memory.
pub fn parse_memory(raw: &str) -> Option<u64> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw.is_empty() || raw == "0" {
        return Some(0);
    }
    if let Some(pct) = raw.strip_suffix('%') {
        let pct: f64 = pct.trim().parse().ok()?;
        if !(0.0..=100.0).contains(&pct) {
            return None;
        }
        let total = sysinfo::System::new_all().total_memory();
        return Some((total as f64 * pct / 100.0) as u64);
    }
    let (number, scale) = if let Some(n) = raw.strip_suffix("gb") {
        (n, 1024u64 * 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = raw.strip_suffix("kb") {
        (n, 1024)
    } else {
        (raw.as_str(), 1)
    };
    let number: f64 = number.trim().parse().ok()?;
    if number < 0.0 {
        return None;
    }
    Some((number * scale as f64) as u64)
}
