use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use crate::pg::Dsn;

/// Log level that enables debug output
pub const DEBUG_LOGLEVEL: &str = "debug";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_HTTPS_PORT: u16 = 8443;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Connection parameters per node name
    #[serde(default)]
    pub hosts: BTreeMap<String, Dsn>,
    /// Named subsets of `hosts`; `all` is implicit
    #[serde(default, alias = "host_groups")]
    pub groups: BTreeMap<String, Vec<String>>,
    /// Address to bind the HTTP listener to
    #[serde(default)]
    pub bind: String,
    /// Port of the HTTP listener (0 selects the default)
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub loglevel: String,
    /// Also write logs to this file (console output is kept)
    #[serde(default)]
    pub logfile: String,
    /// HTTPS certificate and key; HTTP when unset
    #[serde(default)]
    pub ssl: SslConfig,
    /// Deadline for a single HTTP request, including all node queries it issues
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

// ============================================================================
// TLS Configuration
// ============================================================================

/// Base64 encoded PEM certificate chain and private key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfig {
    #[serde(default)]
    pub b64cert: String,
    #[serde(default)]
    pub b64key: String,
}

impl SslConfig {
    /// HTTPS is served only when both cert and key are set
    pub fn enabled(&self) -> bool {
        !self.b64cert.is_empty() && !self.b64key.is_empty()
    }

    /// Decoded PEM certificate chain
    pub fn cert_pem(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_b64(&self.b64cert)
    }

    /// Decoded PEM private key
    pub fn key_pem(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_b64(&self.b64key)
    }
}

fn decode_b64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = value.split_whitespace().collect();
    base64::engine::general_purpose::STANDARD.decode(compact)
}

// ============================================================================
// Node Pool Configuration
// ============================================================================

/// Connection pool settings, applied to every node
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections per node
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
    /// Timeout for establishing a connection (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_pool_max_size() -> usize {
    2
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: BTreeMap::new(),
            groups: BTreeMap::new(),
            bind: String::new(),
            port: 0,
            loglevel: String::new(),
            logfile: String::new(),
            ssl: SslConfig::default(),
            request_timeout_ms: default_request_timeout_ms(),
            pool: PoolConfig::default(),
        }
    }
}

impl Config {
    /// Get the address string the HTTP listener binds to (bind:port)
    pub fn bind_to(&self) -> String {
        let port = match self.port {
            0 if self.ssl.enabled() => DEFAULT_HTTPS_PORT,
            0 => DEFAULT_HTTP_PORT,
            port => port,
        };
        let bind = if self.bind.is_empty() {
            "localhost"
        } else {
            self.bind.as_str()
        };
        format!("{}:{}", bind, port)
    }

    /// Check if debug logging is configured
    pub fn debug(&self) -> bool {
        self.loglevel == DEBUG_LOGLEVEL
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Directory and file name of the log file, if one is configured
    pub fn log_file(&self) -> Option<(PathBuf, String)> {
        if self.logfile.is_empty() {
            return None;
        }
        let path = Path::new(&self.logfile);
        let name = path.file_name()?.to_string_lossy().into_owned();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Some((dir, name))
    }
}
