//! Configuration loading from YAML
//!
//! # Configuration File Format
//!
//! ```yaml
//! ingress:
//!   port: 9999
//!
//! fne:
//!   host: 127.0.0.1
//!   port: 62031
//!   password: PASSWORD
//!   peer_id: 9000999
//!
//! gateway:
//!   talkgroup_override: 0   # 0 = use the talkgroup from each ingress frame
//!   source_override: 0      # 0 = use the source id from each ingress frame
//!   call_timeout_ms: 1000
//!
//! log:
//!   level: info
//!   file: ""                # empty = stderr
//! ```
//!
//! Every key is optional and falls back to the default shown above; unknown
//! keys are ignored. A missing or malformed file is not fatal - the gateway
//! runs with defaults.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// OP25 ingress settings
#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    /// UDP port the off-board receiver sends voice frames to
    #[serde(default = "default_ingress_port")]
    pub port: u16,
}

fn default_ingress_port() -> u16 {
    9999
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            port: default_ingress_port(),
        }
    }
}

/// FNE peer settings
#[derive(Debug, Clone, Deserialize)]
pub struct FneConfig {
    #[serde(default = "default_fne_host")]
    pub host: String,

    #[serde(default = "default_fne_port")]
    pub port: u16,

    /// Shared secret for the salted-hash login
    #[serde(default = "default_fne_password")]
    pub password: String,

    /// Peer identifier this gateway registers as
    #[serde(default = "default_peer_id")]
    pub peer_id: u32,
}

fn default_fne_host() -> String {
    "127.0.0.1".to_string()
}

fn default_fne_port() -> u16 {
    62031
}

fn default_fne_password() -> String {
    "PASSWORD".to_string()
}

fn default_peer_id() -> u32 {
    9_000_999
}

impl Default for FneConfig {
    fn default() -> Self {
        Self {
            host: default_fne_host(),
            port: default_fne_port(),
            password: default_fne_password(),
            peer_id: default_peer_id(),
        }
    }
}

/// Call pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Force every call to this talkgroup (0 = disabled)
    #[serde(default)]
    pub talkgroup_override: u32,

    /// Force every call to this source id (0 = disabled)
    #[serde(default)]
    pub source_override: u32,

    /// Idle time after which an active call is terminated
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    1000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            talkgroup_override: 0,
            source_override: 0,
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log filter level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path; empty logs to stderr
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingress: IngressConfig,

    #[serde(default)]
    pub fne: FneConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read config: {}", e)))?;

        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))
    }
}
