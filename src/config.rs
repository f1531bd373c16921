//! Runtime settings
//!
//! Every option can come from a CLI flag or an environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use url::Url;

/// 1 day
const DEFAULT_FRESH_SECS: u64 = 24 * 60 * 60;
/// 2 days
const DEFAULT_MAX_AGE_SECS: u64 = 2 * 24 * 60 * 60;
/// 1 hour
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
/// 64 MiB
const DEFAULT_CLIENT_BUFFER_BYTES: usize = 64 * 1024 * 1024;

/// Command-line arguments for the relay
#[derive(Debug, Clone, Parser)]
#[command(
    name = "drive-relay",
    version,
    about = "Relay remote files (including Google Drive shares) with CORS headers and a disk cache"
)]
pub struct Settings {
    /// Address to listen on
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Cache directory (defaults to the platform cache dir)
    #[arg(long, env = "RELAY_CACHE_DIR", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds a cached file is served without refetching
    #[arg(long, env = "RELAY_FRESH_SECS", default_value_t = DEFAULT_FRESH_SECS)]
    pub fresh_secs: u64,

    /// Seconds after which a cached file is deleted
    #[arg(long, env = "RELAY_MAX_AGE_SECS", default_value_t = DEFAULT_MAX_AGE_SECS)]
    pub max_age_secs: u64,

    /// Seconds between eviction sweeps
    #[arg(long, env = "RELAY_SWEEP_INTERVAL_SECS", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// Upstream connect timeout in seconds
    #[arg(long, env = "RELAY_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    pub connect_timeout_secs: u64,

    /// Longest wait for the next upstream chunk, in seconds
    #[arg(long, env = "RELAY_IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Bytes a client may fall behind the upstream before it is cut off
    #[arg(long, env = "RELAY_CLIENT_BUFFER_BYTES", default_value_t = DEFAULT_CLIENT_BUFFER_BYTES)]
    pub client_buffer_bytes: usize,

    /// Base URL for Google Drive download requests
    #[arg(long, env = "RELAY_DRIVE_BASE_URL", default_value = "https://drive.google.com")]
    pub drive_base_url: Url,

    /// Log filter (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Settings {
    /// Reject combinations the cache cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.fresh_secs == 0 {
            bail!("--fresh-secs must be greater than zero");
        }
        if self.max_age_secs < self.fresh_secs {
            bail!(
                "--max-age-secs ({}) must not be shorter than --fresh-secs ({})",
                self.max_age_secs,
                self.fresh_secs
            );
        }
        if self.sweep_interval_secs == 0 {
            bail!("--sweep-interval-secs must be greater than zero");
        }
        if self.idle_timeout_secs == 0 {
            bail!("--idle-timeout-secs must be greater than zero");
        }
        if self.client_buffer_bytes == 0 {
            bail!("--client-buffer-bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .or_else(|_| format!("[{}]:{}", self.host, self.port).parse())
            .map_err(|e| anyhow!("Invalid listen address {}:{}: {}", self.host, self.port, e))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("drive-relay")
        })
    }

    pub fn fresh_for(&self) -> Duration {
        Duration::from_secs(self.fresh_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
