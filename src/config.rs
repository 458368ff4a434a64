//! Per-registry tunables (spec section 6) plus a `clap`-derived process
//! entry point that layers flags over an optional TOML file over the
//! compiled-in defaults.

use std::time::Duration;

use serde::Deserialize;

/// Runtime tunables for a [`crate::nlm::registry::GlobalRegistry`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds during which only reclaim requests are accepted after start.
    pub grace_period_secs: u64,
    /// Seconds of host inactivity before the host becomes eligible for GC.
    pub cn_idle_tmo_secs: u64,
    /// Client retransmit / grace-wait unit, in seconds.
    pub retrans_tmo_secs: u64,
    /// Attempts to resolve the local SM's transport address at startup.
    pub nsm_rpcbind_retries: u32,
    /// Seconds between SM port-resolution attempts.
    pub nsm_rpcbind_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grace_period_secs: 45,
            cn_idle_tmo_secs: 30,
            retrans_tmo_secs: 5,
            nsm_rpcbind_retries: 10,
            nsm_rpcbind_timeout_secs: 5,
        }
    }
}

impl Config {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.cn_idle_tmo_secs)
    }

    pub fn retrans_timeout(&self) -> Duration {
        Duration::from_secs(self.retrans_tmo_secs)
    }

    pub fn nsm_rpcbind_timeout(&self) -> Duration {
        Duration::from_secs(self.nsm_rpcbind_timeout_secs)
    }

    /// Parses a TOML configuration file, falling back to [`Default`] for any
    /// field the file omits.
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text).map_err(|e| crate::error::Error::Config(e.to_string()))
    }
}

/// Process entry-point CLI, layered on top of an optional `--config` file.
#[derive(Debug, clap::Parser)]
#[command(name = "nlm-core", about = "Network Lock Manager core service")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    #[arg(long)]
    pub grace_period_secs: Option<u64>,

    #[arg(long)]
    pub cn_idle_tmo_secs: Option<u64>,

    #[arg(long)]
    pub retrans_tmo_secs: Option<u64>,
}

impl Cli {
    /// Resolves the effective [`Config`]: compiled-in defaults, overridden
    /// by `--config`'s file (if given), overridden by explicit flags.
    pub fn resolve(&self) -> crate::error::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| crate::error::Error::Config(e.to_string()))?;
                Config::from_toml(&text)?
            }
            None => Config::default(),
        };

        if let Some(v) = self.grace_period_secs {
            config.grace_period_secs = v;
        }
        if let Some(v) = self.cn_idle_tmo_secs {
            config.cn_idle_tmo_secs = v;
        }
        if let Some(v) = self.retrans_tmo_secs {
            config.retrans_tmo_secs = v;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.grace_period_secs, 45);
        assert_eq!(config.cn_idle_tmo_secs, 30);
        assert_eq!(config.retrans_tmo_secs, 5);
        assert_eq!(config.nsm_rpcbind_retries, 10);
        assert_eq!(config.nsm_rpcbind_timeout_secs, 5);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = Config::from_toml("grace_period_secs = 90\n").unwrap();
        assert_eq!(config.grace_period_secs, 90);
        assert_eq!(config.cn_idle_tmo_secs, 30);
    }
}
