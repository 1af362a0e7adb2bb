use std::time::Duration;

use anyhow::{anyhow, ensure};
use ide_operator::{OperatorConfig, RuntimeMode};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// `release` or `dev`.
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

fn default_bind_addr() -> String {
    std::env::var("IDE_API_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn default_mode() -> String {
    std::env::var("IDE_MODE").unwrap_or_else(|_| "dev".to_string())
}

fn default_concurrency() -> usize {
    std::env::var("IDE_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8)
}

fn default_resync_interval() -> u64 {
    std::env::var("IDE_RESYNC_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300) // 5 minutes
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            mode: default_mode(),
            concurrency: default_concurrency(),
            resync_interval_secs: default_resync_interval(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn operator(&self) -> anyhow::Result<OperatorConfig> {
        let mode: RuntimeMode = self.mode.parse().map_err(|e: String| anyhow!(e))?;
        ensure!(self.concurrency > 0, "IDE_CONCURRENCY must be at least 1");
        ensure!(self.resync_interval_secs > 0, "IDE_RESYNC_SECS must be at least 1");
        Ok(OperatorConfig {
            mode,
            concurrency: self.concurrency,
            resync_period: Duration::from_secs(self.resync_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_config_from_settings() {
        let config = Config {
            bind_addr: "127.0.0.1:0".into(),
            mode: "release".into(),
            concurrency: 4,
            resync_interval_secs: 60,
        };
        let operator = config.operator().unwrap();
        assert_eq!(operator.mode, RuntimeMode::Release);
        assert_eq!(operator.concurrency, 4);
        assert_eq!(operator.resync_period, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let config = Config {
            mode: "staging".into(),
            ..Config::default()
        };
        assert!(config.operator().is_err());
    }

    #[test]
    fn test_zero_resync_and_concurrency_are_rejected() {
        let config = Config {
            resync_interval_secs: 0,
            ..Config::default()
        };
        let err = config.operator().unwrap_err();
        assert!(err.to_string().contains("IDE_RESYNC_SECS"));

        let config = Config {
            concurrency: 0,
            ..Config::default()
        };
        let err = config.operator().unwrap_err();
        assert!(err.to_string().contains("IDE_CONCURRENCY"));
    }
}
