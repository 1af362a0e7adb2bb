use std::{fmt, str::FromStr, time::Duration};

use serde::Deserialize;

/// Deployment flavour. Only `Release` attaches cpu/memory requests and
/// limits to workspace Pods; `Dev` leaves them unbounded so a small test
/// cluster is not blocked by resource quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Release,
    #[default]
    Dev,
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "release" => Ok(RuntimeMode::Release),
            "dev" => Ok(RuntimeMode::Dev),
            other => Err(format!("unknown runtime mode: {other}")),
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Release => write!(f, "release"),
            RuntimeMode::Dev => write!(f, "dev"),
        }
    }
}

/// Settings threaded into the controller and provisioners at construction.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub mode: RuntimeMode,
    /// Reconciliations allowed to run at once, across different keys.
    pub concurrency: usize,
    /// Interval at which every workspace is re-queued.
    pub resync_period: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::default(),
            concurrency: 8,
            resync_period: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_mode_parsing() {
        assert_eq!("release".parse::<RuntimeMode>(), Ok(RuntimeMode::Release));
        assert_eq!(" Dev ".parse::<RuntimeMode>(), Ok(RuntimeMode::Dev));
        assert!("prod".parse::<RuntimeMode>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.mode, RuntimeMode::Dev);
        assert_eq!(config.concurrency, 8);
    }
}
