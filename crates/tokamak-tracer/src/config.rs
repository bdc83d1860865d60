//! TOML configuration for the tracing proxy.
//!
//! ```toml
//! [target]
//! schema = "http"
//! host = "127.0.0.1"
//! port = 8545
//!
//! [proxy]
//! port = 9545
//! project_path = "."
//! build_dir = "build/contracts"
//!
//! [chain]
//! clique = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::RpcConfig;
use crate::error::ConfigError;
use crate::replay::ChainRules;

const SCHEMES: [&str; 4] = ["http", "https", "ipc", "tcp"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    pub target: TargetConfig,
    pub proxy: ProxyConfig,
    pub rpc: RpcTomlConfig,
    pub chain: ChainRules,
}

/// Node the proxy forwards to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// One of `http`, `https`, `ipc`, `tcp`.
    pub schema: String,
    pub host: String,
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            schema: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8545,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub project_path: PathBuf,
    /// Artifact directory, relative to `project_path`.
    pub build_dir: PathBuf,
    /// Replay failed transactions before tracing them.
    pub replay: bool,
    /// Accept replays whose gas differs from the receipt.
    pub force: bool,
    pub receipt_poll_attempts: u32,
    pub receipt_poll_interval_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9545,
            project_path: PathBuf::from("."),
            build_dir: PathBuf::from("build/contracts"),
            replay: true,
            force: false,
            receipt_poll_attempts: 200,
            receipt_poll_interval_ms: 500,
        }
    }
}

impl ProxyConfig {
    pub fn artifacts_dir(&self) -> PathBuf {
        self.project_path.join(&self.build_dir)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// RPC client tuning (TOML-friendly, durations in milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcTomlConfig {
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_retries: u32,
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
}

impl Default for RpcTomlConfig {
    fn default() -> Self {
        let defaults = RpcConfig::default();
        Self {
            call_timeout_ms: duration_ms(defaults.call_timeout),
            connect_timeout_ms: duration_ms(defaults.connect_timeout),
            max_retries: defaults.max_retries,
            queue_capacity: defaults.queue_capacity,
            poll_interval_ms: duration_ms(defaults.poll_interval),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl TracerConfig {
    /// `schema://host:port` of the node; `ipc://path` for a local socket.
    pub fn target_url(&self) -> String {
        if self.target.schema == "ipc" {
            return format!("ipc://{}", self.target.host);
        }
        format!(
            "{}://{}:{}",
            self.target.schema, self.target.host, self.target.port
        )
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            call_timeout: Duration::from_millis(self.rpc.call_timeout_ms),
            connect_timeout: Duration::from_millis(self.rpc.connect_timeout_ms),
            max_retries: self.rpc.max_retries,
            queue_capacity: self.rpc.queue_capacity,
            poll_interval: Duration::from_millis(self.rpc.poll_interval_ms),
            ..RpcConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SCHEMES.contains(&self.target.schema.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "target.schema must be one of {SCHEMES:?}, got {:?}",
                self.target.schema
            )));
        }
        if self.target.host.is_empty() {
            return Err(ConfigError::Invalid("target.host must not be empty".to_string()));
        }
        if self.proxy.receipt_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "proxy.receipt_poll_attempts must be > 0".to_string(),
            ));
        }
        if self.rpc.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc.call_timeout_ms must be > 0".to_string()));
        }
        if self.rpc.queue_capacity == 0 {
            return Err(ConfigError::Invalid("rpc.queue_capacity must be > 0".to_string()));
        }
        if let (Some(shanghai), Some(cancun)) = (self.chain.shanghai_time, self.chain.cancun_time) {
            if cancun < shanghai {
                return Err(ConfigError::Invalid(format!(
                    "chain.cancun_time ({cancun}) is before chain.shanghai_time ({shanghai})"
                )));
            }
        }
        Ok(())
    }
}

/// Load a config from an optional TOML file. Without a path the defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<TracerConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(TracerConfig::default());
    };

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        cause: e.to_string(),
    })?;
    let config: TracerConfig =
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = TracerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_url(), "http://127.0.0.1:8545");
        assert_eq!(config.rpc_config().call_timeout, Duration::from_secs(30));
        assert_eq!(config.proxy.receipt_poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: TracerConfig = toml::from_str(
            r#"
            [target]
            schema = "ipc"
            host = "/tmp/geth.ipc"

            [proxy]
            force = true

            [chain]
            clique = true
            london_block = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.target.schema, "ipc");
        assert_eq!(config.target.port, 8545);
        assert_eq!(config.target_url(), "ipc:///tmp/geth.ipc");
        assert!(config.proxy.force);
        assert!(config.proxy.replay);
        assert!(config.chain.clique);
        assert_eq!(config.chain.london_block, Some(100));
        assert_eq!(config.chain.cancun_time, Some(0));
        assert_eq!(
            config.proxy.artifacts_dir(),
            PathBuf::from("./build/contracts")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = TracerConfig::default();
        config.target.schema = "ws".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = TracerConfig::default();
        config.proxy.receipt_poll_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = TracerConfig::default();
        config.chain.shanghai_time = Some(10);
        config.chain.cancun_time = Some(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracer.toml");
        std::fs::write(&path, "[proxy]\nport = 7000\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().proxy.port, 7000);

        std::fs::write(&path, "[proxy\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Parse(_))));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(load_config(Some(&missing)), Err(ConfigError::Read { .. })));
        assert_eq!(load_config(None).unwrap(), TracerConfig::default());
    }
}
