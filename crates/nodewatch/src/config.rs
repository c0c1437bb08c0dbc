//! File-based monitoring configuration.

use serde::Deserialize;
use std::{
    fs,
    path::Path,
    str::FromStr,
    time::Duration,
};

/// Fallback interval when `check_second` is absent or non-positive.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_WS_ENDPOINT: &str = "/websocket";

/// Configuration loaded from a YAML file, one list of node entries per
/// protocol family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub evm: Vec<EvmNodeConfig>,
    #[serde(default)]
    pub cometbft: Vec<CometbftNodeConfig>,
}

impl MonitorConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("Failed to read {}: {e}", path.display())))?;

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn node_count(&self) -> usize {
        self.evm.len() + self.cometbft.len()
    }
}

impl FromStr for MonitorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {e}")))
    }
}

/// One EVM node entry. All fields are defaulted so a malformed entry still
/// deserializes and can be skipped with a warning instead of failing the
/// whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EvmNodeConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub chain_name: String,
    #[serde(default)]
    pub protocol_name: String,
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub node_version: String,
    #[serde(default)]
    pub http_url: String,
    #[serde(default)]
    pub ws_url: String,
    #[serde(default)]
    pub check_second: i64,
    #[serde(default)]
    pub jitter_second: u64,
}

impl EvmNodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(&self.hostname, &self.hostname, "hostname")?;
        require_field(&self.chain_name, &self.hostname, "chain_name")?;
        require_field(&self.http_url, &self.hostname, "http_url")?;
        Ok(())
    }

    pub fn protocol_name(&self) -> &str {
        if self.protocol_name.is_empty() {
            "evm"
        } else {
            &self.protocol_name
        }
    }

    pub fn check_interval(&self) -> Duration {
        check_interval(self.check_second)
    }

    pub fn jitter(&self) -> Option<Duration> {
        jitter(self.jitter_second)
    }
}

/// One CometBFT node entry. Same skip-and-warn defaulting as [`EvmNodeConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CometbftNodeConfig {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub chain_name: String,
    #[serde(default)]
    pub protocol_name: String,
    #[serde(default)]
    pub chain_id: String,
    #[serde(default)]
    pub node_version: String,
    #[serde(default)]
    pub http_url: String,
    #[serde(default)]
    pub ws_endpoint: String,
    #[serde(default)]
    pub check_second: i64,
    #[serde(default)]
    pub jitter_second: u64,
}

impl CometbftNodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(&self.hostname, &self.hostname, "hostname")?;
        require_field(&self.chain_name, &self.hostname, "chain_name")?;
        require_field(&self.http_url, &self.hostname, "http_url")?;
        Ok(())
    }

    pub fn protocol_name(&self) -> &str {
        if self.protocol_name.is_empty() {
            "cometbft"
        } else {
            &self.protocol_name
        }
    }

    pub fn ws_endpoint(&self) -> &str {
        if self.ws_endpoint.is_empty() {
            DEFAULT_WS_ENDPOINT
        } else {
            &self.ws_endpoint
        }
    }

    pub fn check_interval(&self) -> Duration {
        check_interval(self.check_second)
    }

    pub fn jitter(&self) -> Option<Duration> {
        jitter(self.jitter_second)
    }
}

/// Coerce a configured interval to a positive duration.
pub fn check_interval(check_second: i64) -> Duration {
    if check_second <= 0 {
        DEFAULT_CHECK_INTERVAL
    } else {
        Duration::from_secs(check_second as u64)
    }
}

fn jitter(jitter_second: u64) -> Option<Duration> {
    if jitter_second == 0 {
        None
    } else {
        Some(Duration::from_secs(jitter_second))
    }
}

fn require_field(value: &str, hostname: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::MissingField {
            hostname: hostname.to_string(),
            field,
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Read(String),
    #[error("{0}")]
    Parse(String),
    #[error("node entry {hostname:?} is missing required field {field}")]
    MissingField {
        hostname: String,
        field: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
evm:
  - hostname: mainnet-01
    chain_name: ethereum
    http_url: https://rpc.example.com
    ws_url: wss://rpc.example.com/ws
    check_second: 10
cometbft:
  - hostname: story-01
    chain_name: story
    protocol_name: cometbft
    http_url: https://story.example.com:26657
"#;

    #[test]
    fn parses_both_protocol_families() {
        let config: MonitorConfig = SAMPLE.parse().expect("parse sample config");
        assert_eq!(config.evm.len(), 1);
        assert_eq!(config.cometbft.len(), 1);
        assert_eq!(config.node_count(), 2);

        let evm = &config.evm[0];
        assert_eq!(evm.hostname, "mainnet-01");
        assert_eq!(evm.check_interval(), Duration::from_secs(10));
        assert_eq!(evm.protocol_name(), "evm");
        assert!(evm.validate().is_ok());

        let cometbft = &config.cometbft[0];
        assert_eq!(cometbft.ws_endpoint(), "/websocket");
        assert_eq!(cometbft.check_interval(), DEFAULT_CHECK_INTERVAL);
        assert!(cometbft.validate().is_ok());
    }

    #[test]
    fn zero_check_second_falls_back_to_five_seconds() {
        let config: MonitorConfig = r#"
evm:
  - hostname: h
    chain_name: c
    http_url: http://x
    check_second: 0
"#
        .parse()
        .expect("parse config");
        assert_eq!(config.evm[0].check_interval(), Duration::from_secs(5));
    }

    #[test]
    fn negative_check_second_falls_back_to_five_seconds() {
        assert_eq!(check_interval(-3), Duration::from_secs(5));
    }

    #[test]
    fn missing_required_field_fails_validation_not_parsing() {
        let config: MonitorConfig = r#"
evm:
  - chain_name: ethereum
    http_url: http://x
"#
        .parse()
        .expect("entry without hostname should still deserialize");

        let err = config.evm[0].validate().expect_err("validation should fail");
        assert!(matches!(
            err,
            ConfigError::MissingField {
                field: "hostname",
                ..
            }
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write config");

        let config = MonitorConfig::from_file(file.path()).expect("load config");
        assert_eq!(config.node_count(), 2);
    }

    #[test]
    fn unreadable_file_reports_read_error() {
        let err = MonitorConfig::from_file("/nonexistent/config.yaml")
            .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Read(_)));
    }

    #[test]
    fn invalid_yaml_reports_parse_error() {
        let err = "evm: {not a list"
            .parse::<MonitorConfig>()
            .expect_err("broken yaml should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
