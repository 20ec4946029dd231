//! logplane.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_RELATION_NAME: &str = "logging";
pub const DEFAULT_TENANT: &str = "fake";
pub const DEFAULT_PUSH_PATH: &str = "/loki/api/v1/push";
pub const DEFAULT_LOKI_PORT: u16 = 3100;
pub const DEFAULT_SYSLOG_PORT: u16 = 1514;

/// Which side of the logging relation this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Consumer,
    Provider,
}

/// How logs leave the workload container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Fetch, verify and supervise a Promtail binary.
    #[default]
    Promtail,
    /// Use the container supervisor's built-in `loki` log targets.
    Native,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogplaneConfig {
    pub role: Role,
    pub relation_name: String,
    pub container_name: Option<String>,
    pub rules: RulesConfig,
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub path: PathBuf,
    pub recursive: bool,
    pub allow_free_standing: bool,
    pub tests_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub mode: AgentMode,
    pub log_files: Vec<String>,
    pub enable_syslog: bool,
    pub syslog_port: u16,
    /// Operator-attached Promtail binary, preferred over any download.
    pub resource_path: Option<PathBuf>,
    /// Local cache for downloaded binaries.
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub port: u16,
    pub external_host: Option<String>,
    pub tenant: String,
    pub rules_root: String,
    pub push_path: String,
    /// Where the local Loki HTTP API listens, for ruler probes.
    pub loki_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub download_secs: u64,
    pub container_secs: u64,
    pub probe_millis: u64,
}

impl Default for LogplaneConfig {
    fn default() -> Self {
        Self {
            role: Role::Consumer,
            relation_name: DEFAULT_RELATION_NAME.to_string(),
            container_name: None,
            rules: RulesConfig::default(),
            agent: AgentConfig::default(),
            provider: ProviderConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("src/loki_alert_rules"),
            recursive: true,
            allow_free_standing: false,
            tests_path: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: AgentMode::Promtail,
            log_files: Vec::new(),
            enable_syslog: false,
            syslog_port: DEFAULT_SYSLOG_PORT,
            resource_path: None,
            cache_dir: PathBuf::from("/var/lib/logplane/bin"),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LOKI_PORT,
            external_host: None,
            tenant: DEFAULT_TENANT.to_string(),
            rules_root: "/loki/rules".to_string(),
            push_path: DEFAULT_PUSH_PATH.to_string(),
            loki_address: format!("127.0.0.1:{DEFAULT_LOKI_PORT}"),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            download_secs: 60,
            container_secs: 30,
            probe_millis: 2000,
        }
    }
}

impl TimeoutsConfig {
    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn container(&self) -> Duration {
        Duration::from_secs(self.container_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_millis)
    }
}

impl LogplaneConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: LogplaneConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relation_name.trim().is_empty() {
            return Err(ConfigError::Invalid("relation_name must not be empty".into()));
        }
        if self.agent.enable_syslog && self.agent.syslog_port == 0 {
            return Err(ConfigError::Invalid("syslog_port must be non-zero".into()));
        }
        if self.provider.tenant.trim().is_empty() || self.provider.tenant.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "tenant {:?} is not a valid directory name",
                self.provider.tenant
            )));
        }
        if !self.provider.push_path.starts_with('/') {
            return Err(ConfigError::Invalid("push_path must start with '/'".into()));
        }
        let t = &self.timeouts;
        if t.download_secs == 0 || t.container_secs == 0 || t.probe_millis == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if let Some(file) = self.agent.log_files.iter().find(|f| !f.starts_with('/')) {
            return Err(ConfigError::Invalid(format!("log file {file} must be absolute")));
        }
        Ok(())
    }

    /// Scaffold a starting config for the given role.
    pub fn scaffold(role: Role) -> Self {
        let mut config = Self {
            role,
            ..Default::default()
        };
        if role == Role::Consumer {
            config.agent.log_files = vec!["/var/log/syslog".to_string()];
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = LogplaneConfig::parse("").unwrap();
        assert_eq!(config, LogplaneConfig::default());
        assert_eq!(config.provider.tenant, "fake");
        assert_eq!(config.timeouts.probe(), Duration::from_secs(2));
    }

    #[test]
    fn parses_consumer_config() {
        let config = LogplaneConfig::parse(
            r#"
role = "consumer"
container_name = "workload"

[agent]
mode = "native"
log_files = ["/var/log/a.log", "/var/log/b.log"]
enable_syslog = true
syslog_port = 1600
"#,
        )
        .unwrap();
        assert_eq!(config.agent.mode, AgentMode::Native);
        assert_eq!(config.agent.log_files.len(), 2);
        assert_eq!(config.agent.syslog_port, 1600);
        assert_eq!(config.container_name.as_deref(), Some("workload"));
    }

    #[test]
    fn rejects_relative_log_file() {
        let err = LogplaneConfig::parse("[agent]\nlog_files = [\"relative.log\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_container_timeout() {
        let err = LogplaneConfig::parse("[timeouts]\ncontainer_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let config = LogplaneConfig::parse("[timeouts]\ncontainer_secs = 10\n").unwrap();
        assert_eq!(config.timeouts.container(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            LogplaneConfig::parse("role = 12"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = LogplaneConfig::scaffold(Role::Provider);
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("provider"));
        assert_eq!(LogplaneConfig::parse(&text).unwrap(), config);
    }
}
