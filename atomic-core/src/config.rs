use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent::Agent;
use crate::error::AtomicError;

pub const DEFAULT_SERVER_URL: &str = "https://atomicdata.dev";
pub const ENV_SERVER_URL: &str = "ATOMIC_SERVER_URL";
pub const ENV_AGENT_SECRET: &str = "ATOMIC_AGENT_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid agent secret: {0}")]
    InvalidAgentSecret(AtomicError),
}

impl From<ConfigError> for AtomicError {
    fn from(e: ConfigError) -> Self {
        AtomicError::Config(e.to_string())
    }
}

/// Settings for a [`Store`](crate::Store), read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub server_url: String,
    /// Base64 agent secret, see [`Agent::from_secret`].
    pub agent_secret: Option<String>,
    /// Open a push channel once a connector is attached.
    pub push_channel: bool,
    /// Check pushed commits against their signer's public key.
    pub verify_remote_commits: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            agent_secret: None,
            push_channel: true,
            verify_remote_commits: true,
        }
    }
}

impl StoreConfig {
    /// Decodes the configured agent, if any.
    pub fn agent(&self) -> Result<Option<Agent>, ConfigError> {
        self.agent_secret
            .as_deref()
            .map(Agent::from_secret)
            .transpose()
            .map_err(ConfigError::InvalidAgentSecret)
    }
}

/// `<config dir>/atomic/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("atomic").join("config.toml"))
}

/// Loads the config file, then applies `ATOMIC_*` environment overrides.
///
/// A missing file yields the defaults. A malformed one is an error.
pub fn load_config() -> Result<StoreConfig, ConfigError> {
    let config = match config_path() {
        Some(path) => load_config_from(&path)?,
        None => StoreConfig::default(),
    };
    let config = apply_env_overrides(config, |name| std::env::var(name).ok());
    config.agent()?;
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<StoreConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Overrides settings from the environment, read through `lookup`.
/// Empty values are ignored.
pub fn apply_env_overrides(
    mut config: StoreConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> StoreConfig {
    let non_empty = |name| lookup(name).filter(|v: &String| !v.is_empty());
    if let Some(url) = non_empty(ENV_SERVER_URL) {
        config.server_url = url;
    }
    if let Some(secret) = non_empty(ENV_AGENT_SECRET) {
        config.agent_secret = Some(secret);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert!(config.push_channel);
    }

    #[test]
    fn reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "server_url = \"http://localhost:9883\"\nverify_remote_commits = false\n",
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.server_url, "http://localhost:9883");
        assert!(!config.verify_remote_commits);
        assert!(config.push_channel);
        assert_eq!(config.agent_secret, None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_url = [").unwrap();
        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn environment_wins_over_file() {
        let env: HashMap<&str, &str> = [
            (ENV_SERVER_URL, "https://env.example"),
            (ENV_AGENT_SECRET, ""),
        ]
        .into_iter()
        .collect();
        let config = apply_env_overrides(StoreConfig::default(), |name| {
            env.get(name).map(|v| v.to_string())
        });
        assert_eq!(config.server_url, "https://env.example");
        assert_eq!(config.agent_secret, None);
    }

    #[test]
    fn agent_secret_is_decoded() {
        let agent = Agent::generate(Some("https://example.com/agents/me".into()));
        let config = StoreConfig {
            agent_secret: Some(agent.to_secret()),
            ..Default::default()
        };
        assert_eq!(config.agent().unwrap(), Some(agent));

        let broken = StoreConfig {
            agent_secret: Some("garbage".into()),
            ..Default::default()
        };
        assert!(matches!(broken.agent(), Err(ConfigError::InvalidAgentSecret(_))));
    }
}
