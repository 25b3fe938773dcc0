use std::collections::HashSet;
use std::error::Error;
use std::path::Path;
use std::time::Duration;

use certplane_common::config::{serde_duration, HttpConfig, RequesterConfig, StateConfig};
use certplane_common::logging::LogLevel;
use serde::Deserialize;

/// Agent daemon configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
  #[serde(default)]
  pub requesters: Vec<RequesterConfig>,
  pub storages: Vec<StorageConfig>,
  pub state: StateConfig,
  #[serde(default)]
  pub http: HttpConfig,
  pub manager: ManagerConfig,
  #[serde(default = "default_interval", with = "serde_duration")]
  pub interval: Duration,
  #[serde(default = "default_log_level")]
  pub log_level: LogLevel,
}

/// Where and how to reach the controller.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ManagerConfig {
  pub address: String,
  pub token: String,
}

/// A storage backend entry: stable id, backend type and its options.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StorageConfig {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub config: serde_yaml::Value,
}

fn default_interval() -> Duration {
  Duration::from_secs(5 * 60)
}

fn default_log_level() -> LogLevel {
  LogLevel::Info
}

impl AgentConfig {
  pub fn load(path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let content = std::fs::read(path)
      .map_err(|err| anyhow::anyhow!("failed to read config {}: {err}", path.display()))?;
    let config: AgentConfig = serde_yaml::from_slice(&content)
      .map_err(|err| anyhow::anyhow!("failed to parse config {}: {err}", path.display()))?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
    if !self.manager.address.starts_with("http://") && !self.manager.address.starts_with("https://")
    {
      return Err(anyhow::anyhow!("manager.address must be an http(s) URL").into());
    }
    if self.manager.token.is_empty() {
      return Err(anyhow::anyhow!("manager.token must not be empty").into());
    }
    if self.state.kind.is_empty() {
      return Err(anyhow::anyhow!("state.type must not be empty").into());
    }
    if self.storages.is_empty() {
      return Err(anyhow::anyhow!("storages must not be empty").into());
    }

    let mut storage_ids = HashSet::new();
    for storage in &self.storages {
      if storage.id.is_empty() || storage.kind.is_empty() {
        return Err(anyhow::anyhow!("storages entries need both id and type").into());
      }
      if !storage_ids.insert(storage.id.clone()) {
        return Err(anyhow::anyhow!("duplicated storage id '{}'", storage.id).into());
      }
    }

    let mut requester_ids = HashSet::new();
    for requester in &self.requesters {
      if requester.id.is_empty() || requester.kind.is_empty() {
        return Err(anyhow::anyhow!("requesters entries need both id and type").into());
      }
      if !requester_ids.insert(requester.id.clone()) {
        return Err(anyhow::anyhow!("duplicated requester id '{}'", requester.id).into());
      }
    }

    if self.http.tls.enable && self.http.tls.listen.is_empty() {
      return Err(anyhow::anyhow!("http.tls.listen must be set when TLS is enabled").into());
    }

    Ok(())
  }
}
