use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::path::Path;
use std::time::Duration;

use certplane_common::config::{serde_duration, HttpConfig, RequesterConfig, StateConfig};
use certplane_common::logging::LogLevel;
use serde::Deserialize;

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Controller daemon configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
  #[serde(default)]
  pub requesters: Vec<RequesterConfig>,
  pub acme: AcmeConfig,
  pub state: StateConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub http: HttpConfig,
  pub jwt: JwtConfig,
  #[serde(default = "default_interval", with = "serde_duration")]
  pub interval: Duration,
  #[serde(default = "default_lock_duration", with = "serde_duration")]
  pub lock_duration: Duration,
  #[serde(default = "default_unused_retention", with = "serde_duration")]
  pub unused_retention: Duration,
  #[serde(default = "default_log_level")]
  pub log_level: LogLevel,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AcmeConfig {
  #[serde(default = "default_ca_server")]
  pub ca_server: String,
  pub email: String,
  #[serde(default)]
  pub resolvers: HashMap<String, ResolverConfig>,
  #[serde(default = "default_renew_period", with = "serde_duration")]
  pub renew_period: Duration,
  #[serde(default = "default_max_attempt")]
  pub max_attempt: u32,
  #[serde(default = "default_delay_failed", with = "serde_duration")]
  pub delay_failed: Duration,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResolverConfig {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub config: serde_yaml::Value,
  pub filters: Vec<String>,
  #[serde(default = "default_propagation", with = "serde_duration")]
  pub propagation: Duration,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheConfig {
  #[serde(rename = "type", default = "default_cache_type")]
  pub kind: String,
  #[serde(default)]
  pub config: serde_yaml::Value,
}

impl Default for CacheConfig {
  fn default() -> Self {
    CacheConfig {
      kind: default_cache_type(),
      config: serde_yaml::Value::Null,
    }
  }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct JwtConfig {
  pub key: String,
  #[serde(default = "default_jwt_method")]
  pub method: String,
}

fn default_interval() -> Duration {
  Duration::from_secs(5 * 60)
}

fn default_lock_duration() -> Duration {
  Duration::from_secs(25 * 60)
}

fn default_unused_retention() -> Duration {
  Duration::from_secs(14 * 24 * 3600)
}

fn default_log_level() -> LogLevel {
  LogLevel::Info
}

fn default_ca_server() -> String {
  LETS_ENCRYPT_PRODUCTION.to_string()
}

fn default_renew_period() -> Duration {
  Duration::from_secs(10 * 24 * 3600)
}

fn default_max_attempt() -> u32 {
  3
}

fn default_delay_failed() -> Duration {
  Duration::from_secs(24 * 3600)
}

fn default_propagation() -> Duration {
  Duration::from_secs(30)
}

fn default_cache_type() -> String {
  "memory".to_string()
}

fn default_jwt_method() -> String {
  "HS256".to_string()
}

impl Default for AcmeConfig {
  fn default() -> Self {
    AcmeConfig {
      ca_server: default_ca_server(),
      email: String::new(),
      resolvers: HashMap::new(),
      renew_period: default_renew_period(),
      max_attempt: default_max_attempt(),
      delay_failed: default_delay_failed(),
    }
  }
}

impl Default for ServerConfig {
  fn default() -> Self {
    ServerConfig {
      requesters: Vec::new(),
      acme: AcmeConfig::default(),
      state: StateConfig::default(),
      cache: CacheConfig::default(),
      http: HttpConfig::default(),
      jwt: JwtConfig {
        key: String::new(),
        method: default_jwt_method(),
      },
      interval: default_interval(),
      lock_duration: default_lock_duration(),
      unused_retention: default_unused_retention(),
      log_level: default_log_level(),
    }
  }
}

impl ServerConfig {
  pub fn load(path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let content = std::fs::read(path)
      .map_err(|err| anyhow::anyhow!("failed to read config {}: {err}", path.display()))?;
    let config: ServerConfig = serde_yaml::from_slice(&content)
      .map_err(|err| anyhow::anyhow!("failed to parse config {}: {err}", path.display()))?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
    if self.acme.email.is_empty() || !self.acme.email.contains('@') {
      return Err(anyhow::anyhow!("acme.email must be a valid email address").into());
    }
    if self.jwt.key.is_empty() {
      return Err(anyhow::anyhow!("jwt.key must not be empty").into());
    }
    if self.acme.max_attempt < 1 {
      return Err(anyhow::anyhow!("acme.max_attempt must be at least 1").into());
    }
    if self.state.kind.is_empty() {
      return Err(anyhow::anyhow!("state.type must not be empty").into());
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

    for (id, resolver) in &self.acme.resolvers {
      if resolver.filters.is_empty() {
        return Err(anyhow::anyhow!("acme resolver '{id}' needs at least one filter").into());
      }
    }

    if self.http.tls.enable && self.http.tls.listen.is_empty() {
      return Err(anyhow::anyhow!("http.tls.listen must be set when TLS is enabled").into());
    }

    Ok(())
  }
}
