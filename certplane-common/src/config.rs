use std::path::PathBuf;

use serde::Deserialize;

/// A requester entry: stable id, adapter type and adapter-specific options.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RequesterConfig {
  pub id: String,
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub config: serde_yaml::Value,
}

/// State persistence backend selection.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct StateConfig {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(default)]
  pub config: serde_yaml::Value,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HttpConfig {
  #[serde(default = "default_listen")]
  pub listen: String,
  #[serde(default)]
  pub metrics_enable: bool,
  #[serde(default)]
  pub tls: TlsConfig,
}

impl Default for HttpConfig {
  fn default() -> Self {
    HttpConfig {
      listen: default_listen(),
      metrics_enable: false,
      tls: TlsConfig::default(),
    }
  }
}

fn default_listen() -> String {
  "0.0.0.0:8080".to_string()
}

/// Optional TLS listener. When enabled, `listen` is the TLS bind address,
/// distinct from the plain HTTP one.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TlsConfig {
  #[serde(default)]
  pub enable: bool,
  #[serde(default)]
  pub listen: String,
  #[serde(default)]
  pub cert: PathBuf,
  #[serde(default)]
  pub key: PathBuf,
}

/// Deserializes `std::time::Duration` from humantime strings ("5m", "14d").
pub mod serde_duration {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer};

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
  }
}

/// Like `serde_duration`, for optional fields.
pub mod serde_duration_opt {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer};

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Option<Duration>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    match value {
      Some(value) => humantime::parse_duration(&value)
        .map(Some)
        .map_err(serde::de::Error::custom),
      None => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[derive(Deserialize)]
  struct Holder {
    #[serde(with = "serde_duration")]
    interval: Duration,
    #[serde(default, with = "serde_duration_opt")]
    timeout: Option<Duration>,
  }

  #[test]
  fn test_serde_duration() {
    let holder: Holder = serde_yaml::from_str("interval: 5m\ntimeout: 30s\n").unwrap();
    assert_eq!(Duration::from_secs(300), holder.interval);
    assert_eq!(Some(Duration::from_secs(30)), holder.timeout);
  }

  #[test]
  fn test_serde_duration_optional_absent() {
    let holder: Holder = serde_yaml::from_str("interval: 14d\n").unwrap();
    assert_eq!(Duration::from_secs(14 * 24 * 3600), holder.interval);
    assert_eq!(None, holder.timeout);
  }

  #[test]
  fn test_serde_duration_invalid() {
    assert!(serde_yaml::from_str::<Holder>("interval: nonsense\n").is_err());
  }

  #[test]
  fn test_http_config_defaults() {
    let config: HttpConfig = serde_yaml::from_str("{}").unwrap();
    assert_eq!("0.0.0.0:8080", config.listen);
    assert!(!config.metrics_enable);
    assert!(!config.tls.enable);
  }

  #[test]
  fn test_requester_config() {
    let config: RequesterConfig = serde_yaml::from_str(
      "id: static-main\ntype: static\nconfig:\n  domains:\n    - [\"example.com\"]\n",
    )
    .unwrap();
    assert_eq!("static-main", config.id);
    assert_eq!("static", config.kind);
  }
}
