use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::cache::Cache;
use crate::config::CacheConfig;

#[derive(Debug, Deserialize)]
struct ConfigMemory {
  #[serde(
    default = "default_expiration",
    with = "certplane_common::config::serde_duration"
  )]
  default_expiration: Duration,
  #[serde(
    default = "default_cleanup_interval",
    with = "certplane_common::config::serde_duration"
  )]
  cleanup_interval: Duration,
}

fn default_expiration() -> Duration {
  Duration::from_secs(5 * 60)
}

fn default_cleanup_interval() -> Duration {
  Duration::from_secs(10 * 60)
}

impl Default for ConfigMemory {
  fn default() -> Self {
    ConfigMemory {
      default_expiration: default_expiration(),
      cleanup_interval: default_cleanup_interval(),
    }
  }
}

/// An in-process cache with lease expiration. Entries expire lazily on
/// read, plus a periodic sweep.
pub struct MemoryCache {
  entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
  default_expiration: Option<Duration>,
}

impl MemoryCache {
  pub fn new(default_expiration: Option<Duration>) -> Self {
    MemoryCache {
      entries: Mutex::new(HashMap::new()),
      default_expiration,
    }
  }

  async fn cleanup(&self) {
    let now = Instant::now();
    self
      .entries
      .lock()
      .await
      .retain(|_, (_, deadline)| deadline.map_or(true, |deadline| deadline > now));
  }
}

#[async_trait]
impl Cache for MemoryCache {
  async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
    let mut entries = self.entries.lock().await;
    let Some((value, deadline)) = entries.get(key) else {
      return Ok(None);
    };
    if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
      entries.remove(key);
      return Ok(None);
    }
    Ok(Some(value.clone()))
  }

  async fn set(
    &self,
    key: &str,
    value: &str,
    expiration: Option<Duration>,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let expiration = expiration.or(self.default_expiration);
    let deadline = expiration.map(|expiration| Instant::now() + expiration);
    self
      .entries
      .lock()
      .await
      .insert(key.to_string(), (value.to_string(), deadline));
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    self.entries.lock().await.remove(key);
    Ok(())
  }
}

pub fn create_memory_cache(
  cfg: &CacheConfig,
) -> Result<Arc<MemoryCache>, Box<dyn Error + Send + Sync>> {
  let config: ConfigMemory = if cfg.config.is_null() {
    ConfigMemory::default()
  } else {
    serde_yaml::from_value(cfg.config.clone())
      .map_err(|err| anyhow::anyhow!("memory cache: {err}"))?
  };

  let cache = Arc::new(MemoryCache::new(Some(config.default_expiration)));

  let sweeper = cache.clone();
  let cleanup_interval = config.cleanup_interval;
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(cleanup_interval);
    interval.tick().await;
    loop {
      interval.tick().await;
      sweeper.cleanup().await;
    }
  });

  Ok(cache)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_set_get_delete() {
    let cache = MemoryCache::new(None);
    assert_eq!(None, cache.get("key").await.unwrap());

    cache.set("key", "value", None).await.unwrap();
    assert_eq!(Some("value".to_string()), cache.get("key").await.unwrap());

    cache.delete("key").await.unwrap();
    assert_eq!(None, cache.get("key").await.unwrap());
  }

  #[tokio::test]
  async fn test_delete_missing_key_is_ok() {
    let cache = MemoryCache::new(None);
    assert!(cache.delete("missing").await.is_ok());
  }

  #[tokio::test]
  async fn test_expiration() {
    let cache = MemoryCache::new(None);
    cache
      .set("key", "value", Some(Duration::from_millis(20)))
      .await
      .unwrap();
    assert_eq!(Some("value".to_string()), cache.get("key").await.unwrap());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(None, cache.get("key").await.unwrap());
  }

  #[tokio::test]
  async fn test_cleanup_sweeps_expired_entries() {
    let cache = MemoryCache::new(None);
    cache
      .set("key", "value", Some(Duration::from_millis(10)))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    cache.cleanup().await;
    assert!(cache.entries.lock().await.is_empty());
  }

  #[tokio::test]
  async fn test_default_expiration_applies() {
    let cache = MemoryCache::new(Some(Duration::from_millis(20)));
    cache.set("key", "value", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(None, cache.get("key").await.unwrap());
  }
}
