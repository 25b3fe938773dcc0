pub mod memory;
pub mod redis;
pub mod redis_cluster;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::CacheConfig;

pub const MEMORY_KEY: &str = "memory";
pub const REDIS_KEY: &str = "redis";
pub const REDIS_CLUSTER_KEY: &str = "redis-cluster";

/// The shared KV cache behind the distributed lock and the HTTP-01
/// challenge store. `get` distinguishes "key not present" (`None`) from
/// backend failures.
#[async_trait]
pub trait Cache: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>>;
  async fn set(
    &self,
    key: &str,
    value: &str,
    expiration: Option<Duration>,
  ) -> Result<(), Box<dyn Error + Send + Sync>>;
  async fn delete(&self, key: &str) -> Result<(), Box<dyn Error + Send + Sync>>;
}

pub async fn create_cache(
  cfg: &CacheConfig,
) -> Result<Arc<dyn Cache>, Box<dyn Error + Send + Sync>> {
  match cfg.kind.as_str() {
    MEMORY_KEY => Ok(memory::create_memory_cache(cfg)?),
    REDIS_KEY => Ok(redis::create_redis_cache(cfg).await?),
    REDIS_CLUSTER_KEY => Ok(redis_cluster::create_redis_cluster_cache(cfg).await?),
    kind => Err(anyhow::anyhow!("config cache type '{kind}' does not exist").into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_create_cache_memory() {
    let cfg = CacheConfig {
      kind: MEMORY_KEY.to_string(),
      config: serde_yaml::Value::Null,
    };
    let cache = create_cache(&cfg).await.unwrap();
    cache.set("key", "value", None).await.unwrap();
    assert_eq!(Some("value".to_string()), cache.get("key").await.unwrap());
  }

  #[tokio::test]
  async fn test_create_cache_unknown_type() {
    let cfg = CacheConfig {
      kind: "memcached".to_string(),
      config: serde_yaml::Value::Null,
    };
    assert!(create_cache(&cfg).await.is_err());
  }
}
