use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::cache::Cache;
use crate::config::CacheConfig;

#[derive(Debug, Deserialize)]
struct ConfigRedisCluster {
  addresses: Vec<String>,
  #[serde(default)]
  username: Option<String>,
  #[serde(default)]
  password: Option<String>,
}

/// A Redis Cluster cache. Lock and challenge keys are single-key patterns,
/// so no cross-slot operations are involved.
pub struct RedisClusterCache {
  connection: redis::cluster_async::ClusterConnection,
}

impl RedisClusterCache {
  pub fn new(connection: redis::cluster_async::ClusterConnection) -> Self {
    RedisClusterCache { connection }
  }
}

#[async_trait]
impl Cache for RedisClusterCache {
  async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn Error + Send + Sync>> {
    let mut connection = self.connection.clone();
    let value: Option<String> = redis::cmd("GET")
      .arg(key)
      .query_async(&mut connection)
      .await?;
    Ok(value)
  }

  async fn set(
    &self,
    key: &str,
    value: &str,
    expiration: Option<Duration>,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut connection = self.connection.clone();
    let mut command = redis::cmd("SET");
    command.arg(key).arg(value);
    if let Some(expiration) = expiration {
      command.arg("EX").arg(expiration.as_secs().max(1));
    }
    command.query_async::<_, ()>(&mut connection).await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut connection = self.connection.clone();
    redis::cmd("DEL")
      .arg(key)
      .query_async::<_, ()>(&mut connection)
      .await?;
    Ok(())
  }
}

pub async fn create_redis_cluster_cache(
  cfg: &CacheConfig,
) -> Result<Arc<RedisClusterCache>, Box<dyn Error + Send + Sync>> {
  let config: ConfigRedisCluster = serde_yaml::from_value(cfg.config.clone())
    .map_err(|err| anyhow::anyhow!("redis-cluster cache: {err}"))?;
  if config.addresses.is_empty() {
    return Err(anyhow::anyhow!("redis-cluster cache: addresses must not be empty").into());
  }

  let urls: Vec<String> = config
    .addresses
    .iter()
    .map(|address| node_url(&config, address))
    .collect();
  let client = redis::cluster::ClusterClient::new(urls)?;
  let connection = client.get_async_connection().await?;
  Ok(Arc::new(RedisClusterCache::new(connection)))
}

fn node_url(config: &ConfigRedisCluster, address: &str) -> String {
  let credentials = match (&config.username, &config.password) {
    (Some(username), Some(password)) => format!("{username}:{password}@"),
    (None, Some(password)) => format!(":{password}@"),
    (Some(username), None) => format!("{username}@"),
    (None, None) => String::new(),
  };
  format!("redis://{credentials}{address}")
}
