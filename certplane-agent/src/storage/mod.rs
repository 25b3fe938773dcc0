pub mod fs;
pub mod haproxy;
pub mod nginx;
pub mod traefik;

use std::error::Error;
use std::sync::Arc;

use async_channel::Sender;
use async_trait::async_trait;
use certplane_common::fs::FileSystem;
use certplane_common::hook::Hook;
use certplane_common::types::Certificates;

use crate::config::StorageConfig;

pub type StorageErrors = Vec<Box<dyn Error + Send + Sync>>;

/// A certificate materialization target. Both operations return the
/// per-certificate failures instead of aborting on the first one; storages
/// publish their post-hook on the channel when file content changed.
#[async_trait]
pub trait Storage: Send + Sync {
  fn id(&self) -> &str;
  async fn save(&self, certificates: &Certificates, hooks: &Sender<Hook>) -> StorageErrors;
  async fn delete(&self, certificates: &Certificates, hooks: &Sender<Hook>) -> StorageErrors;
}

pub fn create_storages(
  filesystem: Arc<dyn FileSystem>,
  configs: &[StorageConfig],
) -> Result<Vec<Arc<dyn Storage>>, Box<dyn Error + Send + Sync>> {
  let mut storages: Vec<Arc<dyn Storage>> = Vec::new();
  for cfg in configs {
    let storage: Arc<dyn Storage> = match cfg.kind.as_str() {
      fs::FS_KEY => Arc::new(fs::FsStorage::create(filesystem.clone(), cfg)?),
      haproxy::HAPROXY_KEY => Arc::new(haproxy::HaproxyStorage::create(filesystem.clone(), cfg)?),
      traefik::TRAEFIK_KEY => Arc::new(traefik::TraefikStorage::create(filesystem.clone(), cfg)?),
      nginx::NGINX_KEY => Arc::new(nginx::NginxStorage::create(filesystem.clone(), cfg)?),
      kind => {
        return Err(anyhow::anyhow!("config certificate storage type '{kind}' does not exist").into());
      }
    };
    storages.push(storage);
  }
  Ok(storages)
}

#[cfg(test)]
mod tests {
  use super::*;
  use certplane_common::fs::MemoryFs;

  #[test]
  fn test_create_storages() {
    let configs = vec![
      StorageConfig {
        id: "local".to_string(),
        kind: fs::FS_KEY.to_string(),
        config: serde_yaml::from_str("path: /app/certificates\n").unwrap(),
      },
      StorageConfig {
        id: "lb".to_string(),
        kind: haproxy::HAPROXY_KEY.to_string(),
        config: serde_yaml::from_str("path: /etc/haproxy/ssl\n").unwrap(),
      },
    ];
    let storages = create_storages(Arc::new(MemoryFs::new()), &configs).unwrap();
    assert_eq!(2, storages.len());
    assert_eq!("local", storages[0].id());
  }

  #[test]
  fn test_create_storages_unknown_type() {
    let configs = vec![StorageConfig {
      id: "mystery".to_string(),
      kind: "mystery".to_string(),
      config: serde_yaml::Value::Null,
    }];
    assert!(create_storages(Arc::new(MemoryFs::new()), &configs).is_err());
  }
}
