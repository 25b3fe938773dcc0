use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use async_channel::Sender;
use async_trait::async_trait;
use certplane_common::fs::FileSystem;
use certplane_common::hook::Hook;
use certplane_common::nginx::parse_config;
use certplane_common::types::Certificates;
use serde::Deserialize;

use crate::config::StorageConfig;
use crate::storage::fs::{validate_config, ConfigFs, FsStorage};
use crate::storage::{Storage, StorageErrors};

pub const NGINX_KEY: &str = "nginx";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigNginx {
  #[serde(flatten)]
  pub fs: ConfigFs,
  pub nginx_cfg_path: PathBuf,
}

/// Writes certificate material into the exact `ssl_certificate` /
/// `ssl_certificate_key` paths parsed from the nginx configuration. Only
/// valid certificates matching a vhost's server names are written; nginx
/// storage never deletes.
pub struct NginxStorage {
  id: String,
  fs: Arc<dyn FileSystem>,
  fs_storage: FsStorage,
  nginx_cfg_path: PathBuf,
}

impl NginxStorage {
  pub fn create(
    fs: Arc<dyn FileSystem>,
    cfg: &StorageConfig,
  ) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let mut config: ConfigNginx = serde_yaml::from_value(cfg.config.clone())
      .map_err(|err| anyhow::anyhow!("storage {}: {err}", cfg.id))?;
    if config.nginx_cfg_path.as_os_str().is_empty() {
      return Err(anyhow::anyhow!("storage {}: nginx_cfg_path must not be empty", cfg.id).into());
    }

    // The write paths come from the vhost configuration, the base path is
    // only used for ownership defaults and validation.
    config.fs.path = config
      .nginx_cfg_path
      .parent()
      .map(|parent| parent.to_path_buf())
      .unwrap_or_else(|| PathBuf::from("/"));
    validate_config(&cfg.id, &config.fs)?;

    Ok(NginxStorage {
      id: cfg.id.clone(),
      fs: fs.clone(),
      fs_storage: FsStorage::new(fs, cfg.id.clone(), config.fs.clone()),
      nginx_cfg_path: config.nginx_cfg_path,
    })
  }
}

#[async_trait]
impl Storage for NginxStorage {
  fn id(&self) -> &str {
    &self.id
  }

  async fn save(&self, certificates: &Certificates, hooks: &Sender<Hook>) -> StorageErrors {
    let mut errors: StorageErrors = Vec::new();
    let vhosts = match parse_config(&*self.fs, &self.nginx_cfg_path) {
      Ok(vhosts) => vhosts,
      Err(err) => return vec![err],
    };

    let mut changed = false;
    for vhost in vhosts {
      let Some(certificate) = certificates.match_domains(&vhost.server_names, true) else {
        continue;
      };

      let key_changed = match self.fs_storage.write_file(&certificate.key, &vhost.key_path) {
        Ok(key_changed) => key_changed,
        Err(err) => {
          errors.push(err);
          continue;
        }
      };
      let cert_changed = match self
        .fs_storage
        .write_file(&certificate.certificate, &vhost.cert_path)
      {
        Ok(cert_changed) => cert_changed,
        Err(err) => {
          errors.push(err);
          continue;
        }
      };
      changed = changed || key_changed || cert_changed;
    }

    if changed {
      if let Some(post_hook) = &self.fs_storage.cfg.post_hook {
        hooks.send(post_hook.clone()).await.unwrap_or_default();
      }
    }
    errors
  }

  async fn delete(&self, _certificates: &Certificates, _hooks: &Sender<Hook>) -> StorageErrors {
    Vec::new()
  }
}
