use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use async_channel::Sender;
use async_trait::async_trait;
use certplane_common::fs::dir::mkdir_all_with_chown;
use certplane_common::fs::FileSystem;
use certplane_common::hook::Hook;
use certplane_common::types::Certificates;
use serde::Deserialize;

use crate::config::StorageConfig;
use crate::storage::fs::{validate_config, ConfigFs, FsStorage};
use crate::storage::{Storage, StorageErrors};

pub const HAPROXY_KEY: &str = "haproxy";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigHaproxy {
  #[serde(flatten)]
  pub fs: ConfigFs,
  #[serde(default)]
  pub crt_list_path: Option<PathBuf>,
}

/// HAProxy storage: the filesystem layout (pem bundles forced on) plus a
/// crt-list file mapping each SNI to its pem path.
pub struct HaproxyStorage {
  id: String,
  fs: Arc<dyn FileSystem>,
  fs_storage: FsStorage,
  crt_list_path: PathBuf,
}

impl HaproxyStorage {
  pub fn create(
    fs: Arc<dyn FileSystem>,
    cfg: &StorageConfig,
  ) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let mut config: ConfigHaproxy = serde_yaml::from_value(cfg.config.clone())
      .map_err(|err| anyhow::anyhow!("storage {}: {err}", cfg.id))?;
    validate_config(&cfg.id, &config.fs)?;

    // HAProxy consumes pem bundles, the crt-list points at them.
    config.fs.add_pem = true;
    let crt_list_path = config
      .crt_list_path
      .clone()
      .unwrap_or_else(|| config.fs.path.join("crt-list.txt"));

    Ok(HaproxyStorage {
      id: cfg.id.clone(),
      fs: fs.clone(),
      fs_storage: FsStorage::new(fs, cfg.id.clone(), config.fs),
      crt_list_path,
    })
  }

  /// One `{pem_path} {sni}` line per SNI across all kept certificates, in
  /// sorted SNI order for reproducible output.
  fn generate_crt_list_content(&self, certificates: &Certificates) -> Vec<u8> {
    let mut entries: BTreeMap<String, PathBuf> = BTreeMap::new();
    for certificate in certificates.iter() {
      let paths = self.fs_storage.get_path_config(certificate);
      if paths.skip {
        continue;
      }
      for domain in certificate.domains.iter() {
        entries.insert(domain.to_string(), paths.pem_path.clone());
      }
    }

    let mut content = String::new();
    for (sni, pem_path) in entries {
      content.push('\n');
      content.push_str(&pem_path.to_string_lossy());
      content.push(' ');
      content.push_str(&sni);
    }
    content.into_bytes()
  }

  fn generate_crt_list_file(
    &self,
    certificates: &Certificates,
  ) -> Result<bool, Box<dyn Error + Send + Sync>> {
    let directory = self
      .crt_list_path
      .parent()
      .unwrap_or_else(|| std::path::Path::new("/"));
    mkdir_all_with_chown(
      &*self.fs,
      directory,
      0o755,
      self.fs_storage.uid,
      self.fs_storage.gid,
    )
    .map_err(|err| anyhow::anyhow!("failed to create dir {}: {err}", directory.display()))?;

    let content = self.generate_crt_list_content(certificates);
    self
      .fs_storage
      .write_file(&content, &self.crt_list_path)
      .map_err(|err| {
        anyhow::anyhow!("failed to write crt file {}: {err}", self.crt_list_path.display()).into()
      })
  }
}

#[async_trait]
impl Storage for HaproxyStorage {
  fn id(&self) -> &str {
    &self.id
  }

  async fn save(&self, certificates: &Certificates, hooks: &Sender<Hook>) -> StorageErrors {
    let (certs_changed, mut errors) = self.fs_storage.save_inner(certificates);

    let crt_list_changed = match self.generate_crt_list_file(certificates) {
      Ok(changed) => changed,
      Err(err) => {
        errors.push(err);
        return errors;
      }
    };

    if certs_changed || crt_list_changed {
      if let Some(post_hook) = &self.fs_storage.cfg.post_hook {
        hooks.send(post_hook.clone()).await.unwrap_or_default();
      }
    }
    errors
  }

  async fn delete(&self, certificates: &Certificates, _hooks: &Sender<Hook>) -> StorageErrors {
    let (_, errors) = self.fs_storage.delete_inner(certificates);
    errors
  }
}
