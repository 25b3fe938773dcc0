use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use async_channel::Sender;
use async_trait::async_trait;
use certplane_common::fs::checksum::Checksum;
use certplane_common::fs::dir::mkdir_all_with_chown;
use certplane_common::fs::FileSystem;
use certplane_common::hook::Hook;
use certplane_common::types::{Certificate, Certificates};
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::storage::fs::{lookup_gid, lookup_uid};
use crate::storage::{Storage, StorageErrors};

pub const TRAEFIK_KEY: &str = "traefik";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigTraefik {
  pub path: PathBuf,
  #[serde(default)]
  pub prefix_filename: String,
  #[serde(default)]
  pub owner: String,
  #[serde(default)]
  pub group: String,
}

#[derive(Serialize)]
struct TraefikTlsFile {
  tls: TraefikTls,
}

#[derive(Serialize)]
struct TraefikTls {
  certificates: Vec<TraefikCertificate>,
}

#[derive(Serialize)]
struct TraefikCertificate {
  #[serde(rename = "certFile")]
  cert_file: String,
  #[serde(rename = "keyFile")]
  key_file: String,
}

/// Writes one Traefik dynamic-configuration YAML file per certificate,
/// embedding the PEM material inline.
pub struct TraefikStorage {
  id: String,
  fs: Arc<dyn FileSystem>,
  checksum: Checksum,
  cfg: ConfigTraefik,
  uid: u32,
  gid: u32,
}

impl TraefikStorage {
  pub fn create(
    fs: Arc<dyn FileSystem>,
    cfg: &StorageConfig,
  ) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let config: ConfigTraefik = serde_yaml::from_value(cfg.config.clone())
      .map_err(|err| anyhow::anyhow!("storage {}: {err}", cfg.id))?;
    if config.path.as_os_str().is_empty() {
      return Err(anyhow::anyhow!("storage {}: path must not be empty", cfg.id).into());
    }
    let uid = lookup_uid(&config.owner);
    let gid = lookup_gid(&config.group);
    Ok(TraefikStorage {
      id: cfg.id.clone(),
      checksum: Checksum::new(fs.clone()),
      fs,
      cfg: config,
      uid,
      gid,
    })
  }

  pub fn file_path(&self, certificate: &Certificate) -> PathBuf {
    self.cfg.path.join(format!(
      "{}{}.yml",
      self.cfg.prefix_filename, certificate.identifier
    ))
  }

  fn write_certificate_file(
    &self,
    certificate: &Certificate,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let path = self.file_path(certificate);
    let file = TraefikTlsFile {
      tls: TraefikTls {
        certificates: vec![TraefikCertificate {
          cert_file: String::from_utf8_lossy(&certificate.certificate).to_string(),
          key_file: String::from_utf8_lossy(&certificate.key).to_string(),
        }],
      },
    };
    let content = serde_yaml::to_string(&file)?.into_bytes();

    if self.checksum.must_compare_content_with_path(&content, &path) {
      return Ok(());
    }
    self
      .fs
      .write(&path, &content, 0o660)
      .map_err(|err| anyhow::anyhow!("fail to write {}: {err}", path.display()))?;
    self
      .fs
      .chown(&path, self.uid, self.gid)
      .map_err(|err| anyhow::anyhow!("fail to chown {}: {err}", path.display()))?;
    Ok(())
  }
}

#[async_trait]
impl Storage for TraefikStorage {
  fn id(&self) -> &str {
    &self.id
  }

  async fn save(&self, certificates: &Certificates, _hooks: &Sender<Hook>) -> StorageErrors {
    let mut errors: StorageErrors = Vec::new();
    if let Err(err) = mkdir_all_with_chown(&*self.fs, &self.cfg.path, 0o770, self.uid, self.gid) {
      errors.push(
        anyhow::anyhow!("unable to create dir {}: {err}", self.cfg.path.display()).into(),
      );
      return errors;
    }

    for certificate in certificates.iter() {
      if let Err(err) = self.write_certificate_file(certificate) {
        errors.push(err);
      }
    }
    errors
  }

  async fn delete(&self, certificates: &Certificates, _hooks: &Sender<Hook>) -> StorageErrors {
    let mut errors: StorageErrors = Vec::new();
    for certificate in certificates.iter() {
      let path = self.file_path(certificate);
      if !self.fs.exists(&path) {
        continue;
      }
      if let Err(err) = self.fs.remove(&path) {
        errors.push(anyhow::anyhow!("fail to remove {}: {err}", path.display()).into());
      }
    }
    errors
  }
}
