use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_channel::Sender;
use async_trait::async_trait;
use certplane_common::fs::checksum::Checksum;
use certplane_common::fs::dir::mkdir_all_with_chown;
use certplane_common::fs::FileSystem;
use certplane_common::hook::Hook;
use certplane_common::types::{Certificate, Certificates, Domains};
use serde::Deserialize;

use crate::config::StorageConfig;
use crate::storage::{Storage, StorageErrors};

pub const FS_KEY: &str = "fs";

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o660;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigFs {
  #[serde(default)]
  pub path: PathBuf,
  #[serde(default)]
  pub prefix_filename: String,
  #[serde(default)]
  pub owner: String,
  #[serde(default)]
  pub group: String,
  #[serde(default)]
  pub add_pem: bool,
  #[serde(default)]
  pub post_hook: Option<Hook>,
  #[serde(default)]
  pub only_matched_domains: bool,
  #[serde(default)]
  pub specific_domains: Vec<SpecificDomainConfig>,
}

/// Redirects the artifacts of certificates covering `domains` to a fixed
/// path and identifier.
#[derive(Clone, Debug, Deserialize)]
pub struct SpecificDomainConfig {
  #[serde(default)]
  pub path: Option<PathBuf>,
  pub identifier: String,
  pub domains: Domains,
}

/// Resolved artifact paths of one certificate. `skip` marks certificates
/// this storage ignores entirely.
#[derive(Clone, Debug, Default)]
pub struct PathConfig {
  pub key_path: PathBuf,
  pub cert_path: PathBuf,
  pub pem_path: PathBuf,
  pub skip: bool,
}

/// Writes `{prefix}{identifier}.key` / `.crt` (and `.pem` when enabled)
/// under a base directory, content-hash-guarded with owner and mode applied.
pub struct FsStorage {
  id: String,
  fs: Arc<dyn FileSystem>,
  checksum: Checksum,
  pub(crate) cfg: ConfigFs,
  pub(crate) uid: u32,
  pub(crate) gid: u32,
}

impl FsStorage {
  pub fn new(fs: Arc<dyn FileSystem>, id: impl Into<String>, cfg: ConfigFs) -> Self {
    let uid = lookup_uid(&cfg.owner);
    let gid = lookup_gid(&cfg.group);
    FsStorage {
      id: id.into(),
      checksum: Checksum::new(fs.clone()),
      fs,
      cfg,
      uid,
      gid,
    }
  }

  pub fn create(
    fs: Arc<dyn FileSystem>,
    cfg: &StorageConfig,
  ) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let config: ConfigFs = serde_yaml::from_value(cfg.config.clone())
      .map_err(|err| anyhow::anyhow!("storage {}: {err}", cfg.id))?;
    validate_config(&cfg.id, &config)?;
    Ok(FsStorage::new(fs, cfg.id.clone(), config))
  }

  /// Resolves where one certificate's artifacts live. The first matching
  /// `specific_domains` entry wins and drops the filename prefix; without
  /// a match, `only_matched_domains` skips the certificate.
  pub fn get_path_config(&self, certificate: &Certificate) -> PathConfig {
    for specific in &self.cfg.specific_domains {
      if certificate.matches(&specific.domains) {
        let base = specific.path.clone().unwrap_or_else(|| self.cfg.path.clone());
        return PathConfig {
          key_path: base.join(format!("{}.key", specific.identifier)),
          cert_path: base.join(format!("{}.crt", specific.identifier)),
          pem_path: base.join(format!("{}.pem", specific.identifier)),
          skip: false,
        };
      }
    }

    if self.cfg.only_matched_domains {
      return PathConfig {
        skip: true,
        ..PathConfig::default()
      };
    }

    let prefix = &self.cfg.prefix_filename;
    PathConfig {
      key_path: self.cfg.path.join(format!("{prefix}{}", certificate.key_filename())),
      cert_path: self
        .cfg
        .path
        .join(format!("{prefix}{}", certificate.certificate_filename())),
      pem_path: self
        .cfg
        .path
        .join(format!("{prefix}{}.pem", certificate.identifier)),
      skip: false,
    }
  }

  /// Writes `content` to `path` unless the on-disk content already hashes
  /// equal. Returns whether the file changed.
  pub fn write_file(
    &self,
    content: &[u8],
    path: &Path,
  ) -> Result<bool, Box<dyn Error + Send + Sync>> {
    if self.checksum.must_compare_content_with_path(content, path) {
      return Ok(false);
    }
    self
      .fs
      .write(path, content, FILE_MODE)
      .map_err(|err| anyhow::anyhow!("fail to write {}: {err}", path.display()))?;
    self
      .fs
      .chown(path, self.uid, self.gid)
      .map_err(|err| anyhow::anyhow!("fail to chown {}: {err}", path.display()))?;
    Ok(true)
  }

  pub(crate) fn save_inner(&self, certificates: &Certificates) -> (bool, StorageErrors) {
    let mut errors: StorageErrors = Vec::new();
    let mut changed = false;

    if let Err(err) = mkdir_all_with_chown(&*self.fs, &self.cfg.path, DIR_MODE, self.uid, self.gid)
    {
      errors.push(
        anyhow::anyhow!("unable to create dir {}: {err}", self.cfg.path.display()).into(),
      );
      return (changed, errors);
    }

    for certificate in certificates.iter() {
      let paths = self.get_path_config(certificate);
      if paths.skip {
        continue;
      }

      if let Some(parent) = paths.key_path.parent() {
        if !self.fs.exists(parent) {
          if let Err(err) = mkdir_all_with_chown(&*self.fs, parent, DIR_MODE, self.uid, self.gid) {
            errors
              .push(anyhow::anyhow!("unable to create dir {}: {err}", parent.display()).into());
            continue;
          }
        }
      }

      match self.write_file(&certificate.key, &paths.key_path) {
        Ok(file_changed) => changed = changed || file_changed,
        Err(err) => {
          errors.push(anyhow::anyhow!("fail to write key: {err}").into());
          continue;
        }
      }
      match self.write_file(&certificate.certificate, &paths.cert_path) {
        Ok(file_changed) => changed = changed || file_changed,
        Err(err) => {
          errors.push(anyhow::anyhow!("fail to write certificate: {err}").into());
          continue;
        }
      }

      if self.cfg.add_pem {
        let mut pem = certificate.certificate.clone();
        pem.extend_from_slice(&certificate.key);
        match self.write_file(&pem, &paths.pem_path) {
          Ok(file_changed) => changed = changed || file_changed,
          Err(err) => {
            errors.push(anyhow::anyhow!("fail to write pem: {err}").into());
            continue;
          }
        }
      }
    }

    (changed, errors)
  }

  pub(crate) fn delete_inner(&self, certificates: &Certificates) -> (bool, StorageErrors) {
    let mut errors: StorageErrors = Vec::new();
    let mut changed = false;

    for certificate in certificates.iter() {
      let paths = self.get_path_config(certificate);
      if paths.skip {
        continue;
      }

      let mut targets = vec![paths.key_path, paths.cert_path];
      if self.cfg.add_pem {
        targets.push(paths.pem_path);
      }
      for path in targets {
        if !self.fs.exists(&path) {
          continue;
        }
        match self.fs.remove(&path) {
          Ok(()) => changed = true,
          Err(err) => errors.push(anyhow::anyhow!("fail to remove {}: {err}", path.display()).into()),
        }
      }
    }

    (changed, errors)
  }

  async fn publish_hook(&self, changed: bool, hooks: &Sender<Hook>) {
    if !changed {
      return;
    }
    if let Some(post_hook) = &self.cfg.post_hook {
      hooks.send(post_hook.clone()).await.unwrap_or_default();
    }
  }
}

#[async_trait]
impl Storage for FsStorage {
  fn id(&self) -> &str {
    &self.id
  }

  async fn save(&self, certificates: &Certificates, hooks: &Sender<Hook>) -> StorageErrors {
    let (changed, errors) = self.save_inner(certificates);
    self.publish_hook(changed, hooks).await;
    errors
  }

  async fn delete(&self, certificates: &Certificates, hooks: &Sender<Hook>) -> StorageErrors {
    let (changed, errors) = self.delete_inner(certificates);
    self.publish_hook(changed, hooks).await;
    errors
  }
}

/// `specific_domains` entries must not collide on (path, identifier).
pub fn validate_config(id: &str, config: &ConfigFs) -> Result<(), Box<dyn Error + Send + Sync>> {
  if config.path.as_os_str().is_empty() {
    return Err(anyhow::anyhow!("storage {id}: path must not be empty").into());
  }
  let mut seen = HashSet::new();
  for specific in &config.specific_domains {
    if specific.identifier.is_empty() {
      return Err(anyhow::anyhow!("storage {id}: specific_domains identifier must not be empty").into());
    }
    let base = specific.path.clone().unwrap_or_else(|| config.path.clone());
    if !seen.insert((base.clone(), specific.identifier.clone())) {
      return Err(
        anyhow::anyhow!(
          "storage {id}: duplicated specific_domains entry {}/{}",
          base.display(),
          specific.identifier
        )
        .into(),
      );
    }
  }
  Ok(())
}

pub(crate) fn lookup_uid(owner: &str) -> u32 {
  #[cfg(unix)]
  {
    if !owner.is_empty() {
      if let Ok(Some(user)) = nix::unistd::User::from_name(owner) {
        return user.uid.as_raw();
      }
    }
    nix::unistd::getuid().as_raw()
  }
  #[cfg(not(unix))]
  {
    let _ = owner;
    0
  }
}

pub(crate) fn lookup_gid(group: &str) -> u32 {
  #[cfg(unix)]
  {
    if !group.is_empty() {
      if let Ok(Some(group)) = nix::unistd::Group::from_name(group) {
        return group.gid.as_raw();
      }
    }
    nix::unistd::getgid().as_raw()
  }
  #[cfg(not(unix))]
  {
    let _ = group;
    0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use certplane_common::fs::MemoryFs;

  fn certificate(identifier: &str, domains: Vec<&str>) -> Certificate {
    Certificate {
      identifier: identifier.to_string(),
      main: domains.first().map(|domain| domain.to_string()).unwrap_or_default(),
      domains: Domains::from(domains),
      key: b"key".to_vec(),
      certificate: b"certificate".to_vec(),
      ..Certificate::default()
    }
  }

  fn storage(fs: Arc<MemoryFs>, cfg: ConfigFs) -> FsStorage {
    FsStorage::new(fs, "local", cfg)
  }

  fn hook_channel() -> (Sender<Hook>, async_channel::Receiver<Hook>) {
    async_channel::unbounded()
  }

  #[tokio::test]
  async fn test_save_writes_key_and_certificate() {
    let fs = Arc::new(MemoryFs::new());
    let storage = storage(
      fs.clone(),
      ConfigFs {
        path: PathBuf::from("/app"),
        ..ConfigFs::default()
      },
    );
    let (hooks, _receiver) = hook_channel();

    let certificates = Certificates(vec![certificate("example.com-0", vec!["example.com"])]);
    let errors = storage.save(&certificates, &hooks).await;

    assert!(errors.is_empty());
    assert_eq!(Some(b"key".to_vec()), fs.contents("/app/example.com-0.key"));
    assert_eq!(
      Some(b"certificate".to_vec()),
      fs.contents("/app/example.com-0.crt")
    );
    assert_eq!(None, fs.contents("/app/example.com-0.pem"));
  }

  #[tokio::test]
  async fn test_save_with_prefix_and_pem() {
    let fs = Arc::new(MemoryFs::new());
    let storage = storage(
      fs.clone(),
      ConfigFs {
        path: PathBuf::from("/app"),
        prefix_filename: "ssl.".to_string(),
        add_pem: true,
        ..ConfigFs::default()
      },
    );
    let (hooks, _receiver) = hook_channel();

    let certificates = Certificates(vec![certificate("example.com-0", vec!["example.com"])]);
    storage.save(&certificates, &hooks).await;

    assert_eq!(Some(b"key".to_vec()), fs.contents("/app/ssl.example.com-0.key"));
    assert_eq!(
      Some(b"certificatekey".to_vec()),
      fs.contents("/app/ssl.example.com-0.pem")
    );
  }

  #[tokio::test]
  async fn test_save_is_idempotent_and_hooks_once() {
    let fs = Arc::new(MemoryFs::new());
    let storage = storage(
      fs.clone(),
      ConfigFs {
        path: PathBuf::from("/app"),
        post_hook: Some(Hook {
          cmd: "systemctl reload haproxy".to_string(),
          timeout: None,
        }),
        ..ConfigFs::default()
      },
    );
    let (hooks, receiver) = hook_channel();
    let certificates = Certificates(vec![certificate("example.com-0", vec!["example.com"])]);

    storage.save(&certificates, &hooks).await;
    storage.save(&certificates, &hooks).await;

    assert_eq!(1, fs.write_count("/app/example.com-0.key"));
    assert_eq!(1, fs.write_count("/app/example.com-0.crt"));
    // Only the first save changed content, so exactly one hook is published.
    assert_eq!(1, receiver.len());
  }

  #[tokio::test]
  async fn test_save_specific_domains_redirects_paths() {
    let fs = Arc::new(MemoryFs::new());
    let storage = storage(
      fs.clone(),
      ConfigFs {
        path: PathBuf::from("/app"),
        prefix_filename: "ssl.".to_string(),
        specific_domains: vec![SpecificDomainConfig {
          path: Some(PathBuf::from("/special")),
          identifier: "frontend".to_string(),
          domains: Domains::from(vec!["example.com"]),
        }],
        ..ConfigFs::default()
      },
    );
    let (hooks, _receiver) = hook_channel();

    let certificates = Certificates(vec![
      certificate("example.com-0", vec!["example.com"]),
      certificate("example.org-0", vec!["example.org"]),
    ]);
    storage.save(&certificates, &hooks).await;

    // The matched certificate lands at the specific path, without prefix.
    assert_eq!(Some(b"key".to_vec()), fs.contents("/special/frontend.key"));
    assert_eq!(Some(b"key".to_vec()), fs.contents("/app/ssl.example.org-0.key"));
  }

  #[tokio::test]
  async fn test_save_only_matched_domains_skips_others() {
    let fs = Arc::new(MemoryFs::new());
    let storage = storage(
      fs.clone(),
      ConfigFs {
        path: PathBuf::from("/app"),
        only_matched_domains: true,
        specific_domains: vec![SpecificDomainConfig {
          path: None,
          identifier: "frontend".to_string(),
          domains: Domains::from(vec!["example.com"]),
        }],
        ..ConfigFs::default()
      },
    );
    let (hooks, _receiver) = hook_channel();

    let certificates = Certificates(vec![
      certificate("example.com-0", vec!["example.com"]),
      certificate("example.org-0", vec!["example.org"]),
    ]);
    let errors = storage.save(&certificates, &hooks).await;

    assert!(errors.is_empty());
    assert_eq!(Some(b"key".to_vec()), fs.contents("/app/frontend.key"));
    assert_eq!(None, fs.contents("/app/example.org-0.key"));
  }

  #[tokio::test]
  async fn test_save_chowns_files() {
    let fs = Arc::new(MemoryFs::new());
    let storage = FsStorage {
      id: "local".to_string(),
      checksum: Checksum::new(fs.clone()),
      fs: fs.clone(),
      cfg: ConfigFs {
        path: PathBuf::from("/app"),
        ..ConfigFs::default()
      },
      uid: 33,
      gid: 33,
    };
    let (hooks, _receiver) = hook_channel();

    storage
      .save(
        &Certificates(vec![certificate("example.com-0", vec!["example.com"])]),
        &hooks,
      )
      .await;

    assert_eq!(Some((33, 33)), fs.owner("/app/example.com-0.key"));
    assert_eq!(Some((33, 33)), fs.owner("/app"));
  }

  #[tokio::test]
  async fn test_delete_removes_artifacts() {
    let fs = Arc::new(MemoryFs::new());
    let storage = storage(
      fs.clone(),
      ConfigFs {
        path: PathBuf::from("/app"),
        add_pem: true,
        post_hook: Some(Hook {
          cmd: "reload".to_string(),
          timeout: None,
        }),
        ..ConfigFs::default()
      },
    );
    let (hooks, receiver) = hook_channel();
    let certificates = Certificates(vec![certificate("example.com-0", vec!["example.com"])]);

    storage.save(&certificates, &hooks).await;
    let errors = storage.delete(&certificates, &hooks).await;

    assert!(errors.is_empty());
    assert_eq!(None, fs.contents("/app/example.com-0.key"));
    assert_eq!(None, fs.contents("/app/example.com-0.crt"));
    assert_eq!(None, fs.contents("/app/example.com-0.pem"));
    // One hook for the save, one for the delete.
    assert_eq!(2, receiver.len());
  }

  #[tokio::test]
  async fn test_delete_missing_files_is_quiet() {
    let fs = Arc::new(MemoryFs::new());
    let storage = storage(
      fs,
      ConfigFs {
        path: PathBuf::from("/app"),
        ..ConfigFs::default()
      },
    );
    let (hooks, receiver) = hook_channel();

    let errors = storage
      .delete(
        &Certificates(vec![certificate("example.com-0", vec!["example.com"])]),
        &hooks,
      )
      .await;
    assert!(errors.is_empty());
    assert_eq!(0, receiver.len());
  }

  #[test]
  fn test_validate_config_rejects_duplicate_specific_entries() {
    let config = ConfigFs {
      path: PathBuf::from("/app"),
      specific_domains: vec![
        SpecificDomainConfig {
          path: None,
          identifier: "frontend".to_string(),
          domains: Domains::from(vec!["example.com"]),
        },
        SpecificDomainConfig {
          path: None,
          identifier: "frontend".to_string(),
          domains: Domains::from(vec!["example.org"]),
        },
      ],
      ..ConfigFs::default()
    };
    assert!(validate_config("local", &config).is_err());
  }

  #[test]
  fn test_validate_config_allows_same_identifier_on_distinct_paths() {
    let config = ConfigFs {
      path: PathBuf::from("/app"),
      specific_domains: vec![
        SpecificDomainConfig {
          path: Some(PathBuf::from("/a")),
          identifier: "frontend".to_string(),
          domains: Domains::from(vec!["example.com"]),
        },
        SpecificDomainConfig {
          path: Some(PathBuf::from("/b")),
          identifier: "frontend".to_string(),
          domains: Domains::from(vec!["example.org"]),
        },
      ],
      ..ConfigFs::default()
    };
    assert!(validate_config("local", &config).is_ok());
  }
}
