use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::StateConfig;
use crate::fs::checksum::Checksum;
use crate::fs::FileSystem;
use crate::state_storage::{StateStorage, FS_KEY};
use crate::types::State;

#[derive(Debug, Deserialize)]
struct ConfigFs {
  path: PathBuf,
}

/// JSON state file on a filesystem, with a content-hash-guarded save.
pub struct FsStateStorage {
  fs: Arc<dyn FileSystem>,
  checksum: Checksum,
  path: PathBuf,
}

impl FsStateStorage {
  pub fn new(fs: Arc<dyn FileSystem>, path: PathBuf) -> Self {
    FsStateStorage {
      checksum: Checksum::new(fs.clone()),
      fs,
      path,
    }
  }

  pub fn create(
    fs: Arc<dyn FileSystem>,
    cfg: &StateConfig,
  ) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let config: ConfigFs = serde_yaml::from_value(cfg.config.clone())
      .map_err(|err| anyhow::anyhow!("state storage: {err}"))?;
    if config.path.as_os_str().is_empty() {
      return Err(anyhow::anyhow!("state storage: path must not be empty").into());
    }
    Ok(FsStateStorage::new(fs, config.path))
  }
}

impl StateStorage for FsStateStorage {
  fn kind(&self) -> &str {
    FS_KEY
  }

  fn load(&self) -> Result<State, Box<dyn Error + Send + Sync>> {
    if !self.fs.exists(&self.path) {
      return Ok(State::default());
    }
    let content = self
      .fs
      .read(&self.path)
      .map_err(|err| anyhow::anyhow!("failed to read {}: {err}", self.path.display()))?;
    let state = serde_json::from_slice(&content)
      .map_err(|err| anyhow::anyhow!("failed to parse json {}: {err}", self.path.display()))?;
    Ok(state)
  }

  fn save(&self, state: &State) -> Result<(), Box<dyn Error + Send + Sync>> {
    let content = serde_json::to_vec(state)?;
    if self.checksum.must_compare_content_with_path(&content, &self.path) {
      return Ok(());
    }
    self
      .fs
      .write(&self.path, &content, 0o660)
      .map_err(|err| anyhow::anyhow!("failed to write in {}: {err}", self.path.display()))?;
    Ok(())
  }
}
