pub mod fs;

use std::error::Error;
use std::sync::Arc;

use crate::config::StateConfig;
use crate::fs::FileSystem;
use crate::types::State;

pub const FS_KEY: &str = "fs";

/// Persistence for the certificate state. Load returns an empty state when
/// nothing has been written yet; save skips the write when the serialized
/// content is unchanged.
pub trait StateStorage: Send + Sync {
  fn kind(&self) -> &str;
  fn load(&self) -> Result<State, Box<dyn Error + Send + Sync>>;
  fn save(&self, state: &State) -> Result<(), Box<dyn Error + Send + Sync>>;
}

pub fn create_state_storage(
  filesystem: Arc<dyn FileSystem>,
  cfg: &StateConfig,
) -> Result<Arc<dyn StateStorage>, Box<dyn Error + Send + Sync>> {
  match cfg.kind.as_str() {
    FS_KEY => Ok(Arc::new(fs::FsStateStorage::create(filesystem, cfg)?)),
    kind => Err(anyhow::anyhow!("config state storage type '{kind}' does not exist").into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fs::MemoryFs;

  #[test]
  fn test_create_state_storage_fs() {
    let cfg = StateConfig {
      kind: FS_KEY.to_string(),
      config: serde_yaml::from_str("path: /app/state.json\n").unwrap(),
    };
    let storage = create_state_storage(Arc::new(MemoryFs::new()), &cfg).unwrap();
    assert_eq!(FS_KEY, storage.kind());
  }

  #[test]
  fn test_create_state_storage_unknown_type() {
    let cfg = StateConfig {
      kind: "etcd".to_string(),
      config: serde_yaml::Value::Null,
    };
    assert!(create_state_storage(Arc::new(MemoryFs::new()), &cfg).is_err());
  }
}
