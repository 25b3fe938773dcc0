use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;

pub const CACHE_PROCESS_LOCK_KEY: &str = "manager_run_process_lock";

/// Window left for concurrent writers to race before the lock is
/// considered held.
const LOCK_RACE_DELAY: Duration = Duration::from_millis(500);

/// Advisory single-writer lock over the shared cache. The lease expiration
/// is the authoritative backstop when a holder crashes; release is
/// best-effort.
pub struct ProcessLock {
  cache: Arc<dyn Cache>,
  ephemeral_id: String,
  lock_duration: Duration,
  race_delay: Duration,
}

impl ProcessLock {
  pub fn new(cache: Arc<dyn Cache>, lock_duration: Duration) -> Self {
    ProcessLock {
      cache,
      ephemeral_id: uuid::Uuid::new_v4().to_string(),
      lock_duration,
      race_delay: LOCK_RACE_DELAY,
    }
  }

  #[cfg(test)]
  pub fn with_race_delay(mut self, race_delay: Duration) -> Self {
    self.race_delay = race_delay;
    self
  }

  pub fn ephemeral_id(&self) -> &str {
    &self.ephemeral_id
  }

  /// Tries to take the lock. `Ok(false)` means another instance holds it;
  /// errors are cache failures only.
  pub async fn obtain(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
    if let Some(holder) = self.cache.get(CACHE_PROCESS_LOCK_KEY).await? {
      if holder != self.ephemeral_id {
        return Ok(false);
      }
    }

    self
      .cache
      .set(
        CACHE_PROCESS_LOCK_KEY,
        &self.ephemeral_id,
        Some(self.lock_duration),
      )
      .await?;

    tokio::time::sleep(self.race_delay).await;

    if let Some(holder) = self.cache.get(CACHE_PROCESS_LOCK_KEY).await? {
      if holder != self.ephemeral_id {
        return Ok(false);
      }
    }

    Ok(true)
  }

  pub async fn release(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
    self.cache.delete(CACHE_PROCESS_LOCK_KEY).await
  }
}
