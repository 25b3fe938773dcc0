use std::error::Error;
use std::sync::Arc;

use certplane_common::logging::Logger;

use crate::cache::Cache;

/// The HTTP-01 token store shared between the issuance path (writes
/// key-auths before validation, deletes them afterwards) and the public
/// well-known endpoint (reads them back keyed by token and Host).
pub struct ChallengeHttp {
  cache: Arc<dyn Cache>,
  logger: Logger,
}

impl ChallengeHttp {
  pub fn new(cache: Arc<dyn Cache>, logger: Logger) -> Self {
    ChallengeHttp { cache, logger }
  }

  pub fn cache_key(token: &str, domain: &str) -> String {
    format!("acme_http_{token}_{domain}")
  }

  pub async fn present(
    &self,
    domain: &str,
    token: &str,
    key_auth: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    self
      .logger
      .debug(&format!("http-01: present domain={domain},token={token}"))
      .await;
    self
      .cache
      .set(&Self::cache_key(token, domain), key_auth, None)
      .await
      .map_err(|err| {
        anyhow::anyhow!("failed to store in cache keyAuth for token {token} - domain {domain}: {err}")
          .into()
      })
  }

  pub async fn cleanup(
    &self,
    domain: &str,
    token: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    self
      .logger
      .debug(&format!("http-01: clean up domain={domain},token={token}"))
      .await;
    self
      .cache
      .delete(&Self::cache_key(token, domain))
      .await
      .map_err(|err| {
        anyhow::anyhow!("failed to delete in cache keyAuth for token {token} - domain {domain}: {err}")
          .into()
      })
  }

  /// Looks up the key authorization for the public handler. Cache errors
  /// are logged and read as a miss.
  pub async fn key_auth(&self, token: &str, host: &str) -> Option<String> {
    match self.cache.get(&Self::cache_key(token, host)).await {
      Ok(key_auth) => key_auth,
      Err(err) => {
        self
          .logger
          .error(&format!(
            "failed to get in cache keyAuth for token {token} - domain {host}: {err}"
          ))
          .await;
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::memory::MemoryCache;

  fn challenge() -> ChallengeHttp {
    ChallengeHttp::new(Arc::new(MemoryCache::new(None)), Logger::sink())
  }

  #[test]
  fn test_cache_key() {
    assert_eq!(
      "acme_http_token123_example.com",
      ChallengeHttp::cache_key("token123", "example.com")
    );
  }

  #[tokio::test]
  async fn test_present_and_lookup() {
    let challenge = challenge();
    challenge
      .present("example.com", "token123", "token123.abc")
      .await
      .unwrap();
    assert_eq!(
      Some("token123.abc".to_string()),
      challenge.key_auth("token123", "example.com").await
    );
    assert_eq!(None, challenge.key_auth("token123", "example.org").await);
  }

  #[tokio::test]
  async fn test_cleanup_removes_key_auth() {
    let challenge = challenge();
    challenge
      .present("example.com", "token123", "token123.abc")
      .await
      .unwrap();
    challenge.cleanup("example.com", "token123").await.unwrap();
    assert_eq!(None, challenge.key_auth("token123", "example.com").await);
  }
}
