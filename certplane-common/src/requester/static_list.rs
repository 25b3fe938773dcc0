use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::RequesterConfig;
use crate::requester::{Requester, RequesterError};
use crate::types::{DomainRequest, Domains};

pub const STATIC_KEY: &str = "static";

#[derive(Debug, Deserialize)]
struct ConfigStatic {
  domains: Vec<Domains>,
}

/// A fixed list of domain groups from configuration. Groups containing IP
/// literals are dropped at construction.
pub struct StaticRequester {
  id: String,
  requests: Vec<DomainRequest>,
}

impl StaticRequester {
  pub fn new(id: impl Into<String>, domain_groups: Vec<Domains>) -> Self {
    let id = id.into();
    let requests = domain_groups
      .into_iter()
      .map(|domains| DomainRequest {
        domains,
        requester_id: Some(id.clone()),
      })
      .filter(|request| !request.is_ip())
      .collect();
    StaticRequester { id, requests }
  }
}

#[async_trait]
impl Requester for StaticRequester {
  fn id(&self) -> &str {
    &self.id
  }

  async fn fetch(&self) -> (Vec<DomainRequest>, Option<RequesterError>) {
    (self.requests.clone(), None)
  }
}

pub fn create_static_requester(
  cfg: &RequesterConfig,
) -> Result<Arc<dyn Requester>, Box<dyn Error + Send + Sync>> {
  let config: ConfigStatic = serde_yaml::from_value(cfg.config.clone())
    .map_err(|err| anyhow::anyhow!("requester {}: {err}", cfg.id))?;
  if config.domains.is_empty() {
    return Err(anyhow::anyhow!("requester {}: domains must not be empty", cfg.id).into());
  }
  Ok(Arc::new(StaticRequester::new(cfg.id.clone(), config.domains)))
}
