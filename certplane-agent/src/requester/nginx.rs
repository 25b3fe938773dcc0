use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use certplane_common::config::RequesterConfig;
use certplane_common::fs::FileSystem;
use certplane_common::nginx::parse_config;
use certplane_common::requester::{Requester, RequesterError};
use certplane_common::types::DomainRequest;
use serde::Deserialize;

pub const NGINX_KEY: &str = "nginx";

#[derive(Debug, Deserialize)]
struct ConfigNginx {
  nginx_cfg_path: PathBuf,
}

/// Derives one request per TLS-enabled nginx vhost from the local nginx
/// configuration.
pub struct NginxRequester {
  id: String,
  fs: Arc<dyn FileSystem>,
  nginx_cfg_path: PathBuf,
}

#[async_trait]
impl Requester for NginxRequester {
  fn id(&self) -> &str {
    &self.id
  }

  async fn fetch(&self) -> (Vec<DomainRequest>, Option<RequesterError>) {
    let vhosts = match parse_config(&*self.fs, &self.nginx_cfg_path) {
      Ok(vhosts) => vhosts,
      Err(err) => return (Vec::new(), Some(err)),
    };

    let requests = vhosts
      .into_iter()
      .map(|vhost| DomainRequest {
        domains: vhost.server_names,
        requester_id: Some(self.id.clone()),
      })
      .collect();
    (requests, None)
  }
}

pub fn create_nginx_requester(
  fs: Arc<dyn FileSystem>,
  cfg: &RequesterConfig,
) -> Result<Arc<dyn Requester>, Box<dyn Error + Send + Sync>> {
  let config: ConfigNginx = serde_yaml::from_value(cfg.config.clone())
    .map_err(|err| anyhow::anyhow!("requester {}: {err}", cfg.id))?;
  if config.nginx_cfg_path.as_os_str().is_empty() {
    return Err(anyhow::anyhow!("requester {}: nginx_cfg_path must not be empty", cfg.id).into());
  }
  Ok(Arc::new(NginxRequester {
    id: cfg.id.clone(),
    fs,
    nginx_cfg_path: config.nginx_cfg_path,
  }))
}
