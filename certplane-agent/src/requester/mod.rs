pub mod nginx;
pub mod traefik;

use std::error::Error;
use std::sync::Arc;

use certplane_common::config::RequesterConfig;
use certplane_common::fs::FileSystem;
use certplane_common::logging::Logger;
use certplane_common::requester::static_list::{create_static_requester, STATIC_KEY};
use certplane_common::requester::Requester;

/// Builds the agent-side requesters from configuration. Known types:
/// `static`, `traefik` and `nginx`.
pub fn create_requesters(
  filesystem: Arc<dyn FileSystem>,
  configs: &[RequesterConfig],
  logger: &Logger,
) -> Result<Vec<Arc<dyn Requester>>, Box<dyn Error + Send + Sync>> {
  let mut requesters = Vec::new();
  for cfg in configs {
    let requester = match cfg.kind.as_str() {
      STATIC_KEY => create_static_requester(cfg)?,
      traefik::TRAEFIK_KEY => traefik::create_traefik_requester(cfg, logger.clone())?,
      nginx::NGINX_KEY => nginx::create_nginx_requester(filesystem.clone(), cfg)?,
      kind => {
        return Err(anyhow::anyhow!("config requester type '{kind}' does not exist").into());
      }
    };
    requesters.push(requester);
  }
  Ok(requesters)
}
