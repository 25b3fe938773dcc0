pub mod agent;

use std::error::Error;
use std::sync::Arc;

use certplane_common::config::RequesterConfig;
use certplane_common::logging::Logger;
use certplane_common::requester::static_list::{create_static_requester, STATIC_KEY};
use certplane_common::requester::Requester;

/// Builds the controller-side requesters from configuration. Known types:
/// `static` and `agent`.
pub fn create_requesters(
  configs: &[RequesterConfig],
  logger: &Logger,
) -> Result<Vec<Arc<dyn Requester>>, Box<dyn Error + Send + Sync>> {
  let mut requesters = Vec::new();
  for cfg in configs {
    let requester = match cfg.kind.as_str() {
      STATIC_KEY => create_static_requester(cfg)?,
      agent::AGENT_KEY => agent::create_agent_requester(cfg, logger.clone())?,
      kind => {
        return Err(anyhow::anyhow!("config requester type '{kind}' does not exist").into());
      }
    };
    requesters.push(requester);
  }
  Ok(requesters)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_create_requesters() {
    let configs = vec![
      RequesterConfig {
        id: "static-main".to_string(),
        kind: STATIC_KEY.to_string(),
        config: serde_yaml::from_str("domains:\n  - [\"example.com\"]\n").unwrap(),
      },
      RequesterConfig {
        id: "agents".to_string(),
        kind: agent::AGENT_KEY.to_string(),
        config: serde_yaml::from_str("addresses: [\"http://127.0.0.1:8081\"]\n").unwrap(),
      },
    ];
    let requesters = create_requesters(&configs, &Logger::sink()).unwrap();
    assert_eq!(2, requesters.len());
  }

  #[test]
  fn test_create_requesters_unknown_type() {
    let configs = vec![RequesterConfig {
      id: "mystery".to_string(),
      kind: "mystery".to_string(),
      config: serde_yaml::Value::Null,
    }];
    assert!(create_requesters(&configs, &Logger::sink()).is_err());
  }
}
