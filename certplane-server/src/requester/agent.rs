use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certplane_common::config::RequesterConfig;
use certplane_common::http::{api_prefix, AGENT_API_REQUESTS};
use certplane_common::logging::Logger;
use certplane_common::requester::{Requester, RequesterError};
use certplane_common::types::DomainRequest;
use serde::Deserialize;
use tokio::task::JoinSet;

pub const AGENT_KEY: &str = "agent";

const FETCH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct ConfigAgent {
  addresses: Vec<String>,
}

/// Pulls domain requests from peer agents' `/api/requests` endpoints,
/// fanning out over every configured address.
pub struct AgentRequester {
  id: String,
  addresses: Vec<String>,
  client: reqwest::Client,
  logger: Logger,
}

impl AgentRequester {
  async fn fetch_agent(
    client: &reqwest::Client,
    address: &str,
  ) -> Result<Vec<DomainRequest>, Box<dyn Error + Send + Sync>> {
    let response = client
      .get(format!("{address}{}", api_prefix(AGENT_API_REQUESTS)))
      .send()
      .await?;
    if !response.status().is_success() {
      return Err(anyhow::anyhow!("response have invalid status code {}", response.status()).into());
    }
    Ok(response.json::<Vec<DomainRequest>>().await?)
  }
}

#[async_trait]
impl Requester for AgentRequester {
  fn id(&self) -> &str {
    &self.id
  }

  async fn fetch(&self) -> (Vec<DomainRequest>, Option<RequesterError>) {
    let mut tasks = JoinSet::new();
    for address in &self.addresses {
      let client = self.client.clone();
      let address = address.clone();
      tasks.spawn(async move { (address.clone(), Self::fetch_agent(&client, &address).await) });
    }

    let mut requests = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
      let Ok((address, fetched)) = joined else {
        continue;
      };
      match fetched {
        Ok(mut agent_requests) => requests.append(&mut agent_requests),
        Err(err) => {
          let message = format!("agent ({}) failed to fetch {address} with: {err}", self.id);
          self.logger.error(&message).await;
          failures.push(message);
        }
      }
    }

    for request in requests.iter_mut() {
      request.requester_id = Some(self.id.clone());
    }

    let error = (!failures.is_empty()).then(|| anyhow::anyhow!(failures.join("; ")).into());
    (requests, error)
  }
}

pub fn create_agent_requester(
  cfg: &RequesterConfig,
  logger: Logger,
) -> Result<Arc<dyn Requester>, Box<dyn Error + Send + Sync>> {
  let config: ConfigAgent = serde_yaml::from_value(cfg.config.clone())
    .map_err(|err| anyhow::anyhow!("requester {}: {err}", cfg.id))?;
  if config.addresses.is_empty() {
    return Err(anyhow::anyhow!("requester {}: addresses must not be empty", cfg.id).into());
  }
  Ok(Arc::new(AgentRequester {
    id: cfg.id.clone(),
    addresses: config.addresses,
    client: reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?,
    logger,
  }))
}
