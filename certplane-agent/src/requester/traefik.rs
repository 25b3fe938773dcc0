use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certplane_common::config::RequesterConfig;
use certplane_common::logging::Logger;
use certplane_common::requester::{Requester, RequesterError};
use certplane_common::types::{Domain, DomainRequest, Domains};
use serde::Deserialize;
use tokio::task::JoinSet;

pub const TRAEFIK_KEY: &str = "traefik";

const FETCH_TIMEOUT: Duration = Duration::from_secs(1);
const ROUTERS_API: &str = "/api/http/routers";

#[derive(Debug, Deserialize)]
struct ConfigTraefik {
  addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TraefikRouter {
  #[serde(default)]
  rule: String,
  #[serde(default)]
  tls: Option<TraefikRouterTls>,
}

#[derive(Debug, Default, Deserialize)]
struct TraefikRouterTls {
  #[serde(default)]
  domains: Vec<TraefikRouterTlsDomain>,
}

#[derive(Debug, Default, Deserialize)]
struct TraefikRouterTlsDomain {
  #[serde(default)]
  main: String,
  #[serde(default)]
  sans: Vec<String>,
}

/// Discovers SAN requirements from Traefik's admin API: each TLS-enabled
/// router contributes one request, either from its explicit `tls.domains`
/// or from the `Host(...)` predicates of its rule.
pub struct TraefikRequester {
  id: String,
  addresses: Vec<String>,
  client: reqwest::Client,
  logger: Logger,
}

impl TraefikRequester {
  async fn fetch_instance(
    client: &reqwest::Client,
    address: &str,
  ) -> Result<Vec<DomainRequest>, Box<dyn Error + Send + Sync>> {
    let response = client.get(format!("{address}{ROUTERS_API}")).send().await?;
    if !response.status().is_success() {
      return Err(anyhow::anyhow!("response have invalid status code {}", response.status()).into());
    }
    let routers = response.json::<Vec<TraefikRouter>>().await?;
    format_routers(&routers)
  }
}

/// Turns routers into domain requests. Routers without TLS are ignored.
fn format_routers(
  routers: &[TraefikRouter],
) -> Result<Vec<DomainRequest>, Box<dyn Error + Send + Sync>> {
  let mut requests = Vec::new();
  for router in routers {
    let Some(tls) = &router.tls else {
      continue;
    };

    let mut domains = Domains::default();
    if tls.domains.is_empty() {
      for parsed in parse_rule_domains(&router.rule)? {
        domains.push(Domain::new(parsed));
      }
      if domains.is_empty() {
        continue;
      }
    } else {
      for tls_domain in &tls.domains {
        if !tls_domain.main.is_empty() {
          domains.push(Domain::new(tls_domain.main.clone()));
        }
        for san in &tls_domain.sans {
          domains.push(Domain::new(san.clone()));
        }
      }
    }

    requests.push(DomainRequest::new(domains));
  }
  Ok(requests)
}

/// Extracts the arguments of every `Host(...)` and `HostSNI(...)` matcher
/// from a router rule. Other matchers are ignored.
pub fn parse_rule_domains(rule: &str) -> Result<Vec<String>, Box<dyn Error + Send + Sync>> {
  let mut domains = Vec::new();
  for matcher in ["Host(", "HostSNI("] {
    let mut search_from = 0;
    while let Some(found) = rule[search_from..].find(matcher) {
      let args_start = search_from + found + matcher.len();
      // Skip partial matches such as the "Host(" inside "HostRegexp(".
      let preceded_by_word = search_from + found > 0
        && rule[..search_from + found]
          .chars()
          .next_back()
          .is_some_and(|c| c.is_alphanumeric());
      if preceded_by_word {
        search_from = args_start;
        continue;
      }

      let Some(close) = rule[args_start..].find(')') else {
        return Err(anyhow::anyhow!("unbalanced parenthesis in rule \"{rule}\"").into());
      };
      for argument in rule[args_start..args_start + close].split(',') {
        let domain = argument.trim().trim_matches(|c| c == '`' || c == '\'' || c == '"');
        if !domain.is_empty() && !domains.contains(&domain.to_string()) {
          domains.push(domain.to_string());
        }
      }
      search_from = args_start + close;
    }
  }
  Ok(domains)
}

#[async_trait]
impl Requester for TraefikRequester {
  fn id(&self) -> &str {
    &self.id
  }

  async fn fetch(&self) -> (Vec<DomainRequest>, Option<RequesterError>) {
    let mut tasks = JoinSet::new();
    for address in &self.addresses {
      let client = self.client.clone();
      let address = address.clone();
      tasks.spawn(async move { (address.clone(), Self::fetch_instance(&client, &address).await) });
    }

    let mut requests = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
      let Ok((address, fetched)) = joined else {
        continue;
      };
      match fetched {
        Ok(mut instance_requests) => requests.append(&mut instance_requests),
        Err(err) => {
          let message = format!("requester ({}) failed to fetch {address} with: {err}", self.id);
          self.logger.error(&message).await;
          failures.push(message);
        }
      }
    }

    requests.retain(|request| !request.is_ip());
    for request in requests.iter_mut() {
      request.requester_id = Some(self.id.clone());
    }

    let error = (!failures.is_empty()).then(|| anyhow::anyhow!(failures.join("; ")).into());
    (requests, error)
  }
}

pub fn create_traefik_requester(
  cfg: &RequesterConfig,
  logger: Logger,
) -> Result<Arc<dyn Requester>, Box<dyn Error + Send + Sync>> {
  let config: ConfigTraefik = serde_yaml::from_value(cfg.config.clone())
    .map_err(|err| anyhow::anyhow!("requester {}: {err}", cfg.id))?;
  if config.addresses.is_empty() {
    return Err(anyhow::anyhow!("requester {}: addresses must not be empty", cfg.id).into());
  }
  Ok(Arc::new(TraefikRequester {
    id: cfg.id.clone(),
    addresses: config.addresses,
    client: reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?,
    logger,
  }))
}
