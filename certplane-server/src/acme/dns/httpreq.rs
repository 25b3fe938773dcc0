use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::acme::dns::DnsProvider;

pub const HTTPREQ_KEY: &str = "httpreq";

const API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ConfigHttpreq {
  endpoint: String,
  #[serde(default)]
  username: Option<String>,
  #[serde(default)]
  password: Option<String>,
}

/// Generic webhook provider: POSTs `{fqdn, value}` to `/present` and
/// `/cleanup` on the configured endpoint.
pub struct HttpreqDnsProvider {
  client: reqwest::Client,
  endpoint: String,
  username: Option<String>,
  password: Option<String>,
}

impl HttpreqDnsProvider {
  pub fn create(config: &serde_yaml::Value) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let config: ConfigHttpreq = serde_yaml::from_value(config.clone())
      .map_err(|err| anyhow::anyhow!("httpreq provider: {err}"))?;
    if config.endpoint.is_empty() {
      return Err(anyhow::anyhow!("httpreq provider: endpoint must not be empty").into());
    }
    Ok(HttpreqDnsProvider {
      client: reqwest::Client::builder().timeout(API_TIMEOUT).build()?,
      endpoint: config.endpoint.trim_end_matches('/').to_string(),
      username: config.username,
      password: config.password,
    })
  }

  async fn post(
    &self,
    action: &str,
    fqdn: &str,
    value: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut request = self
      .client
      .post(format!("{}/{action}", self.endpoint))
      .json(&serde_json::json!({ "fqdn": fqdn, "value": value }));
    if let Some(username) = &self.username {
      request = request.basic_auth(username, self.password.as_deref());
    }

    let response = request.send().await?;
    if !response.status().is_success() {
      return Err(
        anyhow::anyhow!("httpreq: {action} failed for {fqdn}: status {}", response.status()).into(),
      );
    }
    Ok(())
  }
}

pub fn challenge_fqdn(domain: &str) -> String {
  format!("_acme-challenge.{domain}.")
}

#[async_trait]
impl DnsProvider for HttpreqDnsProvider {
  async fn set_acme_txt_record(
    &self,
    acme_challenge_identifier: &str,
    dns_value: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    self
      .post("present", &challenge_fqdn(acme_challenge_identifier), dns_value)
      .await
  }

  async fn remove_acme_txt_record(
    &self,
    acme_challenge_identifier: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    self
      .post("cleanup", &challenge_fqdn(acme_challenge_identifier), "")
      .await
  }
}
