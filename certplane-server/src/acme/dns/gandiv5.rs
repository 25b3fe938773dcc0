use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::acme::dns::{challenge_record_name, split_zone, DnsProvider};

pub const GANDIV5_KEY: &str = "gandiv5";

const LIVEDNS_API: &str = "https://api.gandi.net/v5/livedns";
const API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ConfigGandiv5 {
  api_key: String,
  #[serde(default = "default_ttl")]
  ttl: u32,
}

fn default_ttl() -> u32 {
  300
}

/// Gandi LiveDNS provider for DNS-01 challenges.
pub struct Gandiv5DnsProvider {
  client: reqwest::Client,
  api_key: String,
  ttl: u32,
}

impl Gandiv5DnsProvider {
  pub fn create(config: &serde_yaml::Value) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let config: ConfigGandiv5 = serde_yaml::from_value(config.clone())
      .map_err(|err| anyhow::anyhow!("gandiv5 provider: {err}"))?;
    if config.api_key.is_empty() {
      return Err(anyhow::anyhow!("gandiv5 provider: api_key must not be empty").into());
    }
    Ok(Gandiv5DnsProvider {
      client: reqwest::Client::builder().timeout(API_TIMEOUT).build()?,
      api_key: config.api_key,
      ttl: config.ttl,
    })
  }

  fn record_url(&self, zone: &str, record_name: &str) -> String {
    format!("{LIVEDNS_API}/domains/{zone}/records/{record_name}/TXT")
  }
}

#[async_trait]
impl DnsProvider for Gandiv5DnsProvider {
  async fn set_acme_txt_record(
    &self,
    acme_challenge_identifier: &str,
    dns_value: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (subdomain, zone) = split_zone(acme_challenge_identifier).await;
    let record_name = challenge_record_name(&subdomain);

    let response = self
      .client
      .put(self.record_url(&zone, &record_name))
      .header("Authorization", format!("Apikey {}", self.api_key))
      .json(&serde_json::json!({
        "rrset_ttl": self.ttl,
        "rrset_values": [format!("\"{dns_value}\"")],
      }))
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(
        anyhow::anyhow!(
          "gandiv5: failed to set TXT record for {acme_challenge_identifier}: status {}",
          response.status()
        )
        .into(),
      );
    }
    Ok(())
  }

  async fn remove_acme_txt_record(
    &self,
    acme_challenge_identifier: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (subdomain, zone) = split_zone(acme_challenge_identifier).await;
    let record_name = challenge_record_name(&subdomain);

    let response = self
      .client
      .delete(self.record_url(&zone, &record_name))
      .header("Authorization", format!("Apikey {}", self.api_key))
      .send()
      .await?;

    if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
      return Err(
        anyhow::anyhow!(
          "gandiv5: failed to remove TXT record for {acme_challenge_identifier}: status {}",
          response.status()
        )
        .into(),
      );
    }
    Ok(())
  }
}
