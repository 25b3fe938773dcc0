pub mod gandiv5;
pub mod httpreq;

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;

/// A DNS provider able to place and remove the TXT record for a DNS-01
/// challenge identifier.
#[async_trait]
pub trait DnsProvider: Send + Sync {
  async fn set_acme_txt_record(
    &self,
    acme_challenge_identifier: &str,
    dns_value: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>>;

  #[allow(unused_variables)]
  async fn remove_acme_txt_record(
    &self,
    acme_challenge_identifier: &str,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    Ok(())
  }
}

pub fn create_dns_provider(
  kind: &str,
  config: &serde_yaml::Value,
) -> Result<Arc<dyn DnsProvider>, Box<dyn Error + Send + Sync>> {
  match kind {
    gandiv5::GANDIV5_KEY => Ok(Arc::new(gandiv5::Gandiv5DnsProvider::create(config)?)),
    httpreq::HTTPREQ_KEY => Ok(Arc::new(httpreq::HttpreqDnsProvider::create(config)?)),
    kind => Err(anyhow::anyhow!("config acme resolver type '{kind}' does not exist").into()),
  }
}

/// The record name for a challenge identifier relative to its zone.
pub fn challenge_record_name(subdomain: &str) -> String {
  if subdomain.is_empty() {
    "_acme-challenge".to_string()
  } else {
    format!("_acme-challenge.{subdomain}")
  }
}

/// Splits a challenge identifier into (subdomain, zone) by walking the
/// labels until a SOA record answers.
pub async fn split_zone(domain_name: &str) -> (String, String) {
  let labels: Vec<&str> = domain_name
    .strip_suffix('.')
    .unwrap_or(domain_name)
    .split('.')
    .collect();

  let resolver = match hickory_resolver::Resolver::builder_tokio() {
    Ok(builder) => builder.build(),
    Err(_) => hickory_resolver::Resolver::builder_with_config(
      ResolverConfig::default(),
      TokioConnectionProvider::default(),
    )
    .build(),
  };

  for index in 0..labels.len() {
    let zone = labels[index..].join(".");
    if resolver.soa_lookup(format!("{zone}.")).await.is_ok() {
      return (labels[..index].join("."), zone);
    }
  }

  (String::new(), labels.join("."))
}
