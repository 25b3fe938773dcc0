pub mod dns;
pub mod http_challenge;
pub mod resolver;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use certplane_common::logging::Logger;
use certplane_common::types::{AccountRegistration, Certificate, Domains};

use crate::acme::http_challenge::ChallengeHttp;
use crate::config::AcmeConfig;

pub const DEFAULT_KEY: &str = "default";
pub const TYPE_HTTP01: &str = "http-01";
pub const TYPE_DNS01: &str = "dns-01";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeKind {
  Http01,
  Dns01,
}

impl ChallengeKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChallengeKind::Http01 => TYPE_HTTP01,
      ChallengeKind::Dns01 => TYPE_DNS01,
    }
  }
}

/// Parameters for a first issuance.
#[derive(Clone, Debug)]
pub struct ObtainRequest {
  pub domains: Domains,
  pub bundle: bool,
  pub must_staple: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RenewOptions {
  pub bundle: bool,
  pub must_staple: bool,
}

/// Issued material for one certificate: the bundled chain plus its private
/// key, both PEM.
#[derive(Clone, Debug, Default)]
pub struct CertificateResource {
  pub main: String,
  pub domains: Domains,
  pub private_key: Vec<u8>,
  pub certificate: Vec<u8>,
}

/// Result of an account registration: the serialized account credentials
/// and the CA registration metadata.
pub struct AccountMaterial {
  pub credentials: Vec<u8>,
  pub registration: AccountRegistration,
}

/// A bound ACME client able to obtain and renew certificates using one
/// challenge type, selected per certificate through domain filters.
#[async_trait]
pub trait Resolver: Send + Sync {
  fn id(&self) -> &str;
  fn type_challenge(&self) -> ChallengeKind;
  async fn register(&self, email: &str) -> Result<AccountMaterial, Box<dyn Error + Send + Sync>>;
  async fn obtain(
    &self,
    request: ObtainRequest,
  ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>>;
  async fn renew_with_options(
    &self,
    resource: CertificateResource,
    options: RenewOptions,
  ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>>;
  fn matches(&self, certificate: &Certificate) -> bool;
}

/// True iff every certificate domain contains at least one filter as a
/// substring. Empty filters or an empty SAN set never match.
pub fn filters_match(filters: &[String], certificate: &Certificate) -> bool {
  if filters.is_empty() || certificate.domains.is_empty() {
    return false;
  }
  certificate
    .domains
    .iter()
    .all(|domain| filters.iter().any(|filter| domain.as_str().contains(filter.as_str())))
}

/// The resolver table: user-configured resolvers plus the built-in
/// HTTP-01 `default`.
pub struct Resolvers(pub HashMap<String, Arc<dyn Resolver>>);

impl Resolvers {
  pub fn get(&self, id: &str) -> Option<Arc<dyn Resolver>> {
    self.0.get(id).cloned()
  }

  /// Returns the first configured resolver whose filters cover the
  /// certificate, falling back to the default resolver.
  pub fn find_resolver(&self, certificate: &Certificate) -> Option<Arc<dyn Resolver>> {
    let mut ids: Vec<&String> = self.0.keys().filter(|id| id.as_str() != DEFAULT_KEY).collect();
    ids.sort();
    for id in ids {
      if let Some(resolver) = self.0.get(id) {
        if resolver.matches(certificate) {
          return Some(resolver.clone());
        }
      }
    }
    self.get(DEFAULT_KEY)
  }
}

/// Builds the resolver table from configuration. The shared account handle
/// binds every resolver to the single ACME account.
pub fn create_resolvers(
  cfg: &AcmeConfig,
  account: resolver::AccountHandle,
  http_challenge: Arc<ChallengeHttp>,
  logger: &Logger,
) -> Result<Resolvers, Box<dyn Error + Send + Sync>> {
  let mut instances: HashMap<String, Arc<dyn Resolver>> = HashMap::new();

  instances.insert(
    DEFAULT_KEY.to_string(),
    Arc::new(resolver::AcmeResolver::new(
      DEFAULT_KEY,
      vec!["*".to_string()],
      cfg.ca_server.clone(),
      account.clone(),
      resolver::ChallengeSolver::Http01(http_challenge.clone()),
      logger.clone(),
    )),
  );

  for (id, resolver_cfg) in &cfg.resolvers {
    let solver = if resolver_cfg.kind == TYPE_HTTP01 {
      resolver::ChallengeSolver::Http01(http_challenge.clone())
    } else {
      resolver::ChallengeSolver::Dns01 {
        provider: dns::create_dns_provider(&resolver_cfg.kind, &resolver_cfg.config)
          .map_err(|err| anyhow::anyhow!("failed to create resolver {id}: {err}"))?,
        propagation_delay: resolver_cfg.propagation,
      }
    };
    instances.insert(
      id.clone(),
      Arc::new(resolver::AcmeResolver::new(
        id,
        resolver_cfg.filters.clone(),
        cfg.ca_server.clone(),
        account.clone(),
        solver,
        logger.clone(),
      )),
    );
  }

  Ok(Resolvers(instances))
}

#[cfg(test)]
mod tests {
  use super::*;
  use certplane_common::types::Domains;

  fn certificate(domains: Vec<&str>) -> Certificate {
    Certificate {
      identifier: "test-0".to_string(),
      domains: Domains::from(domains),
      ..Certificate::default()
    }
  }

  struct StubResolver {
    id: String,
    filters: Vec<String>,
    kind: ChallengeKind,
  }

  #[async_trait]
  impl Resolver for StubResolver {
    fn id(&self) -> &str {
      &self.id
    }

    fn type_challenge(&self) -> ChallengeKind {
      self.kind
    }

    async fn register(
      &self,
      _email: &str,
    ) -> Result<AccountMaterial, Box<dyn Error + Send + Sync>> {
      Err(anyhow::anyhow!("not implemented").into())
    }

    async fn obtain(
      &self,
      _request: ObtainRequest,
    ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>> {
      Err(anyhow::anyhow!("not implemented").into())
    }

    async fn renew_with_options(
      &self,
      _resource: CertificateResource,
      _options: RenewOptions,
    ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>> {
      Err(anyhow::anyhow!("not implemented").into())
    }

    fn matches(&self, certificate: &Certificate) -> bool {
      filters_match(&self.filters, certificate)
    }
  }

  fn resolvers() -> Resolvers {
    let mut instances: HashMap<String, Arc<dyn Resolver>> = HashMap::new();
    instances.insert(
      DEFAULT_KEY.to_string(),
      Arc::new(StubResolver {
        id: DEFAULT_KEY.to_string(),
        filters: vec!["*".to_string()],
        kind: ChallengeKind::Http01,
      }),
    );
    instances.insert(
      "gandi".to_string(),
      Arc::new(StubResolver {
        id: "gandi".to_string(),
        filters: vec!["example.com".to_string()],
        kind: ChallengeKind::Dns01,
      }),
    );
    Resolvers(instances)
  }

  #[test]
  fn test_filters_match() {
    assert!(filters_match(
      &["example.com".to_string()],
      &certificate(vec!["www.example.com", "example.com"])
    ));
    assert!(!filters_match(
      &["example.org".to_string()],
      &certificate(vec!["example.com"])
    ));
    assert!(!filters_match(&[], &certificate(vec!["example.com"])));
    assert!(!filters_match(&["example.com".to_string()], &certificate(vec![])));
  }

  #[test]
  fn test_find_resolver_prefers_filter_match() {
    let resolvers = resolvers();
    let resolver = resolvers.find_resolver(&certificate(vec!["www.example.com"])).unwrap();
    assert_eq!("gandi", resolver.id());
  }

  #[test]
  fn test_find_resolver_falls_back_to_default() {
    let resolvers = resolvers();
    let resolver = resolvers.find_resolver(&certificate(vec!["example.org"])).unwrap();
    assert_eq!(DEFAULT_KEY, resolver.id());
  }
}
