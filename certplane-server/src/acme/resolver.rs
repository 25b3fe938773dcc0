use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use certplane_common::logging::Logger;
use certplane_common::types::{AccountRegistration, Certificate, Domains};
use instant_acme::{
  Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
  NewOrder, OrderStatus, RetryPolicy,
};
use tokio::sync::RwLock;

use crate::acme::dns::DnsProvider;
use crate::acme::http_challenge::ChallengeHttp;
use crate::acme::{
  filters_match, AccountMaterial, CertificateResource, ChallengeKind, ObtainRequest, RenewOptions,
  Resolver,
};

/// The single ACME account shared by every resolver. Registration fills
/// it; resolvers read it on each order.
#[derive(Clone, Default)]
pub struct AccountHandle {
  inner: Arc<RwLock<Option<Arc<Account>>>>,
}

impl AccountHandle {
  pub async fn set(&self, account: Account) {
    *self.inner.write().await = Some(Arc::new(account));
  }

  pub async fn get(&self) -> Option<Arc<Account>> {
    self.inner.read().await.clone()
  }

  /// Restores the account from credentials previously stored in state.
  pub async fn prime_from_credentials(
    &self,
    credentials: &[u8],
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let credentials: AccountCredentials = serde_json::from_slice(credentials)
      .map_err(|err| anyhow::anyhow!("failed to parse account credentials: {err}"))?;
    let account = Account::builder()?.from_credentials(credentials).await?;
    self.set(account).await;
    Ok(())
  }
}

/// The challenge mechanism a resolver validates orders with.
pub enum ChallengeSolver {
  Http01(Arc<ChallengeHttp>),
  Dns01 {
    provider: Arc<dyn DnsProvider>,
    propagation_delay: Duration,
  },
}

impl ChallengeSolver {
  fn kind(&self) -> ChallengeKind {
    match self {
      ChallengeSolver::Http01(_) => ChallengeKind::Http01,
      ChallengeSolver::Dns01 { .. } => ChallengeKind::Dns01,
    }
  }

  fn challenge_type(&self) -> ChallengeType {
    match self {
      ChallengeSolver::Http01(_) => ChallengeType::Http01,
      ChallengeSolver::Dns01 { .. } => ChallengeType::Dns01,
    }
  }
}

/// An ACME resolver bound to the shared account and one challenge solver.
pub struct AcmeResolver {
  id: String,
  filters: Vec<String>,
  directory_url: String,
  account: AccountHandle,
  solver: ChallengeSolver,
  logger: Logger,
}

impl AcmeResolver {
  pub fn new(
    id: impl Into<String>,
    filters: Vec<String>,
    directory_url: String,
    account: AccountHandle,
    solver: ChallengeSolver,
    logger: Logger,
  ) -> Self {
    AcmeResolver {
      id: id.into(),
      filters,
      directory_url,
      account,
      solver,
      logger,
    }
  }

  async fn order_certificate(
    &self,
    domains: &Domains,
  ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>> {
    let account = self
      .account
      .get()
      .await
      .ok_or_else(|| anyhow::anyhow!("ACME account is not registered"))?;

    let identifiers: Vec<Identifier> = domains
      .iter()
      .map(|domain| Identifier::Dns(domain.to_string()))
      .collect();
    let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;

    // (domain, token) pairs that need cleanup once the order settles.
    let mut presented: Vec<(String, String)> = Vec::new();
    let result = match self.solve_authorizations(&mut order, &mut presented).await {
      Ok(()) => self.finalize_order(&mut order, domains).await,
      Err(err) => Err(err),
    };

    for (domain, token) in &presented {
      match &self.solver {
        ChallengeSolver::Http01(challenge) => {
          challenge.cleanup(domain, token).await.unwrap_or_default();
        }
        ChallengeSolver::Dns01 { provider, .. } => {
          provider.remove_acme_txt_record(domain).await.unwrap_or_default();
        }
      }
    }

    result
  }

  async fn solve_authorizations(
    &self,
    order: &mut instant_acme::Order,
    presented: &mut Vec<(String, String)>,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut authorizations = order.authorizations();
    while let Some(authorization) = authorizations.next().await {
      let mut authorization = authorization?;
      match authorization.status {
        AuthorizationStatus::Pending => {}
        AuthorizationStatus::Valid => continue,
        _ => return Err(anyhow::anyhow!("invalid ACME authorization status").into()),
      }

      let mut challenge = authorization
        .challenge(self.solver.challenge_type())
        .ok_or_else(|| {
          anyhow::anyhow!("the ACME server doesn't support the requested challenge type")
        })?;

      let identifier = match &challenge.identifier().identifier {
        Identifier::Dns(identifier) => identifier.to_string(),
        other => return Err(anyhow::anyhow!("unsupported ACME identifier: {other:?}").into()),
      };

      let key_authorization = challenge.key_authorization();
      match &self.solver {
        ChallengeSolver::Http01(http_challenge) => {
          http_challenge
            .present(&identifier, &challenge.token, key_authorization.as_str())
            .await?;
        }
        ChallengeSolver::Dns01 {
          provider,
          propagation_delay,
        } => {
          provider
            .set_acme_txt_record(&identifier, &key_authorization.dns_value())
            .await?;
          self
            .logger
            .debug(&format!(
              "resolver {}: waiting for DNS propagation of {identifier}",
              self.id
            ))
            .await;
          tokio::time::sleep(*propagation_delay).await;
        }
      }
      presented.push((identifier, challenge.token.clone()));

      challenge.set_ready().await?;
    }

    Ok(())
  }

  async fn finalize_order(
    &self,
    order: &mut instant_acme::Order,
    domains: &Domains,
  ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>> {
    let status = order.poll_ready(&RetryPolicy::default()).await?;
    if status != OrderStatus::Ready {
      return Err(anyhow::anyhow!("ACME order ended in state {status:?}").into());
    }

    let private_key_pem = order.finalize().await?;
    let certificate_pem = order.poll_certificate(&RetryPolicy::default()).await?;

    Ok(CertificateResource {
      main: domains
        .first()
        .map(|domain| domain.to_string())
        .unwrap_or_default(),
      domains: domains.clone(),
      private_key: private_key_pem.into_bytes(),
      certificate: certificate_pem.into_bytes(),
    })
  }
}

#[async_trait]
impl Resolver for AcmeResolver {
  fn id(&self) -> &str {
    &self.id
  }

  fn type_challenge(&self) -> ChallengeKind {
    self.solver.kind()
  }

  async fn register(&self, email: &str) -> Result<AccountMaterial, Box<dyn Error + Send + Sync>> {
    let contact = format!("mailto:{email}");
    let contacts: Vec<&str> = if email.is_empty() {
      Vec::new()
    } else {
      vec![contact.as_str()]
    };

    let (account, credentials) = Account::builder()?
      .create(
        &NewAccount {
          contact: &contacts,
          terms_of_service_agreed: true,
          only_return_existing: false,
        },
        self.directory_url.clone(),
        None,
      )
      .await?;

    let serialized = serde_json::to_vec(&credentials)?;
    self.account.set(account).await;

    Ok(AccountMaterial {
      credentials: serialized,
      registration: AccountRegistration {
        uri: String::new(),
        status: "valid".to_string(),
      },
    })
  }

  async fn obtain(
    &self,
    request: ObtainRequest,
  ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>> {
    self.order_certificate(&request.domains).await
  }

  /// ACME renewal is re-issuance: a fresh order for the same SAN set.
  async fn renew_with_options(
    &self,
    resource: CertificateResource,
    _options: RenewOptions,
  ) -> Result<CertificateResource, Box<dyn Error + Send + Sync>> {
    self.order_certificate(&resource.domains).await
  }

  fn matches(&self, certificate: &Certificate) -> bool {
    filters_match(&self.filters, certificate)
  }
}
