use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use certplane_common::requester::fetch_requests;
use certplane_common::types::{Account, Certificate, Certificates, DomainRequest, State};
use chrono::{DateTime, Utc};

use crate::acme::http_challenge::ChallengeHttp;
use crate::acme::{
  create_resolvers, CertificateResource, ChallengeKind, ObtainRequest, RenewOptions, Resolvers,
  DEFAULT_KEY,
};
use crate::cache::Cache;
use crate::context::ServerContext;
use crate::lock::ProcessLock;

const RUN_COUNT_METRIC: &str = "run_count";
const FETCH_ERROR_METRIC: &str = "fetch_error_number";
const OBTAIN_CERT_ERROR_METRIC: &str = "obtain_certificate_error_number";

/// Drives the certificate lifecycle: one reconciliation tick at startup,
/// then one per configured interval, serialized across replicas by the
/// shared-cache lock.
pub struct CertifierManager {
  lock: ProcessLock,
  resolvers: Option<Resolvers>,
  account: crate::acme::resolver::AccountHandle,
  http_challenge: Arc<ChallengeHttp>,
  metrics_init: bool,
}

impl CertifierManager {
  pub fn new(
    cache: Arc<dyn Cache>,
    lock_duration: Duration,
    http_challenge: Arc<ChallengeHttp>,
  ) -> Self {
    CertifierManager {
      lock: ProcessLock::new(cache, lock_duration),
      resolvers: None,
      account: crate::acme::resolver::AccountHandle::default(),
      http_challenge,
      metrics_init: false,
    }
  }

  #[cfg(test)]
  fn with_resolvers(mut self, resolvers: Resolvers) -> Self {
    self.resolvers = Some(resolvers);
    self
  }

  #[cfg(test)]
  fn with_race_delay(mut self, race_delay: Duration) -> Self {
    self.lock = self.lock.with_race_delay(race_delay);
    self
  }

  /// Runs the tick loop until cancellation. The first tick fires
  /// immediately.
  pub async fn start(&mut self, ctx: &ServerContext) {
    let mut ticker = tokio::time::interval(ctx.config.interval);
    loop {
      tokio::select! {
        _ = ticker.tick() => {
          ctx.logger.debug("tick received").await;
          if let Err(err) = self.run(ctx).await {
            ctx.logger.error(&err.to_string()).await;
          }
        }
        _ = ctx.cancel.cancelled() => {
          ctx.logger.info("stop asked by app, exiting...").await;
          return;
        }
      }
    }
  }

  /// One reconciliation tick. State load/save and lock failures abort the
  /// tick; everything else degrades per item.
  pub async fn run(&mut self, ctx: &ServerContext) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut state = ctx
      .state_storage
      .load()
      .map_err(|err| anyhow::anyhow!("failed to load state: {err}"))?;

    self.init_metrics(ctx, &state);

    let has_lock = self
      .lock
      .obtain()
      .await
      .map_err(|err| anyhow::anyhow!("unable to lock manager process with: {err}"))?;
    if !has_lock {
      ctx.logger.info("tick skipped due to process already running").await;
      return Ok(());
    }

    let result = self.run_locked(ctx, &mut state).await;
    if let Err(err) = self.lock.release().await {
      ctx
        .logger
        .error(&format!("unable to unlock manager process with: {err}"))
        .await;
    }
    result
  }

  async fn run_locked(
    &mut self,
    ctx: &ServerContext,
    state: &mut State,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    ctx.metrics.counter(RUN_COUNT_METRIC).inc();

    if state.account.as_ref().map_or(true, |account| !account.has_key()) {
      state.account = Some(Account::new(&ctx.config.acme.email));
    }

    if self.resolvers.is_none() {
      if let Some(account) = &state.account {
        if account.has_key() {
          self.account.prime_from_credentials(&account.key).await?;
        }
      }
      self.resolvers = Some(create_resolvers(
        &ctx.config.acme,
        self.account.clone(),
        self.http_challenge.clone(),
        &ctx.logger,
      )?);
    }

    self.register_account(ctx, state).await?;

    let (requests, fetch_errors) = fetch_requests(&ctx.requesters).await;
    if fetch_errors.is_empty() {
      ctx.metrics.gauge(FETCH_ERROR_METRIC).set(0.0);
    } else {
      ctx.metrics.gauge(FETCH_ERROR_METRIC).set(1.0);
      for (requester_id, err) in &fetch_errors {
        ctx
          .logger
          .error(&format!("unable to fetch requests from {requester_id}: {err}"))
          .await;
      }
    }

    self.matching_requests(ctx, state, &requests).await;

    let obtain_errors = self.obtain_certificates(ctx, state).await;
    if obtain_errors.is_empty() {
      ctx.metrics.gauge(OBTAIN_CERT_ERROR_METRIC).set(0.0);
    } else {
      ctx.metrics.gauge(OBTAIN_CERT_ERROR_METRIC).set(1.0);
      for err in &obtain_errors {
        ctx.logger.error(&err.to_string()).await;
      }
      ctx.logger.error("failed to obtain certificates").await;
    }

    // Unused bookkeeping is skipped when any requester failed: a partial
    // request list must not trigger false-positive deletions.
    if fetch_errors.is_empty() {
      ctx.logger.info("clean unused flag when certificates have been reused again").await;
      self.mark_certificates_as_reused(state, &requests);

      ctx.logger.info("clean up unused certificates").await;
      self.clean_unused_certificates(ctx, state, &requests).await;
    }

    self.update_metrics(ctx, state);

    ctx.state_storage.save(state)
  }

  async fn register_account(
    &self,
    ctx: &ServerContext,
    state: &mut State,
  ) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Some(account) = &mut state.account else {
      return Err(anyhow::anyhow!("failed to create account").into());
    };
    if account.registration.is_some() {
      return Ok(());
    }

    let resolvers = self
      .resolvers
      .as_ref()
      .ok_or_else(|| anyhow::anyhow!("resolvers are not initialized"))?;
    let default_resolver = resolvers
      .get(DEFAULT_KEY)
      .ok_or_else(|| anyhow::anyhow!("default resolver is missing"))?;

    let material = default_resolver
      .register(&account.email)
      .await
      .map_err(|err| anyhow::anyhow!("error when register ACME account: {err}"))?;
    account.key = material.credentials;
    account.registration = Some(material.registration);

    ctx
      .state_storage
      .save(state)
      .map_err(|err| anyhow::anyhow!("failed to save state: {err}"))?;
    Ok(())
  }

  /// Ensures every request is covered by a certificate entry, creating new
  /// ones with a unique slug-based identifier.
  async fn matching_requests(
    &self,
    ctx: &ServerContext,
    state: &mut State,
    requests: &[DomainRequest],
  ) {
    for request in requests {
      if state.certificates.match_request(request, false).is_some() {
        continue;
      }
      let Some(main) = request.domains.first().cloned() else {
        continue;
      };

      let base_identifier = main.as_str().replace('*', "wildcard");
      let mut index = 0;
      let mut identifier = format!("{base_identifier}-{index}");
      while !state.certificates.check_identifier_unique(&identifier) {
        index += 1;
        identifier = format!("{base_identifier}-{index}");
      }

      let certificate = Certificate {
        identifier,
        main: main.to_string(),
        domains: request.domains.clone(),
        ..Certificate::default()
      };
      ctx
        .logger
        .info(&format!(
          "create new certificate {} ({:?})",
          certificate.identifier,
          certificate.domains.as_string_vec()
        ))
        .await;

      let gauge = ctx.metrics.register_certificate_gauge(&certificate);
      gauge.set(expiration_timestamp(&certificate));
      state.certificates.push(certificate);
    }
  }

  /// Obtains missing material and renews expiring material, certificate by
  /// certificate. Each failure feeds the backoff counters.
  async fn obtain_certificates(
    &self,
    ctx: &ServerContext,
    state: &mut State,
  ) -> Vec<Box<dyn Error + Send + Sync>> {
    let mut errors: Vec<Box<dyn Error + Send + Sync>> = Vec::new();
    let Some(resolvers) = &self.resolvers else {
      return errors;
    };
    let acme_cfg = &ctx.config.acme;
    let renew_period = chrono_duration(acme_cfg.renew_period);
    let delay_failed = chrono_duration(acme_cfg.delay_failed);

    for certificate in state.certificates.iter_mut() {
      let now = ctx.clock.now();
      let Some(resolver) = resolvers.find_resolver(certificate) else {
        continue;
      };

      if let Some(fail_date) = certificate.obtain_fail_date {
        if certificate.obtain_fail_count >= acme_cfg.max_attempt && now < fail_date + delay_failed
        {
          ctx
            .logger
            .warn(&format!(
              "skip certificate {} due to max obtain fail reach",
              certificate.identifier
            ))
            .await;
          continue;
        }
      }

      if resolver.type_challenge() == ChallengeKind::Http01
        && certificate.domains.contains_wildcard()
      {
        certificate.obtain_fail_count += 1;
        certificate.obtain_fail_date = Some(now);
        errors.push(
          anyhow::anyhow!(
            "unable to obtain wildcard certificate without ACME DNS challenge {}",
            certificate.identifier
          )
          .into(),
        );
        continue;
      }

      let outcome = if !certificate.is_valid() {
        ctx
          .logger
          .info(&format!(
            "obtain certificate {} ({:?})",
            certificate.identifier,
            certificate.domains.as_string_vec()
          ))
          .await;
        resolver
          .obtain(ObtainRequest {
            domains: certificate.domains.clone(),
            bundle: true,
            must_staple: false,
          })
          .await
      } else if certificate
        .expiration_date
        .map_or(true, |expiration| expiration < now + renew_period)
      {
        ctx
          .logger
          .info(&format!(
            "renew certificate {} ({:?})",
            certificate.identifier,
            certificate.domains.as_string_vec()
          ))
          .await;
        resolver
          .renew_with_options(
            CertificateResource {
              main: certificate.main.clone(),
              domains: certificate.domains.clone(),
              private_key: certificate.key.clone(),
              certificate: certificate.certificate.clone(),
            },
            RenewOptions {
              bundle: true,
              must_staple: false,
            },
          )
          .await
      } else {
        ctx
          .logger
          .debug(&format!("nothing to do for certificate {}", certificate.identifier))
          .await;
        continue;
      };

      let resource = match outcome {
        Ok(resource) => resource,
        Err(err) => {
          certificate.obtain_fail_count += 1;
          certificate.obtain_fail_date = Some(now);
          errors.push(
            anyhow::anyhow!(
              "unable to obtain/renew certificate {} : {err}",
              certificate.identifier
            )
            .into(),
          );
          continue;
        }
      };

      certificate.key = resource.private_key;
      certificate.certificate = resource.certificate;
      match parse_certificate_expiration(&certificate.certificate) {
        Ok(expiration) => {
          certificate.expiration_date = Some(expiration);
          certificate.obtain_fail_count = 0;
          certificate.obtain_fail_date = None;
        }
        Err(err) => {
          certificate.obtain_fail_count += 1;
          certificate.obtain_fail_date = Some(now);
          errors.push(
            anyhow::anyhow!("failed to parse certificate for {}: {err}", certificate.identifier)
              .into(),
          );
        }
      }
    }

    errors
  }

  fn mark_certificates_as_reused(&self, state: &mut State, requests: &[DomainRequest]) {
    let used = state.certificates.used_certificates(requests);
    for used_certificate in used.iter() {
      if let Some(certificate) = state.certificates.get_mut(&used_certificate.identifier) {
        certificate.unused_at = None;
      }
    }
  }

  /// Stamps newly unused certificates and removes those whose retention
  /// has expired.
  async fn clean_unused_certificates(
    &self,
    ctx: &ServerContext,
    state: &mut State,
    requests: &[DomainRequest],
  ) {
    let now = ctx.clock.now();
    let retention = chrono_duration(ctx.config.unused_retention);
    let unused = state.certificates.unused_certificates(requests);

    let mut to_delete = Certificates::default();
    for unused_certificate in unused.iter() {
      let Some(certificate) = state.certificates.get_mut(&unused_certificate.identifier) else {
        continue;
      };
      match certificate.unused_at {
        None => {
          ctx
            .logger
            .info(&format!("certificate {} is detected unused", certificate.identifier))
            .await;
          certificate.unused_at = Some(now);
        }
        Some(unused_at) if unused_at < now - retention => {
          ctx
            .logger
            .info(&format!("certificate {} will be deleted", certificate.identifier))
            .await;
          to_delete.push(certificate.clone());
        }
        Some(_) => {}
      }
    }

    state.certificates = state.certificates.deletes(&to_delete);
  }

  fn init_metrics(&mut self, ctx: &ServerContext, state: &State) {
    if self.metrics_init {
      return;
    }
    self.metrics_init = true;

    for certificate in state.certificates.iter() {
      let gauge = ctx.metrics.register_certificate_gauge(certificate);
      gauge.set(expiration_timestamp(certificate));
    }
    ctx.metrics.counter_with_help(RUN_COUNT_METRIC, "Count of run");
    ctx
      .metrics
      .gauge_with_help(FETCH_ERROR_METRIC, "Number of error for fetch process");
    ctx
      .metrics
      .gauge_with_help(OBTAIN_CERT_ERROR_METRIC, "Number of error for obtain certificate process")
      .set(0.0);
  }

  /// Refreshes expiration gauges and drops gauges of deleted certificates.
  fn update_metrics(&self, ctx: &ServerContext, state: &State) {
    for (identifier, gauge) in ctx.metrics.certificate_gauges() {
      match state.certificates.get(&identifier) {
        Some(certificate) => gauge.set(expiration_timestamp(certificate)),
        None => ctx.metrics.remove_certificate_gauge(&identifier),
      }
    }
  }
}

fn expiration_timestamp(certificate: &Certificate) -> f64 {
  certificate
    .expiration_date
    .map(|expiration| expiration.timestamp() as f64)
    .unwrap_or(0.0)
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
  chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36500))
}

/// NotAfter of the first CERTIFICATE block of a PEM chain.
pub fn parse_certificate_expiration(
  pem: &[u8],
) -> Result<DateTime<Utc>, Box<dyn Error + Send + Sync>> {
  let der = rustls_pemfile::certs(&mut &pem[..])
    .next()
    .ok_or_else(|| anyhow::anyhow!("failed to decode certificate"))?
    .map_err(|err| anyhow::anyhow!("failed to decode certificate: {err}"))?;
  let (_, certificate) = x509_parser::parse_x509_certificate(&der)
    .map_err(|err| anyhow::anyhow!("failed to parse certificate: {err}"))?;
  DateTime::<Utc>::from_timestamp(certificate.validity().not_after.timestamp(), 0)
    .ok_or_else(|| anyhow::anyhow!("invalid certificate expiration").into())
}
