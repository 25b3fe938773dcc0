use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use certplane_common::hook::HookManager;
use certplane_common::http::{api_prefix, CertificatesResponse, SERVER_API_GET_CERTIFICATES};
use certplane_common::logging::Logger;
use certplane_common::requester::fetch_requests;
use certplane_common::types::{Certificates, DomainRequest};

use crate::context::AgentContext;

const RUN_COUNT_METRIC: &str = "run_count";
const FETCH_ERROR_METRIC: &str = "fetch_error_number";
const DOMAIN_REQUESTS_METRIC: &str = "domains_requests_number";
const DOMAIN_REQUESTS_FOUND_METRIC: &str = "domains_requests_certificate_found_number";
const DOMAIN_REQUESTS_NOT_FOUND_METRIC: &str = "domains_requests_certificate_not_found_number";

const MANAGER_TIMEOUT: Duration = Duration::from_secs(1);

/// Materializes certificates onto the local machine: discovers domain
/// requirements, pulls matching certificates from the controller, diffs
/// them into every storage backend and runs the deduplicated post-hooks.
pub struct AgentService {
  client: reqwest::Client,
  hook_manager: Arc<HookManager>,
  metrics_init: bool,
}

impl AgentService {
  pub fn new(logger: Logger) -> Result<Self, Box<dyn Error + Send + Sync>> {
    Ok(AgentService {
      client: reqwest::Client::builder().timeout(MANAGER_TIMEOUT).build()?,
      hook_manager: Arc::new(HookManager::new(logger)),
      metrics_init: false,
    })
  }

  /// Runs the tick loop until cancellation. The first tick fires
  /// immediately; the hook collector runs alongside.
  pub async fn start(&mut self, ctx: &AgentContext) {
    let hook_manager = self.hook_manager.clone();
    let hook_cancel = ctx.cancel.clone();
    tokio::spawn(async move {
      hook_manager.start(hook_cancel).await;
    });

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

  /// One materialization tick.
  pub async fn run(&mut self, ctx: &AgentContext) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut state = ctx
      .state_storage
      .load()
      .map_err(|err| anyhow::anyhow!("failed to load state: {err}"))?;

    self.init_metrics(ctx, &state);
    ctx.metrics.counter(RUN_COUNT_METRIC).inc();

    let (requests, fetch_errors) = fetch_requests(&ctx.requesters).await;
    if fetch_errors.is_empty() {
      ctx.metrics.gauge(FETCH_ERROR_METRIC).set(0.0);
    } else {
      ctx.metrics.gauge(FETCH_ERROR_METRIC).set(1.0);
      for (requester_id, err) in &fetch_errors {
        ctx
          .logger
          .error(&format!("requester ({requester_id}) failed to fetch with: {err}"))
          .await;
      }
    }
    ctx
      .metrics
      .gauge(DOMAIN_REQUESTS_METRIC)
      .set(requests.len() as f64);

    if !requests.is_empty() {
      let response = self.get_request_manager(ctx, &requests).await?;

      ctx
        .metrics
        .gauge(DOMAIN_REQUESTS_FOUND_METRIC)
        .set(response.requests.found.len() as f64);
      ctx
        .metrics
        .gauge(DOMAIN_REQUESTS_NOT_FOUND_METRIC)
        .set(response.requests.not_found.len() as f64);
      ctx
        .logger
        .debug(&format!("found {} certificates", response.certificates.len()))
        .await;
      ctx
        .logger
        .debug(&format!("{} domains requests found", response.requests.found.len()))
        .await;
      ctx
        .logger
        .debug(&format!(
          "{} domains requests not found",
          response.requests.not_found.len()
        ))
        .await;
      if !response.requests.not_found.is_empty() {
        ctx
          .logger
          .warn(&format!(
            "some domains requests not found ({})",
            response.requests.not_found.len()
          ))
          .await;
      }

      for manager_certificate in response.certificates.iter() {
        match state.certificates.get_mut(&manager_certificate.identifier) {
          Some(certificate) => {
            certificate.main = manager_certificate.main.clone();
            certificate.domains = manager_certificate.domains.clone();
            certificate.key = manager_certificate.key.clone();
            certificate.certificate = manager_certificate.certificate.clone();
            certificate.expiration_date = manager_certificate.expiration_date;
          }
          None => state.certificates.push(manager_certificate.clone()),
        }
      }
    }

    // Unused certificates are only computed from a complete request list.
    let unused = if fetch_errors.is_empty() {
      state.certificates.unused_certificates(&requests)
    } else {
      Certificates::default()
    };
    ctx
      .logger
      .debug(&format!("found {} unused certificates", unused.len()))
      .await;

    let mut delete_failed = false;
    for storage in &ctx.storages {
      ctx.logger.debug("save certificates in storage").await;
      let save_errors = storage.save(&state.certificates, &self.hook_manager.sender()).await;
      for err in save_errors {
        ctx
          .logger
          .error(&format!("storage {}, failed to save certificates: {err}", storage.id()))
          .await;
      }

      let delete_errors = storage.delete(&unused, &self.hook_manager.sender()).await;
      if !delete_errors.is_empty() {
        delete_failed = true;
        for err in delete_errors {
          ctx
            .logger
            .error(&format!(
              "storage {}, failed to delete unused certificates: {err}",
              storage.id()
            ))
            .await;
        }
      }
    }

    if !delete_failed && !unused.is_empty() {
      ctx.logger.debug("delete unused certificates in state").await;
      state.certificates = state.certificates.deletes(&unused);
    }

    self.hook_manager.run_hooks().await;

    ctx.logger.debug("save state").await;
    ctx.state_storage.save(&state)
  }

  /// POSTs the requests to the controller and decodes the certificate
  /// response. Failures abort the tick.
  async fn get_request_manager(
    &self,
    ctx: &AgentContext,
    requests: &[DomainRequest],
  ) -> Result<CertificatesResponse, Box<dyn Error + Send + Sync>> {
    let url = format!(
      "{}{}",
      ctx.config.manager.address,
      api_prefix(SERVER_API_GET_CERTIFICATES)
    );
    let response = self
      .client
      .post(url)
      .bearer_auth(&ctx.config.manager.token)
      .json(requests)
      .send()
      .await?;

    if !response.status().is_success() {
      return Err(anyhow::anyhow!("response have invalid status code {}", response.status()).into());
    }
    Ok(response.json::<CertificatesResponse>().await?)
  }

  fn init_metrics(&mut self, ctx: &AgentContext, state: &certplane_common::types::State) {
    if self.metrics_init {
      return;
    }
    self.metrics_init = true;

    for certificate in state.certificates.iter() {
      let gauge = ctx.metrics.register_certificate_gauge(certificate);
      gauge.set(
        certificate
          .expiration_date
          .map(|expiration| expiration.timestamp() as f64)
          .unwrap_or(0.0),
      );
    }
    ctx.metrics.counter_with_help(RUN_COUNT_METRIC, "Count of run");
    ctx
      .metrics
      .gauge_with_help(FETCH_ERROR_METRIC, "Number of error for fetch process");
    ctx
      .metrics
      .gauge_with_help(DOMAIN_REQUESTS_METRIC, "Number of domains requests")
      .set(0.0);
    ctx
      .metrics
      .gauge_with_help(
        DOMAIN_REQUESTS_FOUND_METRIC,
        "Number of domains requests certificate found",
      )
      .set(0.0);
    ctx
      .metrics
      .gauge_with_help(
        DOMAIN_REQUESTS_NOT_FOUND_METRIC,
        "Number of domains requests certificate not found",
      )
      .set(0.0);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::{Path, PathBuf};

  use axum::routing::post;
  use axum::{Json, Router};
  use certplane_common::clock::FakeClock;
  use certplane_common::fs::{FileSystem, MemoryFs};
  use certplane_common::http::RequestsResponse;
  use certplane_common::metrics::MetricsRegistry;
  use certplane_common::requester::static_list::StaticRequester;
  use certplane_common::requester::{Requester, RequesterError};
  use certplane_common::state_storage::fs::FsStateStorage;
  use certplane_common::state_storage::StateStorage;
  use certplane_common::types::{Certificate, Domains, State};
  use tokio_util::sync::CancellationToken;

  use crate::config::{AgentConfig, ManagerConfig, StorageConfig};
  use crate::storage::create_storages;

  use async_trait::async_trait;

  const STATE_PATH: &str = "/var/lib/certplane/agent.json";

  struct FailingRequester;

  #[async_trait]
  impl Requester for FailingRequester {
    fn id(&self) -> &str {
      "broken"
    }

    async fn fetch(&self) -> (Vec<DomainRequest>, Option<RequesterError>) {
      (vec![], Some(anyhow::anyhow!("requester (broken) failed to fetch").into()))
    }
  }

  fn controller_certificate() -> Certificate {
    Certificate {
      identifier: "example.com-0".to_string(),
      main: "example.com".to_string(),
      domains: Domains::from(vec!["example.com"]),
      key: b"K".to_vec(),
      certificate: b"C".to_vec(),
      expiration_date: Some("2026-11-01T00:00:00Z".parse().unwrap()),
      ..Certificate::default()
    }
  }

  async fn serve_controller(certificates: Certificates) -> (String, CancellationToken) {
    let router = Router::new().route(
      "/api/certificates",
      post(move |Json(requests): Json<Vec<DomainRequest>>| {
        let certificates = certificates.clone();
        async move {
          let mut response = CertificatesResponse {
            certificates: Certificates::default(),
            requests: RequestsResponse::default(),
          };
          for request in requests {
            match certificates.match_request(&request, true) {
              Some(certificate) => {
                response.certificates.push(certificate.clone());
                response.requests.found.push(request);
              }
              None => response.requests.not_found.push(request),
            }
          }
          Json(response)
        }
      }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
      axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .unwrap_or_default();
    });
    (address, cancel)
  }

  fn agent_config(manager_address: &str) -> AgentConfig {
    AgentConfig {
      requesters: Vec::new(),
      storages: Vec::new(),
      state: Default::default(),
      http: Default::default(),
      manager: ManagerConfig {
        address: manager_address.to_string(),
        token: "jwt-token".to_string(),
      },
      interval: Duration::from_secs(300),
      log_level: certplane_common::logging::LogLevel::Error,
    }
  }

  fn context(
    fs: Arc<MemoryFs>,
    manager_address: &str,
    requesters: Vec<Arc<dyn Requester>>,
    storages_config: Vec<StorageConfig>,
  ) -> AgentContext {
    AgentContext {
      config: agent_config(manager_address),
      logger: Logger::sink(),
      fs: fs.clone(),
      clock: Arc::new(FakeClock::new("2026-06-01T00:00:00Z".parse().unwrap())),
      state_storage: Arc::new(FsStateStorage::new(fs.clone(), PathBuf::from(STATE_PATH))),
      requesters,
      storages: create_storages(fs, &storages_config).unwrap(),
      metrics: Arc::new(MetricsRegistry::new("test")),
      cancel: CancellationToken::new(),
    }
  }

  fn fs_storage_config(path: &str) -> StorageConfig {
    StorageConfig {
      id: "local".to_string(),
      kind: "fs".to_string(),
      config: serde_yaml::from_str(&format!("path: {path}\n")).unwrap(),
    }
  }

  #[tokio::test]
  async fn test_materializes_certificates_from_controller() {
    let (address, cancel) = serve_controller(Certificates(vec![controller_certificate()])).await;
    let fs = Arc::new(MemoryFs::new());
    let requester: Arc<dyn Requester> = Arc::new(StaticRequester::new(
      "static-main",
      vec![Domains::from(vec!["example.com"])],
    ));

    let hook_marker = std::env::temp_dir().join(format!("certplane-hook-{}", std::process::id()));
    let storage_config = StorageConfig {
      id: "local".to_string(),
      kind: "fs".to_string(),
      config: serde_yaml::from_str(&format!(
        "path: /app/storage\npost_hook:\n  cmd: touch {}\n",
        hook_marker.display()
      ))
      .unwrap(),
    };
    let ctx = context(fs.clone(), &address, vec![requester], vec![storage_config]);
    let mut service = AgentService::new(Logger::sink()).unwrap();

    // The hook collector normally runs from start().
    let hook_manager = service.hook_manager.clone();
    let hook_cancel = ctx.cancel.clone();
    tokio::spawn(async move { hook_manager.start(hook_cancel).await });

    service.run(&ctx).await.unwrap();
    cancel.cancel();

    assert_eq!(Some(b"K".to_vec()), fs.contents("/app/storage/example.com-0.key"));
    assert_eq!(Some(b"C".to_vec()), fs.contents("/app/storage/example.com-0.crt"));
    // The post-hook ran after the files changed.
    assert!(hook_marker.exists());
    std::fs::remove_file(&hook_marker).unwrap_or_default();

    let state = FsStateStorage::new(fs.clone(), PathBuf::from(STATE_PATH)).load().unwrap();
    assert_eq!(1, state.certificates.len());
    assert_eq!("example.com-0", state.certificates[0].identifier);
    assert_eq!(b"K".to_vec(), state.certificates[0].key);
    assert_eq!(1.0, ctx.metrics.gauge(DOMAIN_REQUESTS_FOUND_METRIC).get());
  }

  #[tokio::test]
  async fn test_upserts_existing_certificate() {
    let (address, cancel) = serve_controller(Certificates(vec![controller_certificate()])).await;
    let fs = Arc::new(MemoryFs::new());
    FsStateStorage::new(fs.clone(), PathBuf::from(STATE_PATH))
      .save(&State {
        account: None,
        certificates: Certificates(vec![Certificate {
          identifier: "example.com-0".to_string(),
          main: "example.com".to_string(),
          domains: Domains::from(vec!["example.com"]),
          key: b"old-key".to_vec(),
          certificate: b"old-cert".to_vec(),
          ..Certificate::default()
        }]),
      })
      .unwrap();

    let requester: Arc<dyn Requester> = Arc::new(StaticRequester::new(
      "static-main",
      vec![Domains::from(vec!["example.com"])],
    ));
    let ctx = context(fs.clone(), &address, vec![requester], vec![fs_storage_config("/app/storage")]);
    let mut service = AgentService::new(Logger::sink()).unwrap();

    service.run(&ctx).await.unwrap();
    cancel.cancel();

    let state = FsStateStorage::new(fs, PathBuf::from(STATE_PATH)).load().unwrap();
    assert_eq!(1, state.certificates.len());
    assert_eq!(b"K".to_vec(), state.certificates[0].key);
  }

  #[tokio::test]
  async fn test_unused_certificates_removed_from_storage_and_state() {
    let (address, cancel) = serve_controller(Certificates::default()).await;
    let fs = Arc::new(MemoryFs::new());
    FsStateStorage::new(fs.clone(), PathBuf::from(STATE_PATH))
      .save(&State {
        account: None,
        certificates: Certificates(vec![controller_certificate()]),
      })
      .unwrap();
    fs.write(Path::new("/app/storage/example.com-0.key"), b"K", 0o660).unwrap();
    fs.write(Path::new("/app/storage/example.com-0.crt"), b"C", 0o660).unwrap();

    let requester: Arc<dyn Requester> = Arc::new(StaticRequester::new(
      "static-main",
      vec![Domains::from(vec!["example.org"])],
    ));
    let ctx = context(fs.clone(), &address, vec![requester], vec![fs_storage_config("/app/storage")]);
    let mut service = AgentService::new(Logger::sink()).unwrap();

    service.run(&ctx).await.unwrap();
    cancel.cancel();

    // The stale certificate is gone from disk and from the local state.
    assert_eq!(None, fs.contents("/app/storage/example.com-0.key"));
    let state = FsStateStorage::new(fs, PathBuf::from(STATE_PATH)).load().unwrap();
    assert!(state
      .certificates
      .iter()
      .all(|certificate| certificate.identifier != "example.com-0"));
  }

  #[tokio::test]
  async fn test_fetch_error_keeps_unused_certificates() {
    let (address, cancel) = serve_controller(Certificates::default()).await;
    let fs = Arc::new(MemoryFs::new());
    FsStateStorage::new(fs.clone(), PathBuf::from(STATE_PATH))
      .save(&State {
        account: None,
        certificates: Certificates(vec![controller_certificate()]),
      })
      .unwrap();

    let requester: Arc<dyn Requester> = Arc::new(FailingRequester);
    let ctx = context(fs.clone(), &address, vec![requester], vec![fs_storage_config("/app/storage")]);
    let mut service = AgentService::new(Logger::sink()).unwrap();

    service.run(&ctx).await.unwrap();
    cancel.cancel();

    let state = FsStateStorage::new(fs, PathBuf::from(STATE_PATH)).load().unwrap();
    assert_eq!(1, state.certificates.len());
    assert_eq!(1.0, ctx.metrics.gauge(FETCH_ERROR_METRIC).get());
  }

  #[tokio::test]
  async fn test_controller_error_aborts_tick() {
    let fs = Arc::new(MemoryFs::new());
    let requester: Arc<dyn Requester> = Arc::new(StaticRequester::new(
      "static-main",
      vec![Domains::from(vec!["example.com"])],
    ));
    // Nothing listens on this address.
    let ctx = context(
      fs,
      "http://127.0.0.1:1",
      vec![requester],
      vec![fs_storage_config("/app/storage")],
    );
    let mut service = AgentService::new(Logger::sink()).unwrap();

    assert!(service.run(&ctx).await.is_err());
  }

  #[tokio::test]
  async fn test_no_requests_skips_controller_call() {
    let fs = Arc::new(MemoryFs::new());
    // No requesters at all: the (unreachable) controller must not matter.
    let ctx = context(
      fs.clone(),
      "http://127.0.0.1:1",
      vec![],
      vec![fs_storage_config("/app/storage")],
    );
    let mut service = AgentService::new(Logger::sink()).unwrap();

    service.run(&ctx).await.unwrap();
    assert!(fs.contents(STATE_PATH).is_some());
  }
}
