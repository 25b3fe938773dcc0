use std::error::Error;
use std::sync::Arc;

use certplane_common::clock::{Clock, SystemClock};
use certplane_common::fs::{FileSystem, OsFs};
use certplane_common::logging::Logger;
use certplane_common::metrics::MetricsRegistry;
use certplane_common::requester::Requester;
use certplane_common::state_storage::{create_state_storage, StateStorage};
use tokio_util::sync::CancellationToken;

use crate::cache::{create_cache, Cache};
use crate::config::ServerConfig;
use crate::requester::create_requesters;

pub const METRICS_NAMESPACE: &str = "certplane_server";

/// Everything the controller's long-lived tasks share.
pub struct ServerContext {
  pub config: ServerConfig,
  pub logger: Logger,
  pub fs: Arc<dyn FileSystem>,
  pub clock: Arc<dyn Clock>,
  pub cache: Arc<dyn Cache>,
  pub state_storage: Arc<dyn StateStorage>,
  pub requesters: Vec<Arc<dyn Requester>>,
  pub metrics: Arc<MetricsRegistry>,
  pub cancel: CancellationToken,
}

impl ServerContext {
  pub async fn create(
    config: ServerConfig,
    logger: Logger,
    cancel: CancellationToken,
  ) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFs);
    let cache = create_cache(&config.cache).await?;
    let state_storage = create_state_storage(fs.clone(), &config.state)?;
    let requesters = create_requesters(&config.requesters, &logger)?;

    Ok(ServerContext {
      config,
      logger,
      fs,
      clock: Arc::new(SystemClock),
      cache,
      state_storage,
      requesters,
      metrics: Arc::new(MetricsRegistry::new(METRICS_NAMESPACE)),
      cancel,
    })
  }
}
