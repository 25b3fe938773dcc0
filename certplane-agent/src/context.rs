use std::error::Error;
use std::sync::Arc;

use certplane_common::clock::{Clock, SystemClock};
use certplane_common::fs::{FileSystem, OsFs};
use certplane_common::logging::Logger;
use certplane_common::metrics::MetricsRegistry;
use certplane_common::requester::Requester;
use certplane_common::state_storage::{create_state_storage, StateStorage};
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::requester::create_requesters;
use crate::storage::{create_storages, Storage};

pub const METRICS_NAMESPACE: &str = "certplane_agent";

/// Everything the agent's long-lived tasks share.
pub struct AgentContext {
  pub config: AgentConfig,
  pub logger: Logger,
  pub fs: Arc<dyn FileSystem>,
  pub clock: Arc<dyn Clock>,
  pub state_storage: Arc<dyn StateStorage>,
  pub requesters: Vec<Arc<dyn Requester>>,
  pub storages: Vec<Arc<dyn Storage>>,
  pub metrics: Arc<MetricsRegistry>,
  pub cancel: CancellationToken,
}

impl AgentContext {
  pub fn create(
    config: AgentConfig,
    logger: Logger,
    cancel: CancellationToken,
  ) -> Result<Self, Box<dyn Error + Send + Sync>> {
    let fs: Arc<dyn FileSystem> = Arc::new(OsFs);
    let state_storage = create_state_storage(fs.clone(), &config.state)?;
    let requesters = create_requesters(fs.clone(), &config.requesters, &logger)?;
    let storages = create_storages(fs.clone(), &config.storages)?;

    Ok(AgentContext {
      config,
      logger,
      fs,
      clock: Arc::new(SystemClock),
      state_storage,
      requesters,
      storages,
      metrics: Arc::new(MetricsRegistry::new(METRICS_NAMESPACE)),
      cancel,
    })
  }
}
