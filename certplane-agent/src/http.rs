use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use certplane_common::http::{api_prefix, AGENT_API_REQUESTS};
use certplane_common::logging::Logger;
use certplane_common::metrics::MetricsRegistry;
use certplane_common::requester::{fetch_requests, Requester};
use certplane_common::types::DomainRequest;

/// Shared state of the agent HTTP surface.
#[derive(Clone)]
pub struct HttpState {
  pub logger: Logger,
  pub requesters: Vec<Arc<dyn Requester>>,
  pub metrics: Arc<MetricsRegistry>,
}

/// Builds the agent router: the loopback requests endpoint and the
/// optional metrics endpoint.
pub fn create_router(state: HttpState, metrics_enable: bool) -> Router {
  let mut router = Router::new().route(&api_prefix(AGENT_API_REQUESTS), get(requests_handler));
  if metrics_enable {
    router = router.route("/metrics", get(metrics_handler));
  }
  router.with_state(state)
}

/// GET /api/requests: the current union of all local requesters.
/// Per-requester failures are logged, never surfaced.
async fn requests_handler(State(state): State<HttpState>) -> Json<Vec<DomainRequest>> {
  let (requests, errors) = fetch_requests(&state.requesters).await;
  for (requester_id, err) in errors {
    state
      .logger
      .error(&format!("requester ({requester_id}) failed to fetch with: {err}"))
      .await;
  }
  Json(requests)
}

async fn metrics_handler(State(state): State<HttpState>) -> Response {
  (
    [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
    state.metrics.render(),
  )
    .into_response()
}
