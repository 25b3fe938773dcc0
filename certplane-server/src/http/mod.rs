use std::str::FromStr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use certplane_common::http::{api_prefix, CertificatesResponse, SERVER_API_GET_CERTIFICATES};
use certplane_common::logging::Logger;
use certplane_common::metrics::MetricsRegistry;
use certplane_common::state_storage::StateStorage;
use certplane_common::types::DomainRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::acme::http_challenge::ChallengeHttp;
use crate::config::JwtConfig;

pub const ACME_ENDPOINT: &str = "/.well-known/acme-challenge";

/// Shared state of the controller HTTP surface.
#[derive(Clone)]
pub struct HttpState {
  pub logger: Logger,
  pub state_storage: Arc<dyn StateStorage>,
  pub challenge: Arc<ChallengeHttp>,
  pub metrics: Arc<MetricsRegistry>,
  pub jwt: JwtConfig,
}

/// Builds the controller router: the public ACME challenge endpoint, the
/// optional metrics endpoint and the JWT-protected certificates API.
pub fn create_router(state: HttpState, metrics_enable: bool) -> Router {
  let mut router = Router::new().route(&format!("{ACME_ENDPOINT}/{{token}}"), any(challenge_handler));
  if metrics_enable {
    router = router.route("/metrics", get(metrics_handler));
  }

  let authorized = Router::new()
    .route(
      &api_prefix(SERVER_API_GET_CERTIFICATES),
      post(certificates_handler),
    )
    .layer(axum::middleware::from_fn_with_state(state.clone(), jwt_auth));

  router.merge(authorized).with_state(state)
}

/// Validates the `Authorization: Bearer` token signature with the
/// configured key and algorithm. No claim schema is enforced.
async fn jwt_auth(State(state): State<HttpState>, request: Request, next: Next) -> Response {
  let token = request
    .headers()
    .get(header::AUTHORIZATION)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.strip_prefix("Bearer "));
  let Some(token) = token else {
    return StatusCode::UNAUTHORIZED.into_response();
  };

  let algorithm = Algorithm::from_str(&state.jwt.method).unwrap_or(Algorithm::HS256);
  let mut validation = Validation::new(algorithm);
  validation.required_spec_claims = Default::default();
  validation.validate_exp = false;

  if decode::<serde_json::Value>(
    token,
    &DecodingKey::from_secret(state.jwt.key.as_bytes()),
    &validation,
  )
  .is_err()
  {
    return StatusCode::UNAUTHORIZED.into_response();
  }

  next.run(request).await
}

/// POST /api/certificates: matches each request against the loaded state,
/// returning only valid certificates.
async fn certificates_handler(
  State(state): State<HttpState>,
  body: Result<Json<Vec<DomainRequest>>, JsonRejection>,
) -> (StatusCode, Json<CertificatesResponse>) {
  let mut response = CertificatesResponse::default();
  let endpoint = api_prefix(SERVER_API_GET_CERTIFICATES);

  let requests = match body {
    Ok(Json(requests)) if !requests.is_empty() => requests,
    Ok(_) => {
      state
        .logger
        .error(&format!("http request ({endpoint}): failed to parse body: empty request list"))
        .await;
      return (StatusCode::INTERNAL_SERVER_ERROR, Json(response));
    }
    Err(err) => {
      state
        .logger
        .error(&format!("http request ({endpoint}): failed to parse body: {err}"))
        .await;
      return (StatusCode::INTERNAL_SERVER_ERROR, Json(response));
    }
  };

  let loaded = match state.state_storage.load() {
    Ok(loaded) => loaded,
    Err(err) => {
      state
        .logger
        .error(&format!("http request ({endpoint}): failed to load state: {err}"))
        .await;
      return (StatusCode::INTERNAL_SERVER_ERROR, Json(response));
    }
  };

  for request in requests {
    match loaded.certificates.match_request(&request, true) {
      Some(certificate) => {
        response.certificates.push(certificate.clone());
        response.requests.found.push(request);
      }
      None => {
        state
          .logger
          .warn(&format!(
            "http request ({endpoint}): does not found certificate for {:?}",
            request.domains.as_string_vec()
          ))
          .await;
        response.requests.not_found.push(request);
      }
    }
  }

  (StatusCode::OK, Json(response))
}

/// GET /.well-known/acme-challenge/{token}: serves the key authorization
/// stored by the HTTP-01 resolver, keyed by token and Host.
async fn challenge_handler(
  State(state): State<HttpState>,
  Path(token): Path<String>,
  headers: HeaderMap,
) -> Response {
  let host = headers
    .get(header::HOST)
    .and_then(|value| value.to_str().ok())
    .unwrap_or_default();

  state
    .logger
    .debug(&format!("challenge host={host},token={token}"))
    .await;

  match state.challenge.key_auth(&token, host).await {
    Some(key_auth) => (StatusCode::OK, key_auth).into_response(),
    None => StatusCode::NOT_FOUND.into_response(),
  }
}

async fn metrics_handler(State(state): State<HttpState>) -> Response {
  (
    [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
    state.metrics.render(),
  )
    .into_response()
}

#[cfg(test)]
mod tests {
  use super::*;
  use certplane_common::fs::MemoryFs;
  use certplane_common::state_storage::fs::FsStateStorage;
  use certplane_common::types::{Certificate, Certificates, Domains, State as PlaneState};
  use http_body_util::BodyExt;
  use tower::ServiceExt;

  use crate::cache::memory::MemoryCache;
  use crate::cache::Cache;

  const JWT_KEY: &str = "test-secret";

  fn token() -> String {
    jsonwebtoken::encode(
      &jsonwebtoken::Header::default(),
      &serde_json::json!({"sub": "agent"}),
      &jsonwebtoken::EncodingKey::from_secret(JWT_KEY.as_bytes()),
    )
    .unwrap()
  }

  fn router_with_state(certificates: Certificates) -> (Router, Arc<MemoryCache>) {
    let fs = Arc::new(MemoryFs::new());
    let storage = Arc::new(FsStateStorage::new(fs, "/app/state.json".into()));
    storage
      .save(&PlaneState {
        account: None,
        certificates,
      })
      .unwrap();

    let cache = Arc::new(MemoryCache::new(None));
    let state = HttpState {
      logger: Logger::sink(),
      state_storage: storage,
      challenge: Arc::new(ChallengeHttp::new(cache.clone(), Logger::sink())),
      metrics: Arc::new(MetricsRegistry::new("test")),
      jwt: JwtConfig {
        key: JWT_KEY.to_string(),
        method: "HS256".to_string(),
      },
    };
    (create_router(state, true), cache)
  }

  fn valid_certificate() -> Certificate {
    Certificate {
      identifier: "example.com-0".to_string(),
      main: "example.com".to_string(),
      domains: Domains::from(vec!["example.com"]),
      key: b"key".to_vec(),
      certificate: b"certificate".to_vec(),
      ..Certificate::default()
    }
  }

  fn certificates_request(token: Option<&str>, body: &str) -> axum::http::Request<axum::body::Body> {
    let mut builder = axum::http::Request::builder()
      .method("POST")
      .uri("/api/certificates")
      .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
      builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(axum::body::Body::from(body.to_string())).unwrap()
  }

  #[tokio::test]
  async fn test_certificates_requires_jwt() {
    let (router, _) = router_with_state(Certificates::default());
    let response = router
      .oneshot(certificates_request(None, "[]"))
      .await
      .unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, response.status());
  }

  #[tokio::test]
  async fn test_certificates_rejects_bad_token() {
    let (router, _) = router_with_state(Certificates::default());
    let response = router
      .oneshot(certificates_request(Some("not-a-token"), "[]"))
      .await
      .unwrap();
    assert_eq!(StatusCode::UNAUTHORIZED, response.status());
  }

  #[tokio::test]
  async fn test_certificates_found_and_not_found() {
    let (router, _) = router_with_state(Certificates(vec![valid_certificate()]));
    let body = r#"[{"domains":["example.com"]},{"domains":["example.org"]}]"#;
    let response = router
      .oneshot(certificates_request(Some(&token()), body))
      .await
      .unwrap();
    assert_eq!(StatusCode::OK, response.status());

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let decoded: CertificatesResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(1, decoded.certificates.len());
    assert_eq!("example.com-0", decoded.certificates[0].identifier);
    assert_eq!(1, decoded.requests.found.len());
    assert_eq!(1, decoded.requests.not_found.len());
  }

  #[tokio::test]
  async fn test_certificates_skips_invalid_certificates() {
    let mut certificate = valid_certificate();
    certificate.key = Vec::new();
    let (router, _) = router_with_state(Certificates(vec![certificate]));
    let body = r#"[{"domains":["example.com"]}]"#;
    let response = router
      .oneshot(certificates_request(Some(&token()), body))
      .await
      .unwrap();

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let decoded: CertificatesResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(decoded.certificates.is_empty());
    assert_eq!(1, decoded.requests.not_found.len());
  }

  #[tokio::test]
  async fn test_certificates_empty_body_is_error() {
    let (router, _) = router_with_state(Certificates::default());
    let response = router
      .oneshot(certificates_request(Some(&token()), "[]"))
      .await
      .unwrap();
    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, response.status());
  }

  #[tokio::test]
  async fn test_challenge_endpoint() {
    let (router, cache) = router_with_state(Certificates::default());
    cache
      .set("acme_http_token123_example.com", "token123.abc", None)
      .await
      .unwrap();

    let request = axum::http::Request::builder()
      .uri("/.well-known/acme-challenge/token123")
      .header(header::HOST, "example.com")
      .body(axum::body::Body::empty())
      .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(StatusCode::OK, response.status());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(b"token123.abc".as_slice(), &bytes[..]);

    let request = axum::http::Request::builder()
      .uri("/.well-known/acme-challenge/unknown")
      .header(header::HOST, "example.com")
      .body(axum::body::Body::empty())
      .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, response.status());
  }

  #[tokio::test]
  async fn test_metrics_endpoint() {
    let (router, _) = router_with_state(Certificates::default());
    let request = axum::http::Request::builder()
      .uri("/metrics")
      .body(axum::body::Body::empty())
      .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(StatusCode::OK, response.status());
  }
}
