use std::error::Error;
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::config::TlsConfig;
use crate::types::{Certificates, DomainRequest};

pub const SERVER_API_GET_CERTIFICATES: &str = "certificates";
pub const AGENT_API_REQUESTS: &str = "requests";

pub fn api_prefix(path: &str) -> String {
  format!("/api/{path}")
}

/// Controller response to a batch of domain requests: the matching valid
/// certificates plus which requests were and were not satisfied.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificatesResponse {
  pub certificates: Certificates,
  pub requests: RequestsResponse,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestsResponse {
  pub found: Vec<DomainRequest>,
  pub not_found: Vec<DomainRequest>,
}

/// Serves the router over plain HTTP until cancellation.
pub async fn serve_http(
  listen: &str,
  router: Router,
  cancel: CancellationToken,
) -> Result<(), Box<dyn Error + Send + Sync>> {
  let listener = TcpListener::bind(listen).await?;
  axum::serve(listener, router)
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await?;
  Ok(())
}

/// Loads the rustls server configuration from the PEM files of the TLS
/// listener configuration.
pub fn load_rustls_config(
  cfg: &TlsConfig,
) -> Result<Arc<rustls::ServerConfig>, Box<dyn Error + Send + Sync>> {
  let cert_content = std::fs::read(&cfg.cert)
    .map_err(|err| anyhow::anyhow!("failed to read {}: {err}", cfg.cert.display()))?;
  let key_content = std::fs::read(&cfg.key)
    .map_err(|err| anyhow::anyhow!("failed to read {}: {err}", cfg.key.display()))?;

  let certs = rustls_pemfile::certs(&mut cert_content.as_slice())
    .collect::<Result<Vec<_>, _>>()
    .map_err(|err| anyhow::anyhow!("failed to parse {}: {err}", cfg.cert.display()))?;
  let key = rustls_pemfile::private_key(&mut key_content.as_slice())
    .map_err(|err| anyhow::anyhow!("failed to parse {}: {err}", cfg.key.display()))?
    .ok_or_else(|| anyhow::anyhow!("no private key found in {}", cfg.key.display()))?;

  let config = rustls::ServerConfig::builder()
    .with_no_client_auth()
    .with_single_cert(certs, key)?;
  Ok(Arc::new(config))
}

/// Serves the router over TLS until cancellation. Each accepted connection
/// is handshaked and driven on its own task.
pub async fn serve_https(
  listen: &str,
  router: Router,
  tls_config: Arc<rustls::ServerConfig>,
  cancel: CancellationToken,
) -> Result<(), Box<dyn Error + Send + Sync>> {
  let listener = TcpListener::bind(listen).await?;
  let acceptor = TlsAcceptor::from(tls_config);

  loop {
    let (stream, _) = tokio::select! {
      accepted = listener.accept() => accepted?,
      _ = cancel.cancelled() => return Ok(()),
    };
    let acceptor = acceptor.clone();
    let router = router.clone();
    tokio::spawn(async move {
      let Ok(tls_stream) = acceptor.accept(stream).await else {
        return;
      };
      let service = TowerToHyperService::new(router);
      let _ = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
        .await;
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Certificate, Domains};

  #[test]
  fn test_api_prefix() {
    assert_eq!("/api/certificates", api_prefix(SERVER_API_GET_CERTIFICATES));
    assert_eq!("/api/requests", api_prefix(AGENT_API_REQUESTS));
  }

  #[test]
  fn test_certificates_response_round_trip() {
    let response = CertificatesResponse {
      certificates: Certificates(vec![Certificate {
        identifier: "example.com-0".to_string(),
        key: b"key".to_vec(),
        certificate: b"certificate".to_vec(),
        ..Certificate::default()
      }]),
      requests: RequestsResponse {
        found: vec![DomainRequest::new(Domains::from(vec!["example.com"]))],
        not_found: vec![],
      },
    };

    let encoded = serde_json::to_string(&response).unwrap();
    assert!(encoded.contains("\"not_found\":[]"));
    let decoded: CertificatesResponse = serde_json::from_str(&encoded).unwrap();
    assert_eq!(response, decoded);
  }
}
