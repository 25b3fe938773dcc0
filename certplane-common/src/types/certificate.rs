use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::domain::{DomainRequest, Domains};

/// A managed certificate: identity, SAN set, PEM material and lifecycle
/// bookkeeping (expiration, obtain failures, unused retention).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub identifier: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub main: String,
  #[serde(rename = "domain", default, skip_serializing_if = "Domains::is_empty")]
  pub domains: Domains,
  #[serde(
    default,
    with = "crate::types::serde_base64",
    skip_serializing_if = "Vec::is_empty"
  )]
  pub certificate: Vec<u8>,
  #[serde(
    default,
    with = "crate::types::serde_base64",
    skip_serializing_if = "Vec::is_empty"
  )]
  pub key: Vec<u8>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expiration_date: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "is_zero")]
  pub obtain_fail_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub obtain_fail_date: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unused_at: Option<DateTime<Utc>>,
}

fn is_zero(count: &u32) -> bool {
  *count == 0
}

impl Certificate {
  /// A certificate is valid once both key and certificate material exist.
  pub fn is_valid(&self) -> bool {
    !self.key.is_empty() && !self.certificate.is_empty()
  }

  pub fn key_filename(&self) -> String {
    key_filename(&self.identifier)
  }

  pub fn certificate_filename(&self) -> String {
    certificate_filename(&self.identifier)
  }

  /// True when every requested domain is covered by this certificate's SAN
  /// set, either literally or through its wildcard form. Matching is
  /// asymmetric: extra SANs on the certificate are fine.
  pub fn matches(&self, domains: &Domains) -> bool {
    if self.domains.is_empty() || domains.is_empty() {
      return false;
    }
    domains.iter().all(|domain| {
      self.domains.contains(domain)
        || self
          .domains
          .contains(&domain.format_subdomain_to_wildcard())
    })
  }
}

pub fn key_filename(identifier: &str) -> String {
  format!("{identifier}.key")
}

pub fn certificate_filename(identifier: &str) -> String {
  format!("{identifier}.crt")
}

/// The certificate collection held in state. All operations are pure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Certificates(pub Vec<Certificate>);

impl Certificates {
  /// Returns the first certificate covering the request, optionally
  /// restricted to valid certificates.
  pub fn match_request(&self, request: &DomainRequest, only_valid: bool) -> Option<&Certificate> {
    self.match_domains(&request.domains, only_valid)
  }

  pub fn match_domains(&self, domains: &Domains, only_valid: bool) -> Option<&Certificate> {
    self
      .0
      .iter()
      .find(|certificate| (!only_valid || certificate.is_valid()) && certificate.matches(domains))
  }

  pub fn get(&self, identifier: &str) -> Option<&Certificate> {
    self
      .0
      .iter()
      .find(|certificate| certificate.identifier == identifier)
  }

  pub fn get_mut(&mut self, identifier: &str) -> Option<&mut Certificate> {
    self
      .0
      .iter_mut()
      .find(|certificate| certificate.identifier == identifier)
  }

  /// False for the empty identifier or any identifier already present.
  pub fn check_identifier_unique(&self, identifier: &str) -> bool {
    !identifier.is_empty() && self.get(identifier).is_none()
  }

  /// Certificates not covered by any of the given requests.
  pub fn unused_certificates(&self, requests: &[DomainRequest]) -> Certificates {
    Certificates(
      self
        .0
        .iter()
        .filter(|certificate| {
          !requests
            .iter()
            .any(|request| certificate.matches(&request.domains))
        })
        .cloned()
        .collect(),
    )
  }

  /// Certificates covered by at least one of the given requests.
  pub fn used_certificates(&self, requests: &[DomainRequest]) -> Certificates {
    Certificates(
      self
        .0
        .iter()
        .filter(|certificate| {
          requests
            .iter()
            .any(|request| certificate.matches(&request.domains))
        })
        .cloned()
        .collect(),
    )
  }

  /// Returns a collection with the given certificates removed, keyed by
  /// identifier.
  pub fn deletes(&self, to_remove: &Certificates) -> Certificates {
    Certificates(
      self
        .0
        .iter()
        .filter(|certificate| to_remove.get(&certificate.identifier).is_none())
        .cloned()
        .collect(),
    )
  }
}

impl Deref for Certificates {
  type Target = Vec<Certificate>;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl DerefMut for Certificates {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::domain::Domains;

  fn certificate(identifier: &str, domains: Vec<&str>) -> Certificate {
    Certificate {
      identifier: identifier.to_string(),
      main: domains.first().map(|domain| domain.to_string()).unwrap_or_default(),
      domains: Domains::from(domains),
      ..Certificate::default()
    }
  }

  #[test]
  fn test_is_valid() {
    let mut cert = certificate("example.com-0", vec!["example.com"]);
    assert!(!cert.is_valid());
    cert.key = b"key".to_vec();
    assert!(!cert.is_valid());
    cert.certificate = b"certificate".to_vec();
    assert!(cert.is_valid());
  }

  #[test]
  fn test_matches_reflexive() {
    let cert = certificate("example.com-0", vec!["example.com", "www.example.com"]);
    assert!(cert.matches(&cert.domains.clone()));
  }

  #[test]
  fn test_matches_wildcard_covers_subdomain() {
    let cert = certificate("wildcard.example.com-0", vec!["*.example.com"]);
    assert!(cert.matches(&Domains::from(vec!["www.example.com"])));
    assert!(cert.matches(&Domains::from(vec!["*.example.com"])));
    // Two-label names have no wildcard form.
    assert!(!cert.matches(&Domains::from(vec!["example.com"])));
  }

  #[test]
  fn test_matches_requires_full_coverage() {
    let cert = certificate("example.com-0", vec!["example.com"]);
    assert!(!cert.matches(&Domains::from(vec!["example.com", "example.org"])));
    assert!(!cert.matches(&Domains::default()));
  }

  #[test]
  fn test_match_request_only_valid() {
    let mut cert = certificate("example.com-0", vec!["example.com"]);
    let request = DomainRequest::new(Domains::from(vec!["example.com"]));
    let certificates = Certificates(vec![cert.clone()]);
    assert!(certificates.match_request(&request, true).is_none());
    assert!(certificates.match_request(&request, false).is_some());

    cert.key = b"key".to_vec();
    cert.certificate = b"certificate".to_vec();
    let certificates = Certificates(vec![cert]);
    assert!(certificates.match_request(&request, true).is_some());
  }

  #[test]
  fn test_check_identifier_unique() {
    let certificates = Certificates(vec![certificate("example.com-0", vec!["example.com"])]);
    assert!(!certificates.check_identifier_unique(""));
    assert!(!certificates.check_identifier_unique("example.com-0"));
    assert!(certificates.check_identifier_unique("example.com-1"));
  }

  #[test]
  fn test_unused_and_used_certificates() {
    let certificates = Certificates(vec![
      certificate("example.com-0", vec!["example.com"]),
      certificate("example.org-0", vec!["example.org"]),
    ]);
    let requests = vec![DomainRequest::new(Domains::from(vec!["example.com"]))];

    let unused = certificates.unused_certificates(&requests);
    assert_eq!(1, unused.len());
    assert_eq!("example.org-0", unused[0].identifier);

    let used = certificates.used_certificates(&requests);
    assert_eq!(1, used.len());
    assert_eq!("example.com-0", used[0].identifier);
  }

  #[test]
  fn test_deletes() {
    let certificates = Certificates(vec![
      certificate("example.com-0", vec!["example.com"]),
      certificate("example.org-0", vec!["example.org"]),
    ]);
    let remaining =
      certificates.deletes(&Certificates(vec![certificate("example.org-0", vec!["example.org"])]));
    assert_eq!(1, remaining.len());
    assert_eq!("example.com-0", remaining[0].identifier);
  }

  #[test]
  fn test_json_round_trip() {
    let mut cert = certificate("example.com-0", vec!["example.com"]);
    cert.key = b"key".to_vec();
    cert.certificate = b"certificate".to_vec();
    cert.expiration_date = Some("2026-11-01T00:00:00Z".parse().unwrap());

    let encoded = serde_json::to_string(&cert).unwrap();
    assert!(encoded.contains("\"domain\":[\"example.com\"]"));
    assert!(encoded.contains("\"key\":\"a2V5\""));
    assert!(!encoded.contains("obtain_fail_count"));

    let decoded: Certificate = serde_json::from_str(&encoded).unwrap();
    assert_eq!(cert, decoded);
  }
}
