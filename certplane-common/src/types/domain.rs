use std::fmt;
use std::net::IpAddr;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

/// A domain name requested for TLS coverage. Compared as an exact string.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(pub String);

impl Domain {
  pub fn new(domain: impl Into<String>) -> Self {
    Domain(domain.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn is_wildcard(&self) -> bool {
    self.0.starts_with('*')
  }

  /// Replaces the first label with `*` for names of at least three labels,
  /// leaving shorter names unchanged.
  pub fn format_subdomain_to_wildcard(&self) -> Domain {
    let mut labels: Vec<&str> = self.0.split('.').collect();
    if labels.len() >= 3 {
      labels[0] = "*";
      return Domain(labels.join("."));
    }
    self.clone()
  }
}

impl fmt::Display for Domain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Domain {
  fn from(domain: &str) -> Self {
    Domain(domain.to_string())
  }
}

/// An ordered set of domains served by a single certificate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domains(pub Vec<Domain>);

impl Domains {
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn sort(&mut self) {
    self.0.sort();
  }

  pub fn contains_wildcard(&self) -> bool {
    self.0.iter().any(|domain| domain.is_wildcard())
  }

  pub fn as_string_vec(&self) -> Vec<String> {
    self.0.iter().map(|domain| domain.0.clone()).collect()
  }

  pub fn joined(&self) -> String {
    self.as_string_vec().join(",")
  }
}

impl Deref for Domains {
  type Target = Vec<Domain>;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl DerefMut for Domains {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.0
  }
}

impl From<Vec<&str>> for Domains {
  fn from(domains: Vec<&str>) -> Self {
    Domains(domains.into_iter().map(Domain::from).collect())
  }
}

/// A group of domains that must be covered by one certificate, tagged with
/// the identifier of the requester that produced it for error reporting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainRequest {
  pub domains: Domains,
  #[serde(skip)]
  pub requester_id: Option<String>,
}

impl DomainRequest {
  pub fn new(domains: Domains) -> Self {
    DomainRequest {
      domains,
      requester_id: None,
    }
  }

  /// True when any domain of the group parses as a literal IP address.
  /// Such groups are filtered out at the requester source.
  pub fn is_ip(&self) -> bool {
    self
      .domains
      .iter()
      .any(|domain| domain.as_str().parse::<IpAddr>().is_ok())
  }
}

/// Canonicalizes a request list in place: domains sorted within each
/// request, wildcard-bearing requests first, then longer domain lists,
/// then lexicographic on the joined domain string.
pub fn sort_domain_requests(requests: &mut [DomainRequest]) {
  for request in requests.iter_mut() {
    request.domains.sort();
  }
  requests.sort_by(|a, b| {
    b.domains
      .contains_wildcard()
      .cmp(&a.domains.contains_wildcard())
      .then_with(|| b.domains.len().cmp(&a.domains.len()))
      .then_with(|| a.domains.joined().cmp(&b.domains.joined()))
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_is_wildcard() {
    assert!(Domain::from("*.example.com").is_wildcard());
    assert!(!Domain::from("www.example.com").is_wildcard());
  }

  #[test]
  fn test_format_subdomain_to_wildcard() {
    assert_eq!(
      Domain::from("*.example.com"),
      Domain::from("www.example.com").format_subdomain_to_wildcard()
    );
    assert_eq!(
      Domain::from("*.sub.example.com"),
      Domain::from("www.sub.example.com").format_subdomain_to_wildcard()
    );
    assert_eq!(
      Domain::from("example.com"),
      Domain::from("example.com").format_subdomain_to_wildcard()
    );
  }

  #[test]
  fn test_domains_sort() {
    let mut domains = Domains::from(vec!["b.example.com", "a.example.com"]);
    domains.sort();
    assert_eq!(
      Domains::from(vec!["a.example.com", "b.example.com"]),
      domains
    );
  }

  #[test]
  fn test_domains_contains_wildcard() {
    assert!(Domains::from(vec!["example.com", "*.example.com"]).contains_wildcard());
    assert!(!Domains::from(vec!["example.com"]).contains_wildcard());
  }

  #[test]
  fn test_request_is_ip() {
    assert!(DomainRequest::new(Domains::from(vec!["127.0.0.1"])).is_ip());
    assert!(DomainRequest::new(Domains::from(vec!["::1"])).is_ip());
    assert!(!DomainRequest::new(Domains::from(vec!["example.com"])).is_ip());
  }

  #[test]
  fn test_sort_domain_requests() {
    let mut requests = vec![
      DomainRequest::new(Domains::from(vec!["b.example.com"])),
      DomainRequest::new(Domains::from(vec!["a.example.com"])),
      DomainRequest::new(Domains::from(vec!["c.example.com", "a.example.org"])),
      DomainRequest::new(Domains::from(vec!["*.example.com"])),
    ];
    sort_domain_requests(&mut requests);
    assert_eq!(
      Domains::from(vec!["*.example.com"]),
      requests[0].domains
    );
    assert_eq!(
      Domains::from(vec!["a.example.org", "c.example.com"]),
      requests[1].domains
    );
    assert_eq!(Domains::from(vec!["a.example.com"]), requests[2].domains);
    assert_eq!(Domains::from(vec!["b.example.com"]), requests[3].domains);
  }

  #[test]
  fn test_sort_domain_requests_idempotent() {
    let mut first = vec![
      DomainRequest::new(Domains::from(vec!["b.example.com", "a.example.com"])),
      DomainRequest::new(Domains::from(vec!["*.example.org"])),
      DomainRequest::new(Domains::from(vec!["a.example.com"])),
    ];
    sort_domain_requests(&mut first);
    let mut second = first.clone();
    sort_domain_requests(&mut second);
    assert_eq!(first, second);
  }
}
