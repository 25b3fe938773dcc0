pub mod static_list;

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::types::{sort_domain_requests, DomainRequest};

pub type RequesterError = Box<dyn Error + Send + Sync>;

/// A source of domain requirements. Adapters return their requests plus an
/// optional error; a failing adapter never aborts the tick.
#[async_trait]
pub trait Requester: Send + Sync {
  fn id(&self) -> &str;
  async fn fetch(&self) -> (Vec<DomainRequest>, Option<RequesterError>);
}

/// Fetches from all requesters in parallel, unions the results and returns
/// the canonicalized request list plus the per-requester errors.
pub async fn fetch_requests(
  requesters: &[Arc<dyn Requester>],
) -> (Vec<DomainRequest>, HashMap<String, RequesterError>) {
  let mut tasks = JoinSet::new();
  for requester in requesters {
    let requester = requester.clone();
    tasks.spawn(async move {
      let id = requester.id().to_string();
      let (requests, error) = requester.fetch().await;
      (id, requests, error)
    });
  }

  let mut requests = Vec::new();
  let mut errors = HashMap::new();
  while let Some(joined) = tasks.join_next().await {
    let Ok((id, mut fetched, error)) = joined else {
      continue;
    };
    requests.append(&mut fetched);
    if let Some(error) = error {
      errors.insert(id, error);
    }
  }

  sort_domain_requests(&mut requests);
  (requests, errors)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Domains;

  struct FixedRequester {
    id: String,
    domains: Vec<Domains>,
    fail: bool,
  }

  #[async_trait]
  impl Requester for FixedRequester {
    fn id(&self) -> &str {
      &self.id
    }

    async fn fetch(&self) -> (Vec<DomainRequest>, Option<RequesterError>) {
      let requests = self
        .domains
        .iter()
        .map(|domains| DomainRequest {
          domains: domains.clone(),
          requester_id: Some(self.id.clone()),
        })
        .collect();
      let error = self
        .fail
        .then(|| anyhow::anyhow!("requester ({}) failed to fetch", self.id).into());
      (requests, error)
    }
  }

  #[tokio::test]
  async fn test_fetch_requests_unions_and_sorts() {
    let requesters: Vec<Arc<dyn Requester>> = vec![
      Arc::new(FixedRequester {
        id: "first".to_string(),
        domains: vec![Domains::from(vec!["b.example.com"])],
        fail: false,
      }),
      Arc::new(FixedRequester {
        id: "second".to_string(),
        domains: vec![Domains::from(vec!["a.example.com"])],
        fail: false,
      }),
    ];

    let (requests, errors) = fetch_requests(&requesters).await;
    assert!(errors.is_empty());
    assert_eq!(2, requests.len());
    assert_eq!(Domains::from(vec!["a.example.com"]), requests[0].domains);
    assert_eq!(Domains::from(vec!["b.example.com"]), requests[1].domains);
  }

  #[tokio::test]
  async fn test_fetch_requests_collects_errors() {
    let requesters: Vec<Arc<dyn Requester>> = vec![
      Arc::new(FixedRequester {
        id: "working".to_string(),
        domains: vec![Domains::from(vec!["example.com"])],
        fail: false,
      }),
      Arc::new(FixedRequester {
        id: "broken".to_string(),
        domains: vec![],
        fail: true,
      }),
    ];

    let (requests, errors) = fetch_requests(&requesters).await;
    assert_eq!(1, requests.len());
    assert_eq!(1, errors.len());
    assert!(errors.contains_key("broken"));
  }
}
