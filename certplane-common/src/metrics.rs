use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::types::Certificate;

const CERTIFICATE_EXPIRATION_METRIC: &str = "tls_certs_not_after";

/// A namespaced prometheus registry with name-keyed metric tables, plus a
/// dedicated table for per-certificate expiration gauges which come and go
/// with the certificate lifecycle.
pub struct MetricsRegistry {
  registry: Registry,
  namespace: String,
  gauges: Mutex<HashMap<String, Gauge>>,
  counters: Mutex<HashMap<String, Counter>>,
  certificate_gauges: Mutex<HashMap<String, Gauge>>,
}

impl MetricsRegistry {
  pub fn new(namespace: impl Into<String>) -> Self {
    MetricsRegistry {
      registry: Registry::new(),
      namespace: namespace.into(),
      gauges: Mutex::new(HashMap::new()),
      counters: Mutex::new(HashMap::new()),
      certificate_gauges: Mutex::new(HashMap::new()),
    }
  }

  pub fn format_name(&self, name: &str) -> String {
    if self.namespace.is_empty() {
      return name.to_string();
    }
    format!("{}_{}", self.namespace, name)
  }

  /// Returns the gauge registered under `name`, creating it on first use.
  pub fn gauge(&self, name: &str) -> Gauge {
    self.gauge_with_help(name, "")
  }

  pub fn gauge_with_help(&self, name: &str, help: &str) -> Gauge {
    let mut gauges = self.gauges.lock().unwrap();
    if let Some(gauge) = gauges.get(name) {
      return gauge.clone();
    }
    let help = if help.is_empty() { name } else { help };
    // Metric names are compile-time constants, construction cannot fail.
    let gauge = Gauge::with_opts(Opts::new(self.format_name(name), help)).unwrap();
    let _ = self.registry.register(Box::new(gauge.clone()));
    gauges.insert(name.to_string(), gauge.clone());
    gauge
  }

  /// Returns the counter registered under `name`, creating it on first use.
  pub fn counter(&self, name: &str) -> Counter {
    self.counter_with_help(name, "")
  }

  pub fn counter_with_help(&self, name: &str, help: &str) -> Counter {
    let mut counters = self.counters.lock().unwrap();
    if let Some(counter) = counters.get(name) {
      return counter.clone();
    }
    let help = if help.is_empty() { name } else { help };
    let counter = Counter::with_opts(Opts::new(self.format_name(name), help)).unwrap();
    let _ = self.registry.register(Box::new(counter.clone()));
    counters.insert(name.to_string(), counter.clone());
    counter
  }

  /// Registers the expiration gauge for a certificate, labelled with its
  /// identifier, common name and sorted SAN list. Idempotent.
  pub fn register_certificate_gauge(&self, certificate: &Certificate) -> Gauge {
    let mut certificate_gauges = self.certificate_gauges.lock().unwrap();
    if let Some(gauge) = certificate_gauges.get(&certificate.identifier) {
      return gauge.clone();
    }

    let mut domains = certificate.domains.clone();
    domains.sort();
    let mut labels = HashMap::new();
    labels.insert("identifier".to_string(), certificate.identifier.clone());
    labels.insert("cn".to_string(), certificate.main.clone());
    labels.insert("sans".to_string(), domains.joined());

    let opts = Opts::new(
      self.format_name(CERTIFICATE_EXPIRATION_METRIC),
      "Certificate expiration timestamp",
    )
    .const_labels(labels);
    let gauge = Gauge::with_opts(opts).unwrap();
    let _ = self.registry.register(Box::new(gauge.clone()));
    certificate_gauges.insert(certificate.identifier.clone(), gauge.clone());
    gauge
  }

  pub fn certificate_gauge(&self, identifier: &str) -> Option<Gauge> {
    self
      .certificate_gauges
      .lock()
      .unwrap()
      .get(identifier)
      .cloned()
  }

  /// Snapshot of (identifier, gauge) pairs for the metrics update pass.
  pub fn certificate_gauges(&self) -> Vec<(String, Gauge)> {
    self
      .certificate_gauges
      .lock()
      .unwrap()
      .iter()
      .map(|(identifier, gauge)| (identifier.clone(), gauge.clone()))
      .collect()
  }

  pub fn remove_certificate_gauge(&self, identifier: &str) {
    let mut certificate_gauges = self.certificate_gauges.lock().unwrap();
    if let Some(gauge) = certificate_gauges.remove(identifier) {
      let _ = self.registry.unregister(Box::new(gauge));
    }
  }

  /// Renders the registry in the prometheus text exposition format.
  pub fn render(&self) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
      return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
  }
}
