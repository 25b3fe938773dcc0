pub mod certificate;
pub mod domain;
pub mod state;

pub use certificate::{Certificate, Certificates};
pub use domain::{sort_domain_requests, Domain, DomainRequest, Domains};
pub use state::{Account, AccountRegistration, State};

/// Serializes byte fields as base64 strings, matching the state file layout.
pub mod serde_base64 {
  use base64::engine::general_purpose::STANDARD;
  use base64::Engine;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
  }
}
