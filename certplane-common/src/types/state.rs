use serde::{Deserialize, Serialize};

use crate::types::certificate::Certificates;

/// The ACME account identity: contact email, the registration resource
/// issued by the CA and the serialized account credentials.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
  #[serde(rename = "Email", default, skip_serializing_if = "String::is_empty")]
  pub email: String,
  #[serde(rename = "Registration", default, skip_serializing_if = "Option::is_none")]
  pub registration: Option<AccountRegistration>,
  #[serde(
    rename = "Key",
    default,
    with = "crate::types::serde_base64",
    skip_serializing_if = "Vec::is_empty"
  )]
  pub key: Vec<u8>,
}

impl Account {
  pub fn new(email: impl Into<String>) -> Self {
    Account {
      email: email.into(),
      registration: None,
      key: Vec::new(),
    }
  }

  pub fn has_key(&self) -> bool {
    !self.key.is_empty()
  }
}

/// Registration metadata returned by the CA.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRegistration {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub uri: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub status: String,
}

/// The persisted aggregate: optional ACME account plus all managed
/// certificates. Loaded at tick start, mutated in memory, saved at tick end.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub account: Option<Account>,
  #[serde(default)]
  pub certificates: Certificates,
}
