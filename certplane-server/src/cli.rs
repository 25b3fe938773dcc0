use std::path::PathBuf;

use clap::Parser;

/// Centralized TLS certificate issuance and distribution plane (controller)
#[derive(Parser, Debug, PartialEq)]
#[command(name = "certplane-server", version, about, long_about = None)]
pub struct ServerArgs {
  /// The path to the server configuration file
  #[arg(short, long, default_value = "./certplane-server.yaml")]
  pub config: PathBuf,

  /// Validate the configuration and exit
  #[arg(long)]
  pub check: bool,
}
