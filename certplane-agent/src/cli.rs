use std::path::PathBuf;

use clap::Parser;

/// Centralized TLS certificate issuance and distribution plane (agent)
#[derive(Parser, Debug, PartialEq)]
#[command(name = "certplane-agent", version, about, long_about = None)]
pub struct AgentArgs {
  /// The path to the agent configuration file
  #[arg(short, long, default_value = "./certplane-agent.yaml")]
  pub config: PathBuf,

  /// Validate the configuration and exit
  #[arg(long)]
  pub check: bool,
}
