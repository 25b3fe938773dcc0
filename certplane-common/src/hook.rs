use std::error::Error;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::logging::Logger;

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// How long `run_hooks` waits for storages to finish publishing before
/// draining the accumulator.
const HOOK_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// A post-change command published by a storage backend.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Hook {
  pub cmd: String,
  #[serde(default, with = "crate::config::serde_duration_opt")]
  pub timeout: Option<Duration>,
}

/// Collects hooks sent by storages over a channel and runs them once per
/// tick, deduplicated by command string.
pub struct HookManager {
  sender: Sender<Hook>,
  receiver: Receiver<Hook>,
  hooks: Mutex<Vec<Hook>>,
  logger: Logger,
}

impl HookManager {
  pub fn new(logger: Logger) -> Self {
    let (sender, receiver) = async_channel::unbounded();
    HookManager {
      sender,
      receiver,
      hooks: Mutex::new(Vec::new()),
      logger,
    }
  }

  pub fn sender(&self) -> Sender<Hook> {
    self.sender.clone()
  }

  /// The long-lived accumulator task. Runs until cancellation.
  pub async fn start(&self, cancel: CancellationToken) {
    while let Ok(hook) = tokio::select! {
      hook = self.receiver.recv() => hook,
      _ = cancel.cancelled() => return,
    } {
      self.hooks.lock().await.push(hook);
    }
  }

  /// Runs the collected hooks sequentially and clears the accumulator.
  /// Failures are logged, never propagated.
  pub async fn run_hooks(&self) {
    tokio::time::sleep(HOOK_SETTLE_DELAY).await;
    let mut hooks = self.hooks.lock().await;
    let deduplicated = deduplicate(&hooks);
    self
      .logger
      .debug(&format!("hook manager: run hooks ({})", deduplicated.len()))
      .await;
    for hook in &deduplicated {
      if let Err(err) = run_hook(hook).await {
        self
          .logger
          .error(&format!("failed to run hook {}: {err}", hook.cmd))
          .await;
      }
    }
    hooks.clear();
  }
}

fn deduplicate(hooks: &[Hook]) -> Vec<Hook> {
  let mut seen = std::collections::HashSet::new();
  hooks
    .iter()
    .filter(|hook| seen.insert(hook.cmd.clone()))
    .cloned()
    .collect()
}

/// Runs one hook as a subprocess with its timeout (default 1 min).
pub async fn run_hook(hook: &Hook) -> Result<(), Box<dyn Error + Send + Sync>> {
  let parts = split_command(&hook.cmd);
  let Some((program, args)) = parts.split_first() else {
    return Err(anyhow::anyhow!("empty hook command").into());
  };

  let timeout = hook.timeout.unwrap_or(DEFAULT_HOOK_TIMEOUT);
  let output = tokio::time::timeout(
    timeout,
    tokio::process::Command::new(program).args(args).output(),
  )
  .await
  .map_err(|_| anyhow::anyhow!("hook '{}' timed out after {:?}", hook.cmd, timeout))??;

  if !output.status.success() {
    return Err(
      anyhow::anyhow!(
        "executing hook '{}': {} with output {}",
        hook.cmd,
        output.status,
        String::from_utf8_lossy(&output.stderr)
      )
      .into(),
    );
  }

  Ok(())
}

/// Splits a command line on spaces, keeping single- or double-quoted
/// sections together. Quotes are stripped from the resulting arguments.
pub fn split_command(command: &str) -> Vec<String> {
  let mut result = Vec::new();
  let mut current = String::new();
  let mut quote: Option<char> = None;
  let mut in_token = false;

  for character in command.chars() {
    match quote {
      Some(open) if character == open => quote = None,
      Some(_) => current.push(character),
      None => match character {
        '\'' | '"' => {
          quote = Some(character);
          in_token = true;
        }
        ' ' => {
          if in_token {
            result.push(std::mem::take(&mut current));
            in_token = false;
          }
        }
        _ => {
          current.push(character);
          in_token = true;
        }
      },
    }
  }
  if in_token {
    result.push(current);
  }

  result
}
