use std::str::FromStr;

use async_channel::Sender;
use chrono::Local;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Log severity, ordered from most to least severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Error,
  Warn,
  Info,
  Debug,
}

impl LogLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      LogLevel::Error => "ERROR",
      LogLevel::Warn => "WARN",
      LogLevel::Info => "INFO",
      LogLevel::Debug => "DEBUG",
    }
  }
}

impl FromStr for LogLevel {
  type Err = String;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value {
      "error" => Ok(LogLevel::Error),
      "warn" => Ok(LogLevel::Warn),
      "info" => Ok(LogLevel::Info),
      "debug" => Ok(LogLevel::Debug),
      _ => Err(format!("unknown log level \"{value}\"")),
    }
  }
}

pub struct LogMessage {
  pub level: LogLevel,
  pub message: String,
}

/// A cloneable handle to the process logger. Messages below the configured
/// level are dropped at the call site.
#[derive(Clone)]
pub struct Logger {
  sender: Sender<LogMessage>,
  level: LogLevel,
}

impl Logger {
  pub fn new(sender: Sender<LogMessage>, level: LogLevel) -> Self {
    Logger { sender, level }
  }

  /// A logger that discards everything, for tests.
  pub fn sink() -> Self {
    let (sender, receiver) = async_channel::bounded(1);
    drop(receiver);
    Logger {
      sender,
      level: LogLevel::Error,
    }
  }

  pub async fn log(&self, level: LogLevel, message: &str) {
    if level > self.level {
      return;
    }
    self
      .sender
      .send(LogMessage {
        level,
        message: message.to_string(),
      })
      .await
      .unwrap_or_default();
  }

  pub async fn error(&self, message: &str) {
    self.log(LogLevel::Error, message).await;
  }

  pub async fn warn(&self, message: &str) {
    self.log(LogLevel::Warn, message).await;
  }

  pub async fn info(&self, message: &str) {
    self.log(LogLevel::Info, message).await;
  }

  pub async fn debug(&self, message: &str) {
    self.log(LogLevel::Debug, message).await;
  }
}

/// Starts the background writer task and returns the process logger handle.
/// Errors and warnings go to stderr, everything else to stdout.
pub fn start_logging(level: LogLevel, cancel: CancellationToken) -> Logger {
  let (sender, receiver) = async_channel::unbounded::<LogMessage>();

  tokio::spawn(async move {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    while let Ok(message) = tokio::select! {
      message = receiver.recv() => message,
      _ = cancel.cancelled() => return,
    } {
      let line = format!(
        "[{}] {}: {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        message.level.as_str(),
        message.message
      );
      let writer: &mut (dyn tokio::io::AsyncWrite + Send + Unpin) =
        if message.level <= LogLevel::Warn {
          &mut stderr
        } else {
          &mut stdout
        };
      writer.write_all(line.as_bytes()).await.unwrap_or_default();
      writer.flush().await.unwrap_or_default();
    }
  });

  Logger::new(sender, level)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_level_ordering() {
    assert!(LogLevel::Error < LogLevel::Warn);
    assert!(LogLevel::Warn < LogLevel::Info);
    assert!(LogLevel::Info < LogLevel::Debug);
  }

  #[test]
  fn test_level_from_str() {
    assert_eq!(Ok(LogLevel::Debug), "debug".parse());
    assert_eq!(Ok(LogLevel::Info), "info".parse());
    assert!("verbose".parse::<LogLevel>().is_err());
  }

  #[tokio::test]
  async fn test_level_filtering() {
    let (sender, receiver) = async_channel::unbounded();
    let logger = Logger::new(sender, LogLevel::Info);

    logger.debug("dropped").await;
    logger.info("kept").await;

    let message = receiver.recv().await.unwrap();
    assert_eq!("kept", message.message);
    assert!(receiver.is_empty());
  }

  #[tokio::test]
  async fn test_sink_does_not_block() {
    let logger = Logger::sink();
    logger.error("dropped").await;
  }
}
