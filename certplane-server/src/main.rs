mod acme;
mod cache;
mod cli;
mod config;
mod context;
mod http;
mod lock;
mod manager;
mod requester;

use std::sync::Arc;

use certplane_common::http::{load_rustls_config, serve_http, serve_https};
use certplane_common::logging::start_logging;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::acme::http_challenge::ChallengeHttp;
use crate::cli::ServerArgs;
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::manager::CertifierManager;

#[tokio::main]
async fn main() {
  let args = ServerArgs::parse();

  let config = match ServerConfig::load(&args.config) {
    Ok(config) => config,
    Err(err) => {
      eprintln!("FATAL ERROR: {err}");
      std::process::exit(1);
    }
  };
  if let Err(err) = config.validate() {
    eprintln!("FATAL ERROR: invalid configuration: {err}");
    std::process::exit(1);
  }
  if args.check {
    println!("configuration {} is valid", args.config.display());
    return;
  }

  let cancel = CancellationToken::new();
  let logger = start_logging(config.log_level, cancel.clone());

  let ctx = match ServerContext::create(config, logger.clone(), cancel.clone()).await {
    Ok(ctx) => Arc::new(ctx),
    Err(err) => {
      eprintln!("FATAL ERROR: {err}");
      std::process::exit(1);
    }
  };

  let challenge = Arc::new(ChallengeHttp::new(ctx.cache.clone(), logger.clone()));
  let router = http::create_router(
    http::HttpState {
      logger: logger.clone(),
      state_storage: ctx.state_storage.clone(),
      challenge: challenge.clone(),
      metrics: ctx.metrics.clone(),
      jwt: ctx.config.jwt.clone(),
    },
    ctx.config.http.metrics_enable,
  );

  let http_logger = logger.clone();
  let http_listen = ctx.config.http.listen.clone();
  let http_router = router.clone();
  let http_cancel = cancel.clone();
  tokio::spawn(async move {
    if let Err(err) = serve_http(&http_listen, http_router, http_cancel).await {
      http_logger.error(&format!("http server error: {err}")).await;
    }
  });

  if ctx.config.http.tls.enable {
    match load_rustls_config(&ctx.config.http.tls) {
      Ok(tls_config) => {
        let tls_logger = logger.clone();
        let tls_listen = ctx.config.http.tls.listen.clone();
        let tls_router = router.clone();
        let tls_cancel = cancel.clone();
        tokio::spawn(async move {
          if let Err(err) = serve_https(&tls_listen, tls_router, tls_config, tls_cancel).await {
            tls_logger.error(&format!("https server error: {err}")).await;
          }
        });
      }
      Err(err) => {
        eprintln!("FATAL ERROR: {err}");
        std::process::exit(1);
      }
    }
  }

  let mut manager = CertifierManager::new(
    ctx.cache.clone(),
    ctx.config.lock_duration,
    challenge.clone(),
  );
  let manager_ctx = ctx.clone();
  let manager_task = tokio::spawn(async move {
    manager.start(&manager_ctx).await;
  });

  let signal = shutdown_signal().await;
  logger.info(&format!("{signal} signal received, exiting...")).await;
  cancel.cancel();
  manager_task.await.unwrap_or_default();
}

async fn shutdown_signal() -> &'static str {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
      Ok(sigterm) => sigterm,
      Err(_) => {
        tokio::signal::ctrl_c().await.unwrap_or_default();
        return "SIGINT";
      }
    };
    tokio::select! {
      _ = tokio::signal::ctrl_c() => "SIGINT",
      _ = sigterm.recv() => "SIGTERM",
    }
  }
  #[cfg(not(unix))]
  {
    tokio::signal::ctrl_c().await.unwrap_or_default();
    "SIGINT"
  }
}
