use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

/// Grace period for in-flight requests (long polls included) after Ctrl+C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("logway-server starting");

    // --- Load config ---
    let mut config = match &args.config {
        Some(path) => {
            let config = ServerConfig::load(path)?;
            tracing::info!(config = %path, "loaded config");
            config
        }
        None => {
            tracing::info!("no config file given, using defaults");
            ServerConfig::default()
        }
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    let options = config.gateway_options()?;

    // --- Store: one instance shared by every request ---
    let store = logway_engine::open_store(&config.storage)?;

    // --- API server ---
    let token = CancellationToken::new();
    let api_token = token.clone();
    let listen = config.listen.clone();
    tracing::info!(
        listen = %listen,
        max_poll = ?options.max_poll_duration,
        max_body_bytes = options.max_body_bytes,
        "starting gateway"
    );
    let mut api_handle = tokio::spawn(async move {
        logway_api_server::run(&listen, store, options, api_token).await
    });

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("shutting down...");
        }
        joined = &mut api_handle => {
            // Server stopped on its own: bind failure or fatal serve error.
            return match joined {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ServerError::Api(e)),
                Err(e) => Err(ServerError::Api(format!("server task: {e}"))),
            };
        }
    }

    token.cancel();

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut api_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::error!(error = %e, "api server error"),
        Ok(Err(e)) => tracing::error!(error = %e, "api server task failed"),
        Err(_) => {
            tracing::warn!(timeout = ?DRAIN_TIMEOUT, "in-flight requests did not drain, aborting");
            api_handle.abort();
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
