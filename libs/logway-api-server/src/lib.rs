pub mod duration;
pub mod error;
mod http;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use logway_api::LogStore;

pub use duration::{parse_duration, DurationError};
pub use error::GatewayError;
pub use http::X_OFFSET;
pub use wire::WireEntry;

/// Tunables of the HTTP surface.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Upper bound for `pollDuration`; longer requests are clamped.
    pub max_poll_duration: Duration,
    /// Request body limit for `/produce`.
    pub max_body_bytes: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_poll_duration: Duration::from_secs(30),
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    store: Arc<dyn LogStore>,
    max_poll: Duration,
}

/// Build the gateway router around a shared store.
pub fn router(store: Arc<dyn LogStore>, options: &GatewayOptions) -> Router {
    let state = AppState {
        store,
        max_poll: options.max_poll_duration,
    };

    Router::new()
        .route("/produce", post(http::handle_produce))
        .route("/consume", get(http::handle_consume))
        .route("/poll", get(http::handle_poll))
        .layer(DefaultBodyLimit::max(options.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway on `listen` until `shutdown` is cancelled.
pub async fn run(
    listen: &str,
    store: Arc<dyn LogStore>,
    options: GatewayOptions,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let app = router(store, &options);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| format!("bind {listen}: {e}"))?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "gateway listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
