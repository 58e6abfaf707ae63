use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use logway_api::{Offset, StoreError};

use crate::duration::DurationError;

/// Every way a gateway request can fail. Each variant maps to exactly one
/// HTTP response; nothing here is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing '{0}' query parameter")]
    MissingParam(&'static str),

    #[error("error parsing offset: {0}")]
    InvalidOffset(String),

    #[error("invalid 'pollDuration' value: {0}")]
    InvalidDuration(#[from] DurationError),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("error when base64 decode {field}: {detail}")]
    InvalidBase64 { field: &'static str, detail: String },

    #[error("'offset' not found in topic {topic}")]
    OffsetNotFound { topic: String, offset: Offset },

    #[error("failed to {action} entry: {source}")]
    Store {
        action: &'static str,
        #[source]
        source: StoreError,
    },
}

impl GatewayError {
    pub fn store(action: &'static str, source: StoreError) -> Self {
        GatewayError::Store { action, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            GatewayError::Store { source, .. } => {
                tracing::error!(kind = %source.kind(), error = %self, "store failure");
            }
            GatewayError::OffsetNotFound { topic, offset } => {
                tracing::debug!(topic = %topic, offset, "offset not found");
            }
            _ => {
                tracing::debug!(error = %self, "rejected request");
            }
        }
        (status, self.to_string()).into_response()
    }
}
