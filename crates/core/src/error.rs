//! Error types for the device gateway library.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Startup configuration failures.
///
/// These are only produced while building a
/// [`GatewayConfig`](crate::config::GatewayConfig); the CLI treats any of
/// them as fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting with no default was not provided (or was empty).
    #[error("missing required setting: {key}")]
    Missing { key: &'static str },

    /// A setting was present but could not be interpreted.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors that can occur while serving gateway requests.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Caller input**: [`BadRequest`](Self::BadRequest),
///   [`PayloadTooLarge`](Self::PayloadTooLarge),
///   [`MethodNotAllowed`](Self::MethodNotAllowed) are rejected before any
///   upstream call is made.
/// - **Upstream**: [`UpstreamUnreachable`](Self::UpstreamUnreachable),
///   [`UpstreamStatus`](Self::UpstreamStatus): surfaced immediately as a
///   gateway error, never retried.
/// - **Unavailable**: [`VideoUnavailable`](Self::VideoUnavailable),
///   [`NoFrame`](Self::NoFrame) and
///   [`EndpointNotConfigured`](Self::EndpointNotConfigured) answer 503.
/// - **Local**: [`Io`](Self::Io), [`Config`](Self::Config).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The caller sent a body or field the gateway cannot accept.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The body exceeds the route's size limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    /// The upstream endpoint could not be reached or timed out.
    #[error("upstream {endpoint} unreachable: {source}")]
    UpstreamUnreachable {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The upstream answered, but not with something the gateway can relay.
    #[error("upstream {endpoint} rejected the request: {status}")]
    UpstreamStatus {
        endpoint: &'static str,
        status: String,
    },

    /// No video source is configured for this gateway.
    #[error("video stream not configured")]
    VideoUnavailable,

    /// Live ingest is configured but no frame has arrived yet.
    #[error("no video frame received yet")]
    NoFrame,

    /// An optional device endpoint was never configured.
    #[error("{endpoint} endpoint not configured")]
    EndpointNotConfigured { endpoint: &'static str },
}

impl GatewayError {
    /// HTTP status code reported to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Io(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::UpstreamUnreachable { .. } | Self::UpstreamStatus { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::VideoUnavailable | Self::NoFrame | Self::EndpointNotConfigured { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Convenience alias for `Result<T, GatewayError>`.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            GatewayError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            GatewayError::PayloadTooLarge("length limit exceeded".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn upstream_status_maps_to_bad_gateway() {
        let err = GatewayError::UpstreamStatus {
            endpoint: "video",
            status: "404 Not Found".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            err.to_string(),
            "upstream video rejected the request: 404 Not Found"
        );
    }

    #[test]
    fn missing_video_is_unavailable() {
        assert_eq!(
            GatewayError::VideoUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(GatewayError::NoFrame.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = GatewayError::EndpointNotConfigured { endpoint: "infer" };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "infer endpoint not configured");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::Invalid {
            key: "SERVER_PORT",
            value: "http".into(),
            reason: "invalid digit found in string".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"http\" for SERVER_PORT: invalid digit found in string"
        );
    }
}
