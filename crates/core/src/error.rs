use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for all proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("no credentials available for provider {provider}, model {model}")]
    NoCredentials { provider: String, model: String },

    #[error("model {model} is in cooldown for {seconds}s")]
    ModelCooldown { model: String, seconds: u64 },

    #[error("upstream error (status {status}): {body}")]
    Upstream {
        status: u16,
        body: String,
        /// Parsed from upstream `Retry-After` header (seconds), if present.
        retry_after_secs: Option<u64>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("route not found for path {0}")]
    RouteNotFound(String),

    #[error("request body too large: {0} bytes exceeds limit of {1} bytes")]
    BodyTooLarge(usize, usize),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("upstream returned non-retryable status {status}: {body}")]
    UpstreamTerminalStatus { status: u16, body: String },

    #[error("stream framing error: {0}")]
    StreamFramingError(String),

    #[error("plugin error in '{plugin}': {message}")]
    PluginError { plugin: String, message: String },

    #[error("expression error: {0}")]
    ExpressionError(String),

    #[error("all upstreams exhausted for route {route}: {last_error}")]
    AllUpstreamsExhausted { route: String, last_error: String },

    #[error("rate limit exceeded, retry after {0}s")]
    RateLimited(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::NoCredentials { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ModelCooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Translation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Self::BodyTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AuthRejected(_) => StatusCode::UNAUTHORIZED,
            Self::UpstreamTerminalStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::StreamFramingError(_) => StatusCode::BAD_GATEWAY,
            Self::PluginError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExpressionError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AllUpstreamsExhausted { .. } => StatusCode::BAD_GATEWAY,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Auth(_) | Self::AuthRejected(_) => "authentication_error",
            Self::NoCredentials { .. } => "insufficient_quota",
            Self::ModelCooldown { .. } | Self::RateLimited(_) => "rate_limit_error",
            Self::BadRequest(_) => "invalid_request_error",
            Self::ModelNotFound(_) | Self::RouteNotFound(_) => "invalid_request_error",
            Self::BodyTooLarge(_, _) => "invalid_request_error",
            Self::Upstream { .. } | Self::UpstreamTerminalStatus { .. } => "upstream_error",
            Self::AllUpstreamsExhausted { .. } => "upstream_error",
            _ => "server_error",
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Self::Auth(_) | Self::AuthRejected(_) => "invalid_api_key",
            Self::NoCredentials { .. } => "insufficient_quota",
            Self::ModelCooldown { .. } => "rate_limit_exceeded",
            Self::RateLimited(_) => "rate_limit_exceeded",
            Self::ModelNotFound(_) => "model_not_found",
            Self::RouteNotFound(_) => "route_not_found",
            Self::BadRequest(_) => "invalid_request",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // For upstream errors, try to pass through the original JSON body
        if let Self::Upstream { body, .. } = &self
            && serde_json::from_str::<serde_json::Value>(body).is_ok()
        {
            return (status, [("content-type", "application/json")], body.clone()).into_response();
        }

        if matches!(self, Self::AuthRejected(_)) {
            let body = json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.error_type(),
                    "code": self.error_code(),
                }
            });
            return (
                status,
                [
                    ("content-type", "application/json"),
                    ("www-authenticate", "Bearer"),
                ],
                body.to_string(),
            )
                .into_response();
        }

        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.error_code(),
            }
        });

        (
            status,
            [("content-type", "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Translation(format!("JSON error: {e}"))
    }
}
