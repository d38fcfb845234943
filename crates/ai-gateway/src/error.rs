use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

/// The one body shape the gateway itself ever returns for a failure.
///
/// Proxied upstream responses never go through this type; they are passed
/// through with their own status and body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    pub fn new(error: &'static str) -> Self {
        Self {
            ok: false,
            error,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<serde_json::Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Render as an HTTP response with the given status.
    pub fn into_response(self, status: StatusCode) -> HttpResponse {
        HttpResponse::build(status).json(self)
    }
}

/// Gateway-owned failures that end a request before or instead of an upstream answer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("token verification secret is not configured")]
    ServerMisconfigured,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("invalid JSON body: {0}")]
    InvalidJson(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("no such route")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::MissingToken => "missing_token",
            GatewayError::InvalidToken => "invalid_token",
            GatewayError::ServerMisconfigured => "server_misconfigured",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::InvalidJson(_) => "invalid_json",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::BodyRead(_) => "invalid_body",
            GatewayError::NotFound => "not_found",
            GatewayError::MethodNotAllowed => "method_not_allowed",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingToken | GatewayError::InvalidToken => StatusCode::UNAUTHORIZED,
            GatewayError::ServerMisconfigured | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::InvalidJson(_) | GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let envelope = match self {
            GatewayError::InvalidJson(msg) | GatewayError::BodyRead(msg) => {
                ErrorEnvelope::new(self.code()).with_details(msg.clone())
            }
            GatewayError::PayloadTooLarge { limit } => {
                ErrorEnvelope::new(self.code()).with_details(format!("limit is {limit} bytes"))
            }
            GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ErrorEnvelope::new(self.code())
            }
            _ => ErrorEnvelope::new(self.code()),
        };
        envelope.into_response(self.status_code())
    }
}
