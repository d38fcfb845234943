use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use reqwest::Method;

use crate::auth::AuthContext;
use crate::error::ErrorEnvelope;
use crate::metrics::PROXY_REQUESTS_TOTAL;
use crate::upstream::{UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Field a raw array body is wrapped under before batch forwarding.
pub const BATCH_ITEMS_FIELD: &str = "items";

/// How a request body is shaped before it goes upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// No body is sent.
    None,
    /// The client body goes upstream unchanged.
    Verbatim,
    /// A top-level array is wrapped as `{"items": [...]}`.
    BatchItems,
}

/// What goes into `details` when the upstream call ultimately fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDetails {
    Message,
    /// The upstream's own error body when it sent one, else the message.
    UpstreamBodyOrMessage,
}

/// One public route and the single upstream call behind it.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: &'static str,
    /// Path relative to the `/api` scope.
    pub public_path: &'static str,
    pub upstream_path: &'static str,
    pub method: Method,
    pub error_code: &'static str,
    pub body: BodyShape,
    pub details: FailureDetails,
}

pub const VERSION: Operation = Operation {
    name: "version",
    public_path: "/ai/version",
    upstream_path: "/ai/version",
    method: Method::GET,
    error_code: "ai_version_failed",
    body: BodyShape::None,
    details: FailureDetails::Message,
};

pub const PING: Operation = Operation {
    name: "ping",
    public_path: "/ai/ping",
    upstream_path: "/ai/ping",
    method: Method::GET,
    error_code: "ai_ping_failed",
    body: BodyShape::None,
    details: FailureDetails::Message,
};

pub const CATEGORIZE: Operation = Operation {
    name: "categorize",
    public_path: "/ai/categorize",
    upstream_path: "/ai/categorize",
    method: Method::POST,
    error_code: "ai_categorize_failed",
    body: BodyShape::Verbatim,
    details: FailureDetails::Message,
};

pub const CATEGORIZE_BATCH: Operation = Operation {
    name: "categorize_batch",
    public_path: "/ai/categorize/batch",
    upstream_path: "/ai/categorize/batch",
    method: Method::POST,
    error_code: "ai_batch_failed",
    body: BodyShape::BatchItems,
    details: FailureDetails::Message,
};

pub const FEEDBACK: Operation = Operation {
    name: "feedback",
    public_path: "/ai/feedback",
    upstream_path: "/ai/feedback",
    method: Method::POST,
    error_code: "ai_feedback_failed",
    body: BodyShape::Verbatim,
    details: FailureDetails::UpstreamBodyOrMessage,
};

pub const SUMMARIZE: Operation = Operation {
    name: "summarize",
    public_path: "/ai/summarize",
    upstream_path: "/ai/summarize",
    method: Method::POST,
    error_code: "ai_summarize_failed",
    body: BodyShape::Verbatim,
    details: FailureDetails::UpstreamBodyOrMessage,
};

/// Every proxied operation, in route registration order.
pub const OPERATIONS: [Operation; 6] = [
    VERSION,
    PING,
    CATEGORIZE,
    CATEGORIZE_BATCH,
    FEEDBACK,
    SUMMARIZE,
];

/// Default status when the upstream never answered.
const NO_RESPONSE_STATUS: StatusCode = StatusCode::BAD_GATEWAY;

/// Shape a client body according to the operation.
pub fn normalize_body(shape: BodyShape, body: serde_json::Value) -> Option<serde_json::Value> {
    match shape {
        BodyShape::None => None,
        BodyShape::Verbatim => Some(body),
        BodyShape::BatchItems => match body {
            serde_json::Value::Array(items) => {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(BATCH_ITEMS_FIELD.to_string(), serde_json::Value::Array(items));
                Some(serde_json::Value::Object(wrapped))
            }
            other => Some(other),
        },
    }
}

/// Forward one operation upstream and turn the outcome into the client response.
pub async fn forward(
    upstream: &UpstreamClient,
    op: &Operation,
    body: Option<serde_json::Value>,
    ctx: &AuthContext,
) -> HttpResponse {
    let request = UpstreamRequest {
        method: op.method.clone(),
        path: op.upstream_path,
        body: body.and_then(|b| normalize_body(op.body, b)),
        request_id: Some(ctx.request_id.clone()),
    };

    let response = match upstream.call(&request).await {
        Ok(resp) => pass_through(resp),
        Err(err) => {
            tracing::warn!(
                operation = op.name,
                request_id = %ctx.request_id,
                sub = ctx.claims.subject().unwrap_or("-"),
                status = ?err.status,
                error = %err,
                "upstream operation failed"
            );
            failure_response(op, err)
        }
    };

    PROXY_REQUESTS_TOTAL
        .with_label_values(&[op.name, response.status().as_str()])
        .inc();
    response
}

/// The upstream's status and body, untouched.
fn pass_through(resp: UpstreamResponse) -> HttpResponse {
    let status = StatusCode::from_u16(resp.status).unwrap_or(NO_RESPONSE_STATUS);
    let mut builder = HttpResponse::build(status);
    builder.content_type(
        resp.content_type
            .as_deref()
            .unwrap_or("application/json"),
    );
    builder.body(resp.body)
}

/// Route-specific envelope for a call that never produced a usable answer.
pub fn failure_response(op: &Operation, err: UpstreamError) -> HttpResponse {
    let status = err
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(NO_RESPONSE_STATUS);

    let details = match (op.details, err.body) {
        (FailureDetails::UpstreamBodyOrMessage, Some(body)) => body,
        _ => serde_json::Value::String(err.message),
    };

    ErrorEnvelope::new(op.error_code)
        .with_details(details)
        .into_response(status)
}
