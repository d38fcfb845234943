use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::auth::require_auth;
use crate::error::GatewayError;
use crate::proxy::{self, Operation};
use crate::state::AppState;

/// Largest request body accepted on the protected routes (1 MB).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Parse a client body as JSON. An empty body stands for `{}`.
fn parse_json_body(raw: &[u8]) -> Result<serde_json::Value, GatewayError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(empty_object());
    }
    serde_json::from_slice(raw).map_err(|e| GatewayError::InvalidJson(e.to_string()))
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// `application/json` or any `+json` media type; parameters are ignored.
fn is_json_content_type(req: &HttpRequest) -> bool {
    let Some(raw) = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Drain the body, refusing it as soon as it grows past `limit`.
async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Bytes, GatewayError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| GatewayError::BodyRead(e.to_string()))?;
        if body.len() + chunk.len() > limit {
            return Err(GatewayError::PayloadTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Read and decode the client body. Only JSON media types are parsed; any
/// other body is forwarded as `{}`.
async fn decode_body(
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<serde_json::Value, GatewayError> {
    let raw = read_body(payload, MAX_BODY_BYTES).await?;
    if is_json_content_type(req) {
        parse_json_body(&raw)
    } else {
        Ok(empty_object())
    }
}

/// Auth gate, body decoding, then the upstream call.
async fn handle(
    req: &HttpRequest,
    state: &AppState,
    op: &Operation,
    payload: Option<web::Payload>,
) -> HttpResponse {
    let ctx = match require_auth(req, state) {
        Ok(ctx) => ctx,
        Err(rejection) => return rejection,
    };

    let body = match payload {
        Some(payload) => match decode_body(req, payload).await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::debug!(operation = op.name, error = %e, "rejected request body");
                return e.error_response();
            }
        },
        None => None,
    };

    proxy::forward(&state.upstream, op, body, &ctx).await
}

/// Fallback for unknown paths under `/api`. The auth gate still runs first.
pub async fn not_found(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match require_auth(&req, &state) {
        Ok(_) => GatewayError::NotFound.error_response(),
        Err(rejection) => rejection,
    }
}

/// Fallback for a known path hit with the wrong method.
pub async fn method_not_allowed(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match require_auth(&req, &state) {
        Ok(_) => GatewayError::MethodNotAllowed.error_response(),
        Err(rejection) => rejection,
    }
}

/// GET /api/ai/version
pub async fn version(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    handle(&req, &state, &proxy::VERSION, None).await
}

/// GET /api/ai/ping
pub async fn ping(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    handle(&req, &state, &proxy::PING, None).await
}

/// POST /api/ai/categorize
pub async fn categorize(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> HttpResponse {
    handle(&req, &state, &proxy::CATEGORIZE, Some(body)).await
}

/// POST /api/ai/categorize/batch - raw arrays are wrapped as `{"items": [...]}`
pub async fn categorize_batch(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> HttpResponse {
    handle(&req, &state, &proxy::CATEGORIZE_BATCH, Some(body)).await
}

/// POST /api/ai/feedback
pub async fn feedback(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> HttpResponse {
    handle(&req, &state, &proxy::FEEDBACK, Some(body)).await
}

/// POST /api/ai/summarize
pub async fn summarize(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> HttpResponse {
    handle(&req, &state, &proxy::SUMMARIZE, Some(body)).await
}

fn resource(op: &Operation, route: actix_web::Route) -> actix_web::Resource {
    web::resource(op.public_path)
        .route(route)
        .default_service(web::to(method_not_allowed))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(resource(&proxy::VERSION, web::get().to(version)))
        .service(resource(&proxy::PING, web::get().to(ping)))
        .service(resource(&proxy::CATEGORIZE, web::post().to(categorize)))
        .service(resource(
            &proxy::CATEGORIZE_BATCH,
            web::post().to(categorize_batch),
        ))
        .service(resource(&proxy::FEEDBACK, web::post().to(feedback)))
        .service(resource(&proxy::SUMMARIZE, web::post().to(summarize)));
}
