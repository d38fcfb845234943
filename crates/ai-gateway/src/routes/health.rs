use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ErrorEnvelope;
use crate::metrics::REGISTRY;
use crate::security::constant_time_eq;
use crate::state::AppState;

/// Name reported by `/health`.
pub const SERVICE_NAME: &str = "gateway-service";

/// GET /live - process is up
pub async fn live() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body("OK")
}

/// GET /ready - reports the upstream this instance proxies to
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "aiBaseUrl": state.config.ai_base_url,
    }))
}

/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "ok": true,
        "service": SERVICE_NAME,
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}

/// GET /metrics - Prometheus text format, bearer-gated when `METRICS_TOKEN` is set
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(ref expected) = state.config.metrics_token {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
            .unwrap_or(false);

        if !authorized {
            return ErrorEnvelope::new("unauthorized")
                .into_response(actix_web::http::StatusCode::UNAUTHORIZED);
        }
    }

    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().body("Failed to encode metrics");
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/live", web::get().to(live))
        .route("/ready", web::get().to(ready))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
