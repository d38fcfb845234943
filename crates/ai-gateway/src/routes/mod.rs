pub mod ai;
pub mod health;

use actix_web::middleware::from_fn;
use actix_web::web;

use crate::rate_limit::enforce_rate_limit;

/// Prefix of the authenticated, rate-limited surface.
pub const PROTECTED_PREFIX: &str = "/api";

/// Mount every route. Health and metrics stay outside the limiter; the
/// `/api` scope goes through admission first and auth inside each handler.
/// Unknown paths and methods under `/api` still answer with an error envelope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure).service(
        web::scope(PROTECTED_PREFIX)
            .wrap(from_fn(enforce_rate_limit))
            .configure(ai::configure)
            .default_service(web::to(ai::not_found)),
    );
}
