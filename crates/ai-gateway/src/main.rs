use std::time::Instant;

use actix_web::middleware::{from_fn, Logger};
use actix_web::{web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_gateway::{
    config::GatewayConfig,
    metrics::register_metrics,
    rate_limit::{ClientKeyPolicy, WindowLimiter},
    request_id::assign_request_id,
    routes,
    state::AppState,
};

/// Access log line; the request id is the one assigned by the outer middleware.
const ACCESS_LOG_FORMAT: &str = r#"%a "%r" %s %b %{x-request-id}i %Dms"#;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();

    tracing::info!("Starting ai-gateway on port {}", port);
    tracing::info!("Upstream: {}", config.ai_base_url);
    tracing::info!(
        "Rate limit: {} requests per {}s (trust proxy: {})",
        config.rate_limit_per_window,
        config.rate_limit_window.as_secs(),
        config.trust_proxy
    );
    tracing::debug!(?config, "loaded configuration");

    register_metrics();

    let sweep_interval = config.rate_limit_window;
    let limiter = web::Data::new(WindowLimiter::new(
        config.rate_limit_per_window,
        config.rate_limit_window,
    ));
    let key_policy = web::Data::new(ClientKeyPolicy {
        trust_proxy: config.trust_proxy,
    });

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to build upstream client: {e}");
            std::process::exit(1);
        }
    };
    let state_data = web::Data::new(state);

    // Background sweep of closed windows so idle clients don't accumulate
    {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let purged = limiter.purge_expired(Instant::now());
                if purged > 0 {
                    tracing::debug!(
                        purged,
                        tracked = limiter.tracked_keys(),
                        "swept rate limit windows"
                    );
                }
            }
        });
    }

    HttpServer::new(move || {
        let cors = ai_gateway::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .app_data(limiter.clone())
            .app_data(key_policy.clone())
            .wrap(
                Logger::new(ACCESS_LOG_FORMAT)
                    .exclude("/live")
                    .exclude("/health"),
            )
            .wrap(cors)
            .wrap(from_fn(assign_request_id))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
