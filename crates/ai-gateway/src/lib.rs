pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod request_id;
pub mod routes;
pub mod security;
pub mod state;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use state::AppState;
