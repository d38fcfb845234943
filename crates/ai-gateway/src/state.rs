use crate::config::GatewayConfig;
use crate::upstream::{HttpTransport, RetryPolicy, UpstreamClient};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Production state: a reqwest transport bound to `AI_BASE_URL`.
    pub fn new(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        let transport = HttpTransport::new(
            &config.ai_base_url,
            &config.ai_api_key,
            config.upstream_timeout,
        )?;
        let upstream = UpstreamClient::new(
            Arc::new(transport),
            RetryPolicy::new(config.upstream_max_retries),
        );
        Ok(Self::with_upstream(config, upstream))
    }

    pub fn with_upstream(config: GatewayConfig, upstream: UpstreamClient) -> Self {
        Self {
            config: Arc::new(config),
            upstream,
        }
    }
}
