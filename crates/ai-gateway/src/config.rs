use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 8090;
const DEFAULT_CORS_ORIGIN: &str = "*";
const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 120;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_UPSTREAM_MAX_RETRIES: u32 = 2;

#[derive(Clone)]
pub struct GatewayConfig {
    /// Server port
    pub port: u16,
    /// CORS allowed origins (`*` allows any)
    pub allowed_origins: Vec<String>,
    /// Max requests per client per rate window
    pub rate_limit_per_window: u32,
    /// Length of the fixed rate window
    pub rate_limit_window: Duration,
    /// Key the limiter by the forwarded client address instead of the peer
    pub trust_proxy: bool,
    /// Upstream AI service origin
    pub ai_base_url: String,
    /// Static key identifying the gateway to the upstream
    pub ai_api_key: String,
    /// HS256 verification secret (None = every protected request gets `server_misconfigured`)
    pub jwt_secret: Option<Vec<u8>>,
    /// Per-attempt upstream timeout
    pub upstream_timeout: Duration,
    /// Retries after the first upstream attempt
    pub upstream_max_retries: u32,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_per_window", &self.rate_limit_per_window)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("trust_proxy", &self.trust_proxy)
            .field("ai_base_url", &self.ai_base_url)
            .field("ai_api_key", &"[REDACTED]")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "[REDACTED]"))
            .field("upstream_timeout", &self.upstream_timeout)
            .field("upstream_max_retries", &self.upstream_max_retries)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. `from_env` wraps this
    /// around the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        // Required: upstream origin and identity key
        let ai_base_url =
            non_empty("AI_BASE_URL").ok_or(ConfigError::MissingRequired("AI_BASE_URL"))?;
        Url::parse(&ai_base_url).map_err(|_| ConfigError::InvalidUrl(ai_base_url.clone()))?;
        let ai_base_url = ai_base_url.trim_end_matches('/').to_string();

        let ai_api_key =
            non_empty("AI_API_KEY").ok_or(ConfigError::MissingRequired("AI_API_KEY"))?;

        let port = parse_or("PORT", non_empty("PORT"), DEFAULT_PORT)?;

        let allowed_origins: Vec<String> = non_empty("CORS_ORIGIN")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let rate_limit_per_window = parse_or(
            "RATE_LIMIT_PER_MIN",
            non_empty("RATE_LIMIT_PER_MIN"),
            DEFAULT_RATE_LIMIT_PER_MIN,
        )?;

        let window_secs: u64 = parse_or(
            "RATE_LIMIT_WINDOW_SECS",
            non_empty("RATE_LIMIT_WINDOW_SECS"),
            DEFAULT_RATE_LIMIT_WINDOW_SECS,
        )?;
        if window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_WINDOW_SECS",
                value: "0".to_string(),
            });
        }

        let trust_proxy = non_empty("TRUST_PROXY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        // Optional: a missing secret degrades per request instead of refusing to start
        let jwt_secret = non_empty("JWT_SECRET").map(String::into_bytes);

        let timeout_ms: u64 = parse_or(
            "UPSTREAM_TIMEOUT_MS",
            non_empty("UPSTREAM_TIMEOUT_MS"),
            DEFAULT_UPSTREAM_TIMEOUT_MS,
        )?;

        let upstream_max_retries = parse_or(
            "UPSTREAM_MAX_RETRIES",
            non_empty("UPSTREAM_MAX_RETRIES"),
            DEFAULT_UPSTREAM_MAX_RETRIES,
        )?;

        let metrics_token = non_empty("METRICS_TOKEN");

        if jwt_secret.is_none() {
            tracing::warn!(
                "JWT_SECRET not set; every /api request will be rejected with server_misconfigured"
            );
        }
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            port,
            allowed_origins,
            rate_limit_per_window,
            rate_limit_window: Duration::from_secs(window_secs),
            trust_proxy,
            ai_base_url,
            ai_api_key,
            jwt_secret,
            upstream_timeout: Duration::from_millis(timeout_ms),
            upstream_max_retries,
            metrics_token,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
