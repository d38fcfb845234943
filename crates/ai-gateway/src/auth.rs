//! Bearer-token verification for the protected `/api` scope.
//!
//! Tokens are HS256 JWTs signed with the shared `JWT_SECRET`. The accepted
//! algorithm is pinned: a token whose header names any other algorithm is
//! rejected even when it was signed with the right secret.

use actix_web::{HttpRequest, HttpResponse, ResponseError};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::metrics::AUTH_REJECTIONS;
use crate::request_id::RequestId;
use crate::state::AppState;

/// The only signing algorithm the gateway accepts.
pub const PINNED_ALGORITHM: Algorithm = Algorithm::HS256;

const BEARER_PREFIX: &str = "Bearer ";

/// Decoded claims of a verified token. The issuer decides the keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(pub serde_json::Map<String, serde_json::Value>);

impl ClaimSet {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// The `sub` claim, when it is a string.
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(|v| v.as_str())
    }
}

/// Why a credential was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    #[error("missing_token")]
    MissingToken,
    #[error("server_misconfigured")]
    ServerMisconfigured,
    #[error("invalid_token")]
    InvalidToken,
}

impl AuthRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthRejection::MissingToken => "missing_token",
            AuthRejection::ServerMisconfigured => "server_misconfigured",
            AuthRejection::InvalidToken => "invalid_token",
        }
    }
}

impl From<AuthRejection> for GatewayError {
    fn from(rejection: AuthRejection) -> Self {
        match rejection {
            AuthRejection::MissingToken => GatewayError::MissingToken,
            AuthRejection::ServerMisconfigured => GatewayError::ServerMisconfigured,
            AuthRejection::InvalidToken => GatewayError::InvalidToken,
        }
    }
}

/// Per-request context handed from the auth gate to the proxy layer.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: ClaimSet,
    pub request_id: String,
}

/// Pull the token out of a raw `Authorization` value.
///
/// `Bearer <token>` (case-sensitive, one space) yields the remainder; any
/// other value is taken as the token itself. Empty tokens count as absent.
pub fn extract_token(raw: Option<&str>) -> Option<&str> {
    let raw = raw?;
    let token = raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw);
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(PINNED_ALGORITHM);
    // Issuer-defined claims: nothing is mandatory, but exp/nbf are enforced when present.
    validation.required_spec_claims.clear();
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation
}

/// Verify a raw `Authorization` header value against the configured secret.
///
/// A missing token is rejected before the secret is even consulted; a missing
/// secret is rejected the same way whatever token was presented.
pub fn verify(raw_header: Option<&str>, secret: Option<&[u8]>) -> Result<ClaimSet, AuthRejection> {
    let token = extract_token(raw_header).ok_or(AuthRejection::MissingToken)?;

    let secret = match secret {
        Some(s) if !s.is_empty() => s,
        _ => {
            tracing::error!("JWT_SECRET not configured");
            return Err(AuthRejection::ServerMisconfigured);
        }
    };

    decode::<ClaimSet>(token, &DecodingKey::from_secret(secret), &validation())
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!(error = %e, "invalid JWT token");
            AuthRejection::InvalidToken
        })
}

/// Gate a protected handler: verify the request's credential or produce the
/// rejection response to return directly.
pub fn require_auth(req: &HttpRequest, state: &AppState) -> Result<AuthContext, HttpResponse> {
    let raw = req
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match verify(raw, state.config.jwt_secret.as_deref()) {
        Ok(claims) => {
            let request_id = RequestId::from_request(req);
            tracing::debug!(
                request_id = %request_id,
                sub = claims.subject().unwrap_or("-"),
                "token verified"
            );
            Ok(AuthContext { claims, request_id })
        }
        Err(rejection) => {
            AUTH_REJECTIONS
                .with_label_values(&[rejection.as_str()])
                .inc();
            Err(GatewayError::from(rejection).error_response())
        }
    }
}
