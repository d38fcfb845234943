use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{Error, HttpRequest};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub struct RequestId;

impl RequestId {
    /// Reuse a non-empty inbound id byte for byte, otherwise mint a fresh UUID v4.
    ///
    /// Values carrying non-visible-ASCII bytes cannot be carried as a `String`
    /// and are replaced.
    pub fn resolve(inbound: Option<&HeaderValue>) -> String {
        inbound
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// The id assigned by [`assign_request_id`]. Falls back to a fresh id for
    /// requests that never passed through the middleware.
    pub fn from_request(req: &HttpRequest) -> String {
        Self::resolve(req.headers().get(REQUEST_ID_HEADER))
    }
}

/// Outermost middleware: every request and every response carries `x-request-id`.
///
/// The resolved id is written back into the request headers so the access log
/// and the handlers see the same value the client will.
pub async fn assign_request_id(
    mut req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    let id = RequestId::resolve(req.headers().get(REQUEST_ID_HEADER));
    let value = HeaderValue::from_str(&id)
        .unwrap_or_else(|_| HeaderValue::from_static("invalid-request-id"));
    req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());

    let mut res = next.call(req).await?;
    res.headers_mut().insert(REQUEST_ID_HEADER, value);
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_id_is_reused() {
        let v = HeaderValue::from_static("abc-123");
        assert_eq!(RequestId::resolve(Some(&v)), "abc-123");
    }

    #[test]
    fn test_missing_id_is_generated() {
        let id = RequestId::resolve(None);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_empty_id_is_replaced() {
        let empty = HeaderValue::from_static("");
        assert!(uuid::Uuid::parse_str(&RequestId::resolve(Some(&empty))).is_ok());
    }

    #[test]
    fn test_long_id_is_echoed_unchanged() {
        let raw = "trace-".repeat(40);
        let v = HeaderValue::from_str(&raw).unwrap();
        assert_eq!(RequestId::resolve(Some(&v)), raw);
    }

    #[test]
    fn test_padded_id_is_not_trimmed() {
        let v = HeaderValue::from_static("abc 123 ");
        assert_eq!(RequestId::resolve(Some(&v)), "abc 123 ");
    }

    #[test]
    fn test_opaque_bytes_are_replaced() {
        let v = HeaderValue::from_bytes(b"caf\xe9").unwrap();
        assert!(uuid::Uuid::parse_str(&RequestId::resolve(Some(&v))).is_ok());
    }
}
