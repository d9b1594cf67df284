//! Static API token authentication.
//!
//! Every route under `/api/whatsapp` requires the configured token, sent as
//! `x-api-token: <token>` or `Authorization: Bearer <token>`. A bare
//! `Authorization: <token>` is accepted too.

use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub const TOKEN_HEADER: &str = "x-api-token";

/// Axum middleware that rejects requests without the expected token. The
/// token is injected via the [`ApiToken`] extension.
///
/// # Error responses
///
/// - `403 Forbidden`: token missing or wrong
/// - `500 Internal Server Error`: [`ApiToken`] extension not found (misconfiguration)
pub async fn require_api_token(request: Request, next: Next) -> Response {
    let Some(expected) = request.extensions().get::<ApiToken>().map(|t| t.0.clone()) else {
        return reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server configuration error",
        );
    };

    let verdict = match token_from_headers(request.headers()) {
        None => Err("Missing API token"),
        Some(provided) if constant_time_eq(expected.as_bytes(), provided.as_bytes()) => Ok(()),
        Some(_) => Err("Invalid API token"),
    };

    match verdict {
        Ok(()) => next.run(request).await,
        Err(message) => reject(StatusCode::FORBIDDEN, message),
    }
}

/// The token a request carries, preferring `x-api-token`.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(token.trim()).filter(|t| !t.is_empty());
    }
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    (!token.is_empty()).then_some(token)
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"success": false, "error": message}))).into_response()
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
///
/// Always iterates over the full length of `expected` regardless of `provided`
/// length, so an attacker cannot determine the token length from response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for (i, e) in expected.iter().enumerate() {
        diff |= e ^ provided.get(i).copied().unwrap_or(0xff);
    }
    diff == 0
}

/// Extension type carrying the expected token, injected into the router
/// layer so [`require_api_token`] can access it without touching `AppState`.
#[derive(Clone)]
pub struct ApiToken(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn compares_whole_token() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
        assert!(!constant_time_eq(b"secret", b""));
    }

    #[test]
    fn reads_all_header_forms() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bare-token"));
        assert_eq!(token_from_headers(&headers), Some("bare-token"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(token_from_headers(&headers), Some("abc"));

        headers.insert(TOKEN_HEADER, HeaderValue::from_static("xyz"));
        assert_eq!(token_from_headers(&headers), Some("xyz"));
    }

    #[test]
    fn empty_bearer_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(token_from_headers(&headers), None);
    }
}
