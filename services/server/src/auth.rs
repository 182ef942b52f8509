// Gateway authentication (§4.4.1, §6): resolves the bearer token on upgrade
// into a uid, delegating to `chat_storage::auth` for the actual token store.

use axum::http::HeaderMap;
use chat_storage::auth::{extract_bearer, validate_token, AuthError, TokenClaims};
use sqlx::PgPool;

/// Per §6: if the client sent `Sec-WebSocket-Protocol`, it is copied into
/// `Authorization` before token parsing (some browser WebSocket clients
/// cannot set arbitrary headers, so the subprotocol slot carries the token
/// instead).
pub fn resolve_bearer(headers: &HeaderMap) -> Option<String> {
    let effective = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("Bearer {v}"))
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(ToOwned::to_owned)
        })?;
    extract_bearer(Some(&effective)).ok().map(ToOwned::to_owned)
}

pub async fn authenticate(pool: &PgPool, headers: &HeaderMap) -> Result<TokenClaims, AuthError> {
    let token = resolve_bearer(headers).ok_or(AuthError::MissingToken)?;
    validate_token(pool, &token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_subprotocol_over_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "sec-websocket-protocol",
            HeaderValue::from_static("tok-from-protocol"),
        );
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer tok-from-auth"),
        );
        assert_eq!(
            resolve_bearer(&headers).as_deref(),
            Some("tok-from-protocol")
        );
    }

    #[test]
    fn falls_back_to_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        assert_eq!(resolve_bearer(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn missing_both_headers_yields_none() {
        assert_eq!(resolve_bearer(&HeaderMap::new()), None);
    }
}
