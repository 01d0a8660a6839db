//! Caller identity for HTTP routes.
//!
//! The session token comes from `Authorization: Bearer <token>` or the
//! `buddylens_session` cookie and is looked up in the `sessions` table.
//! Issuing sessions happens elsewhere; this module only resolves them.

use crate::db::pool::DbPool;
use crate::db::users;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "buddylens_session";

/// Authenticated caller, inserted as a request extension by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// JSON error body returned by auth middleware.
#[derive(Serialize)]
pub struct AuthError {
    pub code: String,
    pub message: String,
}

impl AuthError {
    fn response(status: StatusCode, code: &str, message: &str) -> Response {
        (
            status,
            Json(AuthError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        )
            .into_response()
    }
}

/// Pull a session token out of the request headers.
///
/// A bearer token takes precedence over the cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    bearer.or_else(|| {
        headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|cookies| {
                cookies.split(';').find_map(|c| {
                    c.trim()
                        .strip_prefix(SESSION_COOKIE)
                        .and_then(|rest| rest.strip_prefix('='))
                })
            })
            .filter(|t| !t.is_empty())
    })
}

/// axum middleware that resolves the caller on every protected route.
///
/// Inserts [`CurrentUser`] on success. Returns 401 JSON for a missing,
/// unknown or expired token.
pub async fn auth_middleware(
    State(db): State<DbPool>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_token(request.headers()).map(str::to_owned) else {
        return AuthError::response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Missing session token",
        );
    };

    let now = chrono::Utc::now().timestamp();
    match users::resolve_session(&db, &token, now).await {
        Ok(Some(user_id)) => {
            request.extensions_mut().insert(CurrentUser(user_id));
            next.run(request).await
        }
        Ok(None) => AuthError::response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Invalid or expired session token",
        ),
        Err(e) => {
            log::error!("[server] Session lookup failed: {}", e);
            AuthError::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_extracts_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; buddylens_session=tok; other=1"),
        );
        assert_eq!(extract_token(&headers), Some("tok"));
    }

    #[test]
    fn test_bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer header"));
        headers.insert(header::COOKIE, HeaderValue::from_static("buddylens_session=cookie"));
        assert_eq!(extract_token(&headers), Some("header"));
    }

    #[test]
    fn test_ignores_lookalike_cookie_and_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("buddylens_session_old=x; buddylens_session="),
        );
        assert_eq!(extract_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(extract_token(&headers), None);
    }
}
