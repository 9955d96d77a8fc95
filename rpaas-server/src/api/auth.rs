//! HTTP Basic authentication
//!
//! Credentials come from `API_USERNAME`/`API_PASSWORD`. When both are empty
//! authentication is disabled. Only the `/resources` routes are guarded;
//! `/healthcheck` and `/metrics` stay public.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::AppState;

/// Parses `Authorization: Basic <base64(user:password)>`.
fn basic_credentials(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn matches(expected: &str, given: &str) -> bool {
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

fn is_authorized(state: &AppState, req: &Request) -> bool {
    let Some((user, password)) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(basic_credentials)
    else {
        return false;
    };
    // evaluate both so timing does not reveal which one failed
    let user_ok = matches(&state.config.api_username, &user);
    let password_ok = matches(&state.config.api_password, &password);
    user_ok & password_ok
}

/// Authentication middleware
pub async fn basic_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.config.auth_enabled() {
        return next.run(req).await;
    }

    if is_authorized(&state, &req) {
        return next.run(req).await;
    }

    debug!(path = %req.uri().path(), "Rejected request without valid credentials");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, r#"Basic realm="Restricted""#)],
        "Unauthorized",
    )
        .into_response()
}
