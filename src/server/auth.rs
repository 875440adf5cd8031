//! Bearer token authentication.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::AppState;

/// Auth error response
#[derive(Serialize)]
struct AuthError {
    error: &'static str,
    message: &'static str,
}

fn unauthorized(error: &'static str, message: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(AuthError { error, message })).into_response()
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key,
            None => {
                return unauthorized(
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
            }
        },
        None => return unauthorized("missing_auth", "Authorization header required"),
    };

    match state.api_keys.validate(api_key) {
        Some(client) => {
            tracing::debug!(client = %client.name, "authenticated");
            request.extensions_mut().insert(client);
            next.run(request).await
        }
        None => unauthorized("invalid_key", "Invalid API key"),
    }
}
