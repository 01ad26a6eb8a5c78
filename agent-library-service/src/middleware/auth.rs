use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{services::Identity, AppState};

/// Cookie the identity provider's browser SDK stores the session token in.
pub const SESSION_COOKIE: &str = "__session";

/// Require a valid session token and attach the caller's [`Identity`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(req.headers())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unauthorized")))?;

    let identity = state.authenticator.authenticate(&token).map_err(|e| {
        tracing::debug!(error = %e, "Session token rejected");
        AppError::Unauthorized(anyhow::anyhow!("Unauthorized"))
    })?;

    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Bearer token from `Authorization`, else the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Extractor for the identity attached by [`auth_middleware`].
pub struct AuthUser(pub Identity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Identity>()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unauthorized")))?;

        Ok(AuthUser(identity.clone()))
    }
}
