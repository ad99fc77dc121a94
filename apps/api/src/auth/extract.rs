//! Request extractors that resolve the caller's identity.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::auth::service::resolve_access_token;
use crate::auth::{ACCESS_COOKIE, API_KEY_HEADER};
use crate::errors::AppError;
use crate::models::user::UserRow;
use crate::state::AppState;

/// The authenticated user, resolved from the `access_token` cookie or a Bearer header.
pub struct CurrentUser(pub UserRow);

/// Who is calling a tool endpoint: a logged-in user or a configured API key.
#[derive(Debug, Clone)]
pub struct Principal {
    pub role: String,
    pub user: Option<UserRow>,
}

/// Cookie first, then `Authorization: Bearer`.
fn access_token(parts: &Parts) -> Option<String> {
    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get(ACCESS_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = access_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;
        let user = resolve_access_token(state.users.as_ref(), &state.tokens, &token).await?;
        Ok(CurrentUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        if let Some(token) = access_token(parts) {
            let user = resolve_access_token(state.users.as_ref(), &state.tokens, &token).await?;
            return Ok(Principal {
                role: user.role.clone(),
                user: Some(user),
            });
        }

        let Some(key) = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return Err(AppError::Unauthorized("Not authenticated".to_string()));
        };

        match state.config.api_keys.get(key) {
            Some(role) => Ok(Principal {
                role: role.clone(),
                user: None,
            }),
            None => {
                warn!("Invalid API key presented");
                Err(AppError::Unauthorized("Invalid API Key".to_string()))
            }
        }
    }
}
