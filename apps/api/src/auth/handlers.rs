//! Axum route handlers for the Auth API.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderName, StatusCode},
    response::AppendHeaders,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::auth::extract::CurrentUser;
use crate::auth::service::{self, LoginForm, RefreshQuery, RegisterRequest};
use crate::auth::tokens::TokenPair;
use crate::auth::{ACCESS_COOKIE, LAST_PAGE_COOKIE};
use crate::errors::AppError;
use crate::extract::{AppForm, AppJson, AppQuery};
use crate::models::user::UserView;
use crate::state::AppState;

fn access_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let max_age = time::Duration::seconds(state.tokens.access_ttl().num_seconds());
    Cookie::build((ACCESS_COOKIE, token))
        .http_only(true)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .build()
}

fn last_page_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build((LAST_PAGE_COOKIE, "/dashboard"))
        .http_only(false)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// POST /auth/register
pub async fn handle_register(
    State(state): State<AppState>,
    AppJson(request): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    let user = service::register(state.users.as_ref(), state.config.bcrypt_cost, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /auth/login
///
/// Form-encoded `username` (or email) and `password`. Returns the token pair
/// and also sets the access token as an HttpOnly cookie.
pub async fn handle_login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppForm(form): AppForm<LoginForm>,
) -> Result<(CookieJar, AppendHeaders<[(HeaderName, String); 1]>, Json<TokenPair>), AppError> {
    let tokens = service::login(state.users.as_ref(), &state.tokens, form).await?;
    let jar = jar.add(access_cookie(&state, tokens.access_token.clone()));
    // The jar percent-encodes values; the frontend reads this path verbatim.
    let last_page = AppendHeaders([(SET_COOKIE, last_page_cookie(&state).to_string())]);
    Ok((jar, last_page, Json(tokens)))
}

/// POST /auth/refresh?refresh_token=...
pub async fn handle_refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    AppQuery(query): AppQuery<RefreshQuery>,
) -> Result<(CookieJar, Json<TokenPair>), AppError> {
    let tokens =
        service::refresh(state.users.as_ref(), &state.tokens, &query.refresh_token).await?;
    let jar = jar.add(access_cookie(&state, tokens.access_token.clone()));
    Ok((jar, Json(tokens)))
}

/// POST /auth/logout
pub async fn handle_logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode), AppError> {
    service::logout(state.users.as_ref(), &user).await?;
    let jar = jar
        .remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(LAST_PAGE_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

/// GET /auth/me
pub async fn handle_me(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(UserView::from(&user))
}
