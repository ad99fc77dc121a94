use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::permissions::Role;
use crate::auth::store::{NewUser, UserStore};
use crate::auth::tokens::{TokenKeys, TokenPair, TokenType};
use crate::errors::AppError;
use crate::validation::reject_nul;
use crate::models::user::{UserRow, UserView};

/// Wrong passwords tolerated before the account is locked.
pub const MAX_FAILED_LOGINS: i32 = 5;
pub const LOCKOUT_MINUTES: i32 = 15;
const MIN_PASSWORD_CHARS: usize = 6;

fn default_role() -> String {
    Role::Guest.as_str().to_string()
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: String,
}

/// OAuth2 password-flow style form: `username` may also be an email.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    pub refresh_token: String,
}

fn bad_login() -> AppError {
    AppError::Unauthorized("Incorrect username or password".to_string())
}

fn bad_refresh() -> AppError {
    AppError::Unauthorized("Invalid refresh token".to_string())
}

pub async fn register(
    store: &dyn UserStore,
    bcrypt_cost: u32,
    request: RegisterRequest,
) -> Result<UserView, AppError> {
    let username = request.username.trim().to_string();
    let email = request.email.trim().to_lowercase();

    reject_nul("Username", &username)?;
    reject_nul("Email", &email)?;
    reject_nul("Password", &request.password)?;
    if username.is_empty() {
        return Err(AppError::Validation("Username cannot be empty".to_string()));
    }
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(AppError::Validation("Email address is invalid".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters long"
        )));
    }
    let role: Role = request.role.trim().parse()?;

    if store.email_taken(&email).await? {
        warn!("Register failed, email exists: {email}");
        return Err(AppError::Validation("Email already registered".to_string()));
    }
    if store.username_taken(&username).await? {
        warn!("Register failed, username exists: {username}");
        return Err(AppError::Validation("Username already taken".to_string()));
    }

    let password_hash = hash_password(request.password, bcrypt_cost).await?;
    let user = store
        .insert_user(NewUser {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            role: role.as_str().to_string(),
        })
        .await?;

    info!("User registered: {}", user.email);
    Ok(UserView::from(&user))
}

/// Verifies credentials, applies the lockout policy and issues a token pair.
pub async fn login(
    store: &dyn UserStore,
    keys: &TokenKeys,
    form: LoginForm,
) -> Result<TokenPair, AppError> {
    let identifier = form.username.trim();
    reject_nul("Username", identifier)?;
    reject_nul("Password", &form.password)?;
    let Some(user) = store.find_by_login(identifier).await? else {
        warn!("Login failed: user not found ({identifier})");
        return Err(bad_login());
    };

    if user.is_locked_at(Utc::now()) {
        warn!("Login refused: account locked ({identifier})");
        return Err(AppError::Forbidden(
            "Account temporarily locked after repeated failed logins".to_string(),
        ));
    }

    if !verify_password(form.password, user.password_hash.clone()).await? {
        let (attempts, locked_until) = store
            .record_login_failure(user.id, MAX_FAILED_LOGINS, LOCKOUT_MINUTES)
            .await?;
        warn!("Login failed: wrong password for {identifier} (attempt {attempts})");
        if let Some(until) = locked_until {
            warn!("Account locked until {until}: {identifier}");
        }
        return Err(bad_login());
    }

    if !user.is_enabled() {
        warn!("Login failed: user inactive ({identifier})");
        return Err(AppError::Forbidden("User is inactive".to_string()));
    }

    let tokens = keys.issue_pair(&user.username, &user.role)?;
    store
        .record_login_success(user.id, &tokens.refresh_token)
        .await?;
    info!("Login success for user: {}", user.username);
    Ok(tokens)
}

/// Exchanges the stored refresh token for a new pair, rotating the stored token.
pub async fn refresh(
    store: &dyn UserStore,
    keys: &TokenKeys,
    refresh_token: &str,
) -> Result<TokenPair, AppError> {
    let claims = keys
        .decode(refresh_token, TokenType::Refresh)
        .map_err(|_| bad_refresh())?;

    let user = store
        .find_by_username(&claims.sub)
        .await?
        .ok_or_else(bad_refresh)?;

    if user.refresh_token.as_deref() != Some(refresh_token) {
        warn!("Refresh token mismatch for user: {}", claims.sub);
        return Err(bad_refresh());
    }
    if !user.is_enabled() {
        warn!("Refresh refused, user inactive: {}", claims.sub);
        return Err(bad_refresh());
    }

    let tokens = keys.issue_pair(&user.username, &user.role)?;
    store
        .set_refresh_token(user.id, Some(&tokens.refresh_token))
        .await?;
    info!("Refresh token success for user: {}", user.username);
    Ok(tokens)
}

pub async fn logout(store: &dyn UserStore, user: &UserRow) -> Result<(), AppError> {
    store.set_refresh_token(user.id, None).await?;
    info!("User logged out: {}", user.username);
    Ok(())
}

/// Resolves an access token to a live, active user.
pub async fn resolve_access_token(
    store: &dyn UserStore,
    keys: &TokenKeys,
    token: &str,
) -> Result<UserRow, AppError> {
    let claims = keys.decode(token, TokenType::Access)?;
    match store.find_by_username(&claims.sub).await? {
        Some(user) if user.is_enabled() => Ok(user),
        _ => {
            warn!("User not found or inactive: {}", claims.sub);
            Err(AppError::invalid_credentials())
        }
    }
}
