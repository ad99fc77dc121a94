use std::collections::HashMap;

use anyhow::{bail, Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    pub bcrypt_cost: u32,
    pub cookie_secure: bool,
    pub cors_origin: String,
    /// Static API keys mapped to the role they act as.
    pub api_keys: HashMap<String, String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 10)?,
            jwt_secret: require_env("JWT_SECRET")?,
            access_token_expire_minutes: parse_env("ACCESS_TOKEN_EXPIRE_MINUTES", 60 * 24)?,
            refresh_token_expire_days: parse_env("REFRESH_TOKEN_EXPIRE_DAYS", 7)?,
            bcrypt_cost: parse_env("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            cookie_secure: parse_env("COOKIE_SECURE", true)?,
            cors_origin: std::env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            api_keys: parse_api_keys(&std::env::var("API_KEYS").unwrap_or_default())?,
            port: parse_env("PORT", 8000)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

/// Parses `key=role,key2=role2` into a lookup table.
fn parse_api_keys(raw: &str) -> Result<HashMap<String, String>> {
    let mut keys = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, role)) = pair.split_once('=') else {
            bail!("API_KEYS entry '{pair}' must have the form key=role");
        };
        let (key, role) = (key.trim(), role.trim());
        if key.is_empty() || role.is_empty() {
            bail!("API_KEYS entry '{pair}' has an empty key or role");
        }
        keys.insert(key.to_string(), role.to_string());
    }
    Ok(keys)
}
