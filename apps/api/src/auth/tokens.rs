use anyhow::anyhow;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the token holder.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub token_type: TokenType,
    /// Makes every refresh token unique, even when two are minted in the same second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub token_type: &'static str,
    pub refresh_token: String,
}

/// HS256 signing keys plus token lifetimes.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue_pair(&self, username: &str, role: &str) -> Result<TokenPair, AppError> {
        let now = Utc::now();
        let access = Claims {
            sub: username.to_string(),
            role: Some(role.to_string()),
            token_type: TokenType::Access,
            jti: None,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        let refresh = Claims {
            sub: username.to_string(),
            role: None,
            token_type: TokenType::Refresh,
            jti: Some(Uuid::new_v4()),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };
        Ok(TokenPair {
            access_token: self.sign(&access)?,
            token_type: "bearer",
            refresh_token: self.sign(&refresh)?,
        })
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow!("failed to sign token: {e}")))
    }

    /// Decodes and validates signature, expiry and token type.
    pub fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                warn!("JWT decode error: {e}");
                AppError::invalid_credentials()
            })?
            .claims;

        if claims.token_type != expected {
            warn!(
                "Expected {expected:?} token, got {:?} for {}",
                claims.token_type, claims.sub
            );
            return Err(AppError::invalid_credentials());
        }
        Ok(claims)
    }
}
