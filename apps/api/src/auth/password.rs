use anyhow::anyhow;
use tracing::warn;

use crate::errors::AppError;

/// Hashes on the blocking pool; bcrypt is deliberately slow.
pub async fn hash_password(password: String, cost: u32) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| anyhow!("password hashing task failed: {e}"))?
        .map_err(|e| AppError::Internal(anyhow!("password hashing failed: {e}")))
}

/// Returns `false` for a wrong password and for a hash bcrypt cannot parse.
pub async fn verify_password(password: String, password_hash: String) -> Result<bool, AppError> {
    let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &password_hash))
        .await
        .map_err(|e| anyhow!("password verification task failed: {e}"))?;

    match outcome {
        Ok(matches) => Ok(matches),
        Err(e) => {
            warn!("Stored password hash could not be verified: {e}");
            Ok(false)
        }
    }
}
