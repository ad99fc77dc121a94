use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::invalid_on_unique;
use crate::errors::AppError;
use crate::models::user::UserRow;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    /// Already lower-cased.
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

/// Persistence seam for user accounts. Soft-deleted users are invisible to every lookup.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_user(&self, user: NewUser) -> Result<UserRow, AppError>;

    /// Looks a user up by username, or by email when `identifier` matches one.
    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRow>, AppError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRow>, AppError>;

    async fn email_taken(&self, email: &str) -> Result<bool, AppError>;

    async fn username_taken(&self, username: &str) -> Result<bool, AppError>;

    /// Resets the failure counter, clears any lock, stamps `last_login_at`
    /// and stores the freshly issued refresh token.
    async fn record_login_success(&self, user_id: Uuid, refresh_token: &str)
        -> Result<(), AppError>;

    /// Counts one more wrong password in a single write. A lock that has
    /// already expired restarts the count at 1; reaching `max_attempts`
    /// locks the account for `lockout_minutes`. Returns the stored count
    /// and lock.
    async fn record_login_failure(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        lockout_minutes: i32,
    ) -> Result<(i32, Option<DateTime<Utc>>), AppError>;

    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError>;
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserRow, AppError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, status, failed_login_attempts)
            VALUES ($1, $2, $3, $4, $5, 1, 0)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| invalid_on_unique(e, "Username or email already registered"))
    }

    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRow>, AppError> {
        Ok(sqlx::query_as::<_, UserRow>(
            r#"
            SELECT * FROM users
            WHERE deleted_at IS NULL AND (username = $1 OR email = lower($1))
            ORDER BY (username = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRow>, AppError> {
        Ok(sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE username = $1 AND deleted_at IS NULL",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn email_taken(&self, email: &str) -> Result<bool, AppError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND deleted_at IS NULL)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn username_taken(&self, username: &str) -> Result<bool, AppError> {
        Ok(sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 AND deleted_at IS NULL)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        refresh_token: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL, last_login_at = now(),
                refresh_token = $1, updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(refresh_token)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_login_failure(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        lockout_minutes: i32,
    ) -> Result<(i32, Option<DateTime<Utc>>), AppError> {
        // SET expressions all see the old row, so the new count is spelled twice.
        Ok(sqlx::query_as::<_, (i32, Option<DateTime<Utc>>)>(
            r#"
            UPDATE users
            SET failed_login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= now() THEN 1
                    ELSE failed_login_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE
                        WHEN locked_until IS NOT NULL AND locked_until <= now() THEN 1
                        ELSE failed_login_attempts + 1
                    END) >= $2
                    THEN now() + make_interval(mins => $3)
                    ELSE NULL
                END,
                updated_at = now()
            WHERE id = $1
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(user_id)
        .bind(max_attempts)
        .bind(lockout_minutes)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET refresh_token = $1, updated_at = now() WHERE id = $2")
            .bind(refresh_token)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
