use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::db::invalid_on_unique;
use crate::errors::AppError;
use crate::models::conversation::{
    ConversationMessageRow, ConversationSessionRow, SessionSummaryRow,
};

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_name: String,
    pub session_type: String,
    pub session_metadata: Value,
}

/// Fields to overwrite; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub session_name: Option<String>,
    pub session_type: Option<String>,
    pub session_metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub message_type: String,
    pub content: String,
    pub role: String,
    pub tool_name: Option<String>,
    pub tool_params: Option<Value>,
    pub tool_result: Option<Value>,
    pub tokens_used: i32,
}

/// Persistence seam for conversation sessions and messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert_session(&self, session: NewSession) -> Result<ConversationSessionRow, AppError>;

    async fn find_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<ConversationSessionRow>, AppError>;

    /// True when another live session of this user already has `name`.
    async fn session_name_taken(
        &self,
        user_id: Uuid,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool, AppError>;

    /// Most recently updated first, with live message stats.
    async fn list_sessions(
        &self,
        user_id: Uuid,
        session_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SessionSummaryRow>, AppError>;

    /// Count and newest timestamp of live messages.
    async fn session_stats(
        &self,
        session_id: Uuid,
    ) -> Result<(i64, Option<DateTime<Utc>>), AppError>;

    async fn update_session(
        &self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<ConversationSessionRow, AppError>;

    /// Marks the session and every live message in it deleted.
    async fn soft_delete_session(&self, session_id: Uuid) -> Result<(), AppError>;

    /// Inserts the message and bumps the session's `updated_at`.
    async fn insert_message(&self, message: NewMessage) -> Result<ConversationMessageRow, AppError>;

    /// Chronological. `limit = None` returns everything after `offset`.
    async fn list_messages(
        &self,
        session_id: Uuid,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<ConversationMessageRow>, AppError>;

    async fn find_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<ConversationMessageRow>, AppError>;

    async fn soft_delete_message(&self, message_id: Uuid) -> Result<(), AppError>;
}

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn duplicate_name(err: sqlx::Error, name: &str) -> AppError {
    invalid_on_unique(err, &format!("Session name '{name}' already exists"))
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn insert_session(&self, session: NewSession) -> Result<ConversationSessionRow, AppError> {
        sqlx::query_as::<_, ConversationSessionRow>(
            r#"
            INSERT INTO conversation_sessions
                (id, user_id, session_name, session_type, session_metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.session_name)
        .bind(&session.session_type)
        .bind(&session.session_metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| duplicate_name(e, &session.session_name))
    }

    async fn find_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<ConversationSessionRow>, AppError> {
        Ok(sqlx::query_as::<_, ConversationSessionRow>(
            r#"
            SELECT * FROM conversation_sessions
            WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn session_name_taken(
        &self,
        user_id: Uuid,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool, AppError> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM conversation_sessions
                WHERE user_id = $1 AND session_name = $2 AND deleted_at IS NULL
                  AND ($3::uuid IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        session_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SessionSummaryRow>, AppError> {
        Ok(sqlx::query_as::<_, SessionSummaryRow>(
            r#"
            SELECT s.*,
                   COUNT(m.id) AS message_count,
                   MAX(m.created_at) AS last_message_at
            FROM conversation_sessions s
            LEFT JOIN conversation_messages m
                   ON m.session_id = s.id AND m.deleted_at IS NULL
            WHERE s.user_id = $1 AND s.deleted_at IS NULL
              AND ($2::text IS NULL OR s.session_type = $2)
            GROUP BY s.id
            ORDER BY s.updated_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(session_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn session_stats(
        &self,
        session_id: Uuid,
    ) -> Result<(i64, Option<DateTime<Utc>>), AppError> {
        Ok(sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT COUNT(*), MAX(created_at)
            FROM conversation_messages
            WHERE session_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_session(
        &self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<ConversationSessionRow, AppError> {
        let name_for_error = patch.session_name.clone().unwrap_or_default();
        sqlx::query_as::<_, ConversationSessionRow>(
            r#"
            UPDATE conversation_sessions
            SET session_name     = COALESCE($1, session_name),
                session_type     = COALESCE($2, session_type),
                session_metadata = COALESCE($3, session_metadata),
                updated_at       = now()
            WHERE id = $4 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(patch.session_name)
        .bind(patch.session_type)
        .bind(patch.session_metadata)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| duplicate_name(e, &name_for_error))?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    async fn soft_delete_session(&self, session_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE conversation_sessions SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        let messages = sqlx::query(
            "UPDATE conversation_messages SET deleted_at = now() WHERE session_id = $1 AND deleted_at IS NULL",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            "Soft-deleted session {session_id} with {} messages",
            messages.rows_affected()
        );
        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<ConversationMessageRow, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ConversationMessageRow>(
            r#"
            INSERT INTO conversation_messages
                (id, session_id, user_id, message_type, content, role,
                 tool_name, tool_params, tool_result, tokens_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.user_id)
        .bind(&message.message_type)
        .bind(&message.content)
        .bind(&message.role)
        .bind(&message.tool_name)
        .bind(&message.tool_params)
        .bind(&message.tool_result)
        .bind(message.tokens_used)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversation_sessions SET updated_at = now() WHERE id = $1")
            .bind(message.session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn list_messages(
        &self,
        session_id: Uuid,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<ConversationMessageRow>, AppError> {
        // LIMIT NULL means no limit in PostgreSQL.
        Ok(sqlx::query_as::<_, ConversationMessageRow>(
            r#"
            SELECT * FROM conversation_messages
            WHERE session_id = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<ConversationMessageRow>, AppError> {
        Ok(sqlx::query_as::<_, ConversationMessageRow>(
            r#"
            SELECT * FROM conversation_messages
            WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE conversation_messages SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
