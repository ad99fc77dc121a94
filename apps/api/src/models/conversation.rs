use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationSessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_name: String,
    pub session_type: String,
    pub session_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A session joined with aggregate stats over its live messages.
#[derive(Debug, Clone, FromRow)]
pub struct SessionSummaryRow {
    #[sqlx(flatten)]
    pub session: ConversationSessionRow,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationMessageRow {
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
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}
