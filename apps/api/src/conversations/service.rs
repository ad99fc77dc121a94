use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::conversations::store::{ConversationStore, NewMessage, NewSession, SessionPatch};
use crate::conversations::MessageType;
use crate::errors::AppError;
use crate::validation::{reject_nul, reject_nul_map};
use crate::models::conversation::{
    ConversationMessageRow, ConversationSessionRow, SessionSummaryRow,
};

const MAX_SESSION_NAME_CHARS: usize = 255;
const MAX_SESSION_TYPE_CHARS: usize = 50;
const MAX_ROLE_CHARS: usize = 50;
const MAX_TOOL_NAME_CHARS: usize = 100;

pub const DEFAULT_SESSION_LIMIT: i64 = 50;
pub const MAX_SESSION_LIMIT: i64 = 100;
pub const DEFAULT_MESSAGE_LIMIT: i64 = 100;
pub const MAX_MESSAGE_LIMIT: i64 = 500;

fn default_session_type() -> String {
    "general".to_string()
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub session_name: String,
    #[serde(default = "default_session_type")]
    pub session_type: String,
    #[serde(default)]
    pub session_metadata: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSessionRequest {
    pub session_name: Option<String>,
    pub session_type: Option<String>,
    pub session_metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub message_type: String,
    pub content: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub tool_name: Option<String>,
    pub tool_params: Option<Map<String, Value>>,
    pub tool_result: Option<Map<String, Value>>,
    #[serde(default)]
    pub tokens_used: i32,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSessionsQuery {
    pub session_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub session_name: String,
    pub session_type: String,
    pub session_metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl SessionView {
    fn new(
        session: ConversationSessionRow,
        message_count: i64,
        last_message_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: session.id,
            session_name: session.session_name,
            session_type: session.session_type,
            session_metadata: session.session_metadata,
            created_at: session.created_at,
            updated_at: session.updated_at,
            message_count,
            last_message_at,
        }
    }
}

impl From<SessionSummaryRow> for SessionView {
    fn from(row: SessionSummaryRow) -> Self {
        SessionView::new(row.session, row.message_count, row.last_message_at)
    }
}

#[derive(Debug, Serialize)]
pub struct SessionWithMessages {
    pub session: SessionView,
    pub messages: Vec<ConversationMessageRow>,
}

/// Session ids arrive as raw path segments; anything unparsable is simply not found.
pub fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| session_not_found())
}

pub fn parse_message_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| message_not_found())
}

fn session_not_found() -> AppError {
    AppError::NotFound("Session not found".to_string())
}

fn message_not_found() -> AppError {
    AppError::NotFound("Message not found".to_string())
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), AppError> {
    reject_nul(field, value)?;
    let chars = value.chars().count();
    if chars < min || chars > max {
        return Err(AppError::Validation(format!(
            "{field} must be {min}-{max} characters"
        )));
    }
    Ok(())
}

/// Out-of-range paging is rejected rather than clamped.
fn page(
    limit: Option<i64>,
    offset: Option<i64>,
    default_limit: i64,
    max_limit: i64,
) -> Result<(i64, i64), AppError> {
    let limit = limit.unwrap_or(default_limit);
    if !(1..=max_limit).contains(&limit) {
        return Err(AppError::Validation(format!(
            "limit must be between 1 and {max_limit}"
        )));
    }
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(AppError::Validation("offset must be non-negative".to_string()));
    }
    Ok((limit, offset))
}

async fn ensure_name_free(
    store: &dyn ConversationStore,
    owner: Uuid,
    name: &str,
    excluding: Option<Uuid>,
) -> Result<(), AppError> {
    if store.session_name_taken(owner, name, excluding).await? {
        return Err(AppError::Validation(format!(
            "Session name '{name}' already exists"
        )));
    }
    Ok(())
}

/// Loads a live session owned by `owner`, or 404.
pub async fn load_session(
    store: &dyn ConversationStore,
    owner: Uuid,
    session_id: Uuid,
) -> Result<ConversationSessionRow, AppError> {
    store
        .find_session(owner, session_id)
        .await?
        .ok_or_else(session_not_found)
}

pub async fn create_session(
    store: &dyn ConversationStore,
    owner: Uuid,
    request: CreateSessionRequest,
) -> Result<SessionView, AppError> {
    check_len("session_name", &request.session_name, 1, MAX_SESSION_NAME_CHARS)?;
    check_len("session_type", &request.session_type, 0, MAX_SESSION_TYPE_CHARS)?;
    reject_nul_map("session_metadata", &request.session_metadata)?;
    ensure_name_free(store, owner, &request.session_name, None).await?;

    let session = store
        .insert_session(NewSession {
            id: Uuid::new_v4(),
            user_id: owner,
            session_name: request.session_name,
            session_type: request.session_type,
            session_metadata: Value::Object(request.session_metadata),
        })
        .await?;

    info!("Created session {} for user {owner}", session.id);
    Ok(SessionView::new(session, 0, None))
}

pub async fn list_sessions(
    store: &dyn ConversationStore,
    owner: Uuid,
    query: ListSessionsQuery,
) -> Result<Vec<SessionView>, AppError> {
    let (limit, offset) = page(
        query.limit,
        query.offset,
        DEFAULT_SESSION_LIMIT,
        MAX_SESSION_LIMIT,
    )?;
    let session_type = query.session_type.as_deref().filter(|t| !t.is_empty());
    if let Some(session_type) = session_type {
        reject_nul("session_type", session_type)?;
    }
    let rows = store
        .list_sessions(owner, session_type, limit, offset)
        .await?;
    Ok(rows.into_iter().map(SessionView::from).collect())
}

/// The session with every live message, oldest first.
pub async fn get_session(
    store: &dyn ConversationStore,
    owner: Uuid,
    session_id: Uuid,
) -> Result<SessionWithMessages, AppError> {
    let session = load_session(store, owner, session_id).await?;
    let messages = store.list_messages(session_id, None, 0).await?;
    let last_message_at = messages.last().map(|m| m.created_at);
    let count = messages.len() as i64;
    Ok(SessionWithMessages {
        session: SessionView::new(session, count, last_message_at),
        messages,
    })
}

pub async fn update_session(
    store: &dyn ConversationStore,
    owner: Uuid,
    session_id: Uuid,
    request: UpdateSessionRequest,
) -> Result<SessionView, AppError> {
    load_session(store, owner, session_id).await?;

    if let Some(name) = &request.session_name {
        check_len("session_name", name, 1, MAX_SESSION_NAME_CHARS)?;
        ensure_name_free(store, owner, name, Some(session_id)).await?;
    }
    if let Some(session_type) = &request.session_type {
        check_len("session_type", session_type, 0, MAX_SESSION_TYPE_CHARS)?;
    }
    if let Some(metadata) = &request.session_metadata {
        reject_nul_map("session_metadata", metadata)?;
    }

    let session = store
        .update_session(
            session_id,
            SessionPatch {
                session_name: request.session_name,
                session_type: request.session_type,
                session_metadata: request.session_metadata.map(Value::Object),
            },
        )
        .await?;
    let (count, last_message_at) = store.session_stats(session_id).await?;
    Ok(SessionView::new(session, count, last_message_at))
}

pub async fn delete_session(
    store: &dyn ConversationStore,
    owner: Uuid,
    session_id: Uuid,
) -> Result<(), AppError> {
    load_session(store, owner, session_id).await?;
    store.soft_delete_session(session_id).await
}

pub async fn add_message(
    store: &dyn ConversationStore,
    owner: Uuid,
    session_id: Uuid,
    request: CreateMessageRequest,
) -> Result<ConversationMessageRow, AppError> {
    let message_type: MessageType = request.message_type.parse()?;
    if request.content.is_empty() {
        return Err(AppError::Validation("content cannot be empty".to_string()));
    }
    reject_nul("content", &request.content)?;
    check_len("role", &request.role, 0, MAX_ROLE_CHARS)?;
    if let Some(tool_name) = &request.tool_name {
        check_len("tool_name", tool_name, 0, MAX_TOOL_NAME_CHARS)?;
    }
    for (field, map) in [
        ("tool_params", &request.tool_params),
        ("tool_result", &request.tool_result),
    ] {
        if let Some(map) = map {
            reject_nul_map(field, map)?;
        }
    }
    if request.tokens_used < 0 {
        return Err(AppError::Validation("tokens_used must be non-negative".to_string()));
    }

    load_session(store, owner, session_id).await?;

    store
        .insert_message(NewMessage {
            id: Uuid::new_v4(),
            session_id,
            user_id: owner,
            message_type: message_type.as_str().to_string(),
            content: request.content,
            role: request.role,
            tool_name: request.tool_name,
            tool_params: request.tool_params.map(Value::Object),
            tool_result: request.tool_result.map(Value::Object),
            tokens_used: request.tokens_used,
        })
        .await
}

pub async fn list_messages(
    store: &dyn ConversationStore,
    owner: Uuid,
    session_id: Uuid,
    query: ListMessagesQuery,
) -> Result<Vec<ConversationMessageRow>, AppError> {
    let (limit, offset) = page(
        query.limit,
        query.offset,
        DEFAULT_MESSAGE_LIMIT,
        MAX_MESSAGE_LIMIT,
    )?;
    load_session(store, owner, session_id).await?;
    store.list_messages(session_id, Some(limit), offset).await
}

/// Only the message's author can delete it; anyone else sees 404.
pub async fn delete_message(
    store: &dyn ConversationStore,
    owner: Uuid,
    message_id: Uuid,
) -> Result<(), AppError> {
    store
        .find_message(owner, message_id)
        .await?
        .ok_or_else(message_not_found)?;
    store.soft_delete_message(message_id).await
}
