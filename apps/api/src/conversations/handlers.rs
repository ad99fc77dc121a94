//! Axum route handlers for the Conversations API.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::auth::extract::CurrentUser;
use crate::conversations::service::{
    self, parse_message_id, parse_session_id, CreateMessageRequest, CreateSessionRequest,
    ListMessagesQuery, ListSessionsQuery, SessionView, SessionWithMessages, UpdateSessionRequest,
};
use crate::errors::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::models::conversation::ConversationMessageRow;
use crate::state::AppState;

/// POST /conversations/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(request): AppJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let view = service::create_session(state.conversations.as_ref(), user.id, request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /conversations/sessions?session_type=&limit=&offset=
pub async fn handle_list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppQuery(query): AppQuery<ListSessionsQuery>,
) -> Result<Json<Vec<SessionView>>, AppError> {
    let views = service::list_sessions(state.conversations.as_ref(), user.id, query).await?;
    Ok(Json(views))
}

/// GET /conversations/sessions/:session_id
pub async fn handle_get_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(session_id): AppPath<String>,
) -> Result<Json<SessionWithMessages>, AppError> {
    let session_id = parse_session_id(&session_id)?;
    let view = service::get_session(state.conversations.as_ref(), user.id, session_id).await?;
    Ok(Json(view))
}

/// PUT /conversations/sessions/:session_id
pub async fn handle_update_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(session_id): AppPath<String>,
    AppJson(request): AppJson<UpdateSessionRequest>,
) -> Result<Json<SessionView>, AppError> {
    let session_id = parse_session_id(&session_id)?;
    let view =
        service::update_session(state.conversations.as_ref(), user.id, session_id, request)
            .await?;
    Ok(Json(view))
}

/// DELETE /conversations/sessions/:session_id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(session_id): AppPath<String>,
) -> Result<Json<Value>, AppError> {
    let session_id = parse_session_id(&session_id)?;
    service::delete_session(state.conversations.as_ref(), user.id, session_id).await?;
    Ok(Json(json!({ "message": "Session deleted successfully" })))
}

/// POST /conversations/sessions/:session_id/messages
pub async fn handle_add_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(session_id): AppPath<String>,
    AppJson(request): AppJson<CreateMessageRequest>,
) -> Result<(StatusCode, Json<ConversationMessageRow>), AppError> {
    let session_id = parse_session_id(&session_id)?;
    let message =
        service::add_message(state.conversations.as_ref(), user.id, session_id, request).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /conversations/sessions/:session_id/messages?limit=&offset=
pub async fn handle_list_messages(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(session_id): AppPath<String>,
    AppQuery(query): AppQuery<ListMessagesQuery>,
) -> Result<Json<Vec<ConversationMessageRow>>, AppError> {
    let session_id = parse_session_id(&session_id)?;
    let messages =
        service::list_messages(state.conversations.as_ref(), user.id, session_id, query).await?;
    Ok(Json(messages))
}

/// DELETE /conversations/messages/:message_id
pub async fn handle_delete_message(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(message_id): AppPath<String>,
) -> Result<Json<Value>, AppError> {
    let message_id = parse_message_id(&message_id)?;
    service::delete_message(state.conversations.as_ref(), user.id, message_id).await?;
    Ok(Json(json!({ "message": "Message deleted successfully" })))
}
