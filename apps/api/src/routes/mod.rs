pub mod agent;
pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::auth::handlers as auth;
use crate::conversations::handlers as conversations;
use crate::documents::handlers as documents;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Auth
        .route("/auth/register", post(auth::handle_register))
        .route("/auth/login", post(auth::handle_login))
        .route("/auth/refresh", post(auth::handle_refresh))
        .route("/auth/logout", post(auth::handle_logout))
        .route("/auth/me", get(auth::handle_me))
        // Agent tools
        .route("/agent/authz", post(agent::handle_authz))
        // Documents
        .route("/documents/upload", post(documents::handle_create_document))
        .route("/documents/:doc_type", get(documents::handle_list_documents))
        .route(
            "/documents/:doc_type/:doc_id",
            get(documents::handle_get_document)
                .patch(documents::handle_rename_document)
                .delete(documents::handle_delete_document),
        )
        .route(
            "/documents/:doc_type/:doc_id/versions",
            get(documents::handle_list_versions).post(documents::handle_add_version),
        )
        .route(
            "/documents/:doc_type/:doc_id/versions/:version_number",
            get(documents::handle_get_version),
        )
        .route(
            "/documents/:doc_type/:doc_id/versions/:version_number/verify",
            get(documents::handle_verify_version),
        )
        .route(
            "/documents/:doc_type/:doc_id/revert",
            post(documents::handle_revert_document),
        )
        // Conversations
        .route(
            "/conversations/sessions",
            get(conversations::handle_list_sessions).post(conversations::handle_create_session),
        )
        .route(
            "/conversations/sessions/:session_id",
            get(conversations::handle_get_session)
                .put(conversations::handle_update_session)
                .delete(conversations::handle_delete_session),
        )
        .route(
            "/conversations/sessions/:session_id/messages",
            get(conversations::handle_list_messages).post(conversations::handle_add_message),
        )
        .route(
            "/conversations/messages/:message_id",
            delete(conversations::handle_delete_message),
        )
        .with_state(state)
}
