//! In-memory stores and an app builder for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::store::{NewUser, UserStore};
use crate::auth::tokens::TokenKeys;
use crate::config::Config;
use crate::conversations::store::{ConversationStore, NewMessage, NewSession, SessionPatch};
use crate::documents::store::{DocumentStore, NewDocument, NewVersion};
use crate::documents::versioning::next_version_number;
use crate::documents::DocType;
use crate::errors::AppError;
use crate::models::conversation::{
    ConversationMessageRow, ConversationSessionRow, SessionSummaryRow,
};
use crate::models::document::{DocumentRow, DocumentVersionRow};
use crate::models::user::UserRow;
use crate::state::AppState;

/// Strictly increasing timestamps so ordering assertions never tie.
#[derive(Default)]
struct Clock {
    last: Option<DateTime<Utc>>,
}

impl Clock {
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(next);
        next
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<UserRow>>,
}

impl MemoryUserStore {
    /// Snapshot of a stored row, including fields the trait never returns.
    pub async fn row(&self, username: &str) -> Option<UserRow> {
        let users = self.users.lock().await;
        users.iter().find(|u| u.username == username).cloned()
    }

    /// Overwrites the lockout counters of `username`.
    pub async fn set_lock(
        &self,
        username: &str,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) {
        let mut users = self.users.lock().await;
        if let Some(user) = users.iter_mut().find(|u| u.username == username) {
            user.failed_login_attempts = failed_attempts;
            user.locked_until = locked_until;
        }
    }

    async fn update<F>(&self, user_id: Uuid, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut UserRow),
    {
        let mut users = self.users.lock().await;
        if let Some(user) = users.iter_mut().find(|u| u.id == user_id) {
            apply(user);
            user.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserRow, AppError> {
        let now = Utc::now();
        let row = UserRow {
            id: user.id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            status: 1,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            user_metadata: json!({}),
            refresh_token: None,
            is_active: true,
        };
        self.users.lock().await.push(row.clone());
        Ok(row)
    }

    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRow>, AppError> {
        let users = self.users.lock().await;
        let lowered = identifier.to_lowercase();
        let live = || users.iter().filter(|u| u.deleted_at.is_none());
        Ok(live()
            .find(|u| u.username == identifier)
            .or_else(|| live().find(|u| u.email == lowered))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRow>, AppError> {
        let users = self.users.lock().await;
        Ok(users
            .iter()
            .find(|u| u.username == username && u.deleted_at.is_none())
            .cloned())
    }

    async fn email_taken(&self, email: &str) -> Result<bool, AppError> {
        let users = self.users.lock().await;
        Ok(users
            .iter()
            .any(|u| u.email == email && u.deleted_at.is_none()))
    }

    async fn username_taken(&self, username: &str) -> Result<bool, AppError> {
        let users = self.users.lock().await;
        Ok(users
            .iter()
            .any(|u| u.username == username && u.deleted_at.is_none()))
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        refresh_token: &str,
    ) -> Result<(), AppError> {
        let refresh_token = refresh_token.to_string();
        self.update(user_id, |u| {
            u.failed_login_attempts = 0;
            u.locked_until = None;
            u.last_login_at = Some(Utc::now());
            u.refresh_token = Some(refresh_token);
        })
        .await
    }

    async fn record_login_failure(
        &self,
        user_id: Uuid,
        max_attempts: i32,
        lockout_minutes: i32,
    ) -> Result<(i32, Option<DateTime<Utc>>), AppError> {
        let mut users = self.users.lock().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        let now = Utc::now();
        let attempts = match user.locked_until {
            Some(until) if until <= now => 1,
            _ => user.failed_login_attempts + 1,
        };
        user.failed_login_attempts = attempts;
        user.locked_until = (attempts >= max_attempts)
            .then(|| now + Duration::minutes(i64::from(lockout_minutes)));
        user.updated_at = now;
        Ok((attempts, user.locked_until))
    }

    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError> {
        let refresh_token = refresh_token.map(String::from);
        self.update(user_id, |u| u.refresh_token = refresh_token).await
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DocumentTables {
    clock: Clock,
    documents: Vec<DocumentRow>,
    versions: Vec<DocumentVersionRow>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    tables: Mutex<DocumentTables>,
}

fn version_row(number: i32, version: NewVersion, at: DateTime<Utc>) -> DocumentVersionRow {
    DocumentVersionRow {
        id: Uuid::new_v4(),
        document_id: version.document_id,
        version_number: number,
        content: version.content,
        content_format: version.content_format,
        checksum_sha256: Some(version.checksum_sha256),
        created_by: Some(version.created_by),
        created_at: at,
        deleted_at: None,
    }
}

fn live_document(tables: &mut DocumentTables, document_id: Uuid) -> Result<&mut DocumentRow, AppError> {
    tables
        .documents
        .iter_mut()
        .find(|d| d.id == document_id && d.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound(format!("Document {document_id} not found")))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_document(
        &self,
        doc: NewDocument,
    ) -> Result<(DocumentRow, DocumentVersionRow), AppError> {
        let mut tables = self.tables.lock().await;
        let now = tables.clock.tick();
        let version = version_row(next_version_number(None), doc.first_version, now);
        let document = DocumentRow {
            id: doc.id,
            user_id: doc.user_id,
            doc_type: doc.doc_type.as_str().to_string(),
            title: doc.title,
            current_version_id: Some(version.id),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.documents.push(document.clone());
        tables.versions.push(version.clone());
        Ok((document, version))
    }

    async fn find_document(
        &self,
        user_id: Uuid,
        doc_type: DocType,
        document_id: Uuid,
    ) -> Result<Option<DocumentRow>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .documents
            .iter()
            .find(|d| {
                d.id == document_id
                    && d.user_id == user_id
                    && d.doc_type == doc_type.as_str()
                    && d.deleted_at.is_none()
            })
            .cloned())
    }

    async fn list_documents(
        &self,
        user_id: Uuid,
        doc_type: DocType,
    ) -> Result<Vec<DocumentRow>, AppError> {
        let tables = self.tables.lock().await;
        let mut docs: Vec<DocumentRow> = tables
            .documents
            .iter()
            .filter(|d| {
                d.user_id == user_id && d.doc_type == doc_type.as_str() && d.deleted_at.is_none()
            })
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    async fn append_version(
        &self,
        version: NewVersion,
    ) -> Result<(DocumentRow, DocumentVersionRow), AppError> {
        let mut tables = self.tables.lock().await;
        let document_id = version.document_id;
        live_document(&mut tables, document_id)?;

        let current_max = tables
            .versions
            .iter()
            .filter(|v| v.document_id == document_id)
            .map(|v| v.version_number)
            .max();
        let now = tables.clock.tick();
        let row = version_row(next_version_number(current_max), version, now);
        tables.versions.push(row.clone());

        let document = live_document(&mut tables, document_id)?;
        document.current_version_id = Some(row.id);
        document.updated_at = now;
        Ok((document.clone(), row))
    }

    async fn list_versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersionRow>, AppError> {
        let tables = self.tables.lock().await;
        let mut versions: Vec<DocumentVersionRow> = tables
            .versions
            .iter()
            .filter(|v| v.document_id == document_id && v.deleted_at.is_none())
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    async fn find_version(
        &self,
        document_id: Uuid,
        version_number: i32,
    ) -> Result<Option<DocumentVersionRow>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .versions
            .iter()
            .find(|v| {
                v.document_id == document_id
                    && v.version_number == version_number
                    && v.deleted_at.is_none()
            })
            .cloned())
    }

    async fn set_current_version(
        &self,
        document_id: Uuid,
        version_id: Uuid,
    ) -> Result<DocumentRow, AppError> {
        let mut tables = self.tables.lock().await;
        let version_live = tables
            .versions
            .iter()
            .any(|v| v.id == version_id && v.document_id == document_id && v.deleted_at.is_none());
        if !version_live {
            return Err(AppError::NotFound("Version not found".to_string()));
        }
        let now = tables.clock.tick();
        let document = live_document(&mut tables, document_id)?;
        document.current_version_id = Some(version_id);
        document.updated_at = now;
        Ok(document.clone())
    }

    async fn rename_document(
        &self,
        document_id: Uuid,
        title: String,
    ) -> Result<DocumentRow, AppError> {
        let mut tables = self.tables.lock().await;
        let now = tables.clock.tick();
        let document = live_document(&mut tables, document_id)?;
        document.title = title;
        document.updated_at = now;
        Ok(document.clone())
    }

    async fn soft_delete_document(&self, document_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let now = tables.clock.tick();
        live_document(&mut tables, document_id)?.deleted_at = Some(now);
        for version in tables
            .versions
            .iter_mut()
            .filter(|v| v.document_id == document_id && v.deleted_at.is_none())
        {
            version.deleted_at = Some(now);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ConversationTables {
    clock: Clock,
    sessions: Vec<ConversationSessionRow>,
    messages: Vec<ConversationMessageRow>,
}

impl ConversationTables {
    fn live_messages(&self, session_id: Uuid) -> Vec<ConversationMessageRow> {
        let mut messages: Vec<ConversationMessageRow> = self
            .messages
            .iter()
            .filter(|m| m.session_id == session_id && m.deleted_at.is_none())
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages
    }

    fn stats(&self, session_id: Uuid) -> (i64, Option<DateTime<Utc>>) {
        let messages = self.live_messages(session_id);
        (
            messages.len() as i64,
            messages.last().map(|m| m.created_at),
        )
    }

    fn live_session(&mut self, session_id: Uuid) -> Result<&mut ConversationSessionRow, AppError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.deleted_at.is_none())
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
    }

    fn name_taken(&self, user_id: Uuid, name: &str, excluding: Option<Uuid>) -> bool {
        self.sessions.iter().any(|s| {
            s.user_id == user_id
                && s.session_name == name
                && s.deleted_at.is_none()
                && Some(s.id) != excluding
        })
    }
}

#[derive(Default)]
pub struct MemoryConversationStore {
    tables: Mutex<ConversationTables>,
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn insert_session(&self, session: NewSession) -> Result<ConversationSessionRow, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.name_taken(session.user_id, &session.session_name, None) {
            return Err(AppError::Validation(format!(
                "Session name '{}' already exists",
                session.session_name
            )));
        }
        let now = tables.clock.tick();
        let row = ConversationSessionRow {
            id: session.id,
            user_id: session.user_id,
            session_name: session.session_name,
            session_type: session.session_type,
            session_metadata: session.session_metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        tables.sessions.push(row.clone());
        Ok(row)
    }

    async fn find_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<Option<ConversationSessionRow>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .sessions
            .iter()
            .find(|s| s.id == session_id && s.user_id == user_id && s.deleted_at.is_none())
            .cloned())
    }

    async fn session_name_taken(
        &self,
        user_id: Uuid,
        name: &str,
        excluding: Option<Uuid>,
    ) -> Result<bool, AppError> {
        Ok(self.tables.lock().await.name_taken(user_id, name, excluding))
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        session_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SessionSummaryRow>, AppError> {
        let tables = self.tables.lock().await;
        let mut sessions: Vec<&ConversationSessionRow> = tables
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.deleted_at.is_none())
            .filter(|s| session_type.map_or(true, |t| s.session_type == t))
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|s| {
                let (message_count, last_message_at) = tables.stats(s.id);
                SessionSummaryRow {
                    session: s.clone(),
                    message_count,
                    last_message_at,
                }
            })
            .collect())
    }

    async fn session_stats(
        &self,
        session_id: Uuid,
    ) -> Result<(i64, Option<DateTime<Utc>>), AppError> {
        Ok(self.tables.lock().await.stats(session_id))
    }

    async fn update_session(
        &self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<ConversationSessionRow, AppError> {
        let mut tables = self.tables.lock().await;
        let now = tables.clock.tick();
        let session = tables.live_session(session_id)?;
        if let Some(name) = patch.session_name {
            session.session_name = name;
        }
        if let Some(session_type) = patch.session_type {
            session.session_type = session_type;
        }
        if let Some(metadata) = patch.session_metadata {
            session.session_metadata = metadata;
        }
        session.updated_at = now;
        Ok(session.clone())
    }

    async fn soft_delete_session(&self, session_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let now = tables.clock.tick();
        tables.live_session(session_id)?.deleted_at = Some(now);
        for message in tables
            .messages
            .iter_mut()
            .filter(|m| m.session_id == session_id && m.deleted_at.is_none())
        {
            message.deleted_at = Some(now);
        }
        Ok(())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<ConversationMessageRow, AppError> {
        let mut tables = self.tables.lock().await;
        let now = tables.clock.tick();
        tables.live_session(message.session_id)?.updated_at = now;
        let row = ConversationMessageRow {
            id: message.id,
            session_id: message.session_id,
            user_id: message.user_id,
            message_type: message.message_type,
            content: message.content,
            role: message.role,
            tool_name: message.tool_name,
            tool_params: message.tool_params,
            tool_result: message.tool_result,
            tokens_used: message.tokens_used,
            created_at: now,
            deleted_at: None,
        };
        tables.messages.push(row.clone());
        Ok(row)
    }

    async fn list_messages(
        &self,
        session_id: Uuid,
        limit: Option<i64>,
        offset: i64,
    ) -> Result<Vec<ConversationMessageRow>, AppError> {
        let messages = self.tables.lock().await.live_messages(session_id);
        let window = messages.into_iter().skip(offset as usize);
        Ok(match limit {
            Some(limit) => window.take(limit as usize).collect(),
            None => window.collect(),
        })
    }

    async fn find_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<ConversationMessageRow>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .messages
            .iter()
            .find(|m| m.id == message_id && m.user_id == user_id && m.deleted_at.is_none())
            .cloned())
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let now = tables.clock.tick();
        if let Some(message) = tables
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.deleted_at.is_none())
        {
            message.deleted_at = Some(now);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub const TEST_API_KEY: &str = "test-key";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        db_max_connections: 1,
        jwt_secret: "router-test-secret".to_string(),
        access_token_expire_minutes: 30,
        refresh_token_expire_days: 7,
        bcrypt_cost: 4,
        cookie_secure: false,
        cors_origin: "http://localhost:3000".to_string(),
        api_keys: HashMap::from([(TEST_API_KEY.to_string(), "student".to_string())]),
        port: 0,
        rust_log: "debug".to_string(),
    }
}

/// App state wired to fresh in-memory stores.
pub fn test_state() -> AppState {
    let config = test_config();
    AppState {
        users: Arc::new(MemoryUserStore::default()),
        documents: Arc::new(MemoryDocumentStore::default()),
        conversations: Arc::new(MemoryConversationStore::default()),
        tokens: TokenKeys::new(
            &config.jwt_secret,
            Duration::minutes(config.access_token_expire_minutes),
            Duration::days(config.refresh_token_expire_days),
        ),
        config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::build_router;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<String>, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookies = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, cookies, body)
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    /// Registers and logs in; returns (access_token, refresh_token, set-cookie headers).
    async fn sign_up(app: &Router, username: &str, role: &str) -> (String, String, Vec<String>) {
        let (status, _, _) = send(
            app,
            json_request(
                "POST",
                "/auth/register",
                None,
                json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "secret123",
                    "role": role,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let login = Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("username={username}&password=secret123")))
            .unwrap();
        let (status, cookies, body) = send(app, login).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        (
            body["access_token"].as_str().unwrap().to_string(),
            body["refresh_token"].as_str().unwrap().to_string(),
            cookies,
        )
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(test_state());
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_login_sets_cookies_and_cookie_authenticates() {
        let app = build_router(test_state());
        let (access, _, cookies) = sign_up(&app, "alice", "student").await;

        assert!(cookies
            .iter()
            .any(|c| c.starts_with("access_token=") && c.contains("HttpOnly")));
        assert!(cookies
            .iter()
            .any(|c| c.starts_with("last_page=/dashboard;") && !c.contains("%2F")));

        let me = Request::builder()
            .uri("/auth/me")
            .header(header::COOKIE, format!("access_token={access}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, me).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");
        assert!(body.get("password_hash").is_none());
        assert!(body["created_at"].is_string());
        assert!(body["last_login_at"].is_string());
    }

    #[tokio::test]
    async fn test_unauthenticated_requests_are_rejected() {
        let app = build_router(test_state());
        let request = Request::builder().uri("/auth/me").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "Not authenticated");

        let (status, _, _) = send(&app, get("/documents/resume", "garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_via_query_param() {
        let app = build_router(test_state());
        let (_, refresh, _) = sign_up(&app, "bob", "guest").await;

        let request = Request::builder()
            .method("POST")
            .uri(format!("/auth/refresh?refresh_token={refresh}"))
            .body(Body::empty())
            .unwrap();
        let (status, cookies, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(body["refresh_token"].as_str(), Some(refresh.as_str()));
        assert!(cookies.iter().any(|c| c.starts_with("access_token=")));
    }

    #[tokio::test]
    async fn test_authz_by_role_and_api_key() {
        let app = build_router(test_state());
        let (guest, _, _) = sign_up(&app, "gina", "guest").await;

        let basic = json_request("POST", "/agent/authz", Some(&guest), json!({"tool": "tool_basic"}));
        let (status, _, body) = send(&app, basic).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let uni = json_request("POST", "/agent/authz", Some(&guest), json!({"tool": "tool_university"}));
        let (status, _, body) = send(&app, uni).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            body["error"]["message"],
            "Insufficient permissions for this tool tool_university"
        );

        // The configured key acts as a student.
        let keyed = Request::builder()
            .method("POST")
            .uri("/agent/authz")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", TEST_API_KEY)
            .body(Body::from(json!({"tool": "tool_university"}).to_string()))
            .unwrap();
        let (status, _, _) = send(&app, keyed).await;
        assert_eq!(status, StatusCode::OK);

        let bad_key = Request::builder()
            .method("POST")
            .uri("/agent/authz")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", "nope")
            .body(Body::from(json!({"tool": "tool_basic"}).to_string()))
            .unwrap();
        let (status, _, body) = send(&app, bad_key).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["message"], "Invalid API Key");
    }

    #[tokio::test]
    async fn test_document_version_flow() {
        let app = build_router(test_state());
        let (token, _, _) = sign_up(&app, "carol", "student").await;

        let (status, _, created) = send(
            &app,
            json_request(
                "POST",
                "/documents/upload",
                Some(&token),
                json!({"type": "resume", "title": "CV", "content": "v1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _, _) = send(
            &app,
            json_request(
                "POST",
                &format!("/documents/resume/{id}/versions"),
                Some(&token),
                json!({"content": "v2"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, v1) = send(&app, get(&format!("/documents/resume/{id}/versions/1"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v1["content"], "v1");

        let (status, _, verified) =
            send(&app, get(&format!("/documents/resume/{id}/versions/2/verify"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verified["status"], "valid");

        let (status, _, reverted) = send(
            &app,
            json_request(
                "POST",
                &format!("/documents/resume/{id}/revert"),
                Some(&token),
                json!({"version_number": 1}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reverted["current_version_id"], v1["id"]);

        let (status, _, doc) = send(&app, get(&format!("/documents/resume/{id}"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(doc["versions"].as_array().unwrap().len(), 2);

        // Wrong type in the path hides the document; unknown type is rejected.
        let (status, _, _) = send(&app, get(&format!("/documents/sop/{id}"), &token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&app, get("/documents/cv", &token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = send(&app, get("/documents/resume/not-a-uuid", &token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_content_is_bad_request() {
        let app = build_router(test_state());
        let (token, _, _) = sign_up(&app, "dan", "student").await;
        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/documents/upload",
                Some(&token),
                json!({"type": "sop", "content": "x".repeat(5001)}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_nul_in_content_is_bad_request() {
        let app = build_router(test_state());
        let (token, _, _) = sign_up(&app, "nora", "student").await;
        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/documents/upload",
                Some(&token),
                json!({"type": "letter", "content": "a\u{0}b"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_extractor_rejections_use_error_envelope() {
        let app = build_router(test_state());
        let (token, _, _) = sign_up(&app, "eve", "student").await;

        let malformed = Request::builder()
            .method("POST")
            .uri("/conversations/sessions")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from("{\"session_name\": "))
            .unwrap();
        let (status, _, body) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _, body) = send(
            &app,
            json_request("POST", "/conversations/sessions", Some(&token), json!({"session_type": "chat"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let id = uuid::Uuid::new_v4();
        let (status, _, body) =
            send(&app, get(&format!("/documents/resume/{id}/versions/abc"), &token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _, body) = send(
            &app,
            get("/conversations/sessions?limit=many", &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].is_string());

        let login = Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=eve"))
            .unwrap();
        let (status, _, body) = send(&app, login).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_conversation_flow() {
        let app = build_router(test_state());
        let (token, _, _) = sign_up(&app, "erin", "student").await;

        let (status, _, session) = send(
            &app,
            json_request(
                "POST",
                "/conversations/sessions",
                Some(&token),
                json!({"session_name": "Planning", "session_metadata": {"school": "MIT"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session["message_count"], 0);
        let sid = session["id"].as_str().unwrap().to_string();

        let (status, _, _) = send(
            &app,
            json_request(
                "POST",
                "/conversations/sessions",
                Some(&token),
                json!({"session_name": "Planning"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, message) = send(
            &app,
            json_request(
                "POST",
                &format!("/conversations/sessions/{sid}/messages"),
                Some(&token),
                json!({"message_type": "user", "content": "Which schools?"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["role"], "user");
        let mid = message["id"].as_str().unwrap().to_string();

        let (status, _, listed) = send(&app, get("/conversations/sessions?limit=10", &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["message_count"], 1);

        let (status, _, _) = send(&app, get("/conversations/sessions?limit=101", &token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, full) = send(&app, get(&format!("/conversations/sessions/{sid}"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(full["session"]["session_metadata"]["school"], "MIT");
        assert_eq!(full["messages"][0]["content"], "Which schools?");

        let (status, _, _) = send(
            &app,
            json_request("DELETE", &format!("/conversations/messages/{mid}"), Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = send(
            &app,
            json_request("DELETE", &format!("/conversations/sessions/{sid}"), Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Session deleted successfully");

        let (status, _, body) = send(&app, get(&format!("/conversations/sessions/{sid}"), &token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "Session not found");
    }

    #[tokio::test]
    async fn test_sessions_invisible_to_other_users() {
        let app = build_router(test_state());
        let (owner, _, _) = sign_up(&app, "fay", "student").await;
        let (other, _, _) = sign_up(&app, "gus", "student").await;

        let (_, _, session) = send(
            &app,
            json_request(
                "POST",
                "/conversations/sessions",
                Some(&owner),
                json!({"session_name": "Mine"}),
            ),
        )
        .await;
        let sid = session["id"].as_str().unwrap();

        let (status, _, _) = send(&app, get(&format!("/conversations/sessions/{sid}"), &other)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
