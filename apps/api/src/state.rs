use std::sync::Arc;

use crate::auth::store::UserStore;
use crate::auth::tokens::TokenKeys;
use crate::config::Config;
use crate::conversations::store::ConversationStore;
use crate::documents::store::DocumentStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub conversations: Arc<dyn ConversationStore>,
    /// JWT signing keys and lifetimes, built once from config.
    pub tokens: TokenKeys,
    pub config: Config,
}
