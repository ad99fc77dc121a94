use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::extract::Principal;
use crate::auth::permissions::authorize;
use crate::errors::AppError;
use crate::extract::AppJson;

#[derive(Debug, Deserialize)]
pub struct ToolCheckRequest {
    pub tool: String,
}

/// POST /agent/authz
/// Answers whether the caller's role may use `tool`.
pub async fn handle_authz(
    principal: Principal,
    AppJson(request): AppJson<ToolCheckRequest>,
) -> Result<Json<Value>, AppError> {
    authorize(&principal.role, &request.tool)?;
    info!(
        "Tool {} authorized for role {} ({})",
        request.tool,
        principal.role,
        principal
            .user
            .as_ref()
            .map_or("api key", |u| u.username.as_str())
    );
    Ok(Json(json!({ "status": "ok" })))
}
