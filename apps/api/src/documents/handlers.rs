//! Axum route handlers for the Documents API.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::extract::CurrentUser;
use crate::documents::checksum::ChecksumReport;
use crate::documents::versioning::{
    self, parse_document_id, AddVersionRequest, CreateDocumentRequest, DocumentView,
    RenameRequest, RevertRequest,
};
use crate::documents::DocType;
use crate::errors::AppError;
use crate::extract::{AppJson, AppPath};
use crate::models::document::DocumentVersionRow;
use crate::state::AppState;

fn parse_target(doc_type: &str, doc_id: &str) -> Result<(DocType, Uuid), AppError> {
    Ok((doc_type.parse()?, parse_document_id(doc_id)?))
}

/// POST /documents/upload
pub async fn handle_create_document(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(request): AppJson<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentView>), AppError> {
    let view = versioning::create_document(state.documents.as_ref(), user.id, request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /documents/:doc_type
pub async fn handle_list_documents(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(doc_type): AppPath<String>,
) -> Result<Json<Vec<DocumentView>>, AppError> {
    let doc_type: DocType = doc_type.parse()?;
    let views = versioning::list_documents(state.documents.as_ref(), user.id, doc_type).await?;
    Ok(Json(views))
}

/// GET /documents/:doc_type/:doc_id
pub async fn handle_get_document(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id)): AppPath<(String, String)>,
) -> Result<Json<DocumentView>, AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    let view = versioning::get_document(state.documents.as_ref(), user.id, doc_type, doc_id).await?;
    Ok(Json(view))
}

/// PATCH /documents/:doc_type/:doc_id
pub async fn handle_rename_document(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id)): AppPath<(String, String)>,
    AppJson(request): AppJson<RenameRequest>,
) -> Result<Json<DocumentView>, AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    let view = versioning::rename_document(
        state.documents.as_ref(),
        user.id,
        doc_type,
        doc_id,
        request,
    )
    .await?;
    Ok(Json(view))
}

/// DELETE /documents/:doc_type/:doc_id
pub async fn handle_delete_document(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id)): AppPath<(String, String)>,
) -> Result<StatusCode, AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    versioning::delete_document(state.documents.as_ref(), user.id, doc_type, doc_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /documents/:doc_type/:doc_id/versions
pub async fn handle_add_version(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id)): AppPath<(String, String)>,
    AppJson(request): AppJson<AddVersionRequest>,
) -> Result<(StatusCode, Json<DocumentView>), AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    let view =
        versioning::add_version(state.documents.as_ref(), user.id, doc_type, doc_id, request)
            .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /documents/:doc_type/:doc_id/versions
pub async fn handle_list_versions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id)): AppPath<(String, String)>,
) -> Result<Json<Vec<DocumentVersionRow>>, AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    let versions =
        versioning::list_versions(state.documents.as_ref(), user.id, doc_type, doc_id).await?;
    Ok(Json(versions))
}

/// GET /documents/:doc_type/:doc_id/versions/:version_number
pub async fn handle_get_version(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id, version_number)): AppPath<(String, String, i32)>,
) -> Result<Json<DocumentVersionRow>, AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    let version = versioning::get_version(
        state.documents.as_ref(),
        user.id,
        doc_type,
        doc_id,
        version_number,
    )
    .await?;
    Ok(Json(version))
}

/// GET /documents/:doc_type/:doc_id/versions/:version_number/verify
pub async fn handle_verify_version(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id, version_number)): AppPath<(String, String, i32)>,
) -> Result<Json<ChecksumReport>, AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    let report = versioning::verify_document_version(
        state.documents.as_ref(),
        user.id,
        doc_type,
        doc_id,
        version_number,
    )
    .await?;
    Ok(Json(report))
}

/// POST /documents/:doc_type/:doc_id/revert
pub async fn handle_revert_document(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath((doc_type, doc_id)): AppPath<(String, String)>,
    AppJson(request): AppJson<RevertRequest>,
) -> Result<Json<DocumentView>, AppError> {
    let (doc_type, doc_id) = parse_target(&doc_type, &doc_id)?;
    let view = versioning::revert_document(
        state.documents.as_ref(),
        user.id,
        doc_type,
        doc_id,
        request.version_number,
    )
    .await?;
    Ok(Json(view))
}
