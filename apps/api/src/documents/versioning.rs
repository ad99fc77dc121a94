use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::documents::checksum::{content_checksum, verify_version, ChecksumReport};
use crate::documents::store::{DocumentStore, NewDocument, NewVersion};
use crate::documents::{DocType, DEFAULT_CONTENT_FORMAT, MAX_CONTENT_CHARS};
use crate::errors::AppError;
use crate::validation::reject_nul;
use crate::models::document::{DocumentRow, DocumentVersionRow};

const MAX_TITLE_CHARS: usize = 255;
const MAX_FORMAT_CHARS: usize = 32;

fn default_content_format() -> String {
    DEFAULT_CONTENT_FORMAT.to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    #[serde(alias = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default = "default_content_format")]
    pub content_format: String,
}

#[derive(Debug, Deserialize)]
pub struct AddVersionRequest {
    pub content: String,
    #[serde(default = "default_content_format")]
    pub content_format: String,
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    pub version_number: i32,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

/// A document as returned over the API, optionally with its versions (newest first).
#[derive(Debug, Serialize)]
pub struct DocumentView {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub title: String,
    pub current_version_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub versions: Vec<DocumentVersionRow>,
}

impl DocumentView {
    fn new(document: DocumentRow, versions: Vec<DocumentVersionRow>) -> Self {
        Self {
            id: document.id,
            user_id: document.user_id,
            doc_type: document.doc_type,
            title: document.title,
            current_version_id: document.current_version_id,
            created_at: document.created_at,
            updated_at: document.updated_at,
            versions,
        }
    }
}

/// Version numbers start at 1 and follow the highest number ever written.
pub fn next_version_number(current_max: Option<i32>) -> i32 {
    current_max.unwrap_or(0) + 1
}

/// Document ids arrive as raw path segments; anything unparsable is simply not found.
pub fn parse_document_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| document_not_found())
}

fn document_not_found() -> AppError {
    AppError::NotFound("Document not found".to_string())
}

fn version_not_found() -> AppError {
    AppError::NotFound("Version not found".to_string())
}

fn validate_content(content: &str, content_format: &str) -> Result<(), AppError> {
    reject_nul("content", content)?;
    reject_nul("content_format", content_format)?;
    let chars = content.chars().count();
    if chars > MAX_CONTENT_CHARS {
        return Err(AppError::Validation(format!(
            "content is {chars} characters; the limit is {MAX_CONTENT_CHARS}"
        )));
    }
    let format = content_format.trim();
    if format.is_empty() || format.chars().count() > MAX_FORMAT_CHARS {
        return Err(AppError::Validation(format!(
            "content_format must be 1-{MAX_FORMAT_CHARS} characters"
        )));
    }
    Ok(())
}

fn normalize_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    reject_nul("title", title)?;
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

/// Loads a live document owned by `owner`, or 404.
pub async fn load_document(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
) -> Result<DocumentRow, AppError> {
    store
        .find_document(owner, doc_type, document_id)
        .await?
        .ok_or_else(document_not_found)
}

/// Creates a document together with its first version.
pub async fn create_document(
    store: &dyn DocumentStore,
    owner: Uuid,
    request: CreateDocumentRequest,
) -> Result<DocumentView, AppError> {
    let doc_type: DocType = request.doc_type.trim().parse()?;
    let title = normalize_title(&request.title)?;
    validate_content(&request.content, &request.content_format)?;

    let id = Uuid::new_v4();
    let checksum_sha256 = content_checksum(&request.content);
    let (document, version) = store
        .insert_document(NewDocument {
            id,
            user_id: owner,
            doc_type,
            title,
            first_version: NewVersion {
                document_id: id,
                content: request.content,
                content_format: request.content_format.trim().to_string(),
                checksum_sha256,
                created_by: owner,
            },
        })
        .await?;

    Ok(DocumentView::new(document, vec![version]))
}

/// Appends a new immutable version and makes it current.
pub async fn add_version(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
    request: AddVersionRequest,
) -> Result<DocumentView, AppError> {
    validate_content(&request.content, &request.content_format)?;
    load_document(store, owner, doc_type, document_id).await?;

    let checksum_sha256 = content_checksum(&request.content);
    let (document, version) = store
        .append_version(NewVersion {
            document_id,
            content: request.content,
            content_format: request.content_format.trim().to_string(),
            checksum_sha256,
            created_by: owner,
        })
        .await?;

    Ok(DocumentView::new(document, vec![version]))
}

pub async fn get_document(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
) -> Result<DocumentView, AppError> {
    let document = load_document(store, owner, doc_type, document_id).await?;
    let versions = store.list_versions(document_id).await?;
    Ok(DocumentView::new(document, versions))
}

pub async fn list_documents(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
) -> Result<Vec<DocumentView>, AppError> {
    let documents = store.list_documents(owner, doc_type).await?;
    Ok(documents
        .into_iter()
        .map(|d| DocumentView::new(d, Vec::new()))
        .collect())
}

pub async fn list_versions(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
) -> Result<Vec<DocumentVersionRow>, AppError> {
    load_document(store, owner, doc_type, document_id).await?;
    store.list_versions(document_id).await
}

pub async fn get_version(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
    version_number: i32,
) -> Result<DocumentVersionRow, AppError> {
    load_document(store, owner, doc_type, document_id).await?;
    store
        .find_version(document_id, version_number)
        .await?
        .ok_or_else(version_not_found)
}

/// Moves the current pointer back to an existing version. No new version is written.
pub async fn revert_document(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
    version_number: i32,
) -> Result<DocumentView, AppError> {
    let version = get_version(store, owner, doc_type, document_id, version_number).await?;
    let document = store.set_current_version(document_id, version.id).await?;
    info!("Reverted document {document_id} to version {version_number}");
    Ok(DocumentView::new(document, Vec::new()))
}

pub async fn verify_document_version(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
    version_number: i32,
) -> Result<ChecksumReport, AppError> {
    let version = get_version(store, owner, doc_type, document_id, version_number).await?;
    let report = verify_version(&version);
    if !report.is_valid() {
        tracing::warn!(
            "Checksum {:?} for document {document_id} version {version_number}",
            report.status
        );
    }
    Ok(report)
}

pub async fn rename_document(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
    request: RenameRequest,
) -> Result<DocumentView, AppError> {
    let title = normalize_title(&request.title)?;
    load_document(store, owner, doc_type, document_id).await?;
    let document = store.rename_document(document_id, title).await?;
    Ok(DocumentView::new(document, Vec::new()))
}

pub async fn delete_document(
    store: &dyn DocumentStore,
    owner: Uuid,
    doc_type: DocType,
    document_id: Uuid,
) -> Result<(), AppError> {
    load_document(store, owner, doc_type, document_id).await?;
    store.soft_delete_document(document_id).await
}
