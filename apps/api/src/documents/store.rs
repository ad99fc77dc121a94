use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::db::conflict_on_unique;
use crate::documents::versioning::next_version_number;
use crate::documents::DocType;
use crate::errors::AppError;
use crate::models::document::{DocumentRow, DocumentVersionRow};

/// A version about to be appended. The store assigns its number.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub document_id: Uuid,
    pub content: String,
    pub content_format: String,
    pub checksum_sha256: String,
    pub created_by: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub doc_type: DocType,
    pub title: String,
    pub first_version: NewVersion,
}

/// Persistence seam for documents and their versions.
///
/// Every read filters out soft-deleted rows. Writes that touch both the
/// document and a version happen atomically.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts the document, its version 1, and points `current_version_id` at it.
    async fn insert_document(
        &self,
        doc: NewDocument,
    ) -> Result<(DocumentRow, DocumentVersionRow), AppError>;

    async fn find_document(
        &self,
        user_id: Uuid,
        doc_type: DocType,
        document_id: Uuid,
    ) -> Result<Option<DocumentRow>, AppError>;

    /// Most recently updated first.
    async fn list_documents(
        &self,
        user_id: Uuid,
        doc_type: DocType,
    ) -> Result<Vec<DocumentRow>, AppError>;

    /// Appends the next numbered version and moves the current pointer to it.
    async fn append_version(
        &self,
        version: NewVersion,
    ) -> Result<(DocumentRow, DocumentVersionRow), AppError>;

    /// Newest first.
    async fn list_versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersionRow>, AppError>;

    async fn find_version(
        &self,
        document_id: Uuid,
        version_number: i32,
    ) -> Result<Option<DocumentVersionRow>, AppError>;

    async fn set_current_version(
        &self,
        document_id: Uuid,
        version_id: Uuid,
    ) -> Result<DocumentRow, AppError>;

    async fn rename_document(&self, document_id: Uuid, title: String)
        -> Result<DocumentRow, AppError>;

    /// Marks the document and all of its versions deleted.
    async fn soft_delete_document(&self, document_id: Uuid) -> Result<(), AppError>;
}

/// PostgreSQL-backed document store.
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn document_gone(document_id: Uuid) -> AppError {
    AppError::NotFound(format!("Document {document_id} not found"))
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_document(
        &self,
        doc: NewDocument,
    ) -> Result<(DocumentRow, DocumentVersionRow), AppError> {
        let NewDocument {
            id,
            user_id,
            doc_type,
            title,
            first_version,
        } = doc;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents (id, user_id, doc_type, title) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(user_id)
        .bind(doc_type.as_str())
        .bind(&title)
        .execute(&mut *tx)
        .await?;

        let version = sqlx::query_as::<_, DocumentVersionRow>(
            r#"
            INSERT INTO document_versions
                (id, document_id, version_number, content, content_format, checksum_sha256, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(next_version_number(None))
        .bind(&first_version.content)
        .bind(&first_version.content_format)
        .bind(&first_version.checksum_sha256)
        .bind(first_version.created_by)
        .fetch_one(&mut *tx)
        .await?;

        let document = sqlx::query_as::<_, DocumentRow>(
            "UPDATE documents SET current_version_id = $1 WHERE id = $2 RETURNING *",
        )
        .bind(version.id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Created {doc_type} document {id} for user {user_id}");
        Ok((document, version))
    }

    async fn find_document(
        &self,
        user_id: Uuid,
        doc_type: DocType,
        document_id: Uuid,
    ) -> Result<Option<DocumentRow>, AppError> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT * FROM documents
            WHERE id = $1 AND user_id = $2 AND doc_type = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(document_id)
        .bind(user_id)
        .bind(doc_type.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_documents(
        &self,
        user_id: Uuid,
        doc_type: DocType,
    ) -> Result<Vec<DocumentRow>, AppError> {
        Ok(sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT * FROM documents
            WHERE user_id = $1 AND doc_type = $2 AND deleted_at IS NULL
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .bind(doc_type.as_str())
        .fetch_all(&self.pool)
        .await?)
    }

    async fn append_version(
        &self,
        version: NewVersion,
    ) -> Result<(DocumentRow, DocumentVersionRow), AppError> {
        let document_id = version.document_id;
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent appends to the same document.
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM documents WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| document_gone(document_id))?;

        // Soft-deleted versions still count: numbers are never reused.
        let current_max: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(version_number) FROM document_versions WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;
        let version_number = next_version_number(current_max);

        let inserted = sqlx::query_as::<_, DocumentVersionRow>(
            r#"
            INSERT INTO document_versions
                (id, document_id, version_number, content, content_format, checksum_sha256, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(version_number)
        .bind(&version.content)
        .bind(&version.content_format)
        .bind(&version.checksum_sha256)
        .bind(version.created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "Concurrent version write, retry the request"))?;

        let document = sqlx::query_as::<_, DocumentRow>(
            r#"
            UPDATE documents SET current_version_id = $1, updated_at = now()
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(inserted.id)
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Appended version {version_number} to document {document_id}");
        Ok((document, inserted))
    }

    async fn list_versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersionRow>, AppError> {
        Ok(sqlx::query_as::<_, DocumentVersionRow>(
            r#"
            SELECT * FROM document_versions
            WHERE document_id = $1 AND deleted_at IS NULL
            ORDER BY version_number DESC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_version(
        &self,
        document_id: Uuid,
        version_number: i32,
    ) -> Result<Option<DocumentVersionRow>, AppError> {
        Ok(sqlx::query_as::<_, DocumentVersionRow>(
            r#"
            SELECT * FROM document_versions
            WHERE document_id = $1 AND version_number = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(document_id)
        .bind(version_number)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_current_version(
        &self,
        document_id: Uuid,
        version_id: Uuid,
    ) -> Result<DocumentRow, AppError> {
        // The subquery keeps the pointer on a live version of this same document.
        sqlx::query_as::<_, DocumentRow>(
            r#"
            UPDATE documents SET current_version_id = $1, updated_at = now()
            WHERE id = $2 AND deleted_at IS NULL
              AND EXISTS (
                  SELECT 1 FROM document_versions
                  WHERE id = $1 AND document_id = $2 AND deleted_at IS NULL
              )
            RETURNING *
            "#,
        )
        .bind(version_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Version not found".to_string()))
    }

    async fn rename_document(
        &self,
        document_id: Uuid,
        title: String,
    ) -> Result<DocumentRow, AppError> {
        sqlx::query_as::<_, DocumentRow>(
            r#"
            UPDATE documents SET title = $1, updated_at = now()
            WHERE id = $2 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(title)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| document_gone(document_id))
    }

    async fn soft_delete_document(&self, document_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE documents SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(document_gone(document_id));
        }

        sqlx::query(
            "UPDATE document_versions SET deleted_at = now() WHERE document_id = $1 AND deleted_at IS NULL",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Soft-deleted document {document_id}");
        Ok(())
    }
}
