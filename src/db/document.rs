//! Document database operations

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use super::{CommitOutcome, DocumentStore, PgStore, StoreError};
use crate::document::model::{Document, DocumentWithTemplate};
use crate::pagination::PageRequest;

const DOCUMENT_WITH_TEMPLATE: &str = r#"
    SELECT d.id, d.user_id, d.template_id, d.storage_path, d.generated_at, d.metadata,
           t.name AS template_name
    FROM documents d
    LEFT JOIN templates t ON t.id = d.template_id
"#;

#[async_trait]
impl DocumentStore for PgStore {
    async fn commit_documents(
        &self,
        template_id: Uuid,
        user_id: Uuid,
        documents: &[Document],
    ) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Holds off a concurrent cascade delete until this transaction ends.
        let template: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM templates WHERE id = $1 AND user_id = $2 FOR SHARE",
        )
        .bind(template_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        if template.is_none() {
            tx.rollback().await?;
            return Ok(CommitOutcome::TemplateMissing);
        }

        for document in documents {
            sqlx::query(
                r#"
                INSERT INTO documents (id, user_id, template_id, storage_path, generated_at, metadata)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(document.id)
            .bind(document.user_id)
            .bind(document.template_id)
            .bind(&document.storage_path)
            .bind(document.generated_at)
            .bind(&document.metadata)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn get_document(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DocumentWithTemplate>, StoreError> {
        let query = format!("{} WHERE d.id = $1 AND d.user_id = $2", DOCUMENT_WITH_TEMPLATE);
        Ok(sqlx::query_as::<_, DocumentWithTemplate>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_documents(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<DocumentWithTemplate>, i64), StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let query = format!(
            "{} WHERE d.user_id = $1 ORDER BY d.generated_at DESC LIMIT $2 OFFSET $3",
            DOCUMENT_WITH_TEMPLATE
        );
        let items = sqlx::query_as::<_, DocumentWithTemplate>(&query)
            .bind(user_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    async fn delete_document(&self, id: Uuid, user_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(sqlx::query_scalar(
            "DELETE FROM documents WHERE id = $1 AND user_id = $2 RETURNING storage_path",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn all_storage_paths(&self) -> Result<HashSet<String>, StoreError> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT storage_path FROM documents")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths.into_iter().collect())
    }
}
